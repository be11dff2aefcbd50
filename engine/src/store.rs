//! Session store: the ordered session list, the active pointer, and drafts.
//!
//! Every mutation of sessions, the active pointer, or the selected model is
//! mirrored to durable storage through [`Persisted`]. Drafts stay in memory.

use std::collections::HashMap;
use std::time::SystemTime;

use hearth_types::{ChatSession, DEFAULT_SESSION_TITLE, Message, SessionId, derive_title};

use crate::errors::INTERRUPTED_NOTICE;
use crate::persistence::{
    ACTIVE_SESSION_KEY, DurableStore, Persisted, SELECTED_MODEL_KEY, SESSIONS_KEY,
};

type Clock = Box<dyn Fn() -> SystemTime + Send>;

pub struct SessionStore {
    durable: Box<dyn DurableStore>,
    sessions: Persisted<Vec<ChatSession>>,
    active: Persisted<Option<SessionId>>,
    model: Persisted<String>,
    drafts: HashMap<SessionId, String>,
    clock: Clock,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.sessions.get().len())
            .field("active", self.active.get())
            .field("model", self.model.get())
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Load persisted state, using `default_model` if no model was ever selected.
    pub fn load(durable: Box<dyn DurableStore>, default_model: &str) -> Self {
        Self::load_with_clock(durable, default_model, Box::new(SystemTime::now))
    }

    pub fn load_with_clock(
        durable: Box<dyn DurableStore>,
        default_model: &str,
        clock: Clock,
    ) -> Self {
        let sessions = Persisted::load(durable.as_ref(), SESSIONS_KEY, Vec::new);
        let active = Persisted::load(durable.as_ref(), ACTIVE_SESSION_KEY, || None);
        let model = Persisted::load(durable.as_ref(), SELECTED_MODEL_KEY, || {
            default_model.to_string()
        });

        let mut store = Self {
            durable,
            sessions,
            active,
            model,
            drafts: HashMap::new(),
            clock,
        };

        let recovered = store.recover_interrupted();
        if recovered > 0 {
            tracing::warn!(recovered, "Sealed messages left streaming by a previous run");
        }
        if let Some(id) = store.active.get().clone()
            && store.get(&id).is_none()
        {
            tracing::debug!(session = %id, "Stored active session no longer exists");
            store.active.set(None);
        }
        store.persist();
        store
    }

    /// Seal messages persisted mid-stream by a process that never finished them.
    fn recover_interrupted(&mut self) -> usize {
        let mut recovered = 0;
        for message in self
            .sessions
            .get_mut()
            .iter_mut()
            .flat_map(|s| s.messages.iter_mut())
            .filter(|m| m.is_streaming())
        {
            if message.content().is_empty()
                && message.thinking().is_none()
                && let Err(e) = message.rewrite_stream(INTERRUPTED_NOTICE, "")
            {
                tracing::warn!("Failed to mark interrupted message: {e}");
            }
            message.seal();
            recovered += 1;
        }
        recovered
    }

    fn persist(&mut self) {
        let durable = self.durable.as_ref();
        self.sessions.sync(durable);
        self.active.sync(durable);
        self.model.sync(durable);
    }

    /// Write any pending changes and force them to stable storage.
    pub fn flush(&mut self) {
        self.persist();
        if let Err(e) = self.durable.flush() {
            tracing::warn!("Failed to flush session state: {e}");
        }
    }

    #[must_use]
    pub fn now(&self) -> SystemTime {
        (self.clock)()
    }

    #[must_use]
    pub fn list(&self) -> &[ChatSession] {
        self.sessions.get()
    }

    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<&ChatSession> {
        self.sessions.get().iter().find(|s| s.id == *id)
    }

    fn get_mut(&mut self, id: &SessionId) -> Option<&mut ChatSession> {
        self.sessions.get_mut().iter_mut().find(|s| s.id == *id)
    }

    #[must_use]
    pub fn active_id(&self) -> Option<&SessionId> {
        self.active.get().as_ref()
    }

    #[must_use]
    pub fn active(&self) -> Option<&ChatSession> {
        self.active_id().and_then(|id| self.get(id))
    }

    /// Point the active session at `id`. Unknown ids are rejected.
    pub fn set_active(&mut self, id: Option<SessionId>) -> bool {
        if let Some(id) = &id
            && self.get(id).is_none()
        {
            return false;
        }
        self.active.set(id);
        self.persist();
        true
    }

    /// Create an empty session with the selected model. Newest sessions come first.
    ///
    /// The new session is not activated.
    pub fn create(&mut self) -> SessionId {
        let id = SessionId::new(uuid::Uuid::new_v4().to_string());
        let session = ChatSession::new(id.clone(), self.model.get().clone(), self.now());
        self.sessions.get_mut().insert(0, session);
        self.persist();
        tracing::debug!(session = %id, "Created session");
        id
    }

    pub fn delete(&mut self, id: &SessionId) -> bool {
        let sessions = self.sessions.get_mut();
        let before = sessions.len();
        sessions.retain(|s| s.id != *id);
        if sessions.len() == before {
            return false;
        }
        if self.active_id() == Some(id) {
            self.active.set(None);
        }
        self.drafts.remove(id);
        self.persist();
        tracing::debug!(session = %id, "Deleted session");
        true
    }

    /// Replace a session's messages with `updater(messages)`.
    ///
    /// Always bumps `updated_at`. While the title is still the placeholder it
    /// is re-derived from the first user message.
    pub fn update_messages(
        &mut self,
        id: &SessionId,
        updater: impl FnOnce(Vec<Message>) -> Vec<Message>,
    ) -> bool {
        let now = self.now();
        let Some(session) = self.get_mut(id) else {
            tracing::debug!(session = %id, "Update for unknown session dropped");
            return false;
        };
        let messages = std::mem::take(&mut session.messages);
        session.messages = updater(messages);
        session.updated_at = now;
        if session.has_default_title()
            && let Some(title) = derive_title(&session.messages)
        {
            session.title = title;
        }
        self.persist();
        true
    }

    /// Override the title. A blank title restores the placeholder and title derivation.
    pub fn rename(&mut self, id: &SessionId, title: &str) -> bool {
        let now = self.now();
        let Some(session) = self.get_mut(id) else {
            return false;
        };
        let title = title.trim();
        session.title = if title.is_empty() {
            derive_title(&session.messages).unwrap_or_else(|| DEFAULT_SESSION_TITLE.to_string())
        } else {
            title.to_string()
        };
        session.updated_at = now;
        self.persist();
        true
    }

    #[must_use]
    pub fn selected_model(&self) -> &str {
        self.model.get()
    }

    /// Select the model used for sessions created from now on.
    pub fn set_model(&mut self, model: &str) {
        self.model.set(model.to_string());
        self.persist();
    }

    #[must_use]
    pub fn draft(&self, id: &SessionId) -> &str {
        self.drafts.get(id).map_or("", String::as_str)
    }

    pub fn set_draft(&mut self, id: &SessionId, text: &str) {
        if text.is_empty() {
            self.drafts.remove(id);
        } else {
            self.drafts.insert(id.clone(), text.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use hearth_types::{ChatSession, DEFAULT_SESSION_TITLE, Message, SessionId};

    use super::SessionStore;
    use crate::errors::INTERRUPTED_NOTICE;
    use crate::persistence::{ACTIVE_SESSION_KEY, MemoryStore, SESSIONS_KEY};

    fn ticking_clock() -> Box<dyn Fn() -> SystemTime + Send> {
        let ticks = Arc::new(AtomicU64::new(0));
        Box::new(move || UNIX_EPOCH + Duration::from_secs(ticks.fetch_add(1, Ordering::SeqCst)))
    }

    fn store_with(memory: &MemoryStore) -> SessionStore {
        SessionStore::load_with_clock(Box::new(memory.clone()), "home-assistant", ticking_clock())
    }

    #[test]
    fn create_does_not_activate() {
        let memory = MemoryStore::new();
        let mut store = store_with(&memory);
        let id = store.create();

        assert!(store.active_id().is_none());
        let session = store.get(&id).unwrap();
        assert_eq!(session.model, "home-assistant");
        assert_eq!(session.title, DEFAULT_SESSION_TITLE);
        assert!(session.messages.is_empty());
        assert_eq!(store.list()[0].id, id);
    }

    #[test]
    fn noop_update_bumps_timestamp_only() {
        let memory = MemoryStore::new();
        let mut store = store_with(&memory);
        let id = store.create();
        store.update_messages(&id, |mut m| {
            m.push(Message::user("Turn on the lights", UNIX_EPOCH));
            m
        });
        store.rename(&id, "Evening routine");
        let before = store.get(&id).unwrap().clone();

        assert!(store.update_messages(&id, |m| m));
        let after = store.get(&id).unwrap();
        assert!(after.updated_at > before.updated_at);
        assert_eq!(after.messages, before.messages);
        assert_eq!(after.title, "Evening routine");
    }

    #[test]
    fn title_derived_only_while_default() {
        let memory = MemoryStore::new();
        let mut store = store_with(&memory);
        let id = store.create();
        store.update_messages(&id, |mut m| {
            m.push(Message::user("Turn on the lights", UNIX_EPOCH));
            m
        });
        assert_eq!(store.get(&id).unwrap().title, "Turn on the lights");

        store.update_messages(&id, |_| vec![Message::user("Something else", UNIX_EPOCH)]);
        assert_eq!(store.get(&id).unwrap().title, "Turn on the lights");

        store.rename(&id, "  ");
        assert_eq!(store.get(&id).unwrap().title, "Something else");
    }

    #[test]
    fn delete_clears_active_and_draft() {
        let memory = MemoryStore::new();
        let mut store = store_with(&memory);
        let id = store.create();
        assert!(store.set_active(Some(id.clone())));
        store.set_draft(&id, "half typed");

        assert!(store.delete(&id));
        assert!(store.active_id().is_none());
        assert_eq!(store.draft(&id), "");
        assert!(!store.delete(&id));
    }

    #[test]
    fn set_active_rejects_unknown_ids() {
        let memory = MemoryStore::new();
        let mut store = store_with(&memory);
        assert!(!store.set_active(Some(SessionId::from("missing"))));
        assert!(store.set_active(None));
    }

    #[test]
    fn drafts_are_not_persisted() {
        let memory = MemoryStore::new();
        let mut store = store_with(&memory);
        let id = store.create();
        let writes = memory.writes();
        store.set_draft(&id, "dim the");
        assert_eq!(store.draft(&id), "dim the");
        assert_eq!(memory.writes(), writes);
    }

    #[test]
    fn reload_does_not_rewrite_storage() {
        let memory = MemoryStore::new();
        {
            let mut store = store_with(&memory);
            let id = store.create();
            store.set_active(Some(id));
        }
        let writes = memory.writes();
        let reloaded = store_with(&memory);
        assert_eq!(reloaded.list().len(), 1);
        assert!(reloaded.active_id().is_some());
        assert_eq!(memory.writes(), writes);
    }

    #[test]
    fn load_seals_interrupted_messages() {
        let memory = MemoryStore::new();
        let mut session = ChatSession::new(SessionId::from("s1"), "m", UNIX_EPOCH);
        session.messages.push(Message::user("hi", UNIX_EPOCH));
        session.messages.push(Message::assistant_placeholder());
        let mut partial = Message::assistant_placeholder();
        partial.rewrite_stream("half an answer", "").unwrap();
        session.messages.push(partial);
        memory.seed(SESSIONS_KEY, serde_json::to_string(&vec![session]).unwrap());
        memory.seed(ACTIVE_SESSION_KEY, "\"gone\"");

        let store = store_with(&memory);
        let messages = &store.list()[0].messages;
        assert!(messages.iter().all(|m| !m.is_streaming()));
        assert_eq!(messages[1].content(), INTERRUPTED_NOTICE);
        assert_eq!(messages[2].content(), "half an answer");
        assert!(store.active_id().is_none());
        assert!(memory.writes() > 0);
    }

    #[test]
    fn selected_model_persists() {
        let memory = MemoryStore::new();
        let mut store = store_with(&memory);
        store.set_model("llama3");
        let id = store.create();
        assert_eq!(store.get(&id).unwrap().model, "llama3");

        let reloaded = store_with(&memory);
        assert_eq!(reloaded.selected_model(), "llama3");
    }
}
