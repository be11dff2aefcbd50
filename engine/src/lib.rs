//! Streaming conversation engine for Hearth.
//!
//! [`ChatEngine`] is a synchronous state machine. Decode tasks run on the
//! Tokio runtime and hand events back over per-stream channels; the driver
//! loop calls [`ChatEngine::pump`] to apply them and [`ChatEngine::on_frame`]
//! once per display refresh to commit buffered text.
//!
//! # Foreground ownership
//!
//! Any number of sessions may stream at once. Content always lands in the
//! session that started the stream. Shared UI state (status line, activity
//! panel, last trace id) follows only the stream whose session holds the
//! ownership slot *and* is the active session.

use std::collections::HashMap;
use std::sync::Arc;

use hearth_providers::{ChatRequest, ChatTransport, StreamError, WireMessage};
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TryRecvError;

mod activity;
mod config;
mod errors;
mod flush;
mod ownership;
mod persistence;
mod routing;
mod store;
mod streaming;

pub use activity::{
    ActivityPanel, ActivityPatch, ActivitySink, ActivitySnapshot, AgentEdge, AgentState,
};
pub use config::{
    ApiConfig, AppConfig, ConfigError, EngineSettings, HearthConfig, StreamConfig, config_path,
    default_data_dir,
};
pub use errors::{EMPTY_RESPONSE_NOTICE, FeedbackError, INTERRUPTED_NOTICE, SendError};
pub use flush::FlushBuffer;
pub use hearth_providers;
pub use hearth_types::{
    ChatSession, ClarificationOption, Feedback, Message, MessageError, Role, RoutedAgent,
    SessionId, StreamEvent, TraceId,
};
pub use ownership::StreamOwnership;
pub use persistence::{
    ACTIVE_SESSION_KEY, DurableStore, FileStore, MemoryStore, PersistError, Persisted,
    SELECTED_MODEL_KEY, SESSIONS_KEY,
};
pub use routing::{ContentEffect, EventEffects, SharedEffect, route};
pub use store::SessionStore;
pub use streaming::{StreamMessage, StreamOutcome};

use streaming::{ActiveStream, STREAM_EVENT_BUDGET};

/// Shared foreground UI state outside the activity panel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedView {
    pub status: Option<String>,
    pub last_trace_id: Option<TraceId>,
}

pub struct ChatEngine {
    transport: Arc<dyn ChatTransport>,
    store: SessionStore,
    ownership: StreamOwnership,
    streams: HashMap<SessionId, ActiveStream>,
    activity: Box<dyn ActivitySink>,
    view: SharedView,
    settings: EngineSettings,
    torn_down: bool,
}

impl std::fmt::Debug for ChatEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatEngine")
            .field("store", &self.store)
            .field("owner", &self.ownership.owner())
            .field("streaming", &self.streams.len())
            .field("view", &self.view)
            .finish_non_exhaustive()
    }
}

fn is_foreground(ownership: &StreamOwnership, store: &SessionStore, id: &SessionId) -> bool {
    ownership.is_owned_by(id) && store.active_id() == Some(id)
}

impl ChatEngine {
    /// Load sessions from `durable` and build an engine around them.
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        durable: Box<dyn DurableStore>,
        settings: EngineSettings,
    ) -> Self {
        let store = SessionStore::load(durable, &settings.default_model);
        Self::with_store(transport, store, settings)
    }

    pub fn with_store(
        transport: Arc<dyn ChatTransport>,
        store: SessionStore,
        settings: EngineSettings,
    ) -> Self {
        Self {
            transport,
            store,
            ownership: StreamOwnership::new(),
            streams: HashMap::new(),
            activity: Box::new(ActivityPanel::new()),
            view: SharedView::default(),
            settings,
            torn_down: false,
        }
    }

    /// Replace the default in-memory activity panel.
    #[must_use]
    pub fn with_activity_sink(mut self, sink: Box<dyn ActivitySink>) -> Self {
        self.activity = sink;
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    #[must_use]
    pub fn sessions(&self) -> &[ChatSession] {
        self.store.list()
    }

    #[must_use]
    pub fn session(&self, id: &SessionId) -> Option<&ChatSession> {
        self.store.get(id)
    }

    #[must_use]
    pub fn active_id(&self) -> Option<&SessionId> {
        self.store.active_id()
    }

    #[must_use]
    pub fn active_session(&self) -> Option<&ChatSession> {
        self.store.active()
    }

    #[must_use]
    pub fn view(&self) -> &SharedView {
        &self.view
    }

    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.view.status.as_deref()
    }

    #[must_use]
    pub fn last_trace_id(&self) -> Option<&TraceId> {
        self.view.last_trace_id.as_ref()
    }

    #[must_use]
    pub fn activity(&self) -> ActivitySnapshot {
        self.activity.snapshot()
    }

    #[must_use]
    pub fn owner(&self) -> Option<&SessionId> {
        self.ownership.owner()
    }

    #[must_use]
    pub fn is_streaming(&self, id: &SessionId) -> bool {
        self.streams.contains_key(id)
    }

    #[must_use]
    pub fn streaming_count(&self) -> usize {
        self.streams.len()
    }

    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn is_foreground(&self, id: &SessionId) -> bool {
        is_foreground(&self.ownership, &self.store, id)
    }

    // ========================================================================
    // Session management
    // ========================================================================

    /// Create a session and make it active.
    pub fn new_session(&mut self) -> SessionId {
        let id = self.store.create();
        self.store.set_active(Some(id.clone()));
        id
    }

    /// Change the foreground session. Streams keep running either way.
    pub fn switch_to(&mut self, id: &SessionId) -> bool {
        self.store.set_active(Some(id.clone()))
    }

    pub fn rename_session(&mut self, id: &SessionId, title: &str) -> bool {
        self.store.rename(id, title)
    }

    /// Cancel any stream in the session, then delete it.
    pub fn delete_session(&mut self, id: &SessionId) -> bool {
        self.stop(id);
        self.store.delete(id)
    }

    #[must_use]
    pub fn selected_model(&self) -> &str {
        self.store.selected_model()
    }

    pub fn set_model(&mut self, model: &str) {
        self.store.set_model(model);
    }

    #[must_use]
    pub fn draft(&self, id: &SessionId) -> &str {
        self.store.draft(id)
    }

    pub fn set_draft(&mut self, id: &SessionId, text: &str) {
        self.store.set_draft(id, text);
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Send `text` to the active session, creating one if none is active.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn send(&mut self, text: &str) -> Result<SessionId, SendError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SendError::EmptyMessage);
        }
        let runtime = self.runtime()?;
        if let Some(id) = self.store.active_id()
            && self.streams.contains_key(id)
        {
            return Err(SendError::AlreadyStreaming(id.clone()));
        }
        let id = match self.store.active_id() {
            Some(id) => id.clone(),
            None => self.new_session(),
        };
        self.start_turn(&runtime, id, text.to_string())
    }

    /// Drop the last user turn and its answer, then send the same text again.
    pub fn retry(&mut self, id: &SessionId) -> Result<SessionId, SendError> {
        let runtime = self.runtime()?;
        if self.streams.contains_key(id) {
            return Err(SendError::AlreadyStreaming(id.clone()));
        }
        let session = self
            .store
            .get(id)
            .ok_or_else(|| SendError::UnknownSession(id.clone()))?;
        let Some(user_index) = session.messages.iter().rposition(Message::is_user) else {
            return Err(SendError::NothingToRetry(id.clone()));
        };
        let text = session.messages[user_index].content().to_string();

        self.store.update_messages(id, |mut messages| {
            messages.truncate(user_index);
            messages
        });
        tracing::debug!(session = %id, "Retrying last turn");
        self.start_turn(&runtime, id.clone(), text)
    }

    fn runtime(&self) -> Result<Handle, SendError> {
        if self.torn_down {
            return Err(SendError::ShutDown);
        }
        Handle::try_current().map_err(|_| SendError::NoRuntime)
    }

    fn start_turn(
        &mut self,
        runtime: &Handle,
        id: SessionId,
        text: String,
    ) -> Result<SessionId, SendError> {
        if self.streams.contains_key(&id) {
            return Err(SendError::AlreadyStreaming(id));
        }
        let now = self.store.now();
        let appended = self.store.update_messages(&id, |mut messages| {
            messages.push(Message::user(text, now));
            messages.push(Message::assistant_placeholder());
            messages
        });
        let session = match self.store.get(&id) {
            Some(session) if appended => session,
            _ => return Err(SendError::UnknownSession(id)),
        };

        let request = ChatRequest {
            model: session.model.clone(),
            messages: session
                .messages
                .iter()
                .filter(|m| !m.is_streaming())
                .map(WireMessage::from_message)
                .collect(),
            session_id: id.clone(),
        };
        let stream = streaming::spawn_decode(
            runtime,
            Arc::clone(&self.transport),
            request,
            self.settings.idle_timeout,
        );

        if let Some(displaced) = self.ownership.acquire(id.clone(), stream.abort.clone()) {
            tracing::debug!(session = %displaced, "Stream moved to background");
        }
        self.streams.insert(id.clone(), stream);
        self.store.set_draft(&id, "");

        if self.is_foreground(&id) {
            self.view.status = None;
            self.activity.apply(ActivityPatch::run_started());
        }
        tracing::info!(session = %id, "Stream started");
        Ok(id)
    }

    // ========================================================================
    // Driving
    // ========================================================================

    /// Apply every event the decode tasks have delivered so far.
    ///
    /// Returns the number of channel messages processed.
    pub fn pump(&mut self) -> usize {
        let ids: Vec<SessionId> = self.streams.keys().cloned().collect();
        ids.iter().map(|id| self.pump_stream(id)).sum()
    }

    fn pump_stream(&mut self, id: &SessionId) -> usize {
        let mut processed = 0usize;
        while processed < STREAM_EVENT_BUDGET {
            let Some(stream) = self.streams.get_mut(id) else {
                break;
            };
            let message = match stream.rx.try_recv() {
                Ok(message) => message,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    tracing::warn!(session = %id, "Stream channel disconnected");
                    StreamMessage::Failed(StreamError::Transport("stream disconnected".into()))
                }
            };
            processed += 1;

            match message {
                StreamMessage::Event(event) => self.apply_event(id, event),
                StreamMessage::Finished => self.finish_stream(id, StreamOutcome::Completed),
                StreamMessage::Failed(e) => self.finish_stream(id, StreamOutcome::Failed(e)),
                StreamMessage::Cancelled => self.finish_stream(id, StreamOutcome::Cancelled),
            }
        }
        processed
    }

    fn apply_event(&mut self, id: &SessionId, event: StreamEvent) {
        tracing::trace!(session = %id, kind = event.kind(), "Stream event");
        let effects = route(event);

        if let Some(effect) = effects.content
            && let Some(stream) = self.streams.get_mut(id)
        {
            stream.buffer.apply(effect);
        }
        if let Some(shared) = effects.shared {
            if self.is_foreground(id) {
                self.apply_shared(shared);
            } else {
                tracing::trace!(session = %id, "Dropped shared effect from background stream");
            }
        }
        if effects.finish {
            self.finish_stream(id, StreamOutcome::Completed);
        }
    }

    fn apply_shared(&mut self, effect: SharedEffect) {
        match effect {
            SharedEffect::LastTraceId(trace_id) => self.view.last_trace_id = Some(trace_id),
            SharedEffect::Status(status) => self.view.status = status,
            SharedEffect::TransientStatus(message) => self.view.status = Some(message),
            SharedEffect::Activity(trace) => {
                let patch = ActivityPatch::from_trace(&trace, &self.activity.snapshot());
                self.activity.apply(patch);
            }
            SharedEffect::Delegation(delegation) => {
                let patch = ActivityPatch::from_delegation(delegation, &self.activity.snapshot());
                self.activity.apply(patch);
            }
            SharedEffect::RoutedDisplay { agent, confidence } => {
                self.activity.apply(ActivityPatch::routed(agent, confidence));
            }
        }
    }

    /// Commit every buffer with a pending flush. Call once per display refresh.
    ///
    /// Returns the number of sessions committed.
    pub fn on_frame(&mut self) -> usize {
        let now = self.store.now();
        let Self {
            streams,
            store,
            ownership,
            activity,
            ..
        } = self;

        let mut committed = 0;
        for (id, stream) in streams.iter_mut() {
            if !stream.buffer.take_pending() {
                continue;
            }
            let buffer = &stream.buffer;
            store.update_messages(id, |messages| buffer.commit(messages, now, false));
            committed += 1;

            if !buffer.thinking().is_empty() && is_foreground(ownership, store, id) {
                activity.apply(ActivityPatch::thinking(buffer.thinking()));
            }
        }
        committed
    }

    /// End a stream: release ownership, commit the final text, and seal the message.
    fn finish_stream(&mut self, id: &SessionId, outcome: StreamOutcome) {
        let Some(mut stream) = self.streams.remove(id) else {
            return;
        };
        let foreground = self.is_foreground(id);
        // The owner cleans up shared state even after being backgrounded.
        let was_owner = self.ownership.release_if_owned_by(id);

        stream.buffer.finalize(&outcome);
        let now = self.store.now();
        let buffer = &stream.buffer;
        self.store
            .update_messages(id, |messages| buffer.commit(messages, now, true));

        if foreground && !buffer.thinking().is_empty() {
            self.activity.apply(ActivityPatch::thinking(buffer.thinking()));
        }
        if was_owner {
            self.view.status = None;
            self.activity.apply(ActivityPatch::run_complete());
        }

        match &outcome {
            StreamOutcome::Failed(e) => tracing::warn!(session = %id, "Stream failed: {e}"),
            other => tracing::info!(session = %id, outcome = ?other, "Stream finished"),
        }
    }

    // ========================================================================
    // Cancellation and feedback
    // ========================================================================

    /// Cancel the session's stream, keeping exactly the content received so far.
    pub fn stop(&mut self, id: &SessionId) -> bool {
        let Some(stream) = self.streams.get(id) else {
            return false;
        };
        stream.abort.abort();
        self.finish_stream(id, StreamOutcome::Cancelled);
        true
    }

    /// Cancel whichever stream currently owns the shared UI.
    pub fn stop_owner(&mut self) -> bool {
        let Some(id) = self.ownership.abort_owner() else {
            return false;
        };
        self.finish_stream(&id, StreamOutcome::Cancelled);
        true
    }

    /// Record feedback on an assistant message and report it to the backend.
    ///
    /// The local record is authoritative; the backend call is best-effort and
    /// its failure is only logged.
    pub fn submit_feedback(
        &mut self,
        id: &SessionId,
        index: usize,
        feedback: Feedback,
    ) -> Result<(), FeedbackError> {
        let session = self
            .store
            .get(id)
            .ok_or_else(|| FeedbackError::UnknownSession(id.clone()))?;
        let message = session
            .messages
            .get(index)
            .ok_or(FeedbackError::NoSuchMessage { index })?;
        if message.is_streaming() {
            return Err(FeedbackError::StillStreaming { index });
        }
        if !message.is_assistant() {
            return Err(MessageError::NotAssistant.into());
        }
        if message.feedback().is_some() {
            return Err(MessageError::FeedbackAlreadySet.into());
        }
        let trace_id = message.trace_id().cloned();

        self.store.update_messages(id, |mut messages| {
            if let Some(message) = messages.get_mut(index)
                && let Err(e) = message.set_feedback(feedback)
            {
                tracing::warn!("Feedback not recorded: {e}");
            }
            messages
        });

        let Some(trace_id) = trace_id else {
            tracing::debug!(session = %id, index, "No trace id; feedback kept locally");
            return Ok(());
        };
        match Handle::try_current() {
            Ok(runtime) => {
                let request = self.transport.submit_feedback(trace_id, feedback);
                runtime.spawn(async move {
                    if let Err(e) = request.await {
                        tracing::debug!("Feedback submission failed: {e}");
                    }
                });
            }
            Err(_) => tracing::debug!("No runtime; feedback not reported"),
        }
        Ok(())
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Abort every stream and persist what each had received, sealed.
    ///
    /// Runs on drop. Calling it more than once is a no-op.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        let streams = std::mem::take(&mut self.streams);
        let now = self.store.now();
        for (id, mut stream) in streams {
            stream.abort.abort();
            stream.buffer.finalize(&StreamOutcome::Interrupted);
            let buffer = &stream.buffer;
            self.store
                .update_messages(&id, |messages| buffer.commit(messages, now, true));
            tracing::info!(session = %id, "Stream interrupted by teardown");
        }
        if self.ownership.clear().is_some() {
            self.view.status = None;
            self.activity.apply(ActivityPatch::run_complete());
        }
        self.store.flush();
    }
}

impl Drop for ChatEngine {
    fn drop(&mut self) {
        self.teardown();
    }
}
