//! The single foreground-ownership slot.
//!
//! Several decode loops may run at once (one per session), but at most one of
//! them owns the shared UI. All reads and writes of the slot go through
//! [`StreamOwnership`] so the "at most one owner" rule lives in one place.

use futures_util::future::AbortHandle;
use hearth_types::SessionId;

#[derive(Debug)]
struct Owner {
    session: SessionId,
    abort: AbortHandle,
}

#[derive(Debug, Default)]
pub struct StreamOwnership {
    slot: Option<Owner>,
}

impl StreamOwnership {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership for `session`.
    ///
    /// A previous owner is displaced but not cancelled: its decode loop keeps
    /// running in the background. Returns the displaced session, if any.
    pub fn acquire(&mut self, session: SessionId, abort: AbortHandle) -> Option<SessionId> {
        let displaced = self.slot.replace(Owner { session, abort });
        displaced.map(|owner| owner.session)
    }

    /// Release the slot if `session` still holds it.
    pub fn release_if_owned_by(&mut self, session: &SessionId) -> bool {
        if self.is_owned_by(session) {
            self.slot = None;
            true
        } else {
            false
        }
    }

    /// Empty the slot unconditionally.
    pub fn clear(&mut self) -> Option<SessionId> {
        self.slot.take().map(|owner| owner.session)
    }

    #[must_use]
    pub fn is_owned_by(&self, session: &SessionId) -> bool {
        self.slot.as_ref().is_some_and(|owner| owner.session == *session)
    }

    #[must_use]
    pub fn owner(&self) -> Option<&SessionId> {
        self.slot.as_ref().map(|owner| &owner.session)
    }

    /// Signal the owner's transport to stop. The slot is left as is; the
    /// orchestrator releases it when it finalizes the stream.
    pub fn abort_owner(&self) -> Option<SessionId> {
        let owner = self.slot.as_ref()?;
        owner.abort.abort();
        Some(owner.session.clone())
    }
}
