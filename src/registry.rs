//! External session handles and the implementation that owns each one.
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::implementation::Implementation;
pub use crate::implementation::ImplementationKind;
use crate::symbols::Operation;

/// Handle given to callers. The owner is part of the identity, so handles
/// from the two implementations can never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId {
    pub owner: ImplementationKind,
    pub id: u32,
}

impl SessionId {
    #[must_use]
    pub const fn new(owner: ImplementationKind, id: u32) -> Self {
        Self { owner, id }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner, self.id)
    }
}

/// A live session. Its owner is the `owner` of the [`SessionId`] it is
/// registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEntry {
    /// Handle the owning implementation knows the session by.
    pub internal: u32,
}

/// Maps external handles to internal sessions.
///
/// The lock is held only while the map is read or updated, never while an
/// implementation is being called.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, SessionEntry>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a session on `implementation` and register it.
    pub fn open(&self, implementation: &Implementation) -> Result<SessionId> {
        let mut internal = 0u32;
        implementation
            .call(Operation::OpenSession, |e| e.open_session(&mut internal))
            .into_result()?;

        let mut sessions = self.sessions();
        let mut id = SessionId::new(implementation.kind(), internal);
        while sessions.contains_key(&id) {
            id.id = id.id.wrapping_add(1);
        }
        sessions.insert(id, SessionEntry { internal });
        trace!("Opened session {} (internal {})", id, internal);
        Ok(id)
    }

    /// Close `id` on its owner. An unknown handle is rejected without any
    /// side effect.
    pub fn close<'a>(
        &self,
        id: SessionId,
        implementation_for: impl FnOnce(ImplementationKind) -> Option<&'a Implementation>,
    ) -> Result<()> {
        let entry = self.sessions().remove(&id).ok_or(Error::InvalidSession(id))?;
        let implementation = implementation_for(id.owner).ok_or(Error::NoImplementation)?;
        trace!("Closing session {}", id);
        implementation
            .call(Operation::CloseSession, |e| e.close_session(entry.internal))
            .into_result()
    }

    #[must_use]
    pub fn lookup(&self, id: SessionId) -> Option<SessionEntry> {
        self.sessions().get(&id).copied()
    }

    /// Remove every session, returning them so the caller can close each on
    /// its owner.
    pub fn drain(&self) -> Vec<(SessionId, SessionEntry)> {
        let mut drained: Vec<_> = self.sessions().drain().collect();
        drained.sort_by_key(|(id, _)| *id);
        drained
    }

    /// Close every live session.
    pub fn close_all<'a>(&self, implementation_for: impl Fn(ImplementationKind) -> Option<&'a Implementation>) {
        for (id, entry) in self.drain() {
            let Some(implementation) = implementation_for(id.owner) else {
                continue;
            };
            let status = implementation.call(Operation::CloseSession, |e| e.close_session(entry.internal));
            if !status.is_success() {
                warn!("Closing session {} during terminate returned {}", id, status);
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
