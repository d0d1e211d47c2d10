//! Registry of open sessions.
//!
//! Every [`DeviceSession`] registers itself on construction and removes
//! itself on disconnect (or when the last clone is dropped). The registry
//! only holds weak references, so it never keeps a session alive; its job
//! is to let shutdown find and close whatever is still open.

use crate::pool::WorkerPool;
use crate::session::{DeviceSession, SessionInner};
use futures::future::join_all;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{error, info};
use uuid::Uuid;

/// Unique identifier of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-wide collection of open sessions.
///
/// Cloning is cheap; clones share the same collection.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<SessionId, Weak<SessionInner>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<SessionId, Weak<SessionInner>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, id: SessionId, session: Weak<SessionInner>) {
        self.entries().insert(id, session);
    }

    pub(crate) fn remove(&self, id: SessionId) -> bool {
        self.entries().remove(&id).is_some()
    }

    #[must_use]
    pub fn contains(&self, id: SessionId) -> bool {
        self.entries().contains_key(&id)
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Snapshot of the sessions that are still alive.
    pub fn live_sessions(&self) -> Vec<DeviceSession> {
        let mut entries = self.entries();
        entries.retain(|_, weak| weak.strong_count() > 0);
        entries
            .values()
            .filter_map(Weak::upgrade)
            .map(DeviceSession::from_inner)
            .collect()
    }

    /// Release every registered session and wait for all of them.
    ///
    /// Each connected terminal is re-enabled before it is disconnected.
    /// Releases run on `pool`. Close failures are logged by the session
    /// and do not stop the drain. Returns the number of sessions closed.
    pub async fn drain(&self, pool: &WorkerPool) -> usize {
        let sessions = self.live_sessions();
        if sessions.is_empty() {
            return 0;
        }
        info!(sessions = sessions.len(), "Closing open device sessions");

        let closes = sessions.into_iter().map(|session| {
            let pool = pool.clone();
            async move {
                let id = session.id();
                let address = session.address().clone();
                if let Err(e) = pool.run(move || session.release()).await {
                    error!(device = %address, session = %id, error = %e, "Failed to close session");
                    false
                } else {
                    true
                }
            }
        });
        let closed = join_all(closes).await.into_iter().filter(|ok| *ok).count();

        self.entries().clear();
        info!(closed, "Device sessions closed");
        closed
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}
