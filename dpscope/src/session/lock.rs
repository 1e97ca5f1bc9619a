//! Per-session advisory locks.
//!
//! A guard is held for one load-mutate-save cycle so two turns against the
//! same session cannot interleave. Sessions with different ids never wait
//! on each other. Registry entries live only while some task holds or
//! waits for them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;
use uuid::Uuid;

type Registry = Arc<StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>>;

/// Registry of per-session mutexes.
#[derive(Debug, Default, Clone)]
pub struct SessionLocks {
    locks: Registry,
}

/// Exclusive access to one session; released on drop.
///
/// Dropping the last guard for a session removes its registry entry.
#[derive(Debug)]
pub struct SessionGuard {
    id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Registry,
}

impl SessionGuard {
    /// Session this guard protects.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        // Release the session mutex first so its Arc count reflects only
        // the registry and any waiters.
        drop(self.guard.take());

        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.id);
            trace!(session_id = %self.id, "pruned session lock");
        }
    }
}

impl SessionLocks {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id).or_default())
    }

    fn guard(&self, id: Uuid, guard: OwnedMutexGuard<()>) -> SessionGuard {
        SessionGuard {
            id,
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Wait for exclusive access to a session.
    pub async fn acquire(&self, id: Uuid) -> SessionGuard {
        let lock = self.entry(id);
        trace!(session_id = %id, "waiting for session lock");
        let guard = lock.lock_owned().await;
        self.guard(id, guard)
    }

    /// Try to take the lock without waiting.
    pub fn try_acquire(&self, id: Uuid) -> Option<SessionGuard> {
        match self.entry(id).try_lock_owned() {
            Ok(guard) => Some(self.guard(id, guard)),
            Err(_) => {
                self.prune(id);
                None
            }
        }
    }

    fn prune(&self, id: Uuid) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&id);
        }
    }

    /// Number of sessions currently held or waited on.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no session is held or waited on.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
