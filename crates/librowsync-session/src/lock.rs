//! Per-peer session locks
//!
//! At most one session per peer at a time; sessions with different peers run
//! in parallel.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use librowsync_core::PeerId;

#[derive(Debug, Clone, Default)]
pub struct SessionLocks {
    active: Arc<Mutex<HashSet<PeerId>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn active(&self) -> MutexGuard<'_, HashSet<PeerId>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the lock for `peer`; `None` if a session with it is running
    pub fn try_acquire(&self, peer: PeerId) -> Option<SessionGuard> {
        if !self.active().insert(peer) {
            return None;
        }
        Some(SessionGuard {
            locks: self.clone(),
            peer,
        })
    }

    pub fn is_locked(&self, peer: &PeerId) -> bool {
        self.active().contains(peer)
    }
}

/// Releases the peer's lock on drop
#[derive(Debug)]
pub struct SessionGuard {
    locks: SessionLocks,
    peer: PeerId,
}

impl SessionGuard {
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.locks.active().remove(&self.peer);
    }
}
