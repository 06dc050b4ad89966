//! Sync sessions for rowsync
//!
//! A session moves a pair of replicas through
//! `Idle -> Handshaking -> ExchangingDeltas -> ApplyingRemote -> Committing -> Idle`.
//! Remote batches are staged in memory and written in one transaction when
//! the session commits; a failure at any earlier stage leaves the replica
//! untouched.

pub mod apply;
pub mod cancel;
pub mod coordinator;
pub mod error;
pub mod lock;
pub mod state;

pub use cancel::CancelFlag;
pub use coordinator::{SyncConfig, SyncCoordinator, SyncResult};
pub use error::{SessionCause, SyncSessionError};
pub use lock::{SessionGuard, SessionLocks};
pub use state::{SessionMachine, SessionState};
