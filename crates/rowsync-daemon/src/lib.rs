//! TCP sync server behind `rowsync-daemon`

pub mod error;
pub mod server;

pub use error::DaemonError;
pub use server::{SyncServer, DEFAULT_MAX_SESSIONS};
