//! Daemon-specific error types

use thiserror::Error;

/// Errors specific to daemon operations
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Failed to bind the listening socket
    #[error("Failed to bind to {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    /// Replica store error
    #[error("Store error: {0}")]
    Store(#[from] librowsync_core::RowsyncError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
