use librowsync_core::RowsyncError;
use librowsync_session::{SessionCause, SyncSessionError};
use librowsync_wire::WireError;
use thiserror::Error;

/// Anything a command can fail with
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Store(#[from] RowsyncError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Session(#[from] SyncSessionError),
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Store(RowsyncError::Io(e))
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Store(RowsyncError::Json(e))
    }
}

impl CliError {
    pub fn error_code(&self) -> &'static str {
        match self {
            CliError::Store(e) => e.error_code(),
            CliError::Wire(e) => e.error_code(),
            CliError::Session(e) => e.error_code(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Store(e) => e.exit_code(),
            CliError::Wire(_) => 6,
            CliError::Session(e) => match &e.cause {
                SessionCause::Store(inner) => inner.exit_code(),
                SessionCause::HandshakeMismatch(_) => 4,
                SessionCause::PeerBusy(_) => 5,
                SessionCause::Cancelled => 130,
                _ => 6,
            },
        }
    }

    pub fn suggestions(&self) -> Vec<&'static str> {
        match self {
            CliError::Store(e) => e.suggestions(),
            CliError::Wire(e) if e.is_transient() => {
                vec!["Check that the peer's daemon is running and reachable"]
            }
            CliError::Session(e) => match &e.cause {
                SessionCause::Store(inner) => inner.suggestions(),
                SessionCause::HandshakeMismatch(_) => vec![
                    "The remote replica is not the peer configured under this name",
                    "Run 'rowsync peer list' and compare replica ids",
                ],
                SessionCause::PeerBusy(_) => vec!["A session with this peer is running; retry when it finishes"],
                _ if e.is_timeout() => vec![
                    "The peer stopped responding; nothing was committed",
                    "Raise transport_timeout_ms in config.toml if the link is slow",
                ],
                _ if e.is_retryable() => vec!["Nothing was committed; it is safe to run the sync again"],
                _ => vec![],
            },
            _ => vec![],
        }
    }
}
