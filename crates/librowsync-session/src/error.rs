//! Session error types

use librowsync_core::RowsyncError;
use librowsync_wire::WireError;
use thiserror::Error;

use crate::state::SessionState;

/// Why a session failed
#[derive(Error, Debug)]
pub enum SessionCause {
    /// Peer identity or cursor ownership does not match
    #[error("Handshake mismatch: {0}")]
    HandshakeMismatch(String),

    /// Another session with this peer is running
    #[error("A session with peer {0} is already running")]
    PeerBusy(String),

    #[error("Session cancelled")]
    Cancelled,

    #[error("Illegal session transition {from} -> {to}")]
    IllegalTransition { from: SessionState, to: SessionState },

    #[error("Peer aborted during {stage}: {reason}")]
    PeerAborted { stage: String, reason: String },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Store error: {0}")]
    Store(#[from] RowsyncError),

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),
}

impl SessionCause {
    pub fn error_code(&self) -> &'static str {
        match self {
            SessionCause::HandshakeMismatch(_) => "handshake_mismatch",
            SessionCause::PeerBusy(_) => "peer_busy",
            SessionCause::Cancelled => "cancelled",
            SessionCause::IllegalTransition { .. } => "internal_error",
            SessionCause::PeerAborted { .. } => "peer_aborted",
            SessionCause::UnexpectedMessage(_) => "protocol_error",
            SessionCause::Store(e) => e.error_code(),
            SessionCause::Wire(e) => e.error_code(),
        }
    }
}

/// A failed sync session: the stage it failed in and the cause
#[derive(Error, Debug)]
#[error("Sync session failed during {stage}: {cause}")]
pub struct SyncSessionError {
    pub session_id: Option<String>,
    pub stage: SessionState,
    #[source]
    pub cause: SessionCause,
}

impl SyncSessionError {
    pub fn new(session_id: Option<String>, stage: SessionState, cause: SessionCause) -> Self {
        Self {
            session_id,
            stage,
            cause,
        }
    }

    pub fn error_code(&self) -> &'static str {
        self.cause.error_code()
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.cause, SessionCause::Wire(WireError::Timeout(_)))
    }

    /// Safe to retry the whole session later without operator action
    pub fn is_retryable(&self) -> bool {
        match &self.cause {
            SessionCause::Wire(_) | SessionCause::PeerBusy(_) | SessionCause::PeerAborted { .. } => true,
            SessionCause::Store(RowsyncError::StalePlan { .. }) => true,
            SessionCause::Store(RowsyncError::DbBusy(_)) => true,
            _ => false,
        }
    }
}
