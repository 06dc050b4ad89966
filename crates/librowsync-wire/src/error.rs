//! Wire error types

use thiserror::Error;

/// Errors from encoding, decoding and moving bytes between replicas
#[derive(Error, Debug)]
pub enum WireError {
    /// Checksum, magic or framing check failed on decode
    #[error("Corrupt batch: {0}")]
    CorruptBatch(String),

    /// Envelope declares a protocol version this build does not speak
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    /// Checksum passed but the body does not describe a valid value
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Encoding error: {0}")]
    Encode(String),

    /// Send or receive failed
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transport call timed out after {0}ms")]
    Timeout(u64),

    #[error("Frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// Get the error code for JSON output
    pub fn error_code(&self) -> &'static str {
        match self {
            WireError::CorruptBatch(_) => "corrupt_batch",
            WireError::UnsupportedVersion(_) => "unsupported_version",
            WireError::Malformed(_) => "malformed_message",
            WireError::Encode(_) => "internal_error",
            WireError::Transport(_) => "transport_error",
            WireError::Timeout(_) => "timeout",
            WireError::FrameTooLarge(_) => "frame_too_large",
            WireError::Io(_) => "io_error",
        }
    }

    /// Transient failures a caller may retry with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, WireError::Transport(_) | WireError::Timeout(_) | WireError::Io(_))
    }
}

impl From<librowsync_core::RowsyncError> for WireError {
    fn from(e: librowsync_core::RowsyncError) -> Self {
        WireError::Encode(e.to_string())
    }
}
