use thiserror::Error;

/// Main error type for rowsync storage and reconciliation
#[derive(Debug, Error)]
pub enum RowsyncError {
    /// Bad local mutation input; reported to the caller, never retried
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Persisted cursor claims progress for an origin the log has never seen
    #[error("cursor for peer {peer} claims clock {clock} for unknown origin {origin}")]
    CursorUnknownOrigin {
        peer: String,
        origin: String,
        clock: u64,
    },

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database busy: {0}")]
    DbBusy(String),

    /// The replica has observed the highest clock and cannot stamp another local change
    #[error("logical clock exhausted: observed clock {observed} leaves no room for a local change")]
    ClockExhausted { observed: u64 },

    /// Another commit landed after the plan was staged
    #[error("commit plan is stale: staged at generation {staged}, store is at {current}")]
    StalePlan { staged: u64, current: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("ID parse error: {0}")]
    IdParse(#[from] crate::types::ids::IdParseError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sled::transaction::TransactionError<RowsyncError>> for RowsyncError {
    fn from(e: sled::transaction::TransactionError<RowsyncError>) -> Self {
        match e {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => RowsyncError::Sled(e),
        }
    }
}

impl RowsyncError {
    /// Get the error code for JSON output
    pub fn error_code(&self) -> &'static str {
        match self {
            RowsyncError::InvalidRecord(_) => "invalid_record",
            RowsyncError::CursorUnknownOrigin { .. } => "cursor_unknown_origin",
            RowsyncError::InvalidArgs(_) => "invalid_args",
            RowsyncError::NotFound(_) => "not_found",
            RowsyncError::DbBusy(_) => "db_busy",
            RowsyncError::StalePlan { .. } => "stale_plan",
            RowsyncError::ClockExhausted { .. } => "clock_exhausted",
            RowsyncError::Io(_) => "io_error",
            RowsyncError::Sled(_) => "db_error",
            RowsyncError::Json(_) => "internal_error",
            RowsyncError::TomlParse(_) => "invalid_args",
            RowsyncError::TomlSerialize(_) => "internal_error",
            RowsyncError::IdParse(_) => "invalid_args",
            RowsyncError::Encoding(_) => "internal_error",
            RowsyncError::Internal(_) => "internal_error",
        }
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            RowsyncError::InvalidRecord(_) => 2,
            RowsyncError::InvalidArgs(_) => 2,
            RowsyncError::IdParse(_) => 2,
            RowsyncError::TomlParse(_) => 2,
            RowsyncError::NotFound(_) => 3,
            RowsyncError::CursorUnknownOrigin { .. } => 4,
            RowsyncError::DbBusy(_) => 5,
            RowsyncError::StalePlan { .. } => 5,
            RowsyncError::Io(_) => 5,
            RowsyncError::Sled(_) => 5,
            _ => 1,
        }
    }

    /// Get actionable suggestions for fixing the error
    pub fn suggestions(&self) -> Vec<&'static str> {
        match self {
            RowsyncError::NotFound(msg) => {
                if msg.contains("config") {
                    vec!["Run 'rowsync init' to create a replica"]
                } else if msg.contains("peer") {
                    vec!["Run 'rowsync peer list' to see configured peers"]
                } else {
                    vec![]
                }
            }
            RowsyncError::CursorUnknownOrigin { .. } => vec![
                "The stored cursor for this peer is corrupt",
                "Run 'rowsync cursor reset <peer>' to resync from scratch",
            ],
            RowsyncError::DbBusy(_) => vec![
                "Another rowsync process holds the data directory",
                "Stop 'rowsync-daemon' or wait for the other process to finish",
            ],
            RowsyncError::Sled(_) => vec![
                "Run 'rowsync db check' to inspect the store",
                "If problem persists, check disk space and permissions",
            ],
            RowsyncError::IdParse(_) => vec![
                "Replica IDs are 32-character hex strings",
                "Run 'rowsync peer list' to see known replica IDs",
            ],
            _ => vec![],
        }
    }

    /// Create a DbBusy error with process info
    pub fn database_locked(details: Option<&str>) -> Self {
        let msg = match details {
            Some(d) => format!("Database is locked ({})", d),
            None => "Database is locked by another process".to_string(),
        };
        RowsyncError::DbBusy(msg)
    }
}
