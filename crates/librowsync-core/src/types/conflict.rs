use serde::{Deserialize, Serialize};

use super::change::ChangeRecord;

/// Why the winning record of a conflict won
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionReason {
    /// Strictly higher logical clock
    HigherClock,
    /// Equal clocks, greater origin id
    OriginTieBreak,
    /// Equal clocks, delete preferred by the delete-wins policy
    DeletePrecedence,
}

impl ResolutionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionReason::HigherClock => "higher_clock",
            ResolutionReason::OriginTieBreak => "origin_tie_break",
            ResolutionReason::DeletePrecedence => "delete_precedence",
        }
    }
}

/// Audit entry for two concurrent changes to the same row. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub table_name: String,
    pub row_key: String,
    pub winner: ChangeRecord,
    pub loser: ChangeRecord,
    pub resolution_reason: ResolutionReason,
}
