//! Conflict resolution
//!
//! Last-writer-wins on the logical clock, ties broken by origin id. The
//! decision is a pure function of the two versions so replay is deterministic.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::types::change::{ChangeRecord, Operation, RowVersion};
use crate::types::conflict::{ConflictRecord, ResolutionReason};

/// How equal-clock conflicts between a delete and a write are decided
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionPolicy {
    /// Clock, then origin id. Deletes get no special treatment.
    #[default]
    Symmetric,
    /// On a clock tie, a delete beats an insert or update
    DeleteWins,
}

impl ResolutionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionPolicy::Symmetric => "symmetric",
            ResolutionPolicy::DeleteWins => "delete-wins",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConflictResolver {
    policy: ResolutionPolicy,
}

impl ConflictResolver {
    pub fn new(policy: ResolutionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ResolutionPolicy {
        self.policy
    }

    /// Rank `a` against `b`. `Greater` means `a` wins.
    ///
    /// `Equal` only happens when both versions name the same (origin, clock),
    /// i.e. they are the same change.
    pub fn compare(&self, a: &RowVersion, b: &RowVersion) -> (Ordering, ResolutionReason) {
        if a.logical_clock != b.logical_clock {
            return (
                a.logical_clock.cmp(&b.logical_clock),
                ResolutionReason::HigherClock,
            );
        }

        if self.policy == ResolutionPolicy::DeleteWins {
            let a_delete = a.operation == Operation::Delete;
            let b_delete = b.operation == Operation::Delete;
            if a_delete != b_delete {
                let ord = if a_delete { Ordering::Greater } else { Ordering::Less };
                return (ord, ResolutionReason::DeletePrecedence);
            }
        }

        (a.origin_id.cmp(&b.origin_id), ResolutionReason::OriginTieBreak)
    }

    /// True if `candidate` should replace `current` as the row's version
    pub fn prevails(&self, candidate: &RowVersion, current: &RowVersion) -> bool {
        self.compare(candidate, current).0 == Ordering::Greater
    }

    /// Decide a conflict between two changes to the same row.
    ///
    /// Symmetric in its arguments: `resolve(a, b)` and `resolve(b, a)` pick
    /// the same winner for the same reason.
    pub fn resolve(&self, a: &ChangeRecord, b: &ChangeRecord) -> ConflictRecord {
        let (ord, reason) = self.compare(&a.version(), &b.version());
        let (winner, loser) = if ord == Ordering::Less { (b, a) } else { (a, b) };
        ConflictRecord {
            table_name: winner.table_name.clone(),
            row_key: winner.row_key.clone(),
            winner: winner.clone(),
            loser: loser.clone(),
            resolution_reason: reason,
        }
    }
}
