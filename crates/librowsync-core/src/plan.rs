//! Staged session writes
//!
//! A `CommitPlan` collects everything a session will write: records to append,
//! watermarks to observe, snapshot row operations, conflicts and the new
//! cursor. Nothing touches the store until `ReplicaStore::commit`.

use std::collections::{BTreeMap, HashMap};

use crate::change_log::ChangeLog;
use crate::error::RowsyncError;
use crate::types::change::{ChangeRecord, Operation, Payload};
use crate::types::conflict::ConflictRecord;
use crate::types::cursor::SyncCursor;
use crate::types::ids::{OriginId, PeerId};

/// Final snapshot operation for one row
#[derive(Debug, Clone, PartialEq)]
pub enum RowOp {
    Write(Payload),
    Delete,
}

impl RowOp {
    /// Snapshot operation that makes a row match `record`
    pub fn for_record(record: &ChangeRecord) -> Self {
        match (&record.operation, &record.payload) {
            (Operation::Delete, _) | (_, None) => RowOp::Delete,
            (_, Some(payload)) => RowOp::Write(payload.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanStats {
    /// Records appended to the log
    pub applied: usize,
    pub conflicts: usize,
    /// Records already held, dropped by the watermark check
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct CommitPlan {
    base_generation: u64,
    peer_id: PeerId,
    appended: Vec<ChangeRecord>,
    observed: BTreeMap<OriginId, u64>,
    staged_heads: BTreeMap<OriginId, u64>,
    staged_rows: HashMap<(String, String), ChangeRecord>,
    row_ops: BTreeMap<(String, String), RowOp>,
    conflicts: Vec<ConflictRecord>,
    cursor: SyncCursor,
    stats: PlanStats,
}

impl CommitPlan {
    /// Start a plan against the store generation it was read from
    pub fn new(base_generation: u64, cursor: SyncCursor) -> Self {
        Self {
            base_generation,
            peer_id: cursor.peer_id,
            appended: Vec::new(),
            observed: BTreeMap::new(),
            staged_heads: BTreeMap::new(),
            staged_rows: HashMap::new(),
            row_ops: BTreeMap::new(),
            conflicts: Vec::new(),
            cursor,
            stats: PlanStats::default(),
        }
    }

    pub fn base_generation(&self) -> u64 {
        self.base_generation
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Highest clock of `origin` held by the log or staged in this plan
    pub fn watermark(&self, log: &ChangeLog, origin: &OriginId) -> Result<u64, RowsyncError> {
        let stored = log.last_clock(origin)?.unwrap_or(0);
        let staged = self.staged_heads.get(origin).copied().unwrap_or(0);
        Ok(stored.max(staged))
    }

    /// The record this plan has already staged as a row's winner
    pub fn staged_row(&self, table: &str, row: &str) -> Option<&ChangeRecord> {
        self.staged_rows.get(&(table.to_string(), row.to_string()))
    }

    fn bump_head(&mut self, origin: OriginId, clock: u64) {
        let entry = self.staged_heads.entry(origin).or_insert(0);
        if clock > *entry {
            *entry = clock;
        }
    }

    /// Stage an append. If `takes_row`, the record also becomes the row's
    /// winner and its snapshot operation replaces any earlier one.
    pub fn stage_append(&mut self, record: ChangeRecord, takes_row: bool) {
        self.bump_head(record.origin_id, record.logical_clock);
        self.cursor.advance(record.origin_id, record.logical_clock);
        if takes_row {
            let key = (record.table_name.clone(), record.row_key.clone());
            self.row_ops.insert(key.clone(), RowOp::for_record(&record));
            self.staged_rows.insert(key, record.clone());
        }
        self.stats.applied += 1;
        self.appended.push(record);
    }

    /// Stage a watermark move for a record that is not stored
    pub fn stage_observed(&mut self, origin: OriginId, clock: u64) {
        self.bump_head(origin, clock);
        self.cursor.advance(origin, clock);
        let entry = self.observed.entry(origin).or_insert(0);
        if clock > *entry {
            *entry = clock;
        }
    }

    pub fn stage_conflict(&mut self, conflict: ConflictRecord) {
        self.stats.conflicts += 1;
        self.conflicts.push(conflict);
    }

    /// Count a record dropped because the replica already holds it
    pub fn note_skipped(&mut self, record: &ChangeRecord) {
        self.cursor.advance(record.origin_id, record.logical_clock);
        self.stats.skipped += 1;
    }

    pub fn appended(&self) -> &[ChangeRecord] {
        &self.appended
    }

    pub fn observed(&self) -> &BTreeMap<OriginId, u64> {
        &self.observed
    }

    pub fn row_ops(&self) -> &BTreeMap<(String, String), RowOp> {
        &self.row_ops
    }

    pub fn conflicts(&self) -> &[ConflictRecord] {
        &self.conflicts
    }

    /// Cursor that will be stored for the peer on commit
    pub fn cursor(&self) -> &SyncCursor {
        &self.cursor
    }

    pub fn stats(&self) -> PlanStats {
        self.stats
    }

    /// True if committing would only rewrite the cursor
    pub fn is_empty(&self) -> bool {
        self.appended.is_empty() && self.observed.is_empty() && self.conflicts.is_empty()
    }
}
