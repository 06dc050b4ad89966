use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fs2::FileExt;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree};
use sled::Transactional;

use crate::change_log::{append_in_txn, observe_in_txn, ChangeLog, EncodedRecord};
use crate::conflict_log::{record_in_txn, ConflictLog, EncodedConflict};
use crate::cursor_store::{CursorStore, SledCursorStore, TxnCursorStore};
use crate::error::RowsyncError;
use crate::keys::{decode_u64, GENERATION_KEY, MAX_CLOCK_KEY};
use crate::plan::{CommitPlan, RowOp};
use crate::resolver::{ConflictResolver, ResolutionPolicy};
use crate::snapshot::{SledSnapshot, SnapshotStore, TxnSnapshot};
use crate::types::change::{ChangeRecord, Operation, Payload, MAX_LOGICAL_CLOCK};
use crate::types::cursor::SyncCursor;
use crate::types::ids::{OriginId, PeerId};

/// Statistics about the replica database
#[derive(Debug)]
pub struct ReplicaStats {
    pub path: String,
    pub size_bytes: u64,
    pub change_count: usize,
    pub origin_count: usize,
    pub row_count: usize,
    pub conflict_count: usize,
    pub cursor_count: usize,
    pub generation: u64,
}

/// A ReplicaStore with filesystem-level exclusive lock.
///
/// The lock is held for the lifetime of this struct and released when
/// dropped, so only one process opens the sled database at a time.
pub struct LockedReplica {
    _lock_file: File,
    store: Arc<ReplicaStore>,
}

impl std::fmt::Debug for LockedReplica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedReplica")
            .field("store", &"ReplicaStore { ... }")
            .finish()
    }
}

impl LockedReplica {
    pub fn inner(&self) -> &ReplicaStore {
        &self.store
    }

    /// Shared handle for sessions; the lock stays held while `self` lives
    pub fn shared(&self) -> Arc<ReplicaStore> {
        Arc::clone(&self.store)
    }
}

impl std::ops::Deref for LockedReplica {
    type Target = ReplicaStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// One replica: change log, snapshot rows, cursors and conflicts in one sled db
pub struct ReplicaStore {
    db: sled::Db,
    path: PathBuf,
    replica_id: OriginId,
    log: ChangeLog,
    snapshot: SledSnapshot,
    cursors: SledCursorStore,
    conflicts: ConflictLog,
    meta: sled::Tree,
}

impl std::fmt::Debug for ReplicaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaStore")
            .field("path", &self.path)
            .field("replica_id", &crate::types::ids::short_hex(&self.replica_id))
            .finish()
    }
}

impl ReplicaStore {
    /// Open or create a replica store at the given path
    pub fn open(path: &Path, replica_id: OriginId, policy: ResolutionPolicy) -> Result<Self, RowsyncError> {
        let db = sled::open(path)?;
        let resolver = ConflictResolver::new(policy);
        Ok(Self {
            log: ChangeLog::open(&db, resolver)?,
            snapshot: SledSnapshot::open(&db)?,
            cursors: SledCursorStore::open(&db)?,
            conflicts: ConflictLog::open(&db)?,
            meta: db.open_tree("meta")?,
            path: path.to_path_buf(),
            replica_id,
            db,
        })
    }

    /// Open store with exclusive filesystem lock (non-blocking).
    ///
    /// Lock file is created at `<path>.lock`. Returns `DbBusy` if another
    /// process holds the lock.
    pub fn open_locked(
        path: &Path,
        replica_id: OriginId,
        policy: ResolutionPolicy,
    ) -> Result<LockedReplica, RowsyncError> {
        let lock_file = File::create(path.with_extension("lock"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|e| RowsyncError::database_locked(Some(&e.to_string())))?;

        let store = Arc::new(Self::open(path, replica_id, policy)?);
        Ok(LockedReplica {
            _lock_file: lock_file,
            store,
        })
    }

    /// Open store with exclusive filesystem lock, retrying with backoff
    /// until `timeout` expires.
    pub fn open_locked_blocking(
        path: &Path,
        replica_id: OriginId,
        policy: ResolutionPolicy,
        timeout: Duration,
    ) -> Result<LockedReplica, RowsyncError> {
        let lock_file = File::create(path.with_extension("lock"))?;

        let start = Instant::now();
        let mut delay = Duration::from_millis(10);
        loop {
            match lock_file.try_lock_exclusive() {
                Ok(()) => break,
                Err(_) if start.elapsed() < timeout => {
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(Duration::from_millis(200));
                }
                Err(e) => {
                    return Err(RowsyncError::DbBusy(format!(
                        "Timeout waiting for database lock: {}",
                        e
                    )))
                }
            }
        }

        let store = Arc::new(Self::open(path, replica_id, policy)?);
        Ok(LockedReplica {
            _lock_file: lock_file,
            store,
        })
    }

    pub fn replica_id(&self) -> &OriginId {
        &self.replica_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self) -> &ChangeLog {
        &self.log
    }

    pub fn snapshot(&self) -> &SledSnapshot {
        &self.snapshot
    }

    pub fn cursors(&self) -> &SledCursorStore {
        &self.cursors
    }

    pub fn conflicts(&self) -> &ConflictLog {
        &self.conflicts
    }

    pub fn resolver(&self) -> &ConflictResolver {
        self.log.resolver()
    }

    /// Commit counter; every successful write moves it forward
    pub fn generation(&self) -> Result<u64, RowsyncError> {
        Ok(self.meta.get(GENERATION_KEY)?.map(|b| decode_u64(&b)).unwrap_or(0))
    }

    pub fn load_cursor(&self, peer: &PeerId) -> Result<SyncCursor, RowsyncError> {
        self.cursors.load_cursor(peer)
    }

    /// Apply a staged plan as one transaction.
    ///
    /// Returns the new generation. Fails with `StalePlan` if anything was
    /// committed since the plan's base generation.
    pub fn commit(&self, plan: &CommitPlan) -> Result<u64, RowsyncError> {
        let records = plan
            .appended()
            .iter()
            .map(EncodedRecord::encode)
            .collect::<Result<Vec<_>, _>>()?;
        let conflicts = plan
            .conflicts()
            .iter()
            .map(EncodedConflict::encode)
            .collect::<Result<Vec<_>, _>>()?;
        let plan_max = plan
            .appended()
            .iter()
            .map(|r| r.logical_clock)
            .chain(plan.observed().values().copied())
            .max()
            .unwrap_or(0);
        let resolver = *self.log.resolver();
        let (changes, heads, row_index) = self.log.trees();

        let generation = (
            changes,
            heads,
            row_index,
            self.snapshot.tree(),
            self.cursors.tree(),
            self.conflicts.tree(),
            &self.meta,
        )
            .transaction(|(tc, th, tr, trows, tcur, tconf, tmeta)| {
                let current = tmeta.get(GENERATION_KEY)?.map(|b| decode_u64(&b)).unwrap_or(0);
                if current != plan.base_generation() {
                    return Err(ConflictableTransactionError::Abort(RowsyncError::StalePlan {
                        staged: plan.base_generation(),
                        current,
                    }));
                }

                for encoded in &records {
                    append_in_txn(tc, th, tr, encoded, &resolver)?;
                }
                for (origin, clock) in plan.observed() {
                    observe_in_txn(th, origin, *clock)?;
                }

                let snapshot = TxnSnapshot::new(trows);
                for ((table, row), op) in plan.row_ops() {
                    match op {
                        RowOp::Write(payload) => snapshot.write_row(table, row, payload)?,
                        RowOp::Delete => snapshot.delete_row(table, row)?,
                    }
                }

                for encoded in &conflicts {
                    record_in_txn(tconf, encoded)?;
                }

                TxnCursorStore::new(tcur).save_cursor(plan.peer_id(), plan.cursor())?;

                let max_clock = tmeta.get(MAX_CLOCK_KEY)?.map(|b| decode_u64(&b)).unwrap_or(0);
                if plan_max > max_clock {
                    tmeta.insert(MAX_CLOCK_KEY, &plan_max.to_be_bytes()[..])?;
                }
                bump_generation(tmeta)
            })?;
        Ok(generation)
    }

    /// Move a peer's cursor forward over records the peer confirmed it holds
    pub fn advance_cursor(&self, peer: &PeerId, records: &[ChangeRecord]) -> Result<SyncCursor, RowsyncError> {
        let cursor = (self.cursors.tree(), &self.meta).transaction(|(tcur, tmeta)| {
            let store = TxnCursorStore::new(tcur);
            let mut cursor = store.load_cursor(peer)?;
            cursor.advance_past(records);
            store.save_cursor(peer, &cursor)?;
            bump_generation(tmeta)?;
            Ok::<_, ConflictableTransactionError<RowsyncError>>(cursor)
        })?;
        Ok(cursor)
    }

    /// Forget a peer's cursor so the next session starts from scratch
    pub fn reset_cursor(&self, peer: &PeerId) -> Result<bool, RowsyncError> {
        self.cursors.reset(peer)
    }

    /// Author a local change.
    ///
    /// The clock is one above every clock this replica has observed, so the
    /// new record outranks any version already seen here. The clock is
    /// picked inside the transaction, so concurrent local writers never
    /// collide.
    pub fn record_local(
        &self,
        table: &str,
        row: &str,
        operation: Operation,
        payload: Option<Payload>,
    ) -> Result<ChangeRecord, RowsyncError> {
        ChangeRecord::new(table, row, operation, payload.clone(), self.replica_id, 1, 0).validate()?;

        let floor = self.log.max_observed_clock()?;
        let wall_time = wall_time_ms();
        let resolver = *self.log.resolver();
        let (changes, heads, row_index) = self.log.trees();

        let record = (changes, heads, row_index, self.snapshot.tree(), &self.meta).transaction(
            |(tc, th, tr, trows, tmeta)| {
                let max_clock = tmeta
                    .get(MAX_CLOCK_KEY)?
                    .map(|b| decode_u64(&b))
                    .unwrap_or(0)
                    .max(floor);
                let clock = max_clock
                    .checked_add(1)
                    .filter(|c| *c <= MAX_LOGICAL_CLOCK)
                    .ok_or(ConflictableTransactionError::Abort(RowsyncError::ClockExhausted {
                        observed: max_clock,
                    }))?;
                let record = ChangeRecord::new(
                    table,
                    row,
                    operation,
                    payload.clone(),
                    self.replica_id,
                    clock,
                    wall_time,
                );
                let encoded =
                    EncodedRecord::encode(&record).map_err(ConflictableTransactionError::Abort)?;

                if append_in_txn(tc, th, tr, &encoded, &resolver)? {
                    let snapshot = TxnSnapshot::new(trows);
                    match RowOp::for_record(&record) {
                        RowOp::Write(payload) => snapshot.write_row(table, row, &payload)?,
                        RowOp::Delete => snapshot.delete_row(table, row)?,
                    }
                }

                tmeta.insert(MAX_CLOCK_KEY, &record.logical_clock.to_be_bytes()[..])?;
                bump_generation(tmeta)?;
                Ok::<_, ConflictableTransactionError<RowsyncError>>(record)
            },
        )?;
        Ok(record)
    }

    /// Insert or replace a row with a full image
    pub fn put_row(&self, table: &str, row: &str, payload: Payload) -> Result<ChangeRecord, RowsyncError> {
        let operation = match self.snapshot.read_row(table, row)? {
            Some(_) => Operation::Update,
            None => Operation::Insert,
        };
        self.record_local(table, row, operation, Some(payload))
    }

    /// Delete an existing row
    pub fn delete_row(&self, table: &str, row: &str) -> Result<ChangeRecord, RowsyncError> {
        if self.snapshot.read_row(table, row)?.is_none() {
            return Err(RowsyncError::NotFound(format!("row {}/{}", table, row)));
        }
        self.record_local(table, row, Operation::Delete, None)
    }

    pub fn stats(&self) -> Result<ReplicaStats, RowsyncError> {
        Ok(ReplicaStats {
            path: self.path.display().to_string(),
            size_bytes: self.db.size_on_disk()?,
            change_count: self.log.len(),
            origin_count: self.log.origins()?.len(),
            row_count: self.snapshot.row_count(),
            conflict_count: self.conflicts.count(),
            cursor_count: self.cursors.list()?.len(),
            generation: self.generation()?,
        })
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<(), RowsyncError> {
        self.db.flush()?;
        Ok(())
    }
}

fn bump_generation(meta: &TransactionalTree) -> ConflictableTransactionResult<u64, RowsyncError> {
    let next = meta.get(GENERATION_KEY)?.map(|b| decode_u64(&b)).unwrap_or(0) + 1;
    meta.insert(GENERATION_KEY, &next.to_be_bytes()[..])?;
    Ok(next)
}

fn wall_time_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
