//! Append-only change log backed by sled
//!
//! Three trees:
//! - `changes`: `origin || clock` -> JSON `ChangeRecord`
//! - `heads`: `origin` -> highest clock observed for that origin
//! - `row_index`: `(table, row_key)` -> `RowVersion` of the record holding the row
//!
//! The head of an origin also moves for remote records that lost a conflict.
//! Those are observed but never stored, so a replay is still rejected.

use std::collections::BTreeMap;

use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree};
use sled::Transactional;

use crate::error::RowsyncError;
use crate::keys::{change_key, decode_u64, parse_change_key, row_key, table_prefix};
use crate::resolver::ConflictResolver;
use crate::types::change::{ChangeRecord, RowVersion};
use crate::types::ids::{id_to_hex, OriginId};

/// A record pre-encoded for insertion inside a transaction.
///
/// Transaction closures may run more than once, so all fallible encoding
/// happens before the transaction starts.
#[derive(Debug, Clone)]
pub(crate) struct EncodedRecord {
    pub origin: OriginId,
    pub clock: u64,
    pub key: Vec<u8>,
    pub bytes: Vec<u8>,
    pub row: Vec<u8>,
    pub version: RowVersion,
    pub version_bytes: Vec<u8>,
}

impl EncodedRecord {
    pub(crate) fn encode(record: &ChangeRecord) -> Result<Self, RowsyncError> {
        let version = record.version();
        Ok(Self {
            origin: record.origin_id,
            clock: record.logical_clock,
            key: change_key(&record.origin_id, record.logical_clock),
            bytes: serde_json::to_vec(record)?,
            row: row_key(&record.table_name, &record.row_key),
            version,
            version_bytes: serde_json::to_vec(&version)?,
        })
    }
}

/// Store a record, move its origin head, and take the row if the record wins.
///
/// Returns whether the row index now points at this record.
pub(crate) fn append_in_txn(
    changes: &TransactionalTree,
    heads: &TransactionalTree,
    row_index: &TransactionalTree,
    encoded: &EncodedRecord,
    resolver: &ConflictResolver,
) -> ConflictableTransactionResult<bool, RowsyncError> {
    if let Some(last) = heads.get(&encoded.origin[..])? {
        let last = decode_u64(&last);
        if encoded.clock <= last {
            return Err(ConflictableTransactionError::Abort(RowsyncError::InvalidRecord(
                format!(
                    "clock {} for origin {} is not above last recorded clock {}",
                    encoded.clock,
                    id_to_hex(&encoded.origin),
                    last
                ),
            )));
        }
    }

    changes.insert(encoded.key.clone(), encoded.bytes.clone())?;
    heads.insert(&encoded.origin[..], &encoded.clock.to_be_bytes()[..])?;

    let takes_row = match row_index.get(&encoded.row[..])? {
        Some(bytes) => {
            let current: RowVersion = serde_json::from_slice(&bytes)
                .map_err(|e| ConflictableTransactionError::Abort(RowsyncError::Json(e)))?;
            resolver.prevails(&encoded.version, &current)
        }
        None => true,
    };
    if takes_row {
        row_index.insert(encoded.row.clone(), encoded.version_bytes.clone())?;
    }
    Ok(takes_row)
}

/// Move an origin head forward without storing a record
pub(crate) fn observe_in_txn(
    heads: &TransactionalTree,
    origin: &OriginId,
    clock: u64,
) -> ConflictableTransactionResult<(), RowsyncError> {
    let last = heads.get(&origin[..])?.map(|b| decode_u64(&b)).unwrap_or(0);
    if clock > last {
        heads.insert(&origin[..], &clock.to_be_bytes()[..])?;
    }
    Ok(())
}

/// Durable, append-only record of row-level mutations
#[derive(Clone)]
pub struct ChangeLog {
    changes: sled::Tree,
    heads: sled::Tree,
    row_index: sled::Tree,
    resolver: ConflictResolver,
}

impl std::fmt::Debug for ChangeLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeLog")
            .field("changes", &self.changes.len())
            .field("resolver", &self.resolver)
            .finish()
    }
}

impl ChangeLog {
    /// Open the change log trees inside an existing sled database
    pub fn open(db: &sled::Db, resolver: ConflictResolver) -> Result<Self, RowsyncError> {
        Ok(Self {
            changes: db.open_tree("changes")?,
            heads: db.open_tree("heads")?,
            row_index: db.open_tree("row_index")?,
            resolver,
        })
    }

    pub(crate) fn trees(&self) -> (&sled::Tree, &sled::Tree, &sled::Tree) {
        (&self.changes, &self.heads, &self.row_index)
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    /// Append a record.
    ///
    /// Fails with `InvalidRecord` if the record is malformed or its clock is
    /// not strictly above the last clock recorded for its origin.
    pub fn append(&self, record: &ChangeRecord) -> Result<(), RowsyncError> {
        record.validate()?;
        let encoded = EncodedRecord::encode(record)?;
        let resolver = self.resolver;

        (&self.changes, &self.heads, &self.row_index)
            .transaction(|(changes, heads, row_index)| {
                append_in_txn(changes, heads, row_index, &encoded, &resolver)?;
                Ok::<_, ConflictableTransactionError<RowsyncError>>(())
            })?;
        Ok(())
    }

    /// Records of `origin` with clock > `clock`, in clock order.
    ///
    /// The returned query is lazy; every call to `iter()` starts over.
    pub fn query_since(&self, origin: &OriginId, clock: u64) -> ChangeQuery {
        ChangeQuery {
            changes: self.changes.clone(),
            origin: *origin,
            after: clock,
        }
    }

    /// Every stored record, ordered by (origin, clock)
    pub fn iter_all(&self) -> ChangeIter {
        ChangeIter {
            inner: self.changes.iter(),
        }
    }

    /// Look up one record by its (origin, clock) identity
    pub fn get(&self, origin: &OriginId, clock: u64) -> Result<Option<ChangeRecord>, RowsyncError> {
        match self.changes.get(change_key(origin, clock))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Highest clock observed for an origin
    pub fn last_clock(&self, origin: &OriginId) -> Result<Option<u64>, RowsyncError> {
        Ok(self.heads.get(&origin[..])?.map(|b| decode_u64(&b)))
    }

    /// All known origins in lexicographic order
    pub fn origins(&self) -> Result<Vec<OriginId>, RowsyncError> {
        Ok(self.heads()?.into_keys().collect())
    }

    /// Per-origin head clocks
    pub fn heads(&self) -> Result<BTreeMap<OriginId, u64>, RowsyncError> {
        let mut heads = BTreeMap::new();
        for result in self.heads.iter() {
            let (key, value) = result?;
            if key.len() != 16 {
                return Err(RowsyncError::Internal("invalid heads key".to_string()));
            }
            let mut origin = [0u8; 16];
            origin.copy_from_slice(&key);
            heads.insert(origin, decode_u64(&value));
        }
        Ok(heads)
    }

    /// Highest clock observed across every origin
    pub fn max_observed_clock(&self) -> Result<u64, RowsyncError> {
        Ok(self.heads()?.values().copied().max().unwrap_or(0))
    }

    /// Version of the record that currently holds a row
    pub fn winning_version(&self, table: &str, row: &str) -> Result<Option<RowVersion>, RowsyncError> {
        match self.row_index.get(row_key(table, row))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The record that currently holds a row
    pub fn winning_record(&self, table: &str, row: &str) -> Result<Option<ChangeRecord>, RowsyncError> {
        match self.winning_version(table, row)? {
            Some(v) => self.get(&v.origin_id, v.logical_clock),
            None => Ok(None),
        }
    }

    /// Stored records touching one row, ordered by (origin, clock)
    pub fn row_history(&self, table: &str, row: &str) -> Result<Vec<ChangeRecord>, RowsyncError> {
        let mut history = Vec::new();
        for record in self.iter_all() {
            let record = record?;
            if record.table_name == table && record.row_key == row {
                history.push(record);
            }
        }
        Ok(history)
    }

    /// Row keys of a table that have a winning version
    pub fn indexed_rows(&self, table: &str) -> Result<Vec<(String, RowVersion)>, RowsyncError> {
        let prefix = table_prefix(table);
        let mut rows = Vec::new();
        for result in self.row_index.scan_prefix(&prefix) {
            let (key, value) = result?;
            let row = String::from_utf8(key[prefix.len()..].to_vec())
                .map_err(|_| RowsyncError::Internal("row key is not UTF-8".to_string()))?;
            rows.push((row, serde_json::from_slice(&value)?));
        }
        Ok(rows)
    }

    /// Every row-index entry: ((table, row), version)
    pub fn row_index_entries(&self) -> Result<Vec<(Vec<u8>, RowVersion)>, RowsyncError> {
        let mut entries = Vec::new();
        for result in self.row_index.iter() {
            let (key, value) = result?;
            entries.push((key.to_vec(), serde_json::from_slice(&value)?));
        }
        Ok(entries)
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// A restartable query over one origin's records
#[derive(Clone)]
pub struct ChangeQuery {
    changes: sled::Tree,
    origin: OriginId,
    after: u64,
}

impl ChangeQuery {
    pub fn origin(&self) -> &OriginId {
        &self.origin
    }

    /// Start (or restart) iteration from the first record after the bound
    pub fn iter(&self) -> ChangeIter {
        let start = change_key(&self.origin, self.after.saturating_add(1));
        let end = change_key(&self.origin, u64::MAX);
        let inner = if self.after == u64::MAX {
            self.changes.range(end.clone()..end)
        } else {
            self.changes.range(start..=end)
        };
        ChangeIter { inner }
    }
}

impl<'a> IntoIterator for &'a ChangeQuery {
    type Item = Result<ChangeRecord, RowsyncError>;
    type IntoIter = ChangeIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy iterator over stored records
pub struct ChangeIter {
    inner: sled::Iter,
}

impl Iterator for ChangeIter {
    type Item = Result<ChangeRecord, RowsyncError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        Some(item.map_err(RowsyncError::from).and_then(|(key, value)| {
            let record: ChangeRecord = serde_json::from_slice(&value)?;
            match parse_change_key(&key) {
                Some((origin, clock)) if origin == record.origin_id && clock == record.logical_clock => {
                    Ok(record)
                }
                _ => Err(RowsyncError::Internal(format!(
                    "change key does not match record {}@{}",
                    id_to_hex(&record.origin_id),
                    record.logical_clock
                ))),
            }
        }))
    }
}
