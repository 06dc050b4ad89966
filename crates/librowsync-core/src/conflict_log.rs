//! Conflict audit trail
//!
//! Keyed by loser then winner identity, so recording the same decision twice
//! leaves one entry.

use sled::transaction::{ConflictableTransactionResult, TransactionalTree};

use crate::error::RowsyncError;
use crate::keys::conflict_key;
use crate::types::conflict::ConflictRecord;

/// Pre-encoded conflict entry for use inside a transaction
#[derive(Debug, Clone)]
pub(crate) struct EncodedConflict {
    pub key: Vec<u8>,
    pub bytes: Vec<u8>,
}

impl EncodedConflict {
    pub(crate) fn encode(conflict: &ConflictRecord) -> Result<Self, RowsyncError> {
        Ok(Self {
            key: conflict_key(
                (&conflict.loser.origin_id, conflict.loser.logical_clock),
                (&conflict.winner.origin_id, conflict.winner.logical_clock),
            ),
            bytes: serde_json::to_vec(conflict)?,
        })
    }
}

pub(crate) fn record_in_txn(
    conflicts: &TransactionalTree,
    encoded: &EncodedConflict,
) -> ConflictableTransactionResult<(), RowsyncError> {
    conflicts.insert(encoded.key.clone(), encoded.bytes.clone())?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ConflictLog {
    conflicts: sled::Tree,
}

impl ConflictLog {
    pub fn open(db: &sled::Db) -> Result<Self, RowsyncError> {
        Ok(Self {
            conflicts: db.open_tree("conflicts")?,
        })
    }

    pub(crate) fn tree(&self) -> &sled::Tree {
        &self.conflicts
    }

    /// Store a conflict; returns false if it was already recorded
    pub fn record(&self, conflict: &ConflictRecord) -> Result<bool, RowsyncError> {
        let encoded = EncodedConflict::encode(conflict)?;
        Ok(self.conflicts.insert(encoded.key, encoded.bytes)?.is_none())
    }

    /// All conflicts, ordered by loser identity
    pub fn list(&self) -> Result<Vec<ConflictRecord>, RowsyncError> {
        let mut out = Vec::new();
        for result in self.conflicts.iter() {
            let (_, value) = result?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    /// Conflicts recorded for one row
    pub fn for_row(&self, table: &str, row: &str) -> Result<Vec<ConflictRecord>, RowsyncError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|c| c.table_name == table && c.row_key == row)
            .collect())
    }

    pub fn count(&self) -> usize {
        self.conflicts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ConflictResolver;
    use crate::types::change::{ChangeRecord, Operation};
    use tempfile::tempdir;

    #[test]
    fn test_record_is_deduplicated() {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let log = ConflictLog::open(&db).unwrap();

        let a = ChangeRecord::new("person", "7", Operation::Delete, None, [1; 16], 1, 0);
        let b = ChangeRecord::new("person", "7", Operation::Delete, None, [2; 16], 1, 0);
        let conflict = ConflictResolver::default().resolve(&a, &b);

        assert!(log.record(&conflict).unwrap());
        assert!(!log.record(&conflict).unwrap());
        assert_eq!(log.count(), 1);
        assert_eq!(log.for_row("person", "7").unwrap(), vec![conflict]);
        assert!(log.for_row("person", "8").unwrap().is_empty());
    }
}
