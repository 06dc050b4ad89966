//! Snapshot store adapter
//!
//! The engine reads and writes table rows only through [`SnapshotStore`].
//! [`SledSnapshot`] is the standalone implementation; [`TxnSnapshot`] runs
//! the same operations inside a sled transaction so row writes commit
//! together with the change log and the cursor.

use sled::transaction::{ConflictableTransactionError, TransactionalTree};

use crate::error::RowsyncError;
use crate::keys::{row_key, table_prefix};
use crate::types::change::Payload;

/// Row-level access to the application's tables
pub trait SnapshotStore {
    type Error;

    fn read_row(&self, table: &str, key: &str) -> Result<Option<Payload>, Self::Error>;
    fn write_row(&self, table: &str, key: &str, payload: &Payload) -> Result<(), Self::Error>;
    fn delete_row(&self, table: &str, key: &str) -> Result<(), Self::Error>;
}

/// Rows stored in a sled tree, one JSON payload per `(table, row_key)`
#[derive(Debug, Clone)]
pub struct SledSnapshot {
    rows: sled::Tree,
}

impl SledSnapshot {
    pub fn open(db: &sled::Db) -> Result<Self, RowsyncError> {
        Ok(Self {
            rows: db.open_tree("rows")?,
        })
    }

    pub(crate) fn tree(&self) -> &sled::Tree {
        &self.rows
    }

    /// All rows of a table, ordered by row key
    pub fn list_rows(&self, table: &str) -> Result<Vec<(String, Payload)>, RowsyncError> {
        let prefix = table_prefix(table);
        let mut rows = Vec::new();
        for result in self.rows.scan_prefix(&prefix) {
            let (key, value) = result?;
            let row = String::from_utf8(key[prefix.len()..].to_vec())
                .map_err(|_| RowsyncError::Internal("row key is not UTF-8".to_string()))?;
            rows.push((row, serde_json::from_slice(&value)?));
        }
        Ok(rows)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

impl SnapshotStore for SledSnapshot {
    type Error = RowsyncError;

    fn read_row(&self, table: &str, key: &str) -> Result<Option<Payload>, RowsyncError> {
        match self.rows.get(row_key(table, key))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_row(&self, table: &str, key: &str, payload: &Payload) -> Result<(), RowsyncError> {
        self.rows.insert(row_key(table, key), serde_json::to_vec(payload)?)?;
        Ok(())
    }

    fn delete_row(&self, table: &str, key: &str) -> Result<(), RowsyncError> {
        self.rows.remove(row_key(table, key))?;
        Ok(())
    }
}

/// Row access bound to an open sled transaction
pub struct TxnSnapshot<'a> {
    rows: &'a TransactionalTree,
}

impl<'a> TxnSnapshot<'a> {
    pub fn new(rows: &'a TransactionalTree) -> Self {
        Self { rows }
    }
}

fn abort_json(e: serde_json::Error) -> ConflictableTransactionError<RowsyncError> {
    ConflictableTransactionError::Abort(RowsyncError::Json(e))
}

impl SnapshotStore for TxnSnapshot<'_> {
    type Error = ConflictableTransactionError<RowsyncError>;

    fn read_row(&self, table: &str, key: &str) -> Result<Option<Payload>, Self::Error> {
        match self.rows.get(row_key(table, key))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(abort_json)?)),
            None => Ok(None),
        }
    }

    fn write_row(&self, table: &str, key: &str, payload: &Payload) -> Result<(), Self::Error> {
        let bytes = serde_json::to_vec(payload).map_err(abort_json)?;
        self.rows.insert(row_key(table, key), bytes)?;
        Ok(())
    }

    fn delete_row(&self, table: &str, key: &str) -> Result<(), Self::Error> {
        self.rows.remove(row_key(table, key))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::change::ColumnValue;
    use sled::transaction::TransactionError;
    use tempfile::tempdir;

    fn payload(city: &str) -> Payload {
        let mut p = Payload::new();
        p.insert("city".to_string(), ColumnValue::Text(city.to_string()));
        p
    }

    #[test]
    fn test_write_read_delete() {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let snapshot = SledSnapshot::open(&db).unwrap();

        assert_eq!(snapshot.read_row("person", "1").unwrap(), None);
        snapshot.write_row("person", "1", &payload("Bandung")).unwrap();
        snapshot.write_row("person", "2", &payload("Jakarta")).unwrap();
        snapshot.write_row("city", "1", &payload("x")).unwrap();

        assert_eq!(snapshot.read_row("person", "1").unwrap(), Some(payload("Bandung")));
        let rows = snapshot.list_rows("person").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].0, "2");

        snapshot.delete_row("person", "1").unwrap();
        assert_eq!(snapshot.read_row("person", "1").unwrap(), None);
        assert_eq!(snapshot.row_count(), 2);
    }

    #[test]
    fn test_aborted_transaction_leaves_rows_untouched() {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let snapshot = SledSnapshot::open(&db).unwrap();

        let result: Result<(), TransactionError<RowsyncError>> = snapshot.tree().transaction(|tx| {
            let txn = TxnSnapshot::new(tx);
            txn.write_row("person", "1", &payload("Bandung"))?;
            Err(ConflictableTransactionError::Abort(RowsyncError::Internal(
                "stop".to_string(),
            )))
        });
        assert!(result.is_err());
        assert_eq!(snapshot.read_row("person", "1").unwrap(), None);
    }
}
