//! Cursor persistence
//!
//! One JSON `SyncCursor` per peer in the `cursors` tree. A peer with no
//! stored cursor loads as an empty cursor.

use sled::transaction::{ConflictableTransactionError, TransactionalTree};

use crate::error::RowsyncError;
use crate::types::cursor::SyncCursor;
use crate::types::ids::PeerId;

pub trait CursorStore {
    type Error;

    fn load_cursor(&self, peer: &PeerId) -> Result<SyncCursor, Self::Error>;
    fn save_cursor(&self, peer: &PeerId, cursor: &SyncCursor) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone)]
pub struct SledCursorStore {
    cursors: sled::Tree,
}

impl SledCursorStore {
    pub fn open(db: &sled::Db) -> Result<Self, RowsyncError> {
        Ok(Self {
            cursors: db.open_tree("cursors")?,
        })
    }

    pub(crate) fn tree(&self) -> &sled::Tree {
        &self.cursors
    }

    /// Every stored cursor, ordered by peer id
    pub fn list(&self) -> Result<Vec<SyncCursor>, RowsyncError> {
        let mut cursors = Vec::new();
        for result in self.cursors.iter() {
            let (_, value) = result?;
            cursors.push(serde_json::from_slice(&value)?);
        }
        Ok(cursors)
    }

    /// Forget a peer's cursor; the next session starts from scratch
    pub fn reset(&self, peer: &PeerId) -> Result<bool, RowsyncError> {
        Ok(self.cursors.remove(&peer[..])?.is_some())
    }
}

impl CursorStore for SledCursorStore {
    type Error = RowsyncError;

    fn load_cursor(&self, peer: &PeerId) -> Result<SyncCursor, RowsyncError> {
        match self.cursors.get(&peer[..])? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(SyncCursor::new(*peer)),
        }
    }

    fn save_cursor(&self, peer: &PeerId, cursor: &SyncCursor) -> Result<(), RowsyncError> {
        self.cursors.insert(&peer[..], serde_json::to_vec(cursor)?)?;
        Ok(())
    }
}

/// Cursor access bound to an open sled transaction
pub struct TxnCursorStore<'a> {
    cursors: &'a TransactionalTree,
}

impl<'a> TxnCursorStore<'a> {
    pub fn new(cursors: &'a TransactionalTree) -> Self {
        Self { cursors }
    }
}

impl CursorStore for TxnCursorStore<'_> {
    type Error = ConflictableTransactionError<RowsyncError>;

    fn load_cursor(&self, peer: &PeerId) -> Result<SyncCursor, Self::Error> {
        match self.cursors.get(&peer[..])? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| ConflictableTransactionError::Abort(RowsyncError::Json(e))),
            None => Ok(SyncCursor::new(*peer)),
        }
    }

    fn save_cursor(&self, peer: &PeerId, cursor: &SyncCursor) -> Result<(), Self::Error> {
        let bytes = serde_json::to_vec(cursor)
            .map_err(|e| ConflictableTransactionError::Abort(RowsyncError::Json(e)))?;
        self.cursors.insert(&peer[..], bytes)?;
        Ok(())
    }
}
