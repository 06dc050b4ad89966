//! Delta builder
//!
//! Computes what a peer still needs: for each known origin, the records above
//! the cursor's acknowledged clock, ordered by origin id then clock and capped
//! at the batch size.

use crate::change_log::ChangeLog;
use crate::error::RowsyncError;
use crate::hash::{compute_batch_checksum, BatchChecksum};
use crate::types::change::ChangeRecord;
use crate::types::cursor::SyncCursor;
use crate::types::ids::id_to_hex;

/// Default number of records per page
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// One page of changes for a peer
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaPage {
    pub changes: Vec<ChangeRecord>,
    /// More records remain beyond this page
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct DeltaBuilder {
    batch_size: usize,
}

impl Default for DeltaBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl DeltaBuilder {
    /// A batch size of 0 is treated as 1
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Build the next page for the peer named by `cursor.peer_id`.
    ///
    /// Records authored by the peer itself are skipped. Fails with
    /// `CursorUnknownOrigin` if the cursor claims progress for an origin the
    /// log has never seen.
    pub fn build(&self, log: &ChangeLog, cursor: &SyncCursor) -> Result<DeltaPage, RowsyncError> {
        let heads = log.heads()?;

        for (origin, &clock) in &cursor.acknowledged {
            if clock > 0 && !heads.contains_key(origin) {
                return Err(RowsyncError::CursorUnknownOrigin {
                    peer: id_to_hex(&cursor.peer_id),
                    origin: id_to_hex(origin),
                    clock,
                });
            }
        }

        let mut changes = Vec::new();
        for (origin, &head) in &heads {
            if *origin == cursor.peer_id {
                continue;
            }
            let after = cursor.clock_for(origin);
            if head <= after {
                continue;
            }
            for record in log.query_since(origin, after).iter() {
                let record = record?;
                if changes.len() == self.batch_size {
                    return Ok(DeltaPage {
                        changes,
                        has_more: true,
                    });
                }
                changes.push(record);
            }
        }

        Ok(DeltaPage {
            changes,
            has_more: false,
        })
    }
}

/// A checksummed page ready for transport
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaBatch {
    /// Round number within the session, starting at 0
    pub sequence: u32,
    pub changes: Vec<ChangeRecord>,
    pub has_more: bool,
    /// The sender's cursor for the receiver at the time the batch was built
    pub sender_cursor_snapshot: SyncCursor,
    pub batch_checksum: BatchChecksum,
}

impl DeltaBatch {
    /// Compute the checksum and wrap a page
    pub fn seal(sequence: u32, page: DeltaPage, cursor: SyncCursor) -> Result<Self, RowsyncError> {
        let batch_checksum = compute_batch_checksum(sequence, &page.changes, page.has_more, &cursor)?;
        Ok(Self {
            sequence,
            changes: page.changes,
            has_more: page.has_more,
            sender_cursor_snapshot: cursor,
            batch_checksum,
        })
    }

    /// True if the stored checksum matches the current contents
    pub fn verify(&self) -> Result<bool, RowsyncError> {
        let expected = compute_batch_checksum(
            self.sequence,
            &self.changes,
            self.has_more,
            &self.sender_cursor_snapshot,
        )?;
        Ok(expected == self.batch_checksum)
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ConflictResolver;
    use crate::types::change::Operation;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, ChangeLog) {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let log = ChangeLog::open(&db, ConflictResolver::default()).unwrap();
        for clock in 1..=3 {
            log.append(&delete_rec(0xb, clock)).unwrap();
        }
        for clock in [2, 4] {
            log.append(&delete_rec(0xa, clock)).unwrap();
        }
        (dir, log)
    }

    fn delete_rec(origin: u8, clock: u64) -> ChangeRecord {
        ChangeRecord::new("t", format!("{}-{}", origin, clock), Operation::Delete, None, [origin; 16], clock, 0)
    }

    fn ids(page: &DeltaPage) -> Vec<(u8, u64)> {
        page.changes
            .iter()
            .map(|r| (r.origin_id[0], r.logical_clock))
            .collect()
    }

    #[test]
    fn test_build_orders_by_origin_then_clock() {
        let (_dir, log) = setup();
        let page = DeltaBuilder::new(100)
            .build(&log, &SyncCursor::new([0xf; 16]))
            .unwrap();
        assert!(!page.has_more);
        assert_eq!(ids(&page), vec![(0xa, 2), (0xa, 4), (0xb, 1), (0xb, 2), (0xb, 3)]);
    }

    #[test]
    fn test_build_respects_cursor() {
        let (_dir, log) = setup();
        let mut cursor = SyncCursor::new([0xf; 16]);
        cursor.advance([0xa; 16], 4);
        cursor.advance([0xb; 16], 1);
        let page = DeltaBuilder::new(100).build(&log, &cursor).unwrap();
        assert_eq!(ids(&page), vec![(0xb, 2), (0xb, 3)]);
    }

    #[test]
    fn test_build_pages_with_has_more() {
        let (_dir, log) = setup();
        let builder = DeltaBuilder::new(2);
        let mut cursor = SyncCursor::new([0xf; 16]);
        let mut seen = Vec::new();

        loop {
            let page = builder.build(&log, &cursor).unwrap();
            assert!(page.changes.len() <= 2);
            cursor.advance_past(&page.changes);
            seen.extend(ids(&page));
            if !page.has_more {
                break;
            }
        }

        let unpaged = DeltaBuilder::new(100)
            .build(&log, &SyncCursor::new([0xf; 16]))
            .unwrap();
        assert_eq!(seen, ids(&unpaged));
    }

    #[test]
    fn test_exact_fit_has_no_more() {
        let (_dir, log) = setup();
        let page = DeltaBuilder::new(5)
            .build(&log, &SyncCursor::new([0xf; 16]))
            .unwrap();
        assert_eq!(page.changes.len(), 5);
        assert!(!page.has_more);
    }

    #[test]
    fn test_skips_records_authored_by_peer() {
        let (_dir, log) = setup();
        let page = DeltaBuilder::new(100)
            .build(&log, &SyncCursor::new([0xa; 16]))
            .unwrap();
        assert_eq!(ids(&page), vec![(0xb, 1), (0xb, 2), (0xb, 3)]);
    }

    #[test]
    fn test_unknown_origin_in_cursor_is_reported() {
        let (_dir, log) = setup();
        let mut cursor = SyncCursor::new([0xf; 16]);
        cursor.advance([0xc; 16], 3);
        let err = DeltaBuilder::default().build(&log, &cursor).unwrap_err();
        assert!(matches!(err, RowsyncError::CursorUnknownOrigin { clock: 3, .. }));

        // A zero entry claims nothing
        let mut zero = SyncCursor::new([0xf; 16]);
        zero.acknowledged.insert([0xc; 16], 0);
        assert!(DeltaBuilder::default().build(&log, &zero).is_ok());
    }

    #[test]
    fn test_sealed_batch_verifies() {
        let (_dir, log) = setup();
        let cursor = SyncCursor::new([0xf; 16]);
        let page = DeltaBuilder::new(3).build(&log, &cursor).unwrap();
        let mut batch = DeltaBatch::seal(0, page, cursor).unwrap();
        assert!(batch.verify().unwrap());
        assert!(batch.has_more);

        batch.changes.pop();
        assert!(!batch.verify().unwrap());
    }
}
