//! Integrity checking for the change log
//!
//! Verifies record shape, key/record agreement, per-origin clock order,
//! watermarks and the row index.

use std::collections::BTreeMap;

use crate::error::RowsyncError;
use crate::keys::parse_row_key;
use crate::replica::ReplicaStore;
use crate::types::ids::{id_to_hex, OriginId};

/// Result of an integrity check
#[derive(Debug, Default)]
pub struct IntegrityReport {
    /// Total records checked
    pub records_checked: usize,
    /// Records that passed all checks
    pub records_valid: usize,
    /// Row index entries checked
    pub rows_checked: usize,
    pub issues: Vec<IntegrityIssue>,
}

#[derive(Debug)]
pub struct IntegrityIssue {
    pub origin_id: String,
    pub logical_clock: u64,
    pub kind: IssueKind,
}

#[derive(Debug)]
pub enum IssueKind {
    /// Record fails shape validation
    InvalidRecord { reason: String },
    /// Stored record's clock is not above its predecessor
    ClockOrder { previous: u64 },
    /// Stored record is above the origin's watermark
    WatermarkBehind { head: u64 },
    /// Row index names a record that is not stored
    DanglingRowIndex { table: String, row_key: String },
    /// Record could not be read back
    Unreadable { error: String },
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::InvalidRecord { .. } => "invalid_record",
            IssueKind::ClockOrder { .. } => "clock_order",
            IssueKind::WatermarkBehind { .. } => "watermark_behind",
            IssueKind::DanglingRowIndex { .. } => "dangling_row_index",
            IssueKind::Unreadable { .. } => "unreadable",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            IssueKind::InvalidRecord { reason } => reason.clone(),
            IssueKind::ClockOrder { previous } => format!("previous clock {}", previous),
            IssueKind::WatermarkBehind { head } => format!("watermark {}", head),
            IssueKind::DanglingRowIndex { table, row_key } => format!("{}/{}", table, row_key),
            IssueKind::Unreadable { error } => error.clone(),
        }
    }
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn issue_count(&self) -> usize {
        self.issues.len()
    }
}

/// Check every stored record and row index entry
pub fn check_log_integrity(store: &ReplicaStore) -> Result<IntegrityReport, RowsyncError> {
    let mut report = IntegrityReport::default();
    let log = store.log();
    let heads = log.heads()?;
    let mut previous: BTreeMap<OriginId, u64> = BTreeMap::new();

    for item in log.iter_all() {
        report.records_checked += 1;
        let record = match item {
            Ok(r) => r,
            Err(e) => {
                report.issues.push(IntegrityIssue {
                    origin_id: String::new(),
                    logical_clock: 0,
                    kind: IssueKind::Unreadable { error: e.to_string() },
                });
                continue;
            }
        };

        let origin = id_to_hex(&record.origin_id);
        let mut valid = true;

        if let Err(e) = record.validate() {
            valid = false;
            report.issues.push(IntegrityIssue {
                origin_id: origin.clone(),
                logical_clock: record.logical_clock,
                kind: IssueKind::InvalidRecord { reason: e.to_string() },
            });
        }

        if let Some(&prev) = previous.get(&record.origin_id) {
            if record.logical_clock <= prev {
                valid = false;
                report.issues.push(IntegrityIssue {
                    origin_id: origin.clone(),
                    logical_clock: record.logical_clock,
                    kind: IssueKind::ClockOrder { previous: prev },
                });
            }
        }
        previous.insert(record.origin_id, record.logical_clock);

        let head = heads.get(&record.origin_id).copied().unwrap_or(0);
        if record.logical_clock > head {
            valid = false;
            report.issues.push(IntegrityIssue {
                origin_id: origin,
                logical_clock: record.logical_clock,
                kind: IssueKind::WatermarkBehind { head },
            });
        }

        if valid {
            report.records_valid += 1;
        }
    }

    for (key, version) in log.row_index_entries()? {
        report.rows_checked += 1;
        if log.get(&version.origin_id, version.logical_clock)?.is_none() {
            let (table, row_key) = parse_row_key(&key).unwrap_or_default();
            report.issues.push(IntegrityIssue {
                origin_id: id_to_hex(&version.origin_id),
                logical_clock: version.logical_clock,
                kind: IssueKind::DanglingRowIndex { table, row_key },
            });
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolutionPolicy;
    use crate::types::change::{ColumnValue, Payload};
    use tempfile::tempdir;

    #[test]
    fn test_healthy_store() {
        let dir = tempdir().unwrap();
        let store = ReplicaStore::open(&dir.path().join("sled"), [1; 16], ResolutionPolicy::Symmetric).unwrap();
        let mut p = Payload::new();
        p.insert("n".to_string(), ColumnValue::Integer(1));
        store.put_row("t", "1", p.clone()).unwrap();
        store.put_row("t", "2", p).unwrap();
        store.delete_row("t", "1").unwrap();

        let report = check_log_integrity(&store).unwrap();
        assert!(report.is_healthy(), "{:?}", report.issues);
        assert_eq!(report.records_checked, 3);
        assert_eq!(report.records_valid, 3);
        assert_eq!(report.rows_checked, 2);
    }
}
