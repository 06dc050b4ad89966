use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::OriginId;
use crate::error::RowsyncError;

/// Highest clock a record may carry. `u64::MAX` is never stamped so a
/// replica that observed the top clock can still fail cleanly instead of wrapping.
pub const MAX_LOGICAL_CLOCK: u64 = u64::MAX - 1;

/// A single column value in a row image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl ColumnValue {
    /// Parse a command-line literal: `null`, `true`/`false`, integers, floats, else text
    pub fn parse_literal(s: &str) -> Self {
        match s {
            "null" => ColumnValue::Null,
            "true" => ColumnValue::Bool(true),
            "false" => ColumnValue::Bool(false),
            _ => {
                if let Ok(i) = s.parse::<i64>() {
                    ColumnValue::Integer(i)
                } else if let Ok(f) = s.parse::<f64>() {
                    ColumnValue::Real(f)
                } else {
                    ColumnValue::Text(s.to_string())
                }
            }
        }
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Null => write!(f, "null"),
            ColumnValue::Bool(b) => write!(f, "{}", b),
            ColumnValue::Integer(i) => write!(f, "{}", i),
            ColumnValue::Real(r) => write!(f, "{}", r),
            ColumnValue::Text(s) => write!(f, "{}", s),
            ColumnValue::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
        }
    }
}

/// Full row image, columns sorted by name (BTreeMap for determinism)
pub type Payload = BTreeMap<String, ColumnValue>;

/// Row-level mutation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    /// Insert and Update carry a row image, Delete does not
    pub fn carries_payload(&self) -> bool {
        !matches!(self, Operation::Delete)
    }
}

/// Version tuple used for last-writer-wins: (clock, origin, operation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowVersion {
    pub logical_clock: u64,
    pub origin_id: OriginId,
    pub operation: Operation,
}

/// An immutable row-level mutation tagged with its origin and logical clock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub table_name: String,
    pub row_key: String,
    pub operation: Operation,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payload: Option<Payload>,
    pub origin_id: OriginId,
    pub logical_clock: u64,
    /// Informational only, never used for ordering
    pub wall_time_ms: u64,
}

impl ChangeRecord {
    pub fn new(
        table_name: impl Into<String>,
        row_key: impl Into<String>,
        operation: Operation,
        payload: Option<Payload>,
        origin_id: OriginId,
        logical_clock: u64,
        wall_time_ms: u64,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            row_key: row_key.into(),
            operation,
            payload,
            origin_id,
            logical_clock,
            wall_time_ms,
        }
    }

    /// Check the shape of the record: non-empty names, clock in
    /// `1..=MAX_LOGICAL_CLOCK`, payload present exactly when the operation carries one
    pub fn validate(&self) -> Result<(), RowsyncError> {
        if self.table_name.is_empty() {
            return Err(RowsyncError::InvalidRecord("table_name is empty".to_string()));
        }
        if self.row_key.is_empty() {
            return Err(RowsyncError::InvalidRecord("row_key is empty".to_string()));
        }
        if self.logical_clock == 0 {
            return Err(RowsyncError::InvalidRecord(
                "logical_clock must be at least 1".to_string(),
            ));
        }
        if self.logical_clock > MAX_LOGICAL_CLOCK {
            return Err(RowsyncError::InvalidRecord(format!(
                "logical_clock {} exceeds the maximum {}",
                self.logical_clock, MAX_LOGICAL_CLOCK
            )));
        }
        match (self.operation.carries_payload(), self.payload.is_some()) {
            (true, false) => Err(RowsyncError::InvalidRecord(format!(
                "{} on {}/{} requires a payload",
                self.operation.as_str(),
                self.table_name,
                self.row_key
            ))),
            (false, true) => Err(RowsyncError::InvalidRecord(format!(
                "delete on {}/{} must not carry a payload",
                self.table_name, self.row_key
            ))),
            _ => Ok(()),
        }
    }

    pub fn version(&self) -> RowVersion {
        RowVersion {
            logical_clock: self.logical_clock,
            origin_id: self.origin_id,
            operation: self.operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(name: &str) -> Payload {
        let mut p = Payload::new();
        p.insert("name".to_string(), ColumnValue::Text(name.to_string()));
        p
    }

    #[test]
    fn test_validate_accepts_well_formed_records() {
        let insert = ChangeRecord::new("person", "7", Operation::Insert, Some(payload("a")), [1; 16], 1, 0);
        assert!(insert.validate().is_ok());

        let delete = ChangeRecord::new("person", "7", Operation::Delete, None, [1; 16], 2, 0);
        assert!(delete.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_names() {
        let no_table = ChangeRecord::new("", "7", Operation::Insert, Some(payload("a")), [1; 16], 1, 0);
        assert!(matches!(no_table.validate(), Err(RowsyncError::InvalidRecord(_))));

        let no_key = ChangeRecord::new("person", "", Operation::Insert, Some(payload("a")), [1; 16], 1, 0);
        assert!(matches!(no_key.validate(), Err(RowsyncError::InvalidRecord(_))));
    }

    #[test]
    fn test_validate_rejects_payload_mismatch() {
        let update = ChangeRecord::new("person", "7", Operation::Update, None, [1; 16], 1, 0);
        assert!(update.validate().is_err());

        let delete = ChangeRecord::new("person", "7", Operation::Delete, Some(payload("a")), [1; 16], 1, 0);
        assert!(delete.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_clock() {
        let record = ChangeRecord::new("person", "7", Operation::Insert, Some(payload("a")), [1; 16], 0, 0);
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_top_clock() {
        let top = ChangeRecord::new("person", "7", Operation::Delete, None, [2; 16], u64::MAX, 0);
        assert!(matches!(top.validate(), Err(RowsyncError::InvalidRecord(_))));

        let highest = ChangeRecord::new("person", "7", Operation::Delete, None, [2; 16], MAX_LOGICAL_CLOCK, 0);
        assert!(highest.validate().is_ok());
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(ColumnValue::parse_literal("null"), ColumnValue::Null);
        assert_eq!(ColumnValue::parse_literal("true"), ColumnValue::Bool(true));
        assert_eq!(ColumnValue::parse_literal("42"), ColumnValue::Integer(42));
        assert_eq!(ColumnValue::parse_literal("1.5"), ColumnValue::Real(1.5));
        assert_eq!(
            ColumnValue::parse_literal("Jakarta"),
            ColumnValue::Text("Jakarta".to_string())
        );
    }
}
