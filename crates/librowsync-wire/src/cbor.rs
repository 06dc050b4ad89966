//! CBOR value extraction
//!
//! Inverse of the canonical encoders in `librowsync_core::hash`.

use std::collections::BTreeMap;

use ciborium::Value;
use librowsync_core::hash::operation_tag;
use librowsync_core::{ChangeRecord, ColumnValue, Operation, OriginId, Payload, SyncCursor};

use crate::WireError;

fn malformed(msg: String) -> WireError {
    WireError::Malformed(msg)
}

pub(crate) fn expect_array(value: Value, field: &str, len: usize) -> Result<Vec<Value>, WireError> {
    match value {
        Value::Array(arr) if arr.len() == len => Ok(arr),
        Value::Array(arr) => Err(malformed(format!(
            "{} expects {} elements, got {}",
            field,
            len,
            arr.len()
        ))),
        _ => Err(malformed(format!("{} must be an array", field))),
    }
}

pub(crate) fn extract_u64(value: &Value, field: &str) -> Result<u64, WireError> {
    match value {
        Value::Integer(i) => u64::try_from(i128::from(*i))
            .map_err(|_| malformed(format!("{} out of range", field))),
        _ => Err(malformed(format!("{} must be an integer", field))),
    }
}

pub(crate) fn extract_u32(value: &Value, field: &str) -> Result<u32, WireError> {
    let n = extract_u64(value, field)?;
    u32::try_from(n).map_err(|_| malformed(format!("{} out of range", field)))
}

pub(crate) fn extract_u16(value: &Value, field: &str) -> Result<u16, WireError> {
    let n = extract_u64(value, field)?;
    u16::try_from(n).map_err(|_| malformed(format!("{} out of range", field)))
}

pub(crate) fn extract_bool(value: &Value, field: &str) -> Result<bool, WireError> {
    match value {
        Value::Bool(b) => Ok(*b),
        _ => Err(malformed(format!("{} must be a bool", field))),
    }
}

pub(crate) fn extract_string(value: Value, field: &str) -> Result<String, WireError> {
    match value {
        Value::Text(s) => Ok(s),
        _ => Err(malformed(format!("{} must be text", field))),
    }
}

pub(crate) fn extract_bytes(value: Value, field: &str) -> Result<Vec<u8>, WireError> {
    match value {
        Value::Bytes(b) => Ok(b),
        _ => Err(malformed(format!("{} must be bytes", field))),
    }
}

pub(crate) fn extract_id(value: Value, field: &str) -> Result<OriginId, WireError> {
    extract_bytes(value, field)?
        .try_into()
        .map_err(|_| malformed(format!("{} must be 16 bytes", field)))
}

fn value_to_column(value: Value, column: &str) -> Result<ColumnValue, WireError> {
    Ok(match value {
        Value::Null => ColumnValue::Null,
        Value::Bool(b) => ColumnValue::Bool(b),
        Value::Integer(i) => ColumnValue::Integer(
            i64::try_from(i128::from(i))
                .map_err(|_| malformed(format!("column {} out of range", column)))?,
        ),
        Value::Float(f) => ColumnValue::Real(f),
        Value::Text(s) => ColumnValue::Text(s),
        Value::Bytes(b) => ColumnValue::Bytes(b),
        _ => return Err(malformed(format!("column {} has unsupported type", column))),
    })
}

fn value_to_payload(value: Value) -> Result<Payload, WireError> {
    let entries = match value {
        Value::Map(entries) => entries,
        _ => return Err(malformed("payload must be a map".to_string())),
    };
    let mut payload = Payload::new();
    for (k, v) in entries {
        let column = extract_string(k, "column name")?;
        let value = value_to_column(v, &column)?;
        payload.insert(column, value);
    }
    Ok(payload)
}

fn operation_from_tag(tag: u32) -> Result<Operation, WireError> {
    [Operation::Insert, Operation::Update, Operation::Delete]
        .into_iter()
        .find(|op| operation_tag(*op) == tag)
        .ok_or_else(|| malformed(format!("unknown operation tag {}", tag)))
}

/// Decode `[table, row_key, op_tag, payload|null, origin, clock, wall_time_ms]`
pub(crate) fn value_to_record(value: Value) -> Result<ChangeRecord, WireError> {
    let mut iter = expect_array(value, "record", 7)?.into_iter();
    let mut next = || iter.next().unwrap_or(Value::Null);

    let table_name = extract_string(next(), "table_name")?;
    let row_key = extract_string(next(), "row_key")?;
    let operation = operation_from_tag(extract_u32(&next(), "op_tag")?)?;
    let payload = match next() {
        Value::Null => None,
        other => Some(value_to_payload(other)?),
    };
    let origin_id = extract_id(next(), "origin_id")?;
    let logical_clock = extract_u64(&next(), "logical_clock")?;
    let wall_time_ms = extract_u64(&next(), "wall_time_ms")?;

    Ok(ChangeRecord {
        table_name,
        row_key,
        operation,
        payload,
        origin_id,
        logical_clock,
        wall_time_ms,
    })
}

/// Decode `[peer_id, [[origin, clock], ...]]`
pub(crate) fn value_to_cursor(value: Value) -> Result<SyncCursor, WireError> {
    let mut iter = expect_array(value, "cursor", 2)?.into_iter();
    let peer_id = extract_id(iter.next().unwrap_or(Value::Null), "cursor peer_id")?;
    let acknowledged = value_to_clock_map(iter.next().unwrap_or(Value::Null), "cursor entries")?;
    Ok(SyncCursor {
        peer_id,
        acknowledged,
    })
}

pub(crate) fn clock_map_to_value(map: &BTreeMap<OriginId, u64>) -> Value {
    Value::Array(
        map.iter()
            .map(|(origin, clock)| {
                Value::Array(vec![
                    Value::Bytes(origin.to_vec()),
                    Value::Integer((*clock).into()),
                ])
            })
            .collect(),
    )
}

pub(crate) fn value_to_clock_map(value: Value, field: &str) -> Result<BTreeMap<OriginId, u64>, WireError> {
    let entries = match value {
        Value::Array(arr) => arr,
        _ => return Err(malformed(format!("{} must be an array", field))),
    };
    let mut map = BTreeMap::new();
    for entry in entries {
        let mut pair = expect_array(entry, field, 2)?.into_iter();
        let origin = extract_id(pair.next().unwrap_or(Value::Null), field)?;
        let clock = extract_u64(&pair.next().unwrap_or(Value::Null), field)?;
        map.insert(origin, clock);
    }
    Ok(map)
}
