use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use ciborium::Value;

use crate::error::RowsyncError;
use crate::types::change::{ChangeRecord, ColumnValue, Operation, Payload};
use crate::types::cursor::SyncCursor;

/// Schema version for batch hashing
pub const SCHEMA_VERSION: u8 = 1;

/// BLAKE2b-256 digest of a delta batch body
pub type BatchChecksum = [u8; 32];

/// Tag used for each operation in canonical CBOR
pub fn operation_tag(op: Operation) -> u32 {
    match op {
        Operation::Insert => 1,
        Operation::Update => 2,
        Operation::Delete => 3,
    }
}

pub fn column_to_value(value: &ColumnValue) -> Value {
    match value {
        ColumnValue::Null => Value::Null,
        ColumnValue::Bool(b) => Value::Bool(*b),
        ColumnValue::Integer(i) => Value::Integer((*i).into()),
        ColumnValue::Real(r) => Value::Float(*r),
        ColumnValue::Text(s) => Value::Text(s.clone()),
        ColumnValue::Bytes(b) => Value::Bytes(b.clone()),
    }
}

/// Payload as a CBOR map; BTreeMap order makes it canonical
pub fn payload_to_value(payload: &Payload) -> Value {
    Value::Map(
        payload
            .iter()
            .map(|(k, v)| (Value::Text(k.clone()), column_to_value(v)))
            .collect(),
    )
}

/// Format: [table, row_key, op_tag, payload|null, origin, clock, wall_time_ms]
pub fn record_to_value(record: &ChangeRecord) -> Value {
    let payload = match &record.payload {
        Some(p) => payload_to_value(p),
        None => Value::Null,
    };
    Value::Array(vec![
        Value::Text(record.table_name.clone()),
        Value::Text(record.row_key.clone()),
        Value::Integer(operation_tag(record.operation).into()),
        payload,
        Value::Bytes(record.origin_id.to_vec()),
        Value::Integer(record.logical_clock.into()),
        Value::Integer(record.wall_time_ms.into()),
    ])
}

/// Format: [peer_id, [[origin, clock], ...]] with origins in ascending order
pub fn cursor_to_value(cursor: &SyncCursor) -> Value {
    let entries = cursor
        .acknowledged
        .iter()
        .map(|(origin, clock)| {
            Value::Array(vec![
                Value::Bytes(origin.to_vec()),
                Value::Integer((*clock).into()),
            ])
        })
        .collect();
    Value::Array(vec![Value::Bytes(cursor.peer_id.to_vec()), Value::Array(entries)])
}

/// Canonical CBOR body of a delta batch.
/// Format: [schema_version, sequence, has_more, [records...], cursor]
pub fn build_batch_body(
    sequence: u32,
    changes: &[ChangeRecord],
    has_more: bool,
    cursor: &SyncCursor,
) -> Result<Vec<u8>, RowsyncError> {
    let array = Value::Array(vec![
        Value::Integer(SCHEMA_VERSION.into()),
        Value::Integer(sequence.into()),
        Value::Bool(has_more),
        Value::Array(changes.iter().map(record_to_value).collect()),
        cursor_to_value(cursor),
    ]);
    to_cbor(&array)
}

pub fn to_cbor(value: &Value) -> Result<Vec<u8>, RowsyncError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| RowsyncError::Encoding(e.to_string()))?;
    Ok(buf)
}

pub fn digest(bytes: &[u8]) -> BatchChecksum {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Checksum over every record and the sender's cursor snapshot
pub fn compute_batch_checksum(
    sequence: u32,
    changes: &[ChangeRecord],
    has_more: bool,
    cursor: &SyncCursor,
) -> Result<BatchChecksum, RowsyncError> {
    Ok(digest(&build_batch_body(sequence, changes, has_more, cursor)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Vec<ChangeRecord>, SyncCursor) {
        let mut payload = Payload::new();
        payload.insert("name".to_string(), ColumnValue::Text("Budi".to_string()));
        payload.insert("age".to_string(), ColumnValue::Integer(31));
        let records = vec![
            ChangeRecord::new("person", "1", Operation::Insert, Some(payload), [1; 16], 1, 10),
            ChangeRecord::new("person", "2", Operation::Delete, None, [1; 16], 2, 11),
        ];
        let mut cursor = SyncCursor::new([2; 16]);
        cursor.advance([1; 16], 0);
        cursor.advance([3; 16], 4);
        (records, cursor)
    }

    #[test]
    fn test_checksum_is_deterministic() {
        let (records, cursor) = sample();
        let a = compute_batch_checksum(0, &records, false, &cursor).unwrap();
        let b = compute_batch_checksum(0, &records, false, &cursor).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_checksum_covers_records_and_cursor() {
        let (records, cursor) = sample();
        let base = compute_batch_checksum(0, &records, false, &cursor).unwrap();

        let mut changed = records.clone();
        changed[1].logical_clock = 3;
        assert_ne!(base, compute_batch_checksum(0, &changed, false, &cursor).unwrap());

        let mut other_cursor = cursor.clone();
        other_cursor.advance([3; 16], 5);
        assert_ne!(base, compute_batch_checksum(0, &records, false, &other_cursor).unwrap());

        assert_ne!(base, compute_batch_checksum(1, &records, false, &cursor).unwrap());
        assert_ne!(base, compute_batch_checksum(0, &records, true, &cursor).unwrap());
    }

    #[test]
    fn test_known_digest_length() {
        let d = digest(b"rowsync");
        assert_eq!(d.len(), 32);
        assert_ne!(d, digest(b"rowsynd"));
    }
}
