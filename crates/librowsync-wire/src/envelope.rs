//! Delta batch envelope
//!
//! Envelope format:
//! - Magic: `RSYNCENV` (8 bytes)
//! - Version: u16 (little-endian)
//! - Codec length: u8
//! - Codec: "cbor-v1"
//! - Checksum: BLAKE2b-256 of the body (32 bytes)
//! - Body: canonical CBOR `[schema_version, sequence, has_more, [records], cursor]`

use ciborium::Value;
use librowsync_core::hash::{build_batch_body, digest, SCHEMA_VERSION};
use librowsync_core::DeltaBatch;

use crate::cbor::{expect_array, extract_bool, extract_u32, extract_u64, value_to_cursor, value_to_record};
use crate::WireError;

/// Magic bytes at start of envelope
pub const ENVELOPE_MAGIC: &[u8; 8] = b"RSYNCENV";

/// Current envelope format version
pub const ENVELOPE_VERSION: u16 = 1;

/// Codec identifier
pub const ENVELOPE_CODEC: &str = "cbor-v1";

const CHECKSUM_LEN: usize = 32;

/// Encode a sealed batch.
///
/// Fails with `CorruptBatch` if the batch was changed after its checksum
/// was computed.
pub fn encode_batch(batch: &DeltaBatch) -> Result<Vec<u8>, WireError> {
    let body = build_batch_body(
        batch.sequence,
        &batch.changes,
        batch.has_more,
        &batch.sender_cursor_snapshot,
    )?;
    if digest(&body) != batch.batch_checksum {
        return Err(WireError::CorruptBatch(
            "batch contents do not match its checksum".to_string(),
        ));
    }

    let codec_bytes = ENVELOPE_CODEC.as_bytes();
    let mut buf = Vec::with_capacity(8 + 2 + 1 + codec_bytes.len() + CHECKSUM_LEN + body.len());
    buf.extend_from_slice(ENVELOPE_MAGIC);
    buf.extend_from_slice(&ENVELOPE_VERSION.to_le_bytes());
    buf.push(codec_bytes.len() as u8);
    buf.extend_from_slice(codec_bytes);
    buf.extend_from_slice(&batch.batch_checksum);
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Decode an envelope, verifying the checksum before any record is parsed
pub fn decode_batch(data: &[u8]) -> Result<DeltaBatch, WireError> {
    if data.len() < 8 + 2 + 1 {
        return Err(WireError::CorruptBatch("Envelope too small".to_string()));
    }
    if &data[0..8] != ENVELOPE_MAGIC {
        return Err(WireError::CorruptBatch("Invalid magic bytes".to_string()));
    }

    let version = u16::from_le_bytes([data[8], data[9]]);
    if version != ENVELOPE_VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }

    let codec_len = data[10] as usize;
    let checksum_start = 11 + codec_len;
    let body_start = checksum_start + CHECKSUM_LEN;
    if data.len() < body_start {
        return Err(WireError::CorruptBatch("Envelope truncated".to_string()));
    }
    let codec = std::str::from_utf8(&data[11..checksum_start])
        .map_err(|_| WireError::CorruptBatch("Invalid codec string".to_string()))?;
    if codec != ENVELOPE_CODEC {
        return Err(WireError::CorruptBatch(format!("Unsupported codec: {}", codec)));
    }

    let mut checksum = [0u8; CHECKSUM_LEN];
    checksum.copy_from_slice(&data[checksum_start..body_start]);
    let body = &data[body_start..];
    if digest(body) != checksum {
        return Err(WireError::CorruptBatch("Checksum mismatch".to_string()));
    }

    let value: Value = ciborium::from_reader(body)
        .map_err(|e| WireError::Malformed(format!("Failed to decode CBOR: {}", e)))?;
    let mut iter = expect_array(value, "batch", 5)?.into_iter();
    let mut next = || iter.next().unwrap_or(Value::Null);

    let schema = extract_u64(&next(), "schema_version")?;
    if schema != u64::from(SCHEMA_VERSION) {
        return Err(WireError::Malformed(format!("Unknown schema version {}", schema)));
    }
    let sequence = extract_u32(&next(), "sequence")?;
    let has_more = extract_bool(&next(), "has_more")?;
    let changes = match next() {
        Value::Array(records) => records
            .into_iter()
            .map(value_to_record)
            .collect::<Result<Vec<_>, _>>()?,
        _ => return Err(WireError::Malformed("changes must be an array".to_string())),
    };
    let sender_cursor_snapshot = value_to_cursor(next())?;

    Ok(DeltaBatch {
        sequence,
        changes,
        has_more,
        sender_cursor_snapshot,
        batch_checksum: checksum,
    })
}
