//! Session message framing
//!
//! Frame format:
//! - Magic: `RSYNCMSG` (8 bytes)
//! - Version: u16 (little-endian)
//! - Body: CBOR array `[tag, fields...]`
//!
//! Batches travel as an embedded envelope so their checksum survives intact.

use std::collections::BTreeMap;

use ciborium::Value;
use librowsync_core::hash::cursor_to_value;
use librowsync_core::{OriginId, PeerId, SyncCursor};

use crate::cbor::{
    clock_map_to_value, extract_bytes, extract_id, extract_string, extract_u16,
    extract_u64, value_to_clock_map, value_to_cursor,
};
use crate::WireError;

/// Magic bytes at start of a session frame
pub const MESSAGE_MAGIC: &[u8; 8] = b"RSYNCMSG";

/// Session protocol version spoken by this build
pub const PROTOCOL_VERSION: u16 = 1;

/// Opening message of a session
#[derive(Debug, Clone, PartialEq)]
pub struct Hello {
    pub protocol_version: u16,
    pub session_id: String,
    /// Replica id of the sender
    pub sender: PeerId,
    /// Sender's cursor for the receiver
    pub cursor_view: SyncCursor,
    /// Sender's per-origin watermarks
    pub heads: BTreeMap<OriginId, u64>,
}

/// Confirms the sender committed everything it received in the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub session_id: String,
    pub applied: u64,
    pub conflicts: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionMessage {
    Hello(Hello),
    /// An encoded delta batch envelope
    Batch(Vec<u8>),
    Ack(Ack),
    Abort { stage: String, reason: String },
}

impl SessionMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionMessage::Hello(_) => "hello",
            SessionMessage::Batch(_) => "batch",
            SessionMessage::Ack(_) => "ack",
            SessionMessage::Abort { .. } => "abort",
        }
    }

    fn tag(&self) -> u64 {
        match self {
            SessionMessage::Hello(_) => 1,
            SessionMessage::Batch(_) => 2,
            SessionMessage::Ack(_) => 3,
            SessionMessage::Abort { .. } => 4,
        }
    }

    fn to_value(&self) -> Value {
        let tag = Value::Integer(self.tag().into());
        match self {
            SessionMessage::Hello(h) => Value::Array(vec![
                tag,
                Value::Integer(h.protocol_version.into()),
                Value::Text(h.session_id.clone()),
                Value::Bytes(h.sender.to_vec()),
                cursor_to_value(&h.cursor_view),
                clock_map_to_value(&h.heads),
            ]),
            SessionMessage::Batch(bytes) => Value::Array(vec![tag, Value::Bytes(bytes.clone())]),
            SessionMessage::Ack(a) => Value::Array(vec![
                tag,
                Value::Text(a.session_id.clone()),
                Value::Integer(a.applied.into()),
                Value::Integer(a.conflicts.into()),
                Value::Integer(a.skipped.into()),
            ]),
            SessionMessage::Abort { stage, reason } => Value::Array(vec![
                tag,
                Value::Text(stage.clone()),
                Value::Text(reason.clone()),
            ]),
        }
    }

    fn from_value(value: Value) -> Result<Self, WireError> {
        let array = match value {
            Value::Array(arr) if !arr.is_empty() => arr,
            _ => return Err(WireError::Malformed("Expected message array".to_string())),
        };
        let tag = extract_u64(&array[0], "tag")?;
        let len = array.len();
        let mut iter = array.into_iter().skip(1);
        let mut next = || iter.next().unwrap_or(Value::Null);

        match tag {
            1 => {
                expect_len(len, 6, "hello")?;
                Ok(SessionMessage::Hello(Hello {
                    protocol_version: extract_u16(&next(), "protocol_version")?,
                    session_id: extract_string(next(), "session_id")?,
                    sender: extract_id(next(), "sender")?,
                    cursor_view: value_to_cursor(next())?,
                    heads: value_to_clock_map(next(), "heads")?,
                }))
            }
            2 => {
                expect_len(len, 2, "batch")?;
                Ok(SessionMessage::Batch(extract_bytes(next(), "envelope")?))
            }
            3 => {
                expect_len(len, 5, "ack")?;
                Ok(SessionMessage::Ack(Ack {
                    session_id: extract_string(next(), "session_id")?,
                    applied: extract_u64(&next(), "applied")?,
                    conflicts: extract_u64(&next(), "conflicts")?,
                    skipped: extract_u64(&next(), "skipped")?,
                }))
            }
            4 => {
                expect_len(len, 3, "abort")?;
                Ok(SessionMessage::Abort {
                    stage: extract_string(next(), "stage")?,
                    reason: extract_string(next(), "reason")?,
                })
            }
            other => Err(WireError::Malformed(format!("Unknown message tag {}", other))),
        }
    }
}

fn expect_len(len: usize, expected: usize, kind: &str) -> Result<(), WireError> {
    if len != expected {
        return Err(WireError::Malformed(format!(
            "{} expects {} elements, got {}",
            kind, expected, len
        )));
    }
    Ok(())
}

/// Frame a session message
pub fn encode_message(message: &SessionMessage) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::new();
    buf.extend_from_slice(MESSAGE_MAGIC);
    buf.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    ciborium::into_writer(&message.to_value(), &mut buf)
        .map_err(|e| WireError::Encode(format!("Failed to encode message: {}", e)))?;
    Ok(buf)
}

/// Parse a session frame
pub fn decode_message(data: &[u8]) -> Result<SessionMessage, WireError> {
    if data.len() < 8 + 2 {
        return Err(WireError::Malformed("Frame too small".to_string()));
    }
    if &data[0..8] != MESSAGE_MAGIC {
        return Err(WireError::Malformed("Invalid magic bytes".to_string()));
    }
    let version = u16::from_le_bytes([data[8], data[9]]);
    if version != PROTOCOL_VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }
    let value: Value = ciborium::from_reader(&data[10..])
        .map_err(|e| WireError::Malformed(format!("Failed to decode CBOR: {}", e)))?;
    SessionMessage::from_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_roundtrip() {
        let mut cursor_view = SyncCursor::new([2; 16]);
        cursor_view.advance([3; 16], 9);
        let mut heads = BTreeMap::new();
        heads.insert([1; 16], 4);
        heads.insert([3; 16], 9);

        let hello = SessionMessage::Hello(Hello {
            protocol_version: PROTOCOL_VERSION,
            session_id: "0b6f4a1e-2f43-4c55-9d0e-6c7b3f1d2a10".to_string(),
            sender: [1; 16],
            cursor_view,
            heads,
        });
        let bytes = encode_message(&hello).unwrap();
        assert_eq!(decode_message(&bytes).unwrap(), hello);
    }

    #[test]
    fn test_ack_and_abort_roundtrip() {
        let ack = SessionMessage::Ack(Ack {
            session_id: "s".to_string(),
            applied: 3,
            conflicts: 1,
            skipped: 0,
        });
        assert_eq!(decode_message(&encode_message(&ack).unwrap()).unwrap(), ack);

        let abort = SessionMessage::Abort {
            stage: "applying_remote".to_string(),
            reason: "checksum mismatch".to_string(),
        };
        assert_eq!(decode_message(&encode_message(&abort).unwrap()).unwrap(), abort);
    }

    #[test]
    fn test_unknown_version_and_tag() {
        let mut bytes = encode_message(&SessionMessage::Batch(vec![1, 2])).unwrap();
        bytes[8..10].copy_from_slice(&2u16.to_le_bytes());
        assert!(matches!(decode_message(&bytes), Err(WireError::UnsupportedVersion(2))));

        let mut raw = Vec::new();
        raw.extend_from_slice(MESSAGE_MAGIC);
        raw.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
        ciborium::into_writer(&Value::Array(vec![Value::Integer(77.into())]), &mut raw).unwrap();
        assert!(matches!(decode_message(&raw), Err(WireError::Malformed(_))));
    }
}
