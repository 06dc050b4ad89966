//! Sled key construction helpers
//!
//! All keys sort so that sled's byte-order iteration yields the order the
//! engine needs: changes by (origin, clock), rows by (table, row_key).

use crate::types::ids::OriginId;

pub(crate) const GENERATION_KEY: &[u8] = b"generation";
pub(crate) const MAX_CLOCK_KEY: &[u8] = b"max_clock";

/// `origin (16) || clock (u64 BE)`
pub(crate) fn change_key(origin: &OriginId, clock: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + 8);
    key.extend_from_slice(origin);
    key.extend_from_slice(&clock.to_be_bytes());
    key
}

/// Split a change key back into (origin, clock)
pub(crate) fn parse_change_key(key: &[u8]) -> Option<(OriginId, u64)> {
    if key.len() != 16 + 8 {
        return None;
    }
    let mut origin = [0u8; 16];
    origin.copy_from_slice(&key[..16]);
    let mut clock = [0u8; 8];
    clock.copy_from_slice(&key[16..]);
    Some((origin, u64::from_be_bytes(clock)))
}

/// `len(table) (u32 BE) || table`; prefix of every row key in that table
pub(crate) fn table_prefix(table: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + table.len());
    key.extend_from_slice(&(table.len() as u32).to_be_bytes());
    key.extend_from_slice(table.as_bytes());
    key
}

/// `len(table) (u32 BE) || table || row_key`
pub(crate) fn row_key(table: &str, row: &str) -> Vec<u8> {
    let mut key = table_prefix(table);
    key.extend_from_slice(row.as_bytes());
    key
}

/// Recover (table, row_key) from a row key
pub(crate) fn parse_row_key(key: &[u8]) -> Option<(String, String)> {
    if key.len() < 4 {
        return None;
    }
    let mut len = [0u8; 4];
    len.copy_from_slice(&key[..4]);
    let table_len = u32::from_be_bytes(len) as usize;
    if key.len() < 4 + table_len {
        return None;
    }
    let table = std::str::from_utf8(&key[4..4 + table_len]).ok()?;
    let row = std::str::from_utf8(&key[4 + table_len..]).ok()?;
    Some((table.to_string(), row.to_string()))
}

/// `loser origin || loser clock || winner origin || winner clock`
pub(crate) fn conflict_key(
    loser: (&OriginId, u64),
    winner: (&OriginId, u64),
) -> Vec<u8> {
    let mut key = change_key(loser.0, loser.1);
    key.extend_from_slice(&change_key(winner.0, winner.1));
    key
}

/// Decode a big-endian u64 stored as a sled value
pub(crate) fn decode_u64(bytes: &[u8]) -> u64 {
    let arr: [u8; 8] = bytes.try_into().unwrap_or([0; 8]);
    u64::from_be_bytes(arr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_key_roundtrip_and_order() {
        let a = change_key(&[1; 16], 2);
        let b = change_key(&[1; 16], 10);
        let c = change_key(&[2; 16], 1);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(parse_change_key(&b), Some(([1; 16], 10)));
        assert_eq!(parse_change_key(b"short"), None);
    }

    #[test]
    fn test_row_key_is_unambiguous() {
        // "ab"/"c" and "a"/"bc" must not collide
        assert_ne!(row_key("ab", "c"), row_key("a", "bc"));
        assert_eq!(
            parse_row_key(&row_key("person", "7")),
            Some(("person".to_string(), "7".to_string()))
        );
        assert!(row_key("person", "7").starts_with(&table_prefix("person")));
    }
}
