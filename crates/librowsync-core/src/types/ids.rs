use rand::Rng;
use thiserror::Error;

/// 128-bit origin identifier (random), one per replica
pub type OriginId = [u8; 16];

/// Peers are replicas, so they share the origin id space
pub type PeerId = OriginId;

#[derive(Debug, Error)]
pub enum IdParseError {
    #[error("invalid hex string: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Generate a random 128-bit origin ID
pub fn generate_origin_id() -> OriginId {
    rand::thread_rng().gen()
}

/// Convert a fixed-size byte array to lowercase hex string
pub fn id_to_hex<const N: usize>(id: &[u8; N]) -> String {
    hex::encode(id)
}

/// First 8 hex chars, for log lines and tables
pub fn short_hex(id: &OriginId) -> String {
    id_to_hex(id)[..8].to_string()
}

/// Parse a hex string into a fixed-size byte array
pub fn hex_to_id<const N: usize>(hex_str: &str) -> Result<[u8; N], IdParseError> {
    let bytes = hex::decode(hex_str)?;
    if bytes.len() != N {
        return Err(IdParseError::InvalidLength {
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut arr = [0u8; N];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

/// Parse an origin ID from hex string
pub fn parse_origin_id(hex_str: &str) -> Result<OriginId, IdParseError> {
    hex_to_id::<16>(hex_str)
}

/// Serde adapter for per-origin clock maps.
///
/// JSON object keys must be strings, so origins are written as hex.
pub mod hex_clock_map {
    use std::collections::BTreeMap;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{id_to_hex, parse_origin_id, OriginId};

    pub fn serialize<S>(map: &BTreeMap<OriginId, u64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(map.iter().map(|(origin, clock)| (id_to_hex(origin), *clock)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<OriginId, u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, u64>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(key, clock)| {
                parse_origin_id(&key)
                    .map(|origin| (origin, clock))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_origin_id_is_random() {
        let id1 = generate_origin_id();
        let id2 = generate_origin_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_hex_order_matches_byte_order() {
        let low: OriginId = [0x01; 16];
        let high: OriginId = [0xa0; 16];
        assert!(low < high);
        assert!(id_to_hex(&low) < id_to_hex(&high));
    }

    #[test]
    fn test_parse_origin_id() {
        let hex = "000102030405060708090a0b0c0d0e0f";
        let id = parse_origin_id(hex).unwrap();
        assert_eq!(id, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]);
        assert_eq!(short_hex(&id), "00010203");
    }

    #[test]
    fn test_parse_origin_id_invalid_length() {
        let result = parse_origin_id("0001020304");
        assert!(matches!(result, Err(IdParseError::InvalidLength { .. })));
    }

    #[test]
    fn test_clock_map_serializes_with_hex_keys() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Wrapper {
            #[serde(with = "hex_clock_map")]
            clocks: std::collections::BTreeMap<OriginId, u64>,
        }

        let mut clocks = std::collections::BTreeMap::new();
        clocks.insert([0x01; 16], 7);
        let wrapper = Wrapper { clocks };

        let json = serde_json::to_string(&wrapper).unwrap();
        assert!(json.contains(&"01".repeat(16)));
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back, wrapper);

        let bad = serde_json::from_str::<Wrapper>(r#"{"clocks":{"zz":1}}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_parse_origin_id_invalid_hex() {
        let result = parse_origin_id("not_valid_hex!");
        assert!(matches!(result, Err(IdParseError::InvalidHex(_))));
    }
}
