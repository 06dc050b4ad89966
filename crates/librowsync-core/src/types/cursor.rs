use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::change::ChangeRecord;
use super::ids::{hex_clock_map, OriginId, PeerId};

/// Per-peer-pair sync position.
///
/// `acknowledged[o]` is the highest clock of origin `o` that both this replica
/// and `peer_id` are known to hold. Only a committed session moves it forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub peer_id: PeerId,
    #[serde(with = "hex_clock_map")]
    pub acknowledged: BTreeMap<OriginId, u64>,
}

impl SyncCursor {
    /// An empty cursor: nothing exchanged with `peer_id` yet
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            acknowledged: BTreeMap::new(),
        }
    }

    /// Acknowledged clock for an origin (0 if never exchanged)
    pub fn clock_for(&self, origin: &OriginId) -> u64 {
        self.acknowledged.get(origin).copied().unwrap_or(0)
    }

    /// Move an origin forward; never moves backwards
    pub fn advance(&mut self, origin: OriginId, clock: u64) {
        let entry = self.acknowledged.entry(origin).or_insert(0);
        if clock > *entry {
            *entry = clock;
        }
    }

    /// Advance to cover every record in `records`
    pub fn advance_past(&mut self, records: &[ChangeRecord]) {
        for record in records {
            self.advance(record.origin_id, record.logical_clock);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.acknowledged.values().all(|&c| c == 0)
    }
}
