use serde::Serialize;

use crate::error::RowsyncError;
use crate::replica::ReplicaStore;
use crate::types::change::{ChangeRecord, Payload};
use crate::types::conflict::ConflictRecord;
use crate::types::cursor::SyncCursor;
use crate::types::ids::id_to_hex;

pub const EXPORT_SCHEMA_VERSION: u32 = 1;

/// Export metadata
#[derive(Debug, Serialize)]
pub struct ExportMeta {
    pub schema_version: u32,
    pub generated_ts: u64,
    pub replica_id: String,
    pub generation: u64,
    pub change_count: usize,
}

/// JSON export document
#[derive(Debug, Serialize)]
pub struct JsonExport {
    pub meta: ExportMeta,
    pub changes: Vec<ChangeJson>,
    pub conflicts: Vec<ConflictJson>,
    pub cursors: Vec<CursorJson>,
}

#[derive(Debug, Serialize)]
pub struct ChangeJson {
    pub origin_id: String,
    pub logical_clock: u64,
    pub table_name: String,
    pub row_key: String,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    pub wall_time_ms: u64,
}

impl From<&ChangeRecord> for ChangeJson {
    fn from(r: &ChangeRecord) -> Self {
        Self {
            origin_id: id_to_hex(&r.origin_id),
            logical_clock: r.logical_clock,
            table_name: r.table_name.clone(),
            row_key: r.row_key.clone(),
            operation: r.operation.as_str().to_string(),
            payload: r.payload.clone(),
            wall_time_ms: r.wall_time_ms,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConflictJson {
    pub table_name: String,
    pub row_key: String,
    pub resolution_reason: String,
    pub winner: ChangeJson,
    pub loser: ChangeJson,
}

impl From<&ConflictRecord> for ConflictJson {
    fn from(c: &ConflictRecord) -> Self {
        Self {
            table_name: c.table_name.clone(),
            row_key: c.row_key.clone(),
            resolution_reason: c.resolution_reason.as_str().to_string(),
            winner: ChangeJson::from(&c.winner),
            loser: ChangeJson::from(&c.loser),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CursorJson {
    pub peer_id: String,
    /// origin hex -> acknowledged clock
    pub acknowledged: std::collections::BTreeMap<String, u64>,
}

impl From<&SyncCursor> for CursorJson {
    fn from(c: &SyncCursor) -> Self {
        Self {
            peer_id: id_to_hex(&c.peer_id),
            acknowledged: c
                .acknowledged
                .iter()
                .map(|(o, clock)| (id_to_hex(o), *clock))
                .collect(),
        }
    }
}

/// Build the export document for a replica
pub fn export_json(store: &ReplicaStore) -> Result<JsonExport, RowsyncError> {
    let changes = store
        .log()
        .iter_all()
        .map(|r| r.map(|r| ChangeJson::from(&r)))
        .collect::<Result<Vec<_>, _>>()?;
    let conflicts = store.conflicts().list()?.iter().map(ConflictJson::from).collect();
    let cursors = store.cursors().list()?.iter().map(CursorJson::from).collect();

    Ok(JsonExport {
        meta: ExportMeta {
            schema_version: EXPORT_SCHEMA_VERSION,
            generated_ts: chrono::Utc::now().timestamp_millis().max(0) as u64,
            replica_id: id_to_hex(store.replica_id()),
            generation: store.generation()?,
            change_count: changes.len(),
        },
        changes,
        conflicts,
        cursors,
    })
}
