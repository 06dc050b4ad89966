pub mod types;
pub mod hash;
pub mod change_log;
pub mod snapshot;
pub mod cursor_store;
pub mod conflict_log;
pub mod resolver;
pub mod delta;
pub mod plan;
pub mod replica;
pub mod config;
pub mod integrity;
pub mod export;
pub mod error;
mod keys;

pub use error::RowsyncError;
pub use types::{ChangeRecord, ColumnValue, ConflictRecord, Operation, OriginId, Payload, PeerId, ResolutionReason, RowVersion, SyncCursor};
pub use change_log::{ChangeIter, ChangeLog, ChangeQuery};
pub use snapshot::{SledSnapshot, SnapshotStore, TxnSnapshot};
pub use cursor_store::{CursorStore, SledCursorStore, TxnCursorStore};
pub use conflict_log::ConflictLog;
pub use resolver::{ConflictResolver, ResolutionPolicy};
pub use delta::{DeltaBatch, DeltaBuilder, DeltaPage, DEFAULT_BATCH_SIZE};
pub use plan::{CommitPlan, PlanStats, RowOp};
pub use replica::{LockedReplica, ReplicaStats, ReplicaStore};
pub use config::{load_config, require_config, save_config, PeerConfig, ReplicaConfig};
