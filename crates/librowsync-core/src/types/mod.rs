pub mod change;
pub mod conflict;
pub mod cursor;
pub mod ids;

pub use change::{ChangeRecord, ColumnValue, Operation, Payload, RowVersion, MAX_LOGICAL_CLOCK};
pub use conflict::{ConflictRecord, ResolutionReason};
pub use cursor::SyncCursor;
pub use ids::{OriginId, PeerId};
