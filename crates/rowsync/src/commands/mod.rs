pub mod conflicts;
pub mod cursor;
pub mod db;
pub mod export;
pub mod init;
pub mod log;
pub mod peer;
pub mod row;
pub mod sync;
