use std::path::PathBuf;

use librowsync_core::config::{require_config, save_config, sled_path, DEFAULT_DATA_DIR};
use librowsync_core::types::ids::parse_origin_id;
use librowsync_core::{LockedReplica, PeerId, ReplicaConfig, ReplicaStore, RowsyncError};

use crate::cli::Cli;

/// Environment override for the data directory
pub const DATA_DIR_ENV: &str = "ROWSYNC_HOME";

/// Resolve the data directory: `--data-dir`, then `ROWSYNC_HOME`, then `./.rowsync`
pub fn data_dir(cli: &Cli) -> PathBuf {
    if let Some(dir) = &cli.data_dir {
        return dir.clone();
    }
    match std::env::var(DATA_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(DEFAULT_DATA_DIR),
    }
}

/// A peer resolved from a name or a replica id
#[derive(Debug, Clone)]
pub struct ResolvedPeer {
    pub name: Option<String>,
    pub peer_id: PeerId,
    pub address: Option<String>,
}

/// Resolved context for a rowsync command
pub struct RowsyncContext {
    pub data_dir: PathBuf,
    pub config: ReplicaConfig,
}

impl RowsyncContext {
    /// Load the replica config; fails with `NotFound` if `init` never ran
    pub fn resolve(cli: &Cli) -> Result<Self, RowsyncError> {
        let data_dir = data_dir(cli);
        let config = require_config(&data_dir)?;
        Ok(Self { data_dir, config })
    }

    pub fn replica_id(&self) -> Result<PeerId, RowsyncError> {
        self.config.origin_id()
    }

    /// Open the store with an exclusive lock
    pub fn open_store(&self) -> Result<LockedReplica, RowsyncError> {
        ReplicaStore::open_locked(&self.sled_path(), self.replica_id()?, self.config.resolution())
    }

    pub fn sled_path(&self) -> PathBuf {
        sled_path(&self.data_dir)
    }

    pub fn save(&self) -> Result<(), RowsyncError> {
        save_config(&self.data_dir, &self.config)
    }

    /// Look a peer up by configured name or id; an unknown but well-formed
    /// replica id resolves without an address
    pub fn resolve_peer(&self, name_or_id: &str) -> Result<ResolvedPeer, RowsyncError> {
        if let Some((name, peer)) = self.config.find_peer(name_or_id) {
            return Ok(ResolvedPeer {
                name: Some(name.to_string()),
                peer_id: parse_origin_id(&peer.peer_id)?,
                address: peer.address.clone(),
            });
        }
        match parse_origin_id(name_or_id) {
            Ok(peer_id) => Ok(ResolvedPeer {
                name: None,
                peer_id,
                address: None,
            }),
            Err(_) => Err(RowsyncError::NotFound(format!("peer '{}'", name_or_id))),
        }
    }
}
