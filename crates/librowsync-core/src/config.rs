use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::delta::DEFAULT_BATCH_SIZE;
use crate::error::RowsyncError;
use crate::resolver::ResolutionPolicy;
use crate::types::ids::{hex_to_id, OriginId};

/// Default data directory, relative to the working directory
pub const DEFAULT_DATA_DIR: &str = ".rowsync";

/// Default transport timeout in milliseconds
pub const DEFAULT_TRANSPORT_TIMEOUT_MS: u64 = 10_000;

/// Replica configuration stored in `<data_dir>/config.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// This replica's origin id (hex string)
    pub replica_id: String,
    /// Human-friendly label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Records per delta page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    /// Timeout for each transport call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_timeout_ms: Option<u64>,
    /// Equal-clock policy: "symmetric" or "delete-wins"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ResolutionPolicy>,
    /// Address the daemon listens on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
    /// Known peers by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub peers: BTreeMap<String, PeerConfig>,
}

/// A remote replica this one syncs with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// The peer's replica id (hex string)
    pub peer_id: String,
    /// `host:port` of the peer's daemon
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl ReplicaConfig {
    pub fn new(replica_id: &OriginId, label: Option<String>) -> Self {
        Self {
            replica_id: hex::encode(replica_id),
            label,
            batch_size: None,
            transport_timeout_ms: None,
            resolution: None,
            listen: None,
            peers: BTreeMap::new(),
        }
    }

    pub fn origin_id(&self) -> Result<OriginId, RowsyncError> {
        Ok(hex_to_id(&self.replica_id)?)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
    }

    pub fn transport_timeout_ms(&self) -> u64 {
        self.transport_timeout_ms.unwrap_or(DEFAULT_TRANSPORT_TIMEOUT_MS)
    }

    pub fn resolution(&self) -> ResolutionPolicy {
        self.resolution.unwrap_or_default()
    }

    /// Look a peer up by name, then by replica id
    pub fn find_peer(&self, name_or_id: &str) -> Option<(&str, &PeerConfig)> {
        if let Some((name, peer)) = self.peers.get_key_value(name_or_id) {
            return Some((name.as_str(), peer));
        }
        self.peers
            .iter()
            .find(|(_, p)| p.peer_id.eq_ignore_ascii_case(name_or_id))
            .map(|(n, p)| (n.as_str(), p))
    }
}

/// Path of the config file inside a data directory
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}

/// Path of the sled database inside a data directory
pub fn sled_path(data_dir: &Path) -> PathBuf {
    data_dir.join("sled")
}

/// Load config from `<data_dir>/config.toml`; `None` if the replica was never initialised
pub fn load_config(data_dir: &Path) -> Result<Option<ReplicaConfig>, RowsyncError> {
    let path = config_path(data_dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)?;
    let config: ReplicaConfig = toml::from_str(&content)?;
    Ok(Some(config))
}

/// Like `load_config`, but a missing config is `NotFound`
pub fn require_config(data_dir: &Path) -> Result<ReplicaConfig, RowsyncError> {
    load_config(data_dir)?.ok_or_else(|| {
        RowsyncError::NotFound(format!(
            "config not found in {}",
            data_dir.display()
        ))
    })
}

/// Save config to `<data_dir>/config.toml`
pub fn save_config(data_dir: &Path, config: &ReplicaConfig) -> Result<(), RowsyncError> {
    std::fs::create_dir_all(data_dir)?;
    let content = toml::to_string_pretty(config)?;
    std::fs::write(config_path(data_dir), content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_roundtrip() {
        let dir = tempdir().unwrap();
        let mut config = ReplicaConfig::new(&[0xab; 16], Some("laptop".to_string()));
        config.batch_size = Some(50);
        config.resolution = Some(ResolutionPolicy::DeleteWins);
        config.peers.insert(
            "server".to_string(),
            PeerConfig {
                peer_id: "00112233445566778899aabbccddeeff".to_string(),
                address: Some("127.0.0.1:7878".to_string()),
            },
        );

        save_config(dir.path(), &config).unwrap();
        let loaded = load_config(dir.path()).unwrap().unwrap();

        assert_eq!(loaded.origin_id().unwrap(), [0xab; 16]);
        assert_eq!(loaded.label.as_deref(), Some("laptop"));
        assert_eq!(loaded.batch_size(), 50);
        assert_eq!(loaded.resolution(), ResolutionPolicy::DeleteWins);
        assert_eq!(loaded.peers, config.peers);
    }

    #[test]
    fn test_defaults() {
        let config = ReplicaConfig::new(&[1; 16], None);
        assert_eq!(config.batch_size(), DEFAULT_BATCH_SIZE);
        assert_eq!(config.transport_timeout_ms(), DEFAULT_TRANSPORT_TIMEOUT_MS);
        assert_eq!(config.resolution(), ResolutionPolicy::Symmetric);

        let text = toml::to_string_pretty(&config).unwrap();
        assert!(!text.contains("batch_size"));
        assert!(!text.contains("peers"));
    }

    #[test]
    fn test_missing_config() {
        let dir = tempdir().unwrap();
        assert!(load_config(dir.path()).unwrap().is_none());
        assert!(matches!(require_config(dir.path()), Err(RowsyncError::NotFound(_))));
    }

    #[test]
    fn test_find_peer_by_name_or_id() {
        let mut config = ReplicaConfig::new(&[1; 16], None);
        config.peers.insert(
            "server".to_string(),
            PeerConfig {
                peer_id: "00112233445566778899AABBCCDDEEFF".to_string(),
                address: None,
            },
        );
        assert_eq!(config.find_peer("server").unwrap().0, "server");
        assert_eq!(
            config.find_peer("00112233445566778899aabbccddeeff").unwrap().0,
            "server"
        );
        assert!(config.find_peer("other").is_none());
    }
}
