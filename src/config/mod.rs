//! # Configuration Management Module
//!
//! TOML configuration for the BBS, loaded once at startup.
//!
//! ## Configuration Structure
//!
//! - [`BbsConfig`] - station name, session timeout, bulletin boards
//! - [`MeshConfig`] - channel, payload size and send pacing
//! - [`StorageConfig`] - data directory for the sled store
//! - [`SyncConfig`] - peer BBS nodes that receive replicated writes
//! - [`LoggingConfig`] - log level and log files
//!
//! ## Configuration File Format
//!
//! ```toml
//! [bbs]
//! name = "Mesh Sync BBS"
//! session_timeout = 30
//! boards = ["General", "Info", "News", "Urgent"]
//! urgent_board = "Urgent"
//! fortune_file = "./fortunes.txt"
//!
//! [mesh]
//! channel = 0
//! max_payload = 200
//! send_pacing_ms = 2000
//! node_cache = "./data/node_cache.json"
//!
//! [storage]
//! data_dir = "./data"
//!
//! [sync]
//! peers = ["!a1b2c3d4", "!0badc0de"]
//! accept_from_non_peers = false
//!
//! [logging]
//! level = "info"
//! file = "meshsync-bbs.log"
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::mesh::MAX_PAYLOAD;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BbsConfig {
    pub name: String,
    /// Minutes of inactivity before a half-finished conversation is dropped. 0 keeps sessions forever.
    #[serde(default = "default_session_timeout")]
    pub session_timeout: u32,
    /// Bulletin boards offered in the menu; the first letter of each is its menu key.
    #[serde(default = "default_boards")]
    pub boards: Vec<String>,
    /// Posts to this board are also announced on the broadcast channel.
    #[serde(default = "default_urgent_board")]
    pub urgent_board: String,
    /// Optional fortune file for the `[F]ortune` pick; built-ins are used otherwise.
    #[serde(default)]
    pub fortune_file: Option<String>,
}

fn default_session_timeout() -> u32 {
    30
}

fn default_boards() -> Vec<String> {
    ["General", "Info", "News", "Urgent"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_urgent_board() -> String {
    "Urgent".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    pub channel: u32,
    /// Bytes per transport send; clamped to 1..=200.
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,
    /// Delay after each chunk handed to the radio (ms).
    #[serde(default = "default_send_pacing_ms")]
    pub send_pacing_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_cache: Option<String>,
}

fn default_max_payload() -> usize {
    MAX_PAYLOAD
}

fn default_send_pacing_ms() -> u64 {
    2000
}

impl MeshConfig {
    pub fn effective_max_payload(&self) -> usize {
        self.max_payload.clamp(1, MAX_PAYLOAD)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    /// Node ids of peer BBS instances. Empty disables replication.
    #[serde(default)]
    pub peers: Vec<String>,
    /// Apply sync records from senders that are not listed in `peers`.
    #[serde(default)]
    pub accept_from_non_peers: bool,
}

impl SyncConfig {
    pub fn is_peer(&self, node_id: &str) -> bool {
        self.peers.iter().any(|p| p == node_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    #[serde(default)]
    pub security_file: Option<String>,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bbs: BbsConfig,
    pub mesh: MeshConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;
        Self::from_toml(&content).map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.normalize();
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    fn normalize(&mut self) {
        self.mesh.max_payload = self.mesh.effective_max_payload();
        self.bbs.boards.retain(|b| !b.trim().is_empty());
        if self.bbs.boards.is_empty() {
            self.bbs.boards = default_boards();
        }
        self.sync.peers.retain(|p| !p.trim().is_empty());
    }

    /// Path of the node directory cache (defaults to `<data_dir>/node_cache.json`).
    pub fn node_cache_path(&self) -> String {
        self.mesh.node_cache.clone().unwrap_or_else(|| {
            std::path::Path::new(&self.storage.data_dir)
                .join("node_cache.json")
                .to_string_lossy()
                .into_owned()
        })
    }

    /// Canonical board name for user input, matched case-insensitively.
    pub fn find_board(&self, input: &str) -> Option<&str> {
        let input = input.trim();
        self.bbs
            .boards
            .iter()
            .find(|b| b.eq_ignore_ascii_case(input))
            .map(|b| b.as_str())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bbs: BbsConfig {
                name: "Mesh Sync BBS".to_string(),
                session_timeout: default_session_timeout(),
                boards: default_boards(),
                urgent_board: default_urgent_board(),
                fortune_file: None,
            },
            mesh: MeshConfig {
                channel: 0,
                max_payload: MAX_PAYLOAD,
                send_pacing_ms: default_send_pacing_ms(),
                node_cache: None,
            },
            storage: StorageConfig {
                data_dir: "./data".to_string(),
            },
            sync: SyncConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("meshsync-bbs.log".to_string()),
                security_file: Some("meshsync-bbs-security.log".to_string()),
            },
        }
    }
}
