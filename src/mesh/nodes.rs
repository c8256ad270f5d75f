//! Node id ↔ display name directory, fed by NODEINFO announcements and
//! persisted as JSON so short names survive restarts.

use std::collections::HashMap;
use std::fs::{self as sfs, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::errors::{BbsError, BbsResult};
use crate::validation::sanitize_short_name;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeInfo {
    pub node_id: String,
    pub short_name: String,
    pub long_name: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NodeCacheFile {
    nodes: HashMap<String, NodeInfo>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

/// Shared lookup table; cheap to read from many tasks.
#[derive(Debug, Default)]
pub struct NodeDirectory {
    nodes: RwLock<HashMap<String, NodeInfo>>,
    path: Option<PathBuf>,
}

/// Meshtastic's default short name: the last four hex digits of the node id.
pub fn default_short_name(node_id: &str) -> String {
    let trimmed = node_id.trim_start_matches('!');
    let start = trimmed
        .char_indices()
        .rev()
        .nth(3)
        .map(|(i, _)| i)
        .unwrap_or(0);
    trimmed[start..].to_string()
}

impl NodeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the cache at `path` if it exists; later [`NodeDirectory::save`] calls write back to it.
    pub fn open<P: AsRef<Path>>(path: P) -> BbsResult<Self> {
        let path = path.as_ref().to_path_buf();
        let nodes = match sfs::read_to_string(&path) {
            Ok(content) => {
                // partial writes can leave leading NULs behind
                let cleaned = content.trim_start_matches('\0');
                let file: NodeCacheFile = serde_json::from_str(cleaned)?;
                file.nodes
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(BbsError::Io(e)),
        };
        debug!("node directory: loaded {} node(s) from {}", nodes.len(), path.display());
        Ok(Self {
            nodes: RwLock::new(nodes),
            path: Some(path),
        })
    }

    pub fn update(&self, node_id: &str, short_name: &str, long_name: &str) {
        let now = Utc::now();
        let short = sanitize_short_name(short_name);
        let mut guard = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        guard
            .entry(node_id.to_string())
            .and_modify(|n| {
                n.short_name = short.clone();
                n.long_name = long_name.to_string();
                n.last_seen = now;
            })
            .or_insert(NodeInfo {
                node_id: node_id.to_string(),
                short_name: short.clone(),
                long_name: long_name.to_string(),
                first_seen: now,
                last_seen: now,
            });
    }

    pub fn get(&self, node_id: &str) -> Option<NodeInfo> {
        let guard = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        guard.get(node_id).cloned()
    }

    /// Short name for display; falls back to the id's last four characters.
    pub fn short_name(&self, node_id: &str) -> String {
        self.get(node_id)
            .map(|n| n.short_name)
            .unwrap_or_else(|| sanitize_short_name(&default_short_name(node_id)))
    }

    /// Candidates for a user-typed recipient: an exact node id wins, otherwise
    /// every node whose short name matches case-insensitively. Node ids are
    /// matched in lowercase hex, however they were typed.
    pub fn resolve(&self, query: &str) -> Vec<NodeInfo> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }
        let id_query = query.starts_with('!').then(|| query.to_ascii_lowercase());
        let id_key = id_query.as_deref().unwrap_or(query);
        let guard = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        if let Some(exact) = guard.get(id_key) {
            return vec![exact.clone()];
        }
        let mut matches: Vec<NodeInfo> = guard
            .values()
            .filter(|n| n.short_name.eq_ignore_ascii_case(query))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        if matches.is_empty() && query.starts_with('!') {
            // never heard from, but a well-formed id is still addressable
            let short = default_short_name(id_key);
            return vec![NodeInfo {
                node_id: id_key.to_string(),
                short_name: short,
                long_name: String::new(),
                first_seen: Utc::now(),
                last_seen: Utc::now(),
            }];
        }
        matches
    }

    pub fn len(&self) -> usize {
        self.nodes.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove_stale(&self, max_age_days: u32) -> usize {
        let cutoff = Utc::now() - chrono::Duration::days(max_age_days as i64);
        let mut guard = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        let before = guard.len();
        guard.retain(|_, n| n.last_seen > cutoff);
        before - guard.len()
    }

    /// Write the directory back to its file (no-op for in-memory directories).
    pub fn save(&self) -> BbsResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = NodeCacheFile {
            nodes: self.nodes.read().unwrap_or_else(|e| e.into_inner()).clone(),
            last_updated: Some(Utc::now()),
        };
        let content = serde_json::to_string_pretty(&snapshot)?;
        if let Some(parent) = path.parent() {
            sfs::create_dir_all(parent)?;
        }
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let base = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("node_cache.json");
        let tmp_path = dir.join(format!(".{}.tmp-{}", base, std::process::id()));
        {
            let mut tmp = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            tmp.write_all(content.as_bytes())?;
            tmp.flush()?;
            let _ = tmp.sync_all();
        }
        sfs::rename(&tmp_path, path)?;
        if let Ok(dir_file) = File::open(dir) {
            let _ = dir_file.sync_all();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_short_name_uses_last_four() {
        assert_eq!(default_short_name("!a1b2c3d4"), "c3d4");
        assert_eq!(default_short_name("!ab"), "ab");
    }

    #[test]
    fn unknown_sender_gets_fallback_short_name() {
        let dir = NodeDirectory::new();
        assert_eq!(dir.short_name("!deadbeef"), "beef");
        dir.update("!deadbeef", "BEEF", "Beef Relay");
        assert_eq!(dir.short_name("!deadbeef"), "BEEF");
    }

    #[test]
    fn resolve_prefers_exact_id_then_short_name() {
        let dir = NodeDirectory::new();
        dir.update("!00000001", "BOB", "Bob One");
        dir.update("!00000002", "bob", "Bob Two");
        dir.update("!00000003", "ALI", "Alice");
        assert_eq!(dir.resolve("!00000003").len(), 1);
        let bobs = dir.resolve("Bob");
        assert_eq!(bobs.len(), 2);
        assert_eq!(bobs[0].node_id, "!00000001");
        assert!(dir.resolve("nobody").is_empty());
        assert_eq!(dir.resolve("!0000ffff")[0].short_name, "ffff");
    }

    #[test]
    fn resolve_matches_ids_typed_in_uppercase() {
        let dir = NodeDirectory::new();
        dir.update("!a1b2c3d4", "AL", "Alice");
        let found = dir.resolve("!A1B2C3D4");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].short_name, "AL");

        let unheard = dir.resolve(" !ABCD1234 ");
        assert_eq!(unheard[0].node_id, "!abcd1234");
        assert_eq!(unheard[0].short_name, "1234");
    }

    #[test]
    fn save_and_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nodes.json");
        let dir = NodeDirectory::open(&path).unwrap();
        dir.update("!a1", "AL", "Alice");
        dir.save().unwrap();
        let reopened = NodeDirectory::open(&path).unwrap();
        assert_eq!(reopened.short_name("!a1"), "AL");
    }
}
