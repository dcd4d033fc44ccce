//! Per-target cache of editor data
//!
//! Keeps what the live runtime cannot tell us after a restart: canvas
//! positions and which node ids and connection keys were staged by this
//! editor. One JSON file per target. Sets are written as sorted lists and
//! rebuilt as sets on load.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::overlay::StagingOverlay;
use crate::types::{ConnectionKey, NodeId, NodePosition};

/// Cached editor data for one target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedStaging {
    #[serde(default)]
    pub node_positions: BTreeMap<NodeId, NodePosition>,
    #[serde(default)]
    pub staged_node_ids: Vec<NodeId>,
    #[serde(default)]
    pub staged_connection_keys: Vec<ConnectionKey>,
}

impl CachedStaging {
    pub fn from_overlay(overlay: &StagingOverlay) -> Self {
        Self {
            node_positions: overlay.node_positions().clone(),
            // BTreeSet iteration is already sorted
            staged_node_ids: overlay.staged_node_ids().iter().cloned().collect(),
            staged_connection_keys: overlay.staged_connection_keys().iter().cloned().collect(),
        }
    }

    pub fn node_id_set(&self) -> BTreeSet<NodeId> {
        self.staged_node_ids.iter().cloned().collect()
    }

    pub fn connection_key_set(&self) -> BTreeSet<ConnectionKey> {
        self.staged_connection_keys.iter().cloned().collect()
    }

    /// Re-apply this cache onto a freshly entered overlay
    pub fn restore_into(self, overlay: &mut StagingOverlay) {
        let node_ids = self.node_id_set();
        let keys = self.connection_key_set();
        overlay.apply_cached(self.node_positions, node_ids, keys);
    }
}

/// Directory-backed store, one file per target
#[derive(Debug, Clone)]
pub struct StagingStore {
    dir: PathBuf,
}

impl StagingStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, target: &str) -> PathBuf {
        let safe: String = target
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }

    /// Cached data for `target`, if any
    ///
    /// A missing file means nothing was staged. A file that fails to parse
    /// is logged and treated the same way.
    pub fn load(&self, target: &str) -> Result<Option<CachedStaging>> {
        let path = self.file_for(target);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)?;
        match serde_json::from_str::<CachedStaging>(&content) {
            Ok(cached) => {
                log::debug!("Loaded staging cache for '{}' from {:?}", target, path);
                Ok(Some(cached))
            }
            Err(e) => {
                log::warn!("Ignoring unreadable staging cache {:?}: {}", path, e);
                Ok(None)
            }
        }
    }

    pub fn save(&self, target: &str, cached: &CachedStaging) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.file_for(target);
        let content = serde_json::to_string_pretty(cached)?;
        std::fs::write(&path, content)?;
        log::debug!("Saved staging cache for '{}' to {:?}", target, path);
        Ok(())
    }

    /// Drop the cached entry; a missing entry is fine
    pub fn remove(&self, target: &str) -> Result<()> {
        let path = self.file_for(target);
        if path.exists() {
            std::fs::remove_file(&path)?;
            log::debug!("Removed staging cache for '{}'", target);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Connection, Node, Pipeline};
    use tempfile::TempDir;

    fn overlay() -> StagingOverlay {
        let mut p = Pipeline::new();
        p.nodes.insert("a".into(), Node::new("audio::gain"));
        let mut overlay = StagingOverlay::enter("session/1", p);
        overlay.add_node("z", Node::new("audio::gain")).unwrap();
        overlay.add_node("b", Node::new("audio::gain")).unwrap();
        overlay
            .add_connection(Connection::new("a", "out", "b", "in"))
            .unwrap();
        overlay.set_position("a", NodePosition::new(10.0, 20.0));
        overlay
    }

    #[test]
    fn test_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = StagingStore::new(dir.path().join("nested"));
        assert_eq!(store.load("s1").unwrap(), None);
        store.remove("s1").unwrap();
    }

    #[test]
    fn test_save_load_remove() {
        let dir = TempDir::new().unwrap();
        let store = StagingStore::new(dir.path());
        let cached = CachedStaging::from_overlay(&overlay());
        assert_eq!(cached.staged_node_ids, vec!["b".to_string(), "z".to_string()]);

        store.save("session/1", &cached).unwrap();
        let loaded = store.load("session/1").unwrap().unwrap();
        assert_eq!(loaded, cached);
        assert!(loaded.connection_key_set().contains("a.out->b.in"));

        store.remove("session/1").unwrap();
        assert_eq!(store.load("session/1").unwrap(), None);
    }

    #[test]
    fn test_unparseable_is_none() {
        let dir = TempDir::new().unwrap();
        let store = StagingStore::new(dir.path());
        std::fs::write(dir.path().join("s1.json"), "{not json").unwrap();
        assert_eq!(store.load("s1").unwrap(), None);
    }

    #[test]
    fn test_restore_skips_live_entries() {
        let mut p = Pipeline::new();
        p.nodes.insert("a".into(), Node::new("audio::gain"));
        let mut fresh = StagingOverlay::enter("s1", p);

        let cached = CachedStaging {
            node_positions: BTreeMap::from([("a".to_string(), NodePosition::new(1.0, 2.0))]),
            staged_node_ids: vec!["a".into(), "ghost".into()],
            staged_connection_keys: vec!["x.out->y.in".into()],
        };
        cached.restore_into(&mut fresh);

        assert_eq!(fresh.staged_node_ids().len(), 1);
        assert!(fresh.staged_node_ids().contains("ghost"));
        assert_eq!(fresh.node_positions()["a"], NodePosition::new(1.0, 2.0));
    }
}
