//! Staging engine configuration
//!
//! Loaded from and saved to `staging.json` in a caller-chosen directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::constants::{defaults, layout};
use crate::error::Result;

/// Auto-layout metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "default_horizontal_gap")]
    pub horizontal_gap: f64,
    #[serde(default = "default_vertical_gap")]
    pub vertical_gap: f64,
    #[serde(default = "default_node_width")]
    pub default_node_width: f64,
    #[serde(default = "default_node_height")]
    pub default_node_height: f64,
    /// Fallback heights by node kind, used when no measured size exists
    #[serde(default)]
    pub kind_heights: BTreeMap<String, f64>,
}

fn default_horizontal_gap() -> f64 {
    layout::HORIZONTAL_GAP
}

fn default_vertical_gap() -> f64 {
    layout::VERTICAL_GAP
}

fn default_node_width() -> f64 {
    layout::NODE_WIDTH
}

fn default_node_height() -> f64 {
    layout::NODE_HEIGHT
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            horizontal_gap: default_horizontal_gap(),
            vertical_gap: default_vertical_gap(),
            default_node_width: default_node_width(),
            default_node_height: default_node_height(),
            kind_heights: BTreeMap::new(),
        }
    }
}

impl LayoutConfig {
    /// Static height for a kind when nothing was measured
    pub fn fallback_height(&self, kind: &str) -> f64 {
        self.kind_heights
            .get(kind)
            .copied()
            .unwrap_or(self.default_node_height)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Quiet period for coalesced param writes
    #[serde(default = "default_coalesce_delay")]
    pub coalesce_delay_ms: u64,
    /// Undo snapshots kept per target
    #[serde(default = "default_undo_depth")]
    pub undo_depth: usize,
    /// Directory for cached staging data; `None` disables persistence
    #[serde(default)]
    pub persistence_dir: Option<PathBuf>,
    #[serde(default)]
    pub layout: LayoutConfig,
}

fn default_coalesce_delay() -> u64 {
    defaults::COALESCE_DELAY_MS
}

fn default_undo_depth() -> usize {
    defaults::UNDO_DEPTH
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            coalesce_delay_ms: default_coalesce_delay(),
            undo_depth: default_undo_depth(),
            persistence_dir: None,
            layout: LayoutConfig::default(),
        }
    }
}

impl StagingConfig {
    pub fn coalesce_delay(&self) -> Duration {
        Duration::from_millis(self.coalesce_delay_ms)
    }

    /// Load configuration from `dir`, defaulting when the file is missing
    pub async fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(defaults::CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path).await?;
        let config = serde_json::from_str(&contents)?;
        log::debug!("Loaded staging configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to `dir`
    pub async fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).await?;

        let path = dir.join(defaults::CONFIG_FILE);
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(&path, contents).await?;

        log::info!("Staging configuration saved to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = StagingConfig::load(dir.path()).await.unwrap();
        assert_eq!(config, StagingConfig::default());
        assert_eq!(config.coalesce_delay(), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StagingConfig::default();
        config.coalesce_delay_ms = 120;
        config.layout.kind_heights.insert("audio::mixer".into(), 200.0);
        config.save(dir.path()).await.unwrap();

        let loaded = StagingConfig::load(dir.path()).await.unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.layout.fallback_height("audio::mixer"), 200.0);
        assert_eq!(loaded.layout.fallback_height("audio::gain"), 120.0);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: StagingConfig = serde_json::from_str(r#"{"undo_depth": 5}"#).unwrap();
        assert_eq!(config.undo_depth, 5);
        assert_eq!(config.coalesce_delay_ms, 300);
        assert_eq!(config.layout.horizontal_gap, 40.0);
    }
}
