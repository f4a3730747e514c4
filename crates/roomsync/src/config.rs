use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::SyncError;

fn default_app_id() -> String {
    "roomsync".to_string()
}

fn default_latency_sample_count() -> usize {
    4
}

/// Settings for one sync session
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SyncConfig {
    /// Namespace under the store root: rooms live at `<app_id>/rooms`,
    /// latency reports at `<app_id>/stats/latency`
    #[serde(default = "default_app_id")]
    pub app_id: String,

    /// Remote echoes sampled before the latency report is stored
    #[serde(default = "default_latency_sample_count")]
    pub latency_sample_count: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            app_id: default_app_id(),
            latency_sample_count: default_latency_sample_count(),
        }
    }
}

impl SyncConfig {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            ..Self::default()
        }
    }

    /// Load settings from a YAML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read sync config {}: {}", path.display(), e)
        })?;

        let config: SyncConfig = serde_yaml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse sync config YAML {}: {}", path.display(), e)
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.app_id.is_empty() || self.app_id.contains('/') {
            return Err(SyncError::Config {
                message: format!("app_id must be a single non-empty path segment, got {:?}", self.app_id),
            });
        }
        if self.latency_sample_count == 0 {
            return Err(SyncError::Config {
                message: "latency_sample_count must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
