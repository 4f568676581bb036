use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use autoguru_core::config::{resolve_with_base, Config};
use autoguru_core::Result;

use crate::answer::ConfidencePoolingStrategy;

/// `[answering]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnsweringSettings {
    pub pooling: ConfidencePoolingStrategy,
    pub default_k: usize,
}

impl Default for AnsweringSettings {
    fn default() -> Self {
        Self { pooling: ConfidencePoolingStrategy::default(), default_k: 1 }
    }
}

impl AnsweringSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        config.get_or_default("answering")
    }
}

/// `[snapshot]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSettings {
    pub path: Option<String>,
}

impl SnapshotSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        config.get_or_default("snapshot")
    }

    /// Snapshot location with `~` and env vars expanded; relative paths are
    /// taken from `base`.
    pub fn resolved_path(&self, base: &std::path::Path) -> Option<PathBuf> {
        self.path.as_deref().map(|p| resolve_with_base(base, p))
    }
}
