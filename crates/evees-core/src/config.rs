use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration of an [`crate::evees::Evees`] service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EveesConfig {
    #[serde(default)]
    pub flush: FlushConfig,
    /// Remote used when a write does not name one. Falls back to the first
    /// registered remote.
    #[serde(default)]
    pub default_remote: Option<String>,
    #[serde(default)]
    pub official_remote: Option<String>,
    #[serde(default)]
    pub editable_remotes_ids: Vec<String>,
    #[serde(default)]
    pub emit_if: Option<EmitIf>,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// How and when a perspective update reaches the base layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlushConfig {
    /// Coalesce updates to the same perspective for this long. `None` or `0`
    /// applies the update immediately.
    #[serde(default)]
    pub debounce_ms: Option<u64>,
    /// Flush the client after the update is applied.
    #[serde(default)]
    pub autoflush: bool,
}

impl FlushConfig {
    #[must_use]
    pub const fn debounced(debounce_ms: u64) -> Self {
        Self {
            debounce_ms: Some(debounce_ms),
            autoflush: false,
        }
    }

    /// Effective debounce window, if any.
    #[must_use]
    pub fn debounce(&self) -> Option<u64> {
        self.debounce_ms.filter(|ms| *ms > 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitIf {
    pub remote: String,
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

/// Parse an evees config from TOML text.
pub fn parse_config(content: &str) -> Result<EveesConfig> {
    toml::from_str(content).context("Failed to parse evees config")
}

/// Load an evees config file, returning defaults when it does not exist.
pub fn load_config(path: &Path) -> Result<EveesConfig> {
    if !path.exists() {
        return Ok(EveesConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read evees config: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse evees config: {}", path.display()))
}

const fn default_true() -> bool {
    true
}
