use crate::utils::{DEFAULT_LOCK_TIMEOUT_SECS, DEFAULT_SEPARATOR};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

fn default_lock_enabled() -> bool {
    true
}

fn default_lock_timeout_secs() -> u64 {
    DEFAULT_LOCK_TIMEOUT_SECS
}

fn default_separator() -> char {
    DEFAULT_SEPARATOR
}

/// Docshift configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationConfig {
    /// Database the migrations target. `None` uses the store's default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Active profiles; migrations tagged with other profiles are skipped.
    #[serde(default)]
    pub profiles: Vec<String>,
    /// Guard runs with the cluster-wide lease lock.
    #[serde(default = "default_lock_enabled")]
    pub lock_enabled: bool,
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
    /// Separator between the parts of record ids.
    #[serde(default = "default_separator")]
    pub separator: char,
    /// Upper bound on waiting for stale indexes before a patch. Unset waits
    /// indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staleness_timeout_secs: Option<u64>,
    /// Location of the file-backed store used by the CLI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            database: None,
            profiles: Vec::new(),
            lock_enabled: default_lock_enabled(),
            lock_timeout_secs: default_lock_timeout_secs(),
            separator: default_separator(),
            staleness_timeout_secs: None,
            store_path: None,
        }
    }
}

impl MigrationConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn staleness_timeout(&self) -> Option<Duration> {
        self.staleness_timeout_secs.map(Duration::from_secs)
    }
}

/// Read the configuration file
pub async fn read_config(config_path: &Path) -> Result<Option<MigrationConfig>, ConfigError> {
    if !config_path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(config_path).await?;
    let config: MigrationConfig = serde_json::from_str(&content)?;
    Ok(Some(config))
}

/// Write the configuration file
pub async fn write_config(config_path: &Path, config: &MigrationConfig) -> Result<(), ConfigError> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(config)?;
    fs::write(config_path, content).await?;
    Ok(())
}
