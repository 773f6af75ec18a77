//! Govern configuration types and loading

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;
use crate::paths;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernConfig {
    /// SQLite database file
    pub database_path: PathBuf,

    /// Milliseconds SQLite waits on a busy database
    pub busy_timeout_ms: u64,

    /// Milliseconds a gate waits for the per-instance lock
    pub lock_timeout_ms: u64,
}

impl Default for GovernConfig {
    fn default() -> Self {
        Self {
            database_path: paths::database_path(),
            busy_timeout_ms: constants::storage::BUSY_TIMEOUT.as_millis() as u64,
            lock_timeout_ms: constants::governance::LOCK_TIMEOUT.as_millis() as u64,
        }
    }
}

impl GovernConfig {
    /// Load configuration with fallback chain
    ///
    /// Explicit path, then `./govern.toml`, then the user config dir, then defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()));
        }

        let candidates = [Some(paths::local_config_path()), paths::user_config_path()];
        for path in candidates.iter().flatten() {
            if !path.exists() {
                continue;
            }
            match Self::load_from_file(path) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", path.display(), e);
                }
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: GovernConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let path = temp.path().join("govern.toml");
        fs::write(&path, "lock_timeout_ms = 250\n").expect("Failed to write config");

        let config = GovernConfig::load(Some(&path)).expect("Failed to load config");

        assert_eq!(config.lock_timeout(), Duration::from_millis(250));
        assert_eq!(config.busy_timeout(), constants::storage::BUSY_TIMEOUT);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let missing = temp.path().join("nope.toml");

        assert!(GovernConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_database_path_override() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let path = temp.path().join("govern.toml");
        fs::write(&path, "database_path = \"/tmp/gates.db\"\n").expect("Failed to write config");

        let config = GovernConfig::load_from_file(&path).expect("Failed to load config");

        assert_eq!(config.database_path, PathBuf::from("/tmp/gates.db"));
    }
}
