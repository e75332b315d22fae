// src/config/file.rs
// File-based configuration from ~/.quarry/config.toml

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Default drift-poll interval in seconds (5 minutes)
const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;

/// Default backoff before respawning a crashed build worker, in milliseconds
const DEFAULT_RECOVERY_BACKOFF_MS: u64 = 2000;

/// Default maximum consecutive worker crashes before the build is failed
const DEFAULT_MAX_RECOVERY_ATTEMPTS: u32 = 3;

/// Top-level config structure
#[derive(Debug, Deserialize, Default)]
pub struct QuarryConfig {
    #[serde(default)]
    pub index: IndexConfig,
}

/// Indexing configuration section
#[derive(Debug, Deserialize)]
pub struct IndexConfig {
    /// Seconds between drift-detection poll cycles
    pub poll_interval_secs: Option<u64>,
    /// Milliseconds to wait before respawning a crashed worker
    pub recovery_backoff_ms: Option<u64>,
    /// Consecutive crashes tolerated before the build is marked failed
    pub max_recovery_attempts: Option<u32>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: None,
            recovery_backoff_ms: None,
            max_recovery_attempts: None,
        }
    }
}

impl QuarryConfig {
    /// Load config from ~/.quarry/config.toml
    pub fn load() -> Self {
        let path = Self::config_path();

        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    debug!(path = %path.display(), "Loaded config from file");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse config file");
                    Self::default()
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
        }
    }

    /// Get the config file path
    fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".quarry")
            .join("config.toml")
    }

    /// Drift-poll interval with default applied
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(
            self.index
                .poll_interval_secs
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
        )
    }

    /// Worker recovery backoff with default applied
    pub fn recovery_backoff(&self) -> Duration {
        Duration::from_millis(
            self.index
                .recovery_backoff_ms
                .unwrap_or(DEFAULT_RECOVERY_BACKOFF_MS),
        )
    }

    /// Maximum consecutive worker crashes before giving up
    pub fn max_recovery_attempts(&self) -> u32 {
        self.index
            .max_recovery_attempts
            .unwrap_or(DEFAULT_MAX_RECOVERY_ATTEMPTS)
    }
}
