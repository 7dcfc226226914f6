//! Configuration loading for Media Uplink
//!
//! Reads `config.toml` into grouped config structs. Every section has
//! working defaults so the program can run without a config file.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Error types for config loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// Result type alias for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Server {
    /// Base URL of the remote processing service
    pub base_url: String,
    /// Connect timeout for the HTTP client in seconds
    pub connect_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            connect_timeout_secs: 30,
            user_agent: format!("media_uplink/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Limits {
    /// Maximum number of files in the pending queue
    pub max_files: usize,
    /// Maximum size of a single file in bytes
    pub max_file_size: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_files: 10,
            max_file_size: 100 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Polling {
    /// Delay before the first progress query in milliseconds
    pub initial_delay_ms: u64,
    /// Delay between progress queries in milliseconds
    pub interval_ms: u64,
    /// Number of queries before a poll is abandoned as timed out
    pub max_attempts: u32,
}

impl Default for Polling {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            interval_ms: 1000,
            max_attempts: 100,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Logging {
    pub log_level: String,
    pub log_directory: String,
    pub log_to_file: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_directory: "./logs".to_string(),
            log_to_file: true,
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct UplinkConfig {
    pub server: Server,
    pub limits: Limits,
    pub polling: Polling,
    pub logging: Logging,
}

impl UplinkConfig {
    /// Load a config file from disk
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load a config file, falling back to defaults if it is missing or broken
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => config,
            Err(ConfigError::Io(ref e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Self::default()
            }
            Err(e) => {
                warn!("Failed to load {}: {}; using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    /// Write the config back out as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_admission_limits() {
        let config = UplinkConfig::default();
        assert_eq!(config.limits.max_files, 10);
        assert_eq!(config.limits.max_file_size, 100 * 1024 * 1024);
        assert_eq!(config.polling.max_attempts, 100);
        assert_eq!(config.polling.interval_ms, 1000);
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = UplinkConfig::default();
        config.server.base_url = "http://processing.example:9000".to_string();
        config.limits.max_files = 5;
        config.save(&path).unwrap();

        let reloaded = UplinkConfig::load(&path).unwrap();
        assert_eq!(reloaded.server.base_url, "http://processing.example:9000");
        assert_eq!(reloaded.limits.max_files, 5);
        // Untouched sections keep their defaults
        assert_eq!(reloaded.polling.max_attempts, 100);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = UplinkConfig::load_or_default("/nonexistent/config.toml");
        assert_eq!(config.limits.max_files, 10);
    }
}
