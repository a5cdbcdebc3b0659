//! Configuration loading

use anyhow::{Context, Result};
use respcache_core::{DatabaseConfig, StoreConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a file, or use defaults if it doesn't exist
    ///
    /// Logging is not initialized yet when this runs, so the returned flag
    /// tells the caller whether defaults were used.
    pub fn load(path: &str) -> Result<(Self, bool)> {
        let config_path = Path::new(path);

        if !config_path.exists() {
            return Ok((Self::default(), false));
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        Ok((config, true))
    }

    /// Log where the configuration came from
    pub fn log_source(path: &str, loaded: bool) {
        if loaded {
            info!("Loaded configuration from {}", path);
        } else {
            info!("Config file not found at {}, using defaults", path);
        }
    }
}
