//! Connection pool configuration
//!
//! These settings are handed to sqlx unchanged; the cache layer does no
//! pooling or backpressure of its own.

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::error::DbError;

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection string, e.g. `sqlite://./data/respcache.db`
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default)]
    pub min_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    /// Idle connections are closed after this many seconds (0 = never)
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// How long a connection waits on a locked database before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_create_if_missing")]
    pub create_if_missing: bool,
}

impl DatabaseConfig {
    /// Configuration for the given connection string with default pool settings
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Build the per-connection options
    pub fn connect_options(&self) -> Result<SqliteConnectOptions, DbError> {
        Ok(SqliteConnectOptions::from_str(&self.url)?
            .create_if_missing(self.create_if_missing)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(self.busy_timeout_ms)))
    }

    /// Build the pool options
    pub fn pool_options(&self) -> SqlitePoolOptions {
        let idle_timeout = match self.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_secs(self.acquire_timeout_secs))
            .idle_timeout(idle_timeout)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            max_connections: default_max_connections(),
            min_connections: 0,
            acquire_timeout_secs: default_acquire_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            busy_timeout_ms: default_busy_timeout_ms(),
            create_if_missing: default_create_if_missing(),
        }
    }
}

// Default value functions
fn default_url() -> String {
    "sqlite://./data/respcache.db".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_create_if_missing() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: DatabaseConfig =
            serde_json::from_str(r#"{"url":"sqlite::memory:","max_connections":1}"#).unwrap();
        assert_eq!(config.url, "sqlite::memory:");
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.acquire_timeout_secs, 30);
        assert!(config.create_if_missing);
    }

    #[test]
    fn test_pool_options_passthrough() {
        let config = DatabaseConfig {
            max_connections: 4,
            idle_timeout_secs: 0,
            ..DatabaseConfig::default()
        };
        let pool = config.pool_options();
        assert_eq!(pool.get_max_connections(), 4);
        assert_eq!(pool.get_idle_timeout(), None);
    }
}
