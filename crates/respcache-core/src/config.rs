//! Store configuration
//!
//! Shared with the binary's TOML loader, which embeds it as the `[cache]`
//! section.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the cache store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Largest body, in bytes, a single entry may hold
    #[serde(default = "default_max_entry_size")]
    pub max_entry_size: u64,
    /// Row count at which pruning also evicts live entries (0 = unbounded)
    #[serde(default)]
    pub max_entries: u64,
    /// Interval of the optional background sweep
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

impl StoreConfig {
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs.max(1))
    }

    /// How many live entries to evict once `max_entries` is reached
    pub fn eviction_batch(&self) -> Option<u64> {
        match self.max_entries {
            0 => None,
            max => Some((max / 10).max(1)),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_entry_size: default_max_entry_size(),
            max_entries: 0,
            prune_interval_secs: default_prune_interval_secs(),
        }
    }
}

fn default_max_entry_size() -> u64 {
    100 * 1024 * 1024 // 100 MB
}

fn default_prune_interval_secs() -> u64 {
    3600
}
