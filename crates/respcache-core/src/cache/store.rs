//! Cache store implementation

use metrics::counter;
use parking_lot::RwLock;
use respcache_db::{Database, DatabaseConfig, EntryContent, EntryStats, NewEntry, VaryMap};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::matcher::find_entry;
use super::stream::CacheWriteStream;
use crate::clock::{Clock, SystemClock};
use crate::config::StoreConfig;
use crate::error::CacheError;
use crate::key::CacheKey;
use crate::value::{CacheValue, CachedResponse};

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct StoreStats {
    #[serde(flatten)]
    pub entries: EntryStats,
    /// In-memory hit count (not persisted to database)
    pub hit_count: u64,
    /// In-memory miss count (not persisted to database)
    pub miss_count: u64,
}

#[derive(Debug, Default)]
struct HitCounters {
    hits: u64,
    misses: u64,
}

/// HTTP response cache backed by the entries table
///
/// Cloning is cheap; clones share the pool and the hit counters.
#[derive(Clone)]
pub struct CacheStore {
    db: Database,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    counters: Arc<RwLock<HitCounters>>,
}

impl CacheStore {
    /// Connect to the database, ensure the schema, and create a store
    pub async fn connect(
        db_config: &DatabaseConfig,
        config: StoreConfig,
    ) -> Result<Self, CacheError> {
        let db = Database::connect(db_config).await?;
        Ok(Self::new(db, config))
    }

    /// Create a store over a connected database using wall-clock time
    pub fn new(db: Database, config: StoreConfig) -> Self {
        Self::with_clock(db, config, Arc::new(SystemClock))
    }

    /// Create a store with an explicit time source
    pub fn with_clock(db: Database, config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        info!(
            "Initializing cache store (max_entry_size: {} bytes, max_entries: {})",
            config.max_entry_size, config.max_entries
        );

        Self {
            db,
            config,
            clock,
            counters: Arc::new(RwLock::new(HitCounters::default())),
        }
    }

    /// Get the underlying database
    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Look up a fresh response for a request
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CachedResponse>, CacheError> {
        key.validate()?;

        match find_entry(&self.db, key, self.now(), false).await? {
            Some(entry) => {
                self.record_hit();
                Ok(Some(CachedResponse::from(entry)))
            }
            None => {
                self.record_miss();
                Ok(None)
            }
        }
    }

    /// Store a response for a request
    ///
    /// An existing entry for the same request and variance is updated in
    /// place, even if it has expired. Otherwise expired rows are pruned and a
    /// new entry is inserted.
    pub async fn set(&self, key: &CacheKey, value: CacheValue) -> Result<(), CacheError> {
        key.validate()?;
        value.validate()?;

        let (vary, content) = value.into_parts();
        let size = content.body.as_ref().map_or(0, |body| body.len() as u64);
        if size > self.config.max_entry_size {
            return Err(CacheError::EntryTooLarge {
                size,
                limit: self.config.max_entry_size,
            });
        }

        self.write(key, vary, content).await
    }

    async fn write(
        &self,
        key: &CacheKey,
        vary: Option<VaryMap>,
        content: EntryContent,
    ) -> Result<(), CacheError> {
        if let Some(existing) = find_entry(&self.db, key, self.now(), true).await? {
            if self.db.update_entry(existing.id, &content).await? {
                debug!("Updated cache entry {} ({} {})", existing.id, key.method, existing.url);
                counter!("respcache_writes_total").increment(1);
                return Ok(());
            }
            debug!("Cache entry {} vanished before update, inserting", existing.id);
        }

        self.prune().await?;

        let id = self
            .db
            .insert_entry(&NewEntry {
                url: key.url(),
                method: key.method.clone(),
                vary,
                content,
            })
            .await?;

        debug!("Inserted cache entry {} ({} {})", id, key.method, key.url());
        counter!("respcache_writes_total").increment(1);
        Ok(())
    }

    /// Delete the entry answering a request, expired or not
    ///
    /// Deleting a request with no entry is not an error.
    pub async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        key.validate()?;

        if let Some(entry) = find_entry(&self.db, key, self.now(), true).await? {
            debug!("Deleting cache entry {} ({} {})", entry.id, key.method, entry.url);
            self.db.delete_entry(entry.id).await?;
        }
        Ok(())
    }

    /// Open a sink that buffers body chunks and stores the response on close
    ///
    /// `value.body` is ignored; the streamed chunks replace it.
    pub fn create_write_stream(
        &self,
        key: CacheKey,
        value: CacheValue,
    ) -> Result<CacheWriteStream, CacheError> {
        key.validate()?;
        value.validate()?;
        Ok(CacheWriteStream::new(self.clone(), key, value))
    }

    /// Remove expired entries, then enforce `max_entries`
    ///
    /// Returns the number of rows removed.
    pub async fn prune(&self) -> Result<u64, CacheError> {
        let mut removed = self.db.delete_expired(self.now()).await?;

        if let Some(batch) = self.config.eviction_batch() {
            let count = self.db.count_entries().await?;
            if count as u64 >= self.config.max_entries {
                let evicted = self.db.delete_soonest(batch as i64).await?;
                info!(
                    "Cache holds {} entries (limit {}), evicted {}",
                    count, self.config.max_entries, evicted
                );
                removed += evicted;
            }
        }

        if removed > 0 {
            debug!("Pruned {} cache entries", removed);
            counter!("respcache_pruned_total").increment(removed);
        }
        Ok(removed)
    }

    /// Get cache statistics
    pub async fn stats(&self) -> Result<StoreStats, CacheError> {
        let entries = self.db.entry_stats(self.now()).await?;
        let counters = self.counters.read();
        Ok(StoreStats {
            entries,
            hit_count: counters.hits,
            miss_count: counters.misses,
        })
    }

    /// Release the connection pool; later operations fail
    pub async fn close(&self) {
        self.db.close().await;
    }

    fn record_hit(&self) {
        self.counters.write().hits += 1;
        counter!("respcache_hits_total").increment(1);
    }

    fn record_miss(&self) {
        self.counters.write().misses += 1;
        counter!("respcache_misses_total").increment(1);
    }
}

/// Spawn a background task that prunes the store periodically
pub fn spawn_prune_task(store: CacheStore, period: Duration) -> tokio::task::JoinHandle<()> {
    use tokio::time::interval;

    info!("Starting background prune task (interval: {:?})", period);

    tokio::spawn(async move {
        let mut ticker = interval(period);

        // Skip the first tick (which fires immediately)
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match store.prune().await {
                Ok(removed) => {
                    if removed > 0 {
                        info!("Scheduled prune removed {} entries", removed);
                    }
                }
                Err(e) => {
                    warn!("Error during scheduled prune: {}", e);
                }
            }
        }
    })
}
