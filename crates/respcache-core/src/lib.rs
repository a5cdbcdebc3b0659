//! respcache Core Logic
//!
//! This crate provides the HTTP response cache store: request keys and
//! response values, `Vary`-aware entry matching, the write path with lazy
//! pruning, and streaming writes.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod key;
pub mod value;

pub use cache::{CacheStore, CacheWriteStream, StoreStats, spawn_prune_task};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::StoreConfig;
pub use error::CacheError;
pub use key::CacheKey;
pub use value::{Body, CacheValue, CachedResponse};

pub use respcache_db::{
    CacheControlDirectives, DatabaseConfig, DirectiveFields, HeaderMap, HeaderValue, VaryMap,
};
