//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] respcache_db::DbError),

    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    #[error("Invalid cache value: {0}")]
    InvalidValue(String),

    #[error("Entry of {size} bytes exceeds the {limit} byte limit")]
    EntryTooLarge { size: u64, limit: u64 },

    #[error("Write stream is closed")]
    StreamClosed,
}
