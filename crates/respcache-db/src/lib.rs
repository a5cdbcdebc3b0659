//! respcache Database Layer
//!
//! This crate provides the storage edge for respcache: pool configuration,
//! the versioned cache table, and the entry queries, using SQLite via sqlx.

pub mod error;
pub mod models;
pub mod options;
pub mod repository;
pub mod utils;

pub use error::DbError;
pub use models::*;
pub use options::DatabaseConfig;
pub use repository::{Database, EntryStats, TABLE_NAME};

/// Re-export sqlx types for convenience
pub use sqlx::SqlitePool;
