//! Database repository implementation

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbError;
use crate::options::DatabaseConfig;

/// Expands to the versioned cache table name so it can be spliced into
/// query literals with `concat!`.
macro_rules! entries_table {
    () => {
        "cache_entries_v1"
    };
}

// Submodules
mod entries;

pub use entries::EntryStats;

/// Name of the cache table for the current schema version
pub const TABLE_NAME: &str = entries_table!();

/// Database connection and operations
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect using the given configuration and ensure the schema exists
    ///
    /// The schema is in place once this returns, so no query can race table
    /// creation. A schema failure is returned here and is not retried.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DbError> {
        info!("Connecting to database: {}", config.url);

        let pool = config
            .pool_options()
            .connect_with(config.connect_options()?)
            .await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, ensuring the schema exists
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, DbError> {
        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Get the underlying pool for advanced usage
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        info!("Closing database pool");
        self.pool.close().await;
    }

    /// Create the cache table and its indexes if they don't exist
    pub async fn ensure_schema(&self) -> Result<(), DbError> {
        info!("Ensuring cache schema ({})", TABLE_NAME);

        // All DDL runs on one connection so no pooled connection keeps a
        // schema without the signature index
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::Migration(e.to_string()))?;

        sqlx::query(concat!(
            "CREATE TABLE IF NOT EXISTS ",
            entries_table!(),
            r#" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                method TEXT NOT NULL,
                body BLOB,
                status_code INTEGER NOT NULL,
                status_message TEXT NOT NULL,
                headers TEXT NOT NULL,
                cache_control_directives TEXT NOT NULL,
                etag TEXT,
                vary TEXT,
                vary_hash TEXT NOT NULL,
                delete_at INTEGER NOT NULL,
                cached_at INTEGER NOT NULL,
                stale_at INTEGER NOT NULL
            )
            "#
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| DbError::Migration(e.to_string()))?;

        let indexes = [
            concat!(
                "CREATE INDEX IF NOT EXISTS idx_",
                entries_table!(),
                "_lookup ON ",
                entries_table!(),
                "(url, method, delete_at)"
            ),
            concat!(
                "CREATE INDEX IF NOT EXISTS idx_",
                entries_table!(),
                "_delete_at ON ",
                entries_table!(),
                "(delete_at)"
            ),
            concat!(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_",
                entries_table!(),
                "_signature ON ",
                entries_table!(),
                "(url, method, vary_hash)"
            ),
        ];

        for statement in indexes {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| DbError::Migration(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| DbError::Migration(e.to_string()))?;

        info!("Cache schema ready");
        Ok(())
    }
}
