//! Cache entry operations

use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::debug;

use crate::error::DbError;
use crate::models::{EntryContent, NewEntry, StoredEntry};
use crate::repository::Database;
use crate::utils::vary_hash;

const ENTRY_COLUMNS: &str = "id, url, method, body, status_code, status_message, headers, \
     cache_control_directives, etag, vary, delete_at, cached_at, stale_at";

/// Storage-side cache statistics
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct EntryStats {
    pub entry_count: i64,
    /// Rows past their deletion time that have not been pruned yet
    pub expired_count: i64,
    pub total_body_bytes: i64,
}

impl Database {
    // ==================== Cache Entry Operations ====================

    /// Get every entry stored for a URL and method, soonest-to-expire first
    pub async fn find_candidates(
        &self,
        url: &str,
        method: &str,
    ) -> Result<Vec<StoredEntry>, DbError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE url = ? AND method = ? ORDER BY delete_at ASC",
            ENTRY_COLUMNS,
            entries_table!()
        );
        let rows = sqlx::query(&sql)
            .bind(url)
            .bind(method)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(StoredEntry::try_from)
            .collect()
    }

    /// Get a cache entry by id
    pub async fn get_entry(&self, id: i64) -> Result<Option<StoredEntry>, DbError> {
        let sql = format!("SELECT {} FROM {} WHERE id = ?", ENTRY_COLUMNS, entries_table!());
        let result = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        result
            .map(|row| StoredEntry::try_from(&row))
            .transpose()
    }

    /// Insert a new cache entry, returning its id
    ///
    /// If a row with the same URL, method and variance signature already
    /// exists (a concurrent writer got there first), that row is overwritten
    /// in place and keeps its id.
    pub async fn insert_entry(&self, entry: &NewEntry) -> Result<i64, DbError> {
        let content = &entry.content;
        let vary = entry
            .vary
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(concat!(
            "INSERT INTO ",
            entries_table!(),
            r#" (url, method, body, status_code, status_message, headers, cache_control_directives, etag, vary, vary_hash, delete_at, cached_at, stale_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (url, method, vary_hash) DO UPDATE SET
                body = excluded.body,
                status_code = excluded.status_code,
                status_message = excluded.status_message,
                headers = excluded.headers,
                cache_control_directives = excluded.cache_control_directives,
                etag = excluded.etag,
                delete_at = excluded.delete_at,
                cached_at = excluded.cached_at,
                stale_at = excluded.stale_at
            RETURNING id
            "#
        ))
        .bind(&entry.url)
        .bind(&entry.method)
        .bind(content.body.as_deref())
        .bind(i64::from(content.status_code))
        .bind(&content.status_message)
        .bind(serde_json::to_string(&content.headers)?)
        .bind(serde_json::to_string(&content.cache_control_directives)?)
        .bind(&content.etag)
        .bind(vary)
        .bind(vary_hash(entry.vary.as_ref())?)
        .bind(content.delete_at)
        .bind(content.cached_at)
        .bind(content.stale_at)
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = result.get("id");
        debug!("Stored cache entry {} for {} {}", id, entry.method, entry.url);
        Ok(id)
    }

    /// Overwrite the response data of an entry; its variance signature is kept
    ///
    /// Returns false if no row has that id.
    pub async fn update_entry(&self, id: i64, content: &EntryContent) -> Result<bool, DbError> {
        let result = sqlx::query(concat!(
            "UPDATE ",
            entries_table!(),
            r#"
            SET body = ?, status_code = ?, status_message = ?, headers = ?,
                cache_control_directives = ?, etag = ?, delete_at = ?, cached_at = ?, stale_at = ?
            WHERE id = ?
            "#
        ))
        .bind(content.body.as_deref())
        .bind(i64::from(content.status_code))
        .bind(&content.status_message)
        .bind(serde_json::to_string(&content.headers)?)
        .bind(serde_json::to_string(&content.cache_control_directives)?)
        .bind(&content.etag)
        .bind(content.delete_at)
        .bind(content.cached_at)
        .bind(content.stale_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a cache entry by id
    pub async fn delete_entry(&self, id: i64) -> Result<bool, DbError> {
        let result = sqlx::query(concat!("DELETE FROM ", entries_table!(), " WHERE id = ?"))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every entry whose deletion time is at or before `now`
    pub async fn delete_expired(&self, now: i64) -> Result<u64, DbError> {
        let result = sqlx::query(concat!(
            "DELETE FROM ",
            entries_table!(),
            " WHERE delete_at <= ?"
        ))
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete up to `limit` entries, soonest-to-expire first
    pub async fn delete_soonest(&self, limit: i64) -> Result<u64, DbError> {
        let result = sqlx::query(concat!(
            "DELETE FROM ",
            entries_table!(),
            " WHERE id IN (SELECT id FROM ",
            entries_table!(),
            " ORDER BY delete_at ASC LIMIT ?)"
        ))
        .bind(limit)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Get cache entry count
    pub async fn count_entries(&self) -> Result<i64, DbError> {
        let result = sqlx::query(concat!("SELECT COUNT(*) as count FROM ", entries_table!()))
            .fetch_one(&self.pool)
            .await?;
        Ok(result.get("count"))
    }

    /// Get the number of entries stored for a URL and method
    pub async fn count_entries_for(&self, url: &str, method: &str) -> Result<i64, DbError> {
        let result = sqlx::query(concat!(
            "SELECT COUNT(*) as count FROM ",
            entries_table!(),
            " WHERE url = ? AND method = ?"
        ))
        .bind(url)
        .bind(method)
        .fetch_one(&self.pool)
        .await?;
        Ok(result.get("count"))
    }

    /// Get cache statistics
    pub async fn entry_stats(&self, now: i64) -> Result<EntryStats, DbError> {
        let result = sqlx::query(concat!(
            r#"
            SELECT COUNT(*) as count,
                   COALESCE(SUM(CASE WHEN delete_at <= ? THEN 1 ELSE 0 END), 0) as expired,
                   COALESCE(SUM(LENGTH(body)), 0) as body_bytes
            FROM "#,
            entries_table!()
        ))
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(EntryStats {
            entry_count: result.get("count"),
            expired_count: result.get("expired"),
            total_body_bytes: result.get("body_bytes"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CacheControlDirectives, HeaderMap, HeaderValue, VaryMap};
    use crate::options::DatabaseConfig;
    use tempfile::TempDir;

    async fn test_db() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("cache.db").display());
        let db = Database::connect(&DatabaseConfig::new(url)).await.unwrap();
        (dir, db)
    }

    fn content(body: &str, delete_at: i64) -> EntryContent {
        let mut headers = HeaderMap::new();
        headers.insert("content-type".to_string(), HeaderValue::from("text/plain"));
        EntryContent {
            body: Some(body.as_bytes().to_vec()),
            status_code: 200,
            status_message: "OK".to_string(),
            headers,
            etag: Some("\"v1\"".to_string()),
            cache_control_directives: CacheControlDirectives {
                max_age: Some(60),
                ..Default::default()
            },
            cached_at: delete_at - 2000,
            stale_at: delete_at - 1000,
            delete_at,
        }
    }

    fn new_entry(url: &str, vary: Option<VaryMap>, body: &str, delete_at: i64) -> NewEntry {
        NewEntry {
            url: url.to_string(),
            method: "GET".to_string(),
            vary,
            content: content(body, delete_at),
        }
    }

    fn encoding(value: &str) -> Option<VaryMap> {
        let mut vary = VaryMap::new();
        vary.insert("accept-encoding".to_string(), Some(HeaderValue::from(value)));
        Some(vary)
    }

    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        let (_dir, db) = test_db().await;
        db.ensure_schema().await.unwrap();
        db.ensure_schema().await.unwrap();
        assert_eq!(db.count_entries().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let (_dir, db) = test_db().await;
        let entry = new_entry("https://a/x", encoding("gzip"), "hello", 3000);
        let id = db.insert_entry(&entry).await.unwrap();

        let stored = db.get_entry(id).await.unwrap().unwrap();
        assert_eq!(stored.url, "https://a/x");
        assert_eq!(stored.method, "GET");
        assert_eq!(stored.vary, entry.vary);
        assert_eq!(stored.content, entry.content);
    }

    #[tokio::test]
    async fn test_null_body_and_vary() {
        let (_dir, db) = test_db().await;
        let mut entry = new_entry("https://a/empty", None, "", 3000);
        entry.content.body = None;
        entry.content.etag = None;
        let id = db.insert_entry(&entry).await.unwrap();

        let stored = db.get_entry(id).await.unwrap().unwrap();
        assert_eq!(stored.content.body, None);
        assert_eq!(stored.content.etag, None);
        assert_eq!(stored.vary, None);
    }

    #[tokio::test]
    async fn test_candidates_ordered_by_delete_at() {
        let (_dir, db) = test_db().await;
        db.insert_entry(&new_entry("https://a/x", encoding("br"), "late", 9000))
            .await
            .unwrap();
        db.insert_entry(&new_entry("https://a/x", encoding("gzip"), "early", 4000))
            .await
            .unwrap();
        db.insert_entry(&new_entry("https://a/other", None, "elsewhere", 1000))
            .await
            .unwrap();

        let candidates = db.find_candidates("https://a/x", "GET").await.unwrap();
        let deadlines: Vec<i64> = candidates.iter().map(|c| c.content.delete_at).collect();
        assert_eq!(deadlines, vec![4000, 9000]);

        assert!(db.find_candidates("https://a/x", "POST").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_same_signature_overwrites() {
        let (_dir, db) = test_db().await;
        let first = db
            .insert_entry(&new_entry("https://a/x", encoding("gzip"), "one", 3000))
            .await
            .unwrap();
        let second = db
            .insert_entry(&new_entry("https://a/x", encoding("gzip"), "two", 5000))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(db.count_entries_for("https://a/x", "GET").await.unwrap(), 1);
        let stored = db.get_entry(first).await.unwrap().unwrap();
        assert_eq!(stored.content.body.as_deref(), Some(b"two".as_slice()));
        assert_eq!(stored.content.delete_at, 5000);
    }

    #[tokio::test]
    async fn test_update_keeps_vary() {
        let (_dir, db) = test_db().await;
        let id = db
            .insert_entry(&new_entry("https://a/x", encoding("gzip"), "one", 3000))
            .await
            .unwrap();

        let mut updated = content("two", 8000);
        updated.status_code = 203;
        assert!(db.update_entry(id, &updated).await.unwrap());

        let stored = db.get_entry(id).await.unwrap().unwrap();
        assert_eq!(stored.content, updated);
        assert_eq!(stored.vary, encoding("gzip"));

        assert!(!db.update_entry(id + 100, &updated).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_entry() {
        let (_dir, db) = test_db().await;
        let id = db
            .insert_entry(&new_entry("https://a/x", None, "one", 3000))
            .await
            .unwrap();

        assert!(db.delete_entry(id).await.unwrap());
        assert!(!db.delete_entry(id).await.unwrap());
        assert!(db.get_entry(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ids_are_not_reused() {
        let (_dir, db) = test_db().await;
        let first = db
            .insert_entry(&new_entry("https://a/x", None, "one", 3000))
            .await
            .unwrap();
        db.delete_entry(first).await.unwrap();
        let second = db
            .insert_entry(&new_entry("https://a/x", None, "two", 3000))
            .await
            .unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_delete_expired_boundary() {
        let (_dir, db) = test_db().await;
        db.insert_entry(&new_entry("https://a/1", None, "a", 1000))
            .await
            .unwrap();
        db.insert_entry(&new_entry("https://a/2", None, "b", 2000))
            .await
            .unwrap();
        db.insert_entry(&new_entry("https://a/3", None, "c", 3000))
            .await
            .unwrap();

        // delete_at equal to now counts as expired
        assert_eq!(db.delete_expired(2000).await.unwrap(), 2);
        assert_eq!(db.count_entries().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_soonest() {
        let (_dir, db) = test_db().await;
        for (i, deadline) in [5000, 1000, 3000].into_iter().enumerate() {
            db.insert_entry(&new_entry(&format!("https://a/{}", i), None, "x", deadline))
                .await
                .unwrap();
        }

        assert_eq!(db.delete_soonest(2).await.unwrap(), 2);
        let remaining = db.find_candidates("https://a/0", "GET").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(db.count_entries().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_entry_stats() {
        let (_dir, db) = test_db().await;
        db.insert_entry(&new_entry("https://a/1", None, "hello", 1000))
            .await
            .unwrap();
        db.insert_entry(&new_entry("https://a/2", None, "abc", 5000))
            .await
            .unwrap();

        let stats = db.entry_stats(2000).await.unwrap();
        assert_eq!(
            stats,
            EntryStats {
                entry_count: 2,
                expired_count: 1,
                total_body_bytes: 8,
            }
        );
    }

    #[tokio::test]
    async fn test_inserts_on_fresh_pool_connections() {
        let (_dir, db) = test_db().await;

        // Hold several connections at once so the inserts run on connections
        // opened after the schema was created
        let handles: Vec<_> = (0..6)
            .map(|i| {
                let db = db.clone();
                tokio::spawn(async move {
                    db.insert_entry(&new_entry(&format!("https://a/{}", i), None, "x", 5000))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(db.count_entries().await.unwrap(), 6);

        // Same signature on a pooled connection still hits the unique index
        let id = db
            .insert_entry(&new_entry("https://a/0", None, "y", 6000))
            .await
            .unwrap();
        assert_eq!(db.count_entries().await.unwrap(), 6);
        let stored = db.get_entry(id).await.unwrap().unwrap();
        assert_eq!(stored.content.body, Some(b"y".to_vec()));
    }

    #[tokio::test]
    async fn test_corrupt_json_column_is_a_codec_error() {
        let (_dir, db) = test_db().await;
        let id = db
            .insert_entry(&new_entry("https://a/x", encoding("gzip"), "x", 5000))
            .await
            .unwrap();

        sqlx::query(concat!("UPDATE ", entries_table!(), " SET vary = '{not json' WHERE id = ?"))
            .bind(id)
            .execute(db.pool())
            .await
            .unwrap();

        assert!(matches!(db.get_entry(id).await, Err(DbError::Codec(_))));
        assert!(matches!(
            db.find_candidates("https://a/x", "GET").await,
            Err(DbError::Codec(_))
        ));
    }
}
