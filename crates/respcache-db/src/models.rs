//! Database models
//!
//! Structured columns (`headers`, `vary`, `cache_control_directives`) are
//! stored as JSON text. Encoding happens when binding and decoding happens in
//! the `TryFrom<&SqliteRow>` implementation, so callers only ever see the
//! typed values below.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::collections::BTreeMap;

use crate::error::DbError;

/// A single header value: either one string or an ordered list of strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::One(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::One(value)
    }
}

impl From<Vec<String>> for HeaderValue {
    fn from(values: Vec<String>) -> Self {
        HeaderValue::Many(values)
    }
}

impl<const N: usize> From<[&str; N]> for HeaderValue {
    fn from(values: [&str; N]) -> Self {
        HeaderValue::Many(values.iter().map(|v| v.to_string()).collect())
    }
}

/// Header name to value(s)
pub type HeaderMap = BTreeMap<String, HeaderValue>;

/// Header name to the value seen on the request that produced an entry.
/// `None` records that the header was absent on that request.
pub type VaryMap = BTreeMap<String, Option<HeaderValue>>;

/// Value of a directive that is either a bare flag or carries field names
/// (`private="set-cookie"`, `no-cache="authorization"`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DirectiveFields {
    Flag(bool),
    Fields(Vec<String>),
}

/// Parsed Cache-Control directives, kept for the client's freshness logic
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheControlDirectives {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s_maxage: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_while_revalidate: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_if_error: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_stale: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_fresh: Option<u64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub public: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<DirectiveFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_cache: Option<DirectiveFields>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_store: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub must_revalidate: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub proxy_revalidate: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub immutable: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_transform: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub must_understand: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub only_if_cached: bool,
}

/// Response data written by both insert and update
#[derive(Debug, Clone, PartialEq)]
pub struct EntryContent {
    pub body: Option<Vec<u8>>,
    pub status_code: u16,
    pub status_message: String,
    pub headers: HeaderMap,
    pub etag: Option<String>,
    pub cache_control_directives: CacheControlDirectives,
    /// Milliseconds since epoch
    pub cached_at: i64,
    pub stale_at: i64,
    pub delete_at: i64,
}

/// New cache entry (for insertion)
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub url: String,
    pub method: String,
    /// Variance signature; fixed for the lifetime of the row
    pub vary: Option<VaryMap>,
    pub content: EntryContent,
}

/// Cache entry model
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub id: i64,
    pub url: String,
    pub method: String,
    pub vary: Option<VaryMap>,
    pub content: EntryContent,
}

impl StoredEntry {
    /// Whether the entry has reached its deletion time
    pub fn is_expired(&self, now: i64) -> bool {
        self.content.delete_at <= now
    }
}

// ==================== TryFrom Implementations ====================

fn decode_json<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<T, DbError> {
    let raw: String = row.try_get(column)?;
    Ok(serde_json::from_str(&raw)?)
}

impl TryFrom<&SqliteRow> for StoredEntry {
    type Error = DbError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        let status_code: i64 = row.try_get("status_code")?;
        let status_code =
            u16::try_from(status_code).map_err(|e| sqlx::Error::ColumnDecode {
                index: "status_code".to_string(),
                source: Box::new(e),
            })?;

        let vary = row
            .try_get::<Option<String>, _>("vary")?
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?;

        Ok(StoredEntry {
            id: row.try_get("id")?,
            url: row.try_get("url")?,
            method: row.try_get("method")?,
            vary,
            content: EntryContent {
                body: row.try_get("body")?,
                status_code,
                status_message: row.try_get("status_message")?,
                headers: decode_json(row, "headers")?,
                etag: row.try_get("etag")?,
                cache_control_directives: decode_json(row, "cache_control_directives")?,
                cached_at: row.try_get("cached_at")?,
                stale_at: row.try_get("stale_at")?,
                delete_at: row.try_get("delete_at")?,
            },
        })
    }
}
