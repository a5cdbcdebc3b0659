//! Cached response values

use bytes::{Bytes, BytesMut};
use respcache_db::{
    CacheControlDirectives, EntryContent, HeaderMap, HeaderValue, StoredEntry, VaryMap,
};
use serde::Serialize;

use crate::error::CacheError;
use crate::key::validate_header_names;

/// Response body, either whole or as the chunks it arrived in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Single(Bytes),
    Chunks(Vec<Bytes>),
}

impl Body {
    /// Total size in bytes
    pub fn len(&self) -> usize {
        match self {
            Body::Single(bytes) => bytes.len(),
            Body::Chunks(chunks) => chunks.iter().map(Bytes::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenate into a single buffer
    pub fn into_bytes(self) -> Bytes {
        match self {
            Body::Single(bytes) => bytes,
            Body::Chunks(chunks) if chunks.len() == 1 => {
                chunks.into_iter().next().unwrap_or_default()
            }
            Body::Chunks(chunks) => {
                let mut buf = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
                for chunk in &chunks {
                    buf.extend_from_slice(chunk);
                }
                buf.freeze()
            }
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Single(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Single(Bytes::from(bytes))
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::Single(Bytes::copy_from_slice(text.as_bytes()))
    }
}

impl From<Vec<Bytes>> for Body {
    fn from(chunks: Vec<Bytes>) -> Self {
        Body::Chunks(chunks)
    }
}

/// A response to store
#[derive(Debug, Clone, PartialEq)]
pub struct CacheValue {
    pub status_code: u16,
    pub status_message: String,
    pub headers: HeaderMap,
    pub body: Option<Body>,
    pub etag: Option<String>,
    /// Request header values this response varies on
    pub vary: Option<VaryMap>,
    pub cache_control_directives: CacheControlDirectives,
    /// Milliseconds since epoch
    pub cached_at: i64,
    pub stale_at: i64,
    pub delete_at: i64,
}

impl CacheValue {
    pub fn new(
        status_code: u16,
        status_message: impl Into<String>,
        cached_at: i64,
        stale_at: i64,
        delete_at: i64,
    ) -> Self {
        Self {
            status_code,
            status_message: status_message.into(),
            headers: HeaderMap::new(),
            body: None,
            etag: None,
            vary: None,
            cache_control_directives: CacheControlDirectives::default(),
            cached_at,
            stale_at,
            delete_at,
        }
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Add a response header; names are stored lowercased
    pub fn with_header(mut self, name: &str, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// Record the request value of a header this response varies on
    pub fn with_vary(mut self, name: &str, value: Option<HeaderValue>) -> Self {
        self.vary
            .get_or_insert_with(VaryMap::new)
            .insert(name.to_ascii_lowercase(), value);
        self
    }

    pub fn with_directives(mut self, directives: CacheControlDirectives) -> Self {
        self.cache_control_directives = directives;
        self
    }

    /// Check the value before it is written
    pub fn validate(&self) -> Result<(), CacheError> {
        if !(100..=999).contains(&self.status_code) {
            return Err(CacheError::InvalidValue(format!(
                "status code {} is out of range",
                self.status_code
            )));
        }

        for (field, value) in [
            ("cached_at", self.cached_at),
            ("stale_at", self.stale_at),
            ("delete_at", self.delete_at),
        ] {
            if value < 0 {
                return Err(CacheError::InvalidValue(format!(
                    "{} must not be negative, got {}",
                    field, value
                )));
            }
        }

        if matches!(&self.etag, Some(etag) if etag.is_empty()) {
            return Err(CacheError::InvalidValue("etag is empty".to_string()));
        }

        validate_header_names(self.headers.keys()).map_err(CacheError::InvalidValue)?;
        if let Some(vary) = &self.vary {
            validate_header_names(vary.keys()).map_err(CacheError::InvalidValue)?;
        }

        Ok(())
    }

    /// Split into the variance signature and the row content, with the body
    /// concatenated into one buffer and vary names lowercased
    pub(crate) fn into_parts(self) -> (Option<VaryMap>, EntryContent) {
        let vary = self.vary.map(|vary| {
            vary.into_iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value))
                .collect::<VaryMap>()
        });

        let content = EntryContent {
            body: self.body.map(|body| body.into_bytes().to_vec()),
            status_code: self.status_code,
            status_message: self.status_message,
            headers: self.headers,
            etag: self.etag,
            cache_control_directives: self.cache_control_directives,
            cached_at: self.cached_at,
            stale_at: self.stale_at,
            delete_at: self.delete_at,
        };
        (vary, content)
    }
}

/// A stored response, as returned by a lookup
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedResponse {
    pub status_code: u16,
    pub status_message: String,
    pub headers: HeaderMap,
    #[serde(skip_serializing)]
    pub body: Option<Bytes>,
    pub etag: Option<String>,
    pub vary: Option<VaryMap>,
    pub cache_control_directives: CacheControlDirectives,
    pub cached_at: i64,
    pub stale_at: i64,
    pub delete_at: i64,
}

impl From<StoredEntry> for CachedResponse {
    fn from(entry: StoredEntry) -> Self {
        let content = entry.content;
        Self {
            status_code: content.status_code,
            status_message: content.status_message,
            headers: content.headers,
            body: content.body.map(Bytes::from),
            etag: content.etag,
            vary: entry.vary,
            cache_control_directives: content.cache_control_directives,
            cached_at: content.cached_at,
            stale_at: content.stale_at,
            delete_at: content.delete_at,
        }
    }
}
