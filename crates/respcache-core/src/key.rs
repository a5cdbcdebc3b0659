//! Request descriptors used to address cache entries

use respcache_db::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CacheError;

/// Identifies the request a cached response answers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKey {
    /// Scheme and authority, e.g. `https://example.com`
    pub origin: String,
    pub method: String,
    pub path: String,
    /// Request headers, consulted only for names an entry varies on
    #[serde(default)]
    pub headers: Option<HeaderMap>,
}

impl CacheKey {
    pub fn new(
        origin: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            origin: origin.into(),
            method: method.into(),
            path: path.into(),
            headers: None,
        }
    }

    /// Add a request header; names are stored lowercased
    pub fn with_header(mut self, name: &str, value: impl Into<HeaderValue>) -> Self {
        self.headers
            .get_or_insert_with(HeaderMap::new)
            .insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Look up a request header by name, ignoring ASCII case
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        let headers = self.headers.as_ref()?;
        headers.get(name).or_else(|| {
            headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        })
    }

    /// The stored `url` column: origin and path joined by a single `/`
    pub fn url(&self) -> String {
        format!(
            "{}/{}",
            self.origin.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }

    /// Check the key before it is used against storage
    pub fn validate(&self) -> Result<(), CacheError> {
        let origin = Url::parse(&self.origin).map_err(|e| {
            CacheError::InvalidKey(format!("origin {:?} is not a valid URL: {}", self.origin, e))
        })?;
        if !origin.has_host() {
            return Err(CacheError::InvalidKey(format!(
                "origin {:?} has no host",
                self.origin
            )));
        }

        if http::Method::from_bytes(self.method.as_bytes()).is_err() {
            return Err(CacheError::InvalidKey(format!(
                "method {:?} is not a valid HTTP method",
                self.method
            )));
        }

        if self.path.is_empty() {
            return Err(CacheError::InvalidKey("path is empty".to_string()));
        }

        if let Some(headers) = &self.headers {
            validate_header_names(headers.keys()).map_err(CacheError::InvalidKey)?;
        }

        Ok(())
    }
}

/// Reject names that are not valid HTTP header field names
pub(crate) fn validate_header_names<'a>(
    names: impl IntoIterator<Item = &'a String>,
) -> Result<(), String> {
    for name in names {
        if http::HeaderName::from_bytes(name.as_bytes()).is_err() {
            return Err(format!("{:?} is not a valid header name", name));
        }
    }
    Ok(())
}
