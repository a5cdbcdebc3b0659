//! Entry matching against a request key
//!
//! Candidates for a URL and method come back soonest-to-expire first. The
//! first candidate whose variance signature agrees with the request headers
//! wins.

use respcache_db::{Database, DbError, HeaderValue, StoredEntry, VaryMap};
use tracing::debug;

use crate::key::CacheKey;

/// Compare a request header value with the value recorded in an entry's vary map
///
/// Both absent matches, one absent does not, lists must agree element by
/// element in order, and a single value never equals a list.
pub fn header_value_equals(request: Option<&HeaderValue>, stored: Option<&HeaderValue>) -> bool {
    match (request, stored) {
        (None, None) => true,
        (Some(HeaderValue::Many(request)), Some(HeaderValue::Many(stored))) => request == stored,
        (Some(HeaderValue::One(request)), Some(HeaderValue::One(stored))) => request == stored,
        _ => false,
    }
}

/// Whether a request satisfies an entry's variance signature
///
/// An entry without a vary map (or with an empty one) matches every request.
pub fn vary_matches(vary: Option<&VaryMap>, key: &CacheKey) -> bool {
    vary.is_none_or(|vary| {
        vary.iter()
            .all(|(name, stored)| header_value_equals(key.header(name), stored.as_ref()))
    })
}

/// Pick the matching entry from candidates ordered by ascending `delete_at`
///
/// Unless `allow_expired` is set, reaching an expired candidate ends the scan
/// with no match.
pub fn select_entry(
    candidates: Vec<StoredEntry>,
    key: &CacheKey,
    now: i64,
    allow_expired: bool,
) -> Option<StoredEntry> {
    for candidate in candidates {
        if !allow_expired && candidate.is_expired(now) {
            return None;
        }
        if vary_matches(candidate.vary.as_ref(), key) {
            return Some(candidate);
        }
    }
    None
}

/// Find the entry answering `key`
pub async fn find_entry(
    db: &Database,
    key: &CacheKey,
    now: i64,
    allow_expired: bool,
) -> Result<Option<StoredEntry>, DbError> {
    let url = key.url();
    let candidates = db.find_candidates(&url, &key.method).await?;
    let count = candidates.len();
    let found = select_entry(candidates, key, now, allow_expired);

    debug!(
        "Matched {} {} against {} candidate(s): {}",
        key.method,
        url,
        count,
        found
            .as_ref()
            .map_or_else(|| "none".to_string(), |entry| format!("entry {}", entry.id))
    );
    Ok(found)
}
