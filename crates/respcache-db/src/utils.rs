//! Shared utility functions

use sha2::{Digest, Sha256};

use crate::models::VaryMap;

/// Compute the variance signature hash stored in `vary_hash`
///
/// The map is serialized as JSON with keys in sorted order (`BTreeMap`), so
/// equal signatures always hash identically. An absent map and an empty map
/// both mean "no variance declared" and share the same hash.
pub fn vary_hash(vary: Option<&VaryMap>) -> Result<String, serde_json::Error> {
    let canonical = match vary {
        Some(map) if !map.is_empty() => serde_json::to_string(map)?,
        _ => String::new(),
    };

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Format bytes as human-readable string
///
/// Uses binary units (1024 base).
///
/// # Examples
///
/// ```
/// use respcache_db::utils::format_bytes;
///
/// assert_eq!(format_bytes(1024), "1.00 KB");
/// assert_eq!(format_bytes(500), "500 B");
/// ```
pub fn format_bytes(bytes: i64) -> String {
    if bytes < 0 {
        return format!("{} B", bytes);
    }

    const KB: i64 = 1024;
    const MB: i64 = KB * 1024;
    const GB: i64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
