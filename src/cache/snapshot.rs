//! On-disk cache snapshots.
//!
//! Each namespace is stored as a flat JSON object mapping identifier to
//! [`CacheEntry`]. Loading is best-effort: a missing or corrupt file yields
//! an empty map. Saving writes a tmp file and renames it over the target.

use std::collections::HashMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{BifrostError, Result};

/// A single cached value with its provenance and expiry.
///
/// Timestamps are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub value: V,
    /// Layer that produced the value (e.g. `"primary"`), if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub created_at: u64,
    pub expires_at: u64,
}

impl<V> CacheEntry<V> {
    /// An entry is dead from `expires_at` onwards.
    pub fn is_expired(&self, now_millis: u64) -> bool {
        now_millis >= self.expires_at
    }
}

/// Load a snapshot from disk.
///
/// Returns an empty map on a missing file (silently) or on an unreadable or
/// corrupt file (with a warning).
pub fn load_snapshot<V: DeserializeOwned>(path: &Path) -> HashMap<String, CacheEntry<V>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read cache snapshot");
            return HashMap::new();
        }
    };
    match serde_json::from_str(&content) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt cache snapshot, starting empty");
            HashMap::new()
        }
    }
}

/// Save a snapshot to disk (atomic write via tmp + rename).
pub fn save_snapshot<V: Serialize>(
    path: &Path,
    entries: &HashMap<String, CacheEntry<V>>,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            BifrostError::Configuration(format!(
                "failed to create cache dir {}: {e}",
                parent.display()
            ))
        })?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let json = serde_json::to_string(entries)?;
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
