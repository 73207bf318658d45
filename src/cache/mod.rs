//! Result cache.
//!
//! Two independent namespaces with their own TTLs:
//!
//! - **url**: resolved stream URLs. Short-lived (default 6 hours) because
//!   upstream stream URLs expire.
//! - **metadata**: opaque JSON metadata blobs. Long-lived (default 30 days);
//!   metadata is near-immutable.
//!
//! Each namespace is a moka cache whose per-entry expiry follows the
//! entry's own `expires_at` stamp, so entries re-hydrated from a snapshot
//! keep their original deadline.
//!
//! # Expiry
//!
//! An entry is never returned once `now >= expires_at` on the cache's
//! [`Clock`]. Reading an expired entry removes it.
//! [`ResultCache::cleanup_expired`] sweeps both namespaces; it runs once at
//! construction and is otherwise left to a caller-owned scheduler.
//!
//! # Persistence
//!
//! When a cache directory is configured, writes mark the namespace dirty and
//! a write-behind save snapshots it to `url_cache.json` /
//! `metadata_cache.json`. Inside a tokio runtime the save runs on the
//! blocking pool, so resolution never waits on disk; bursts of writes
//! coalesce into one save. Outside a runtime the save is inline.
//! [`ResultCache::flush`] (also run on drop) writes any pending state.
//!
//! Persistence is best-effort: failures are logged and never surface to the
//! caller. The in-memory state is authoritative for the process lifetime; a
//! restart re-hydrates from the last successful snapshot.

pub mod clock;
pub mod snapshot;

pub use clock::{Clock, ManualClock, SystemClock};
pub use snapshot::CacheEntry;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use moka::Expiry;
use moka::sync::Cache;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::telemetry;

const URL_SNAPSHOT: &str = "url_cache.json";
const METADATA_SNAPSHOT: &str = "metadata_cache.json";

/// Configuration for the result cache.
///
/// ```rust
/// # use bifrost::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .in_memory()
///     .url_ttl(Duration::from_secs(3600))
///     .max_entries(1_000);
/// assert!(config.dir.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory for snapshot files. `None` disables persistence.
    /// Default: `~/.cache/bifrost`.
    pub dir: Option<PathBuf>,
    /// TTL for stream URLs. Default: 6 hours.
    pub url_ttl: Duration,
    /// TTL for metadata. Default: 30 days.
    pub metadata_ttl: Duration,
    /// Maximum entries per namespace. Default: 10,000.
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: Some(default_cache_dir()),
            url_ttl: Duration::from_secs(6 * 3600),
            metadata_ttl: Duration::from_secs(30 * 24 * 3600),
            max_entries: 10_000,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist snapshots under `dir`.
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Disable persistence.
    pub fn in_memory(mut self) -> Self {
        self.dir = None;
        self
    }

    pub fn url_ttl(mut self, ttl: Duration) -> Self {
        self.url_ttl = ttl;
        self
    }

    pub fn metadata_ttl(mut self, ttl: Duration) -> Self {
        self.metadata_ttl = ttl;
        self
    }

    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }
}

/// Default snapshot directory: `~/.cache/bifrost`.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("bifrost")
}

/// Read-only cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Percentage of lookups that hit, 0.0 when there were none.
    pub hit_rate: f64,
    pub url_entries: usize,
    pub metadata_entries: usize,
    pub url_ttl_secs: u64,
    pub metadata_ttl_secs: u64,
}

/// Expires each entry at its stored `expires_at`.
struct UntilExpiresAt {
    clock: Arc<dyn Clock>,
}

impl UntilExpiresAt {
    fn remaining<V>(&self, entry: &CacheEntry<V>) -> Option<Duration> {
        let now = self.clock.now_millis();
        Some(Duration::from_millis(entry.expires_at.saturating_sub(now)))
    }
}

impl<V> Expiry<String, CacheEntry<V>> for UntilExpiresAt {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry<V>,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        self.remaining(value)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry<V>,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        self.remaining(value)
    }
}

/// One TTL namespace: a moka cache plus an optional snapshot path.
struct Namespace<V> {
    name: &'static str,
    entries: Cache<String, CacheEntry<V>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    path: Option<PathBuf>,
    /// Set by writes, cleared by the save that picks them up.
    dirty: AtomicBool,
    /// Serializes snapshot writes so an older snapshot never lands last.
    save_lock: Mutex<()>,
}

impl<V> Namespace<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn open(
        name: &'static str,
        config: &CacheConfig,
        ttl: Duration,
        file: &str,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let entries = Cache::builder()
            .max_capacity(config.max_entries)
            .expire_after(UntilExpiresAt {
                clock: Arc::clone(&clock),
            })
            .build();
        let path = config.dir.as_deref().map(|d| d.join(file));
        if let Some(path) = path.as_deref() {
            let now = clock.now_millis();
            for (id, entry) in snapshot::load_snapshot::<V>(path) {
                if !entry.is_expired(now) {
                    entries.insert(id, entry);
                }
            }
        }
        Arc::new(Self {
            name,
            entries,
            ttl,
            clock,
            path,
            dirty: AtomicBool::new(false),
            save_lock: Mutex::new(()),
        })
    }

    /// Look up a live entry, evicting it if it has expired.
    fn get(&self, id: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.get(id)?;
        if entry.is_expired(self.clock.now_millis()) {
            self.entries.invalidate(id);
            debug!(namespace = self.name, id, "evicted expired entry on read");
            return None;
        }
        Some(entry)
    }

    fn insert(self: &Arc<Self>, id: &str, value: V, source: Option<String>) {
        let now = self.clock.now_millis();
        let entry = CacheEntry {
            value,
            source,
            created_at: now,
            expires_at: now.saturating_add(self.ttl.as_millis() as u64),
        };
        self.entries.insert(id.to_string(), entry);
        self.schedule_save();
    }

    fn remove_expired(self: &Arc<Self>) -> usize {
        let now = self.clock.now_millis();
        let expired: Vec<Arc<String>> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(id, _)| id)
            .collect();
        for id in &expired {
            self.entries.invalidate(id.as_str());
        }
        self.entries.run_pending_tasks();
        if !expired.is_empty() {
            self.schedule_save();
        }
        expired.len()
    }

    fn clear(self: &Arc<Self>) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
        self.schedule_save();
    }

    fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    /// Queue a snapshot save unless one is already pending.
    fn schedule_save(self: &Arc<Self>) {
        if self.path.is_none() || self.dirty.swap(true, Ordering::AcqRel) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let namespace = Arc::clone(self);
                handle.spawn_blocking(move || namespace.save());
            }
            Err(_) => self.save(),
        }
    }

    /// Write the live entries to disk if anything changed since the last save.
    fn save(&self) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        let _guard = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return;
        }
        let now = self.clock.now_millis();
        let live: HashMap<String, CacheEntry<V>> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(id, entry)| (id.to_string(), entry))
            .collect();
        if let Err(e) = snapshot::save_snapshot(path, &live) {
            warn!(namespace = self.name, path = %path.display(), error = %e, "cache snapshot save failed");
        }
    }
}

/// Thread-safe two-namespace TTL cache with best-effort persistence.
pub struct ResultCache {
    urls: Arc<Namespace<String>>,
    metadata: Arc<Namespace<serde_json::Value>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    /// Open the cache, loading snapshots and sweeping expired entries.
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Open the cache with an explicit clock.
    pub fn with_clock(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let cache = Self {
            urls: Namespace::open("url", config, config.url_ttl, URL_SNAPSHOT, Arc::clone(&clock)),
            metadata: Namespace::open(
                "metadata",
                config,
                config.metadata_ttl,
                METADATA_SNAPSHOT,
                clock,
            ),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        };
        cache.cleanup_expired();
        cache
    }

    /// Look up a cached stream URL.
    pub fn get_url(&self, id: &str) -> Option<String> {
        let entry = self.urls.get(id);
        self.count(self.urls.name, entry.is_some());
        if let Some(ref e) = entry {
            debug!(id, source = e.source.as_deref().unwrap_or("unknown"), "url cache hit");
        }
        entry.map(|e| e.value)
    }

    /// Look up a full URL entry, including provenance and timestamps.
    ///
    /// Does not touch the hit/miss counters.
    pub fn url_entry(&self, id: &str) -> Option<CacheEntry<String>> {
        self.urls.get(id)
    }

    /// Cache a stream URL produced by `source`. Last write wins.
    pub fn set_url(&self, id: &str, url: impl Into<String>, source: &str) {
        self.urls.insert(id, url.into(), Some(source.to_string()));
        debug!(id, source, "cached url");
    }

    /// Look up cached metadata.
    pub fn get_metadata(&self, id: &str) -> Option<serde_json::Value> {
        let entry = self.metadata.get(id);
        self.count(self.metadata.name, entry.is_some());
        entry.map(|e| e.value)
    }

    /// Cache an opaque metadata blob.
    pub fn set_metadata(&self, id: &str, metadata: serde_json::Value) {
        self.metadata.insert(id, metadata, None);
    }

    /// Remove expired entries from both namespaces.
    ///
    /// Returns `(removed_urls, removed_metadata)`. Snapshots are rewritten
    /// only if something was removed.
    pub fn cleanup_expired(&self) -> (usize, usize) {
        let removed_urls = self.urls.remove_expired();
        let removed_meta = self.metadata.remove_expired();
        if removed_urls > 0 || removed_meta > 0 {
            info!(removed_urls, removed_meta, "cleaned expired cache entries");
        }
        (removed_urls, removed_meta)
    }

    /// Drop every entry in both namespaces and reset the counters.
    pub fn clear_all(&self) {
        self.urls.clear();
        self.metadata.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        info!("cleared all caches");
    }

    /// Write any pending snapshot state to disk now.
    pub fn flush(&self) {
        self.urls.save();
        self.metadata.save();
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            url_entries: self.urls.len(),
            metadata_entries: self.metadata.len(),
            url_ttl_secs: self.urls.ttl.as_secs(),
            metadata_ttl_secs: self.metadata.ttl.as_secs(),
        }
    }

    fn count(&self, namespace: &'static str, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(telemetry::CACHE_HITS_TOTAL, "namespace" => namespace).increment(1);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "namespace" => namespace)
                .increment(1);
        }
    }
}

impl Drop for ResultCache {
    fn drop(&mut self) {
        self.flush();
    }
}
