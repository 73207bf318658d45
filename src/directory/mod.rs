//! Instance directory: discovery and refresh of federated endpoints.
//!
//! The directory keeps one ordered candidate list per [`Family`]. Lists are
//! fetched from the public instance registries (Piped, Invidious) or by
//! probing known hosts (cobalt), and fall back to built-in seed lists when
//! discovery fails.
//!
//! # Freshness
//!
//! - [`InstanceDirectory::ensure_initialized`] refreshes at most once per
//!   `refresh_interval`; concurrent callers share one refresh.
//! - [`InstanceDirectory::refresh_if_stale`] does the same in a background
//!   task and returns immediately.
//! - [`InstanceDirectory::candidates`] never waits: before the first
//!   completed discovery it hands out the seed list.
//!
//! Every completed refresh bumps [`InstanceDirectory::generation`], which
//! health trackers use to lift exclusions.

mod sources;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::seq::SliceRandom;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::providers::http;
use crate::{Result, telemetry};

pub use sources::{parse_cobalt_probe, parse_invidious, parse_piped};

/// Public Piped instance registry.
pub const PIPED_INSTANCES_URL: &str = "https://piped-instances.kavin.rocks/";
/// Public Invidious instance registry.
pub const INVIDIOUS_INSTANCES_URL: &str = "https://api.invidious.io/instances.json";

/// A family of interchangeable upstream instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Piped,
    Invidious,
    Cobalt,
}

impl Family {
    pub const ALL: [Family; 3] = [Family::Piped, Family::Invidious, Family::Cobalt];

    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Piped => "piped",
            Family::Invidious => "invidious",
            Family::Cobalt => "cobalt",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discovered endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredInstance {
    pub url: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Uptime or user count; only used for initial ordering.
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl DiscoveredInstance {
    fn seed(url: &str) -> Self {
        Self {
            url: url.to_string(),
            name: "Fallback".into(),
            region: None,
            score: 0.0,
            version: None,
        }
    }
}

/// Configuration for instance discovery.
///
/// ```rust
/// # use bifrost::DiscoveryConfig;
/// # use std::time::Duration;
/// let config = DiscoveryConfig::new()
///     .refresh_interval(Duration::from_secs(1800))
///     .max_instances(5);
/// assert_eq!(config.max_instances, 5);
/// ```
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Minimum time between refreshes. Default: 1 hour.
    pub refresh_interval: Duration,
    /// Timeout for registry requests. Default: 10s.
    pub request_timeout: Duration,
    /// Timeout for each cobalt probe. Default: 5s.
    pub probe_timeout: Duration,
    /// Instances kept per family after ranking. Default: 10.
    pub max_instances: usize,
    pub piped_list_url: String,
    pub invidious_list_url: String,
    pub piped_seeds: Vec<String>,
    pub invidious_seeds: Vec<String>,
    /// Hosts probed for cobalt instances (there is no public registry).
    pub cobalt_seeds: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        let owned = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            refresh_interval: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            max_instances: 10,
            piped_list_url: PIPED_INSTANCES_URL.into(),
            invidious_list_url: INVIDIOUS_INSTANCES_URL.into(),
            piped_seeds: owned(&[
                "https://pipedapi.kavin.rocks",
                "https://pipedapi.adminforge.de",
                "https://api.piped.privacydev.net",
                "https://pipedapi.darkness.services",
                "https://pipedapi.drgns.space",
            ]),
            invidious_seeds: owned(&[
                "https://inv.nadeko.net",
                "https://invidious.nerdvpn.de",
                "https://invidious.jing.rocks",
                "https://yt.artemislena.eu",
                "https://invidious.privacydev.net",
            ]),
            cobalt_seeds: owned(&[
                "https://cobalt.canine.tools",
                "https://cobalt.wukko.me",
                "https://api.cobalt.tools",
            ]),
        }
    }
}

impl DiscoveryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh_interval(mut self, d: Duration) -> Self {
        self.refresh_interval = d;
        self
    }

    pub fn request_timeout(mut self, d: Duration) -> Self {
        self.request_timeout = d;
        self
    }

    pub fn max_instances(mut self, n: usize) -> Self {
        self.max_instances = n;
        self
    }

    /// Override both registry URLs (for testing against a mock server).
    pub fn list_urls(mut self, piped: impl Into<String>, invidious: impl Into<String>) -> Self {
        self.piped_list_url = piped.into();
        self.invidious_list_url = invidious.into();
        self
    }

    pub fn seeds(mut self, family: Family, urls: Vec<String>) -> Self {
        match family {
            Family::Piped => self.piped_seeds = urls,
            Family::Invidious => self.invidious_seeds = urls,
            Family::Cobalt => self.cobalt_seeds = urls,
        }
        self
    }

    pub fn seeds_for(&self, family: Family) -> &[String] {
        match family {
            Family::Piped => &self.piped_seeds,
            Family::Invidious => &self.invidious_seeds,
            Family::Cobalt => &self.cobalt_seeds,
        }
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    lists: HashMap<Family, Vec<DiscoveredInstance>>,
    refreshed_at: Option<Instant>,
    refreshed_at_unix: Option<u64>,
}

/// Short summary of one instance for the stats surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceSummary {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FamilySnapshot {
    pub count: usize,
    /// First few instances, best first.
    pub instances: Vec<InstanceSummary>,
}

/// Read-only view of the directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryStats {
    pub initialized: bool,
    pub generation: u64,
    pub families: BTreeMap<Family, FamilySnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh_unix: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_refresh_in_secs: Option<u64>,
}

/// Process-wide directory of federated instances.
pub struct InstanceDirectory {
    http: Client,
    config: DiscoveryConfig,
    snapshot: RwLock<Snapshot>,
    generation: AtomicU64,
    /// Serializes refreshes so concurrent callers share one.
    refresh_lock: tokio::sync::Mutex<()>,
    background: AtomicBool,
}

impl InstanceDirectory {
    pub fn new(config: DiscoveryConfig) -> Result<Self> {
        let client = http::build_client(config.request_timeout)?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: DiscoveryConfig, http: Client) -> Self {
        Self {
            http,
            config,
            snapshot: RwLock::new(Snapshot::default()),
            generation: AtomicU64::new(0),
            refresh_lock: tokio::sync::Mutex::new(()),
            background: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Number of completed refreshes.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn is_initialized(&self) -> bool {
        self.read().refreshed_at.is_some()
    }

    /// Whether the snapshot is missing or older than the refresh interval.
    pub fn is_stale(&self) -> bool {
        self.read()
            .refreshed_at
            .is_none_or(|t| t.elapsed() >= self.config.refresh_interval)
    }

    /// Refresh if stale. Idempotent; concurrent callers wait for one refresh.
    pub async fn ensure_initialized(&self) {
        if !self.is_stale() {
            return;
        }
        let _guard = self.refresh_lock.lock().await;
        if self.is_stale() {
            self.refresh().await;
        }
    }

    /// Start a background refresh if stale and none is in flight.
    ///
    /// Must be called from within a tokio runtime.
    pub fn refresh_if_stale(self: &Arc<Self>) {
        if !self.is_stale() || self.background.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.ensure_initialized().await;
            this.background.store(false, Ordering::Release);
        });
    }

    /// Query every source now, regardless of freshness.
    pub async fn refresh(&self) {
        debug!("refreshing instance lists");
        let (piped, invidious, cobalt) = tokio::join!(
            self.discover_list(Family::Piped),
            self.discover_list(Family::Invidious),
            self.probe_cobalt(),
        );

        let counts = (piped.len(), invidious.len(), cobalt.len());
        {
            let mut snapshot = self.write();
            snapshot.lists.insert(Family::Piped, piped);
            snapshot.lists.insert(Family::Invidious, invidious);
            snapshot.lists.insert(Family::Cobalt, cobalt);
            snapshot.refreshed_at = Some(Instant::now());
            snapshot.refreshed_at_unix = Some(unix_now());
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!(
            piped = counts.0,
            invidious = counts.1,
            cobalt = counts.2,
            generation,
            "instance lists refreshed"
        );
    }

    /// Up to `count` candidate URLs for `family`.
    ///
    /// Before the first refresh this is the seed list in order. Afterwards it
    /// is the top `count` discovered instances, shuffled.
    pub fn candidates(&self, family: Family, count: usize) -> Vec<String> {
        self.candidates_where(family, count, |_| true)
    }

    /// Like [`candidates`](Self::candidates), but instances rejected by
    /// `keep` are skipped before the list is cut to `count`, so lower-ranked
    /// instances move up when the top ones are unusable.
    pub fn candidates_where(
        &self,
        family: Family,
        count: usize,
        keep: impl Fn(&str) -> bool,
    ) -> Vec<String> {
        let snapshot = self.read();
        match snapshot.lists.get(&family).filter(|list| !list.is_empty()) {
            Some(list) => {
                let mut urls: Vec<String> = list
                    .iter()
                    .filter(|i| keep(&i.url))
                    .take(count)
                    .map(|i| i.url.clone())
                    .collect();
                urls.shuffle(&mut rand::rng());
                urls
            }
            None => self
                .config
                .seeds_for(family)
                .iter()
                .filter(|url| keep(url))
                .take(count)
                .cloned()
                .collect(),
        }
    }

    pub fn stats(&self) -> DiscoveryStats {
        let snapshot = self.read();
        let families = Family::ALL
            .iter()
            .map(|family| {
                let list = snapshot.lists.get(family).map(Vec::as_slice).unwrap_or(&[]);
                let shown = if *family == Family::Cobalt { list.len() } else { 5 };
                let summary = FamilySnapshot {
                    count: list.len(),
                    instances: list
                        .iter()
                        .take(shown)
                        .map(|i| InstanceSummary {
                            url: i.url.clone(),
                            region: i.region.clone(),
                        })
                        .collect(),
                };
                (*family, summary)
            })
            .collect();
        DiscoveryStats {
            initialized: snapshot.refreshed_at.is_some(),
            generation: self.generation(),
            families,
            last_refresh_unix: snapshot.refreshed_at_unix,
            next_refresh_in_secs: snapshot.refreshed_at.map(|t| {
                self.config
                    .refresh_interval
                    .saturating_sub(t.elapsed())
                    .as_secs()
            }),
        }
    }

    async fn discover_list(&self, family: Family) -> Vec<DiscoveredInstance> {
        let (url, parse): (&str, fn(&Value) -> Vec<DiscoveredInstance>) = match family {
            Family::Piped => (&self.config.piped_list_url, sources::parse_piped),
            Family::Invidious => (&self.config.invidious_list_url, sources::parse_invidious),
            Family::Cobalt => return self.probe_cobalt().await,
        };

        let request = self.http.get(url).timeout(self.config.request_timeout);
        let discovered = match http::send_json(request).await {
            Ok(body) => parse(&body),
            Err(e) => {
                warn!(%family, error = %e, "instance discovery failed");
                Vec::new()
            }
        };

        if discovered.is_empty() {
            record_refresh(family, "fallback");
            return self.seed_list(family);
        }
        record_refresh(family, "ok");
        sources::rank_and_truncate(discovered, self.config.max_instances)
    }

    async fn probe_cobalt(&self) -> Vec<DiscoveredInstance> {
        let probes = self.config.cobalt_seeds.iter().map(|url| async move {
            let request = self
                .http
                .get(http::join_url(url, "/"))
                .timeout(self.config.probe_timeout);
            match http::send_json(request).await {
                Ok(body) => sources::parse_cobalt_probe(url, &body),
                Err(e) => {
                    debug!(url, error = %e, "cobalt probe failed");
                    None
                }
            }
        });
        let live: Vec<DiscoveredInstance> = futures_util::future::join_all(probes)
            .await
            .into_iter()
            .flatten()
            .collect();

        if live.is_empty() {
            record_refresh(Family::Cobalt, "fallback");
            return self.seed_list(Family::Cobalt);
        }
        record_refresh(Family::Cobalt, "ok");
        live
    }

    fn seed_list(&self, family: Family) -> Vec<DiscoveredInstance> {
        self.config
            .seeds_for(family)
            .iter()
            .map(|url| DiscoveredInstance::seed(url))
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Snapshot> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Snapshot> {
        self.snapshot.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for InstanceDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceDirectory")
            .field("generation", &self.generation())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

fn record_refresh(family: Family, status: &'static str) {
    metrics::counter!(
        telemetry::DISCOVERY_REFRESHES_TOTAL,
        "family" => family.as_str(),
        "status" => status
    )
    .increment(1);
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_before_first_refresh() {
        let dir = InstanceDirectory::with_client(DiscoveryConfig::default(), Client::new());
        assert!(!dir.is_initialized());
        assert!(dir.is_stale());
        assert_eq!(
            dir.candidates(Family::Piped, 2),
            ["https://pipedapi.kavin.rocks", "https://pipedapi.adminforge.de"]
        );
        assert_eq!(dir.candidates(Family::Cobalt, 10).len(), 3);
    }

    #[test]
    fn filtered_candidates_fill_from_lower_ranks() {
        let dir = InstanceDirectory::with_client(DiscoveryConfig::default(), Client::new());
        let picked = dir.candidates_where(Family::Piped, 2, |url| {
            url != "https://pipedapi.kavin.rocks"
        });
        assert_eq!(picked.len(), 2);
        assert!(!picked.iter().any(|u| u == "https://pipedapi.kavin.rocks"));
        assert_eq!(picked[0], "https://pipedapi.adminforge.de");
    }

    #[test]
    fn stats_before_refresh() {
        let dir = InstanceDirectory::with_client(DiscoveryConfig::default(), Client::new());
        let stats = dir.stats();
        assert!(!stats.initialized);
        assert_eq!(stats.generation, 0);
        assert_eq!(stats.families[&Family::Invidious].count, 0);
        assert!(stats.next_refresh_in_secs.is_none());
    }

    #[test]
    fn family_names() {
        assert_eq!(Family::Invidious.to_string(), "invidious");
        assert_eq!(serde_json::to_string(&Family::Cobalt).unwrap(), "\"cobalt\"");
    }
}
