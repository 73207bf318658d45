//! The cascading resolver.
//!
//! [`Resolver::resolve`] walks the cascade and returns the first success:
//!
//! 1. **cache**: synchronous lookup, no network.
//! 2. **primary**: bounded by `primary_timeout` (default 5s).
//! 3. **federation**: bounded by `federation_timeout` (default 4s).
//! 4. **fallback**: unbounded unless `fallback_timeout` is set.
//!
//! A layer success is written through to the cache with the layer name as
//! its source. Results are keyed by [`ResolveRequest::cache_key`]: the video
//! id, or the normalized search query for anything else. A request with
//! neither bypasses the cache. When every layer comes back empty the result is
//! [`SourceLayer::None`] and the `failed` counter goes up by one. There are
//! no retries at this level; each adapter iterates its own candidates.

mod builder;
mod stats;

pub use builder::{Bifrost, BifrostBuilder};
pub use stats::{LayerStats, ResolverStats};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheStats, ResultCache};
use crate::directory::{DiscoveryStats, InstanceDirectory};
use crate::providers::{DomainStats, ProviderHealth, RateLimiter, StreamProvider};
use crate::telemetry;
use crate::types::{ResolveRequest, Resolution, SourceLayer};
use stats::StatsRecorder;

/// Per-layer timeouts and bookkeeping limits.
///
/// ```rust
/// # use bifrost::ResolverConfig;
/// # use std::time::Duration;
/// let config = ResolverConfig::new()
///     .primary_timeout(Duration::from_secs(3))
///     .fallback_timeout(Duration::from_secs(30));
/// assert_eq!(config.fallback_timeout, Some(Duration::from_secs(30)));
/// ```
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Default: 5s.
    pub primary_timeout: Duration,
    /// Default: 4s.
    pub federation_timeout: Duration,
    /// Default: none.
    pub fallback_timeout: Option<Duration>,
    /// Latency samples kept per layer. Default: 100.
    pub latency_history: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            primary_timeout: Duration::from_secs(5),
            federation_timeout: Duration::from_secs(4),
            fallback_timeout: None,
            latency_history: 100,
        }
    }
}

impl ResolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn primary_timeout(mut self, d: Duration) -> Self {
        self.primary_timeout = d;
        self
    }

    pub fn federation_timeout(mut self, d: Duration) -> Self {
        self.federation_timeout = d;
        self
    }

    pub fn fallback_timeout(mut self, d: Duration) -> Self {
        self.fallback_timeout = Some(d);
        self
    }

    pub fn latency_history(mut self, n: usize) -> Self {
        self.latency_history = n;
        self
    }
}

/// Everything the stats surface exposes, in one serializable value.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub resolver: ResolverStats,
    pub cache: CacheStats,
    pub rate_limits: BTreeMap<String, DomainStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery: Option<DiscoveryStats>,
    pub providers: Vec<ProviderHealth>,
}

/// The assembled cascade. Build one with [`Bifrost::builder`].
pub struct Resolver {
    cache: Arc<ResultCache>,
    primary: Arc<dyn StreamProvider>,
    federation: Arc<dyn StreamProvider>,
    fallback: Arc<dyn StreamProvider>,
    limiter: Arc<RateLimiter>,
    directory: Option<Arc<InstanceDirectory>>,
    config: ResolverConfig,
    stats: StatsRecorder,
}

impl Resolver {
    pub(crate) fn new(
        cache: Arc<ResultCache>,
        layers: [Arc<dyn StreamProvider>; 3],
        limiter: Arc<RateLimiter>,
        directory: Option<Arc<InstanceDirectory>>,
        config: ResolverConfig,
    ) -> Self {
        let [primary, federation, fallback] = layers;
        Self {
            cache,
            primary,
            federation,
            fallback,
            limiter,
            directory,
            stats: StatsRecorder::new(config.latency_history),
            config,
        }
    }

    /// Resolve an identifier, with optional hints for the fallback search.
    pub async fn resolve(
        &self,
        id: &str,
        title: Option<&str>,
        artist: Option<&str>,
    ) -> Resolution {
        let mut request = ResolveRequest::new(id);
        if let Some(title) = title {
            request = request.title(title);
        }
        if let Some(artist) = artist {
            request = request.artist(artist);
        }
        self.resolve_request(&request).await
    }

    /// Resolve a prepared request.
    #[instrument(name = "bifrost.resolve", skip_all, fields(id = %request.id))]
    pub async fn resolve_request(&self, request: &ResolveRequest) -> Resolution {
        let start = Instant::now();
        self.stats.record_request();

        let cache_key = request.cache_key();
        if let Some(key) = &cache_key {
            let lookup = Instant::now();
            let cached = self.cache.get_url(key);
            self.finish_layer(SourceLayer::Cache, lookup.elapsed(), cached.is_some());
            if let Some(url) = cached {
                return self.found(url, SourceLayer::Cache, start);
            }
        }

        if let Some(directory) = &self.directory {
            directory.refresh_if_stale();
        }

        for (layer, provider, limit) in self.layers() {
            let layer_start = Instant::now();
            let attempt = provider.resolve(request);
            let outcome = match limit {
                Some(limit) => tokio::time::timeout(limit, attempt).await.unwrap_or_else(|_| {
                    debug!(%layer, timeout_ms = limit.as_millis() as u64, "layer timed out");
                    None
                }),
                None => attempt.await,
            };
            self.finish_layer(layer, layer_start.elapsed(), outcome.is_some());

            if let Some(url) = outcome {
                if let Some(key) = &cache_key {
                    self.cache.set_url(key, url.as_str(), layer.as_str());
                }
                return self.found(url, layer, start);
            }
        }

        self.stats.record_exhausted();
        metrics::counter!(telemetry::RESOLUTIONS_TOTAL, "layer" => SourceLayer::None.as_str())
            .increment(1);
        warn!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "all resolution layers exhausted"
        );
        Resolution::exhausted(start.elapsed())
    }

    fn layers(&self) -> [(SourceLayer, &dyn StreamProvider, Option<Duration>); 3] {
        [
            (
                SourceLayer::Primary,
                self.primary.as_ref(),
                Some(self.config.primary_timeout),
            ),
            (
                SourceLayer::Federation,
                self.federation.as_ref(),
                Some(self.config.federation_timeout),
            ),
            (
                SourceLayer::Fallback,
                self.fallback.as_ref(),
                self.config.fallback_timeout,
            ),
        ]
    }

    fn finish_layer(&self, layer: SourceLayer, elapsed: Duration, found: bool) {
        self.stats.record_layer(layer, elapsed, found);
        metrics::histogram!(telemetry::LAYER_DURATION_SECONDS, "layer" => layer.as_str())
            .record(elapsed.as_secs_f64());
    }

    fn found(&self, url: String, layer: SourceLayer, start: Instant) -> Resolution {
        metrics::counter!(telemetry::RESOLUTIONS_TOTAL, "layer" => layer.as_str()).increment(1);
        info!(
            source = %layer,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "resolved"
        );
        Resolution::found(url, layer, start.elapsed())
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn directory(&self) -> Option<&Arc<InstanceDirectory>> {
        self.directory.as_ref()
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn stats(&self) -> ResolverStats {
        self.stats.snapshot()
    }

    pub fn rate_limits(&self) -> BTreeMap<String, DomainStats> {
        self.limiter.stats()
    }

    /// Health reported by each layer, in cascade order.
    pub fn provider_health(&self) -> Vec<ProviderHealth> {
        vec![
            self.primary.health(),
            self.federation.health(),
            self.fallback.health(),
        ]
    }

    /// Every stats surface at once.
    pub fn report(&self) -> StatsReport {
        StatsReport {
            resolver: self.stats(),
            cache: self.cache.stats(),
            rate_limits: self.rate_limits(),
            discovery: self.directory.as_ref().map(|d| d.stats()),
            providers: self.provider_health(),
        }
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("primary", &self.primary.name())
            .field("federation", &self.federation.name())
            .field("fallback", &self.fallback.name())
            .field("config", &self.config)
            .finish()
    }
}
