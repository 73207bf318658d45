//! Builder for assembling a [`Resolver`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::{Resolver, ResolverConfig};
use crate::cache::{CacheConfig, Clock, ResultCache};
use crate::directory::{DiscoveryConfig, Family, InstanceDirectory};
use crate::providers::{
    AlternativeSpec, BlockingExtractor, CobaltConfig, CobaltProvider, FallbackConfig,
    FederationConfig, FederationProvider, HealthConfig, InstanceHealthTracker, MirrorProtocol,
    RateLimitConfig, RateLimiter, StreamProvider, UniversalExtractor, http,
};
use crate::{BifrostError, Result};

/// Main entry point for creating resolvers.
pub struct Bifrost;

impl Bifrost {
    /// Create a new builder for configuring the resolver.
    pub fn builder() -> BifrostBuilder {
        BifrostBuilder::new()
    }
}

/// Builder for configuring resolvers.
///
/// Every component is built once here and injected into the resolver; each
/// cascade layer can be swapped for any [`StreamProvider`].
///
/// ```rust,no_run
/// use bifrost::Bifrost;
///
/// # async fn run() -> bifrost::Result<()> {
/// let resolver = Bifrost::builder().in_memory_cache().build()?;
/// let resolution = resolver.resolve("dQw4w9WgXcQ", None, None).await;
/// println!("{:?} from {}", resolution.url(), resolution.source());
/// # Ok(())
/// # }
/// ```
pub struct BifrostBuilder {
    cache: CacheConfig,
    clock: Option<Arc<dyn Clock>>,
    rate_limits: RateLimitConfig,
    discovery: DiscoveryConfig,
    resolver: ResolverConfig,
    cobalt: CobaltConfig,
    federation: FederationConfig,
    fallback: FallbackConfig,
    primary_health: HealthConfig,
    mirror_health: HealthConfig,
    alternatives: Vec<AlternativeSpec>,
    request_timeout: Duration,
    primary: Option<Arc<dyn StreamProvider>>,
    federation_override: Option<Arc<dyn StreamProvider>>,
    fallback_override: Option<Arc<dyn StreamProvider>>,
    extractor: Option<Arc<dyn BlockingExtractor>>,
}

impl BifrostBuilder {
    pub fn new() -> Self {
        Self {
            cache: CacheConfig::default(),
            clock: None,
            rate_limits: RateLimitConfig::default(),
            discovery: DiscoveryConfig::default(),
            resolver: ResolverConfig::default(),
            cobalt: CobaltConfig::default(),
            federation: FederationConfig::default(),
            fallback: FallbackConfig::default(),
            primary_health: HealthConfig::new().max_consecutive_failures(3),
            mirror_health: HealthConfig::new().max_consecutive_failures(5),
            alternatives: Vec::new(),
            request_timeout: Duration::from_secs(5),
            primary: None,
            federation_override: None,
            fallback_override: None,
            extractor: None,
        }
    }

    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Persist cache snapshots under `dir`.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache = self.cache.dir(dir);
        self
    }

    /// Keep the cache in memory only.
    pub fn in_memory_cache(mut self) -> Self {
        self.cache = self.cache.in_memory();
        self
    }

    /// Clock used for cache expiry (tests inject a manual clock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn rate_limits(mut self, config: RateLimitConfig) -> Self {
        self.rate_limits = config;
        self
    }

    pub fn discovery(mut self, config: DiscoveryConfig) -> Self {
        self.discovery = config;
        self
    }

    pub fn resolver_config(mut self, config: ResolverConfig) -> Self {
        self.resolver = config;
        self
    }

    pub fn cobalt(mut self, config: CobaltConfig) -> Self {
        self.cobalt = config;
        self
    }

    pub fn federation_config(mut self, config: FederationConfig) -> Self {
        self.federation = config;
        self
    }

    pub fn fallback_config(mut self, config: FallbackConfig) -> Self {
        self.fallback = config;
        self
    }

    /// Health tuning for primary (cobalt) instances. Default K = 3.
    pub fn primary_health(mut self, config: HealthConfig) -> Self {
        self.primary_health = config;
        self
    }

    /// Health tuning for mirror instances. Default K = 5.
    pub fn mirror_health(mut self, config: HealthConfig) -> Self {
        self.mirror_health = config;
        self
    }

    /// Race an alternative source inside the federation layer.
    pub fn alternative(mut self, spec: AlternativeSpec) -> Self {
        self.alternatives.push(spec);
        self
    }

    /// Per-request HTTP timeout for upstream calls (default: 5s).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Replace the primary layer.
    pub fn primary(mut self, provider: Arc<dyn StreamProvider>) -> Self {
        self.primary = Some(provider);
        self
    }

    /// Replace the federation layer.
    pub fn federation(mut self, provider: Arc<dyn StreamProvider>) -> Self {
        self.federation_override = Some(provider);
        self
    }

    /// Replace the fallback layer.
    pub fn fallback(mut self, provider: Arc<dyn StreamProvider>) -> Self {
        self.fallback_override = Some(provider);
        self
    }

    /// Keep the built-in fallback layer but swap its extractor backend.
    pub fn extractor(mut self, extractor: Arc<dyn BlockingExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.resolver.primary_timeout.is_zero() || self.resolver.federation_timeout.is_zero() {
            return Err(BifrostError::Configuration(
                "layer timeouts must be non-zero".into(),
            ));
        }
        if self.fallback.workers == 0 {
            return Err(BifrostError::Configuration(
                "fallback needs at least one worker".into(),
            ));
        }
        for spec in &self.alternatives {
            spec.validate()?;
        }
        Ok(())
    }

    /// Build the resolver.
    pub fn build(self) -> Result<Resolver> {
        self.validate()?;

        let cache = Arc::new(match &self.clock {
            Some(clock) => ResultCache::with_clock(&self.cache, Arc::clone(clock)),
            None => ResultCache::new(&self.cache),
        });

        // Alternatives get their own rate-limit bucket unless one is configured.
        let mut rate_limits = self.rate_limits;
        for spec in &self.alternatives {
            let key = spec.name.to_lowercase();
            if !rate_limits.domains.iter().any(|d| d.pattern == key) {
                let per_minute = rate_limits.default_per_minute;
                rate_limits = rate_limits.domain(key, per_minute);
            }
        }
        let limiter = Arc::new(RateLimiter::new(rate_limits));

        let client = http::build_client(self.request_timeout)?;
        let directory = Arc::new(InstanceDirectory::with_client(self.discovery, client.clone()));
        let uses_directory = self.primary.is_none() || self.federation_override.is_none();

        let primary: Arc<dyn StreamProvider> = match self.primary {
            Some(provider) => provider,
            None => Arc::new(CobaltProvider::new(
                client.clone(),
                Arc::clone(&directory),
                Arc::new(InstanceHealthTracker::new(
                    Family::Cobalt.as_str(),
                    self.primary_health,
                )),
                Arc::clone(&limiter),
                self.cobalt,
            )),
        };

        let federation: Arc<dyn StreamProvider> = match self.federation_override {
            Some(provider) => provider,
            None => {
                let mut federation = FederationProvider::new(
                    client,
                    Arc::clone(&directory),
                    Arc::clone(&limiter),
                    self.federation,
                );
                for protocol in MirrorProtocol::ALL {
                    let tracker =
                        InstanceHealthTracker::new(protocol.name(), self.mirror_health.clone());
                    federation = federation.mirror(protocol, Arc::new(tracker));
                }
                for spec in self.alternatives {
                    federation = federation.alternative(spec);
                }
                Arc::new(federation)
            }
        };

        let fallback: Arc<dyn StreamProvider> = match (self.fallback_override, self.extractor) {
            (Some(provider), _) => provider,
            (None, Some(extractor)) => {
                Arc::new(UniversalExtractor::new(extractor, self.fallback.workers))
            }
            (None, None) => Arc::new(UniversalExtractor::from_config(&self.fallback)),
        };

        Ok(Resolver::new(
            cache,
            [primary, federation, fallback],
            limiter,
            uses_directory.then_some(directory),
            self.resolver,
        ))
    }
}

impl Default for BifrostBuilder {
    fn default() -> Self {
        Self::new()
    }
}
