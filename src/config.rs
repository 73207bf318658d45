//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.bifrost/config.toml` (user)
//! 3. `/etc/bifrost/config.toml` (system)
//!
//! With no file at all, built-in defaults apply. An explicit path that does
//! not exist is an error. Every field is optional; anything left out keeps
//! the component default.
//!
//! ```toml
//! [cache]
//! dir = "/var/cache/bifrost"
//! url_ttl_secs = 21600
//!
//! [resolver]
//! primary_timeout_ms = 5000
//!
//! [rate_limits.domains]
//! piped = 20
//!
//! [[alternatives]]
//! name = "loader"
//! url = "https://loader.example/api?id={id}"
//! url_pointers = ["/url"]
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cache::CacheConfig;
use crate::directory::{DiscoveryConfig, Family};
use crate::providers::{
    AlternativeSpec, CobaltConfig, FallbackConfig, FederationConfig, HealthConfig,
    RateLimitConfig,
};
use crate::resolver::{BifrostBuilder, ResolverConfig};
use crate::{BifrostError, Result};

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub resolver: ResolverSection,
    #[serde(default)]
    pub rate_limits: RateLimitSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default)]
    pub fallback: FallbackSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub alternatives: Vec<AlternativeSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheSection {
    /// Snapshot directory (default: `~/.cache/bifrost`).
    pub dir: Option<PathBuf>,
    /// Set to `false` to keep the cache in memory only.
    pub persist: Option<bool>,
    pub url_ttl_secs: Option<u64>,
    pub metadata_ttl_secs: Option<u64>,
    /// Entry cap per namespace.
    pub max_entries: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResolverSection {
    pub primary_timeout_ms: Option<u64>,
    pub federation_timeout_ms: Option<u64>,
    /// Unbounded when absent.
    pub fallback_timeout_ms: Option<u64>,
    pub race_grace_ms: Option<u64>,
    pub latency_history: Option<usize>,
    /// Cobalt instances tried per resolution.
    pub primary_candidates: Option<usize>,
    /// Mirror instances raced per family.
    pub mirror_candidates: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RateLimitSection {
    pub default_per_minute: Option<u32>,
    /// Per-minute quota by domain pattern.
    #[serde(default)]
    pub domains: BTreeMap<String, u32>,
    pub max_backoff_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoverySection {
    pub refresh_interval_secs: Option<u64>,
    pub max_instances: Option<usize>,
    pub piped_list_url: Option<String>,
    pub invidious_list_url: Option<String>,
    pub piped_seeds: Option<Vec<String>>,
    pub invidious_seeds: Option<Vec<String>>,
    pub cobalt_seeds: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthSection {
    /// Consecutive failures before a cobalt instance is skipped (default: 3).
    pub primary_max_failures: Option<u32>,
    /// Consecutive failures before a mirror instance is skipped (default: 5).
    pub mirror_max_failures: Option<u32>,
    pub latency_alpha: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FallbackSection {
    pub binary: Option<PathBuf>,
    pub workers: Option<usize>,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpSection {
    /// Per-request upstream timeout (default: 5000).
    pub request_timeout_ms: Option<u64>,
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided; must exist)
    /// 2. `~/.bifrost/config.toml`
    /// 3. `/etc/bifrost/config.toml`
    /// 4. Built-in defaults
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| BifrostError::Configuration(format!("Failed to parse config: {e}")))
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            BifrostError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            BifrostError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(BifrostError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".bifrost").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        let system_config = PathBuf::from("/etc/bifrost/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    pub fn cache_config(&self) -> CacheConfig {
        let mut config = CacheConfig::default();
        if let Some(dir) = &self.cache.dir {
            config = config.dir(dir);
        }
        if self.cache.persist == Some(false) {
            config = config.in_memory();
        }
        if let Some(secs) = self.cache.url_ttl_secs {
            config = config.url_ttl(Duration::from_secs(secs));
        }
        if let Some(secs) = self.cache.metadata_ttl_secs {
            config = config.metadata_ttl(Duration::from_secs(secs));
        }
        if let Some(n) = self.cache.max_entries {
            config = config.max_entries(n);
        }
        config
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        let section = &self.resolver;
        let mut config = ResolverConfig::default();
        if let Some(ms) = section.primary_timeout_ms {
            config = config.primary_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = section.federation_timeout_ms {
            config = config.federation_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = section.fallback_timeout_ms {
            config = config.fallback_timeout(Duration::from_millis(ms));
        }
        if let Some(n) = section.latency_history {
            config = config.latency_history(n);
        }
        config
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        let section = &self.rate_limits;
        let mut config = RateLimitConfig::default();
        if let Some(n) = section.default_per_minute {
            config = config.default_per_minute(n);
        }
        for (pattern, per_minute) in &section.domains {
            config = config.domain(pattern.as_str(), *per_minute);
        }
        if let Some(secs) = section.max_backoff_secs {
            config = config.max_backoff(Duration::from_secs(secs));
        }
        config
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        let section = &self.discovery;
        let mut config = DiscoveryConfig::default();
        if let Some(secs) = section.refresh_interval_secs {
            config = config.refresh_interval(Duration::from_secs(secs));
        }
        if let Some(n) = section.max_instances {
            config = config.max_instances(n);
        }
        if let Some(url) = &section.piped_list_url {
            config.piped_list_url = url.clone();
        }
        if let Some(url) = &section.invidious_list_url {
            config.invidious_list_url = url.clone();
        }
        let seeds = [
            (Family::Piped, &section.piped_seeds),
            (Family::Invidious, &section.invidious_seeds),
            (Family::Cobalt, &section.cobalt_seeds),
        ];
        for (family, list) in seeds {
            if let Some(list) = list {
                config = config.seeds(family, list.clone());
            }
        }
        config
    }

    pub fn fallback_config(&self) -> FallbackConfig {
        let mut config = FallbackConfig::default();
        if let Some(binary) = &self.fallback.binary {
            config = config.binary(binary);
        }
        if let Some(n) = self.fallback.workers {
            config = config.workers(n);
        }
        config.extra_args = self.fallback.extra_args.clone();
        config
    }

    fn health_config(&self, max_failures: Option<u32>, default: u32) -> HealthConfig {
        let mut config = HealthConfig::new().max_consecutive_failures(max_failures.unwrap_or(default));
        if let Some(alpha) = self.health.latency_alpha {
            config = config.alpha(alpha);
        }
        config
    }

    /// A builder preloaded with everything this file sets.
    pub fn builder(&self) -> BifrostBuilder {
        let resolver = self.resolver_config();

        let mut cobalt = CobaltConfig {
            timeout: resolver.primary_timeout,
            ..CobaltConfig::default()
        };
        if let Some(n) = self.resolver.primary_candidates {
            cobalt.candidates = n;
        }

        let mut federation = FederationConfig::default().window(resolver.federation_timeout);
        if let Some(ms) = self.resolver.race_grace_ms {
            federation = federation.grace(Duration::from_millis(ms));
        }
        if let Some(n) = self.resolver.mirror_candidates {
            federation.candidates_per_family = n;
        }

        let mut builder = BifrostBuilder::new()
            .cache_config(self.cache_config())
            .rate_limits(self.rate_limit_config())
            .discovery(self.discovery_config())
            .cobalt(cobalt)
            .federation_config(federation)
            .fallback_config(self.fallback_config())
            .primary_health(self.health_config(self.health.primary_max_failures, 3))
            .mirror_health(self.health_config(self.health.mirror_max_failures, 5))
            .resolver_config(resolver);
        if let Some(ms) = self.http.request_timeout_ms {
            builder = builder.request_timeout(Duration::from_millis(ms));
        }
        for spec in &self.alternatives {
            builder = builder.alternative(spec.clone());
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_keeps_defaults() {
        let config = Config::parse("").unwrap();
        let resolver = config.resolver_config();
        assert_eq!(resolver.primary_timeout, Duration::from_secs(5));
        assert_eq!(resolver.federation_timeout, Duration::from_secs(4));
        assert!(resolver.fallback_timeout.is_none());
        assert_eq!(config.cache_config().url_ttl, Duration::from_secs(6 * 3600));
    }

    #[test]
    fn persist_false_disables_snapshots() {
        let config = Config::parse("[cache]\npersist = false\n").unwrap();
        assert!(config.cache_config().dir.is_none());
    }

    #[test]
    fn rate_limit_domains_override() {
        let config = Config::parse(
            r#"
            [rate_limits]
            default_per_minute = 12
            [rate_limits.domains]
            piped = 4
            loader = 2
            "#,
        )
        .unwrap();
        let limits = config.rate_limit_config();
        assert_eq!(limits.limit_for("piped"), 4);
        assert_eq!(limits.limit_for("loader"), 2);
        assert_eq!(limits.limit_for("default"), 12);
    }

    #[test]
    fn discovery_seeds_override() {
        let config = Config::parse(
            r#"
            [discovery]
            refresh_interval_secs = 60
            cobalt_seeds = ["https://cobalt.example"]
            "#,
        )
        .unwrap();
        let discovery = config.discovery_config();
        assert_eq!(discovery.refresh_interval, Duration::from_secs(60));
        assert_eq!(discovery.cobalt_seeds, ["https://cobalt.example"]);
        assert_eq!(discovery.piped_seeds.len(), 5);
    }

    #[test]
    fn invalid_toml_is_configuration_error() {
        assert!(matches!(
            Config::parse("[cache\n"),
            Err(BifrostError::Configuration(_))
        ));
    }

    #[test]
    fn missing_explicit_path_is_error() {
        let err = Config::load(Some(Path::new("/nonexistent/bifrost/config.toml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
