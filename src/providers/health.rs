//! Per-instance health tracking and ranking.
//!
//! Every adapter that fans out over a list of instances owns one
//! [`InstanceHealthTracker`]. It records success/failure counts and an EWMA
//! of observed latency per instance URL, and uses them to:
//!
//! - exclude instances with `max_consecutive_failures` failures in a row;
//! - order the rest by score, best first.
//!
//! # Scoring
//!
//! `score = success_rate * (1 / max(avg_latency_secs, 0.1))`, or just
//! `success_rate` before any latency has been observed. An instance that
//! has never been tried scores a neutral 0.5.
//!
//! Exclusion is lifted whenever the instance directory publishes a new
//! generation (see [`InstanceHealthTracker::sync_generation`]), so a
//! refreshed list gives every instance another chance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

/// Tuning for an [`InstanceHealthTracker`].
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Consecutive failures after which an instance is excluded.
    pub max_consecutive_failures: u32,
    /// EWMA smoothing factor for latency (0.0 to 1.0). Default: 0.2.
    pub alpha: f64,
    /// Score for an instance with no recorded requests. Default: 0.5.
    pub unknown_score: f64,
    /// Latency floor used in scoring. Default: 100ms.
    pub min_latency: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            alpha: 0.2,
            unknown_score: 0.5,
            min_latency: Duration::from_millis(100),
        }
    }
}

impl HealthConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_consecutive_failures(mut self, k: u32) -> Self {
        self.max_consecutive_failures = k;
        self
    }

    pub fn alpha(mut self, alpha: f64) -> Self {
        debug_assert!((0.0..=1.0).contains(&alpha), "alpha must be in [0.0, 1.0]");
        self.alpha = alpha;
        self
    }
}

#[derive(Debug, Default, Clone)]
struct InstanceHealth {
    success_count: u64,
    fail_count: u64,
    consecutive_fails: u32,
    /// EWMA of successful request latency in seconds.
    avg_latency_secs: Option<f64>,
    last_used: Option<Instant>,
}

impl InstanceHealth {
    fn total(&self) -> u64 {
        self.success_count + self.fail_count
    }

    fn success_rate(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.success_count as f64 / total as f64),
        }
    }

    fn score(&self, config: &HealthConfig) -> f64 {
        let Some(rate) = self.success_rate() else {
            return config.unknown_score;
        };
        match self.avg_latency_secs {
            Some(avg) if avg > 0.0 => rate / avg.max(config.min_latency.as_secs_f64()),
            _ => rate,
        }
    }

    fn observe_latency(&mut self, latency: Duration, alpha: f64) {
        let secs = latency.as_secs_f64();
        self.avg_latency_secs = Some(match self.avg_latency_secs {
            None => secs,
            // new = alpha * observation + (1 - alpha) * old
            Some(old) => alpha * secs + (1.0 - alpha) * old,
        });
    }
}

/// Read-only view of one instance's health.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceStats {
    pub url: String,
    pub success_count: u64,
    pub fail_count: u64,
    pub consecutive_fails: u32,
    pub total_requests: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_secs_ago: Option<f64>,
    pub score: f64,
    pub excluded: bool,
}

/// Health tracker for one family of instances.
pub struct InstanceHealthTracker {
    family: String,
    config: HealthConfig,
    instances: Mutex<HashMap<String, InstanceHealth>>,
    /// Last directory generation seen; 0 before the first sync.
    generation: AtomicU64,
}

impl InstanceHealthTracker {
    pub fn new(family: impl Into<String>, config: HealthConfig) -> Self {
        Self {
            family: family.into(),
            config,
            instances: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Record a successful request and its latency.
    pub fn record_success(&self, url: &str, latency: Duration) {
        let mut instances = self.lock();
        let health = instances.entry(url.to_string()).or_default();
        health.success_count += 1;
        health.consecutive_fails = 0;
        health.observe_latency(latency, self.config.alpha);
        health.last_used = Some(Instant::now());
    }

    /// Record a failed request.
    pub fn record_failure(&self, url: &str) {
        let mut instances = self.lock();
        let health = instances.entry(url.to_string()).or_default();
        health.fail_count += 1;
        health.consecutive_fails += 1;
        health.last_used = Some(Instant::now());
        if health.consecutive_fails == self.config.max_consecutive_failures {
            debug!(family = %self.family, url, "instance excluded after consecutive failures");
        }
    }

    /// Whether `url` is currently excluded from selection.
    pub fn is_excluded(&self, url: &str) -> bool {
        self.lock()
            .get(url)
            .is_some_and(|h| h.consecutive_fails >= self.config.max_consecutive_failures)
    }

    /// Current score for `url`.
    pub fn score(&self, url: &str) -> f64 {
        self.lock()
            .get(url)
            .map(|h| h.score(&self.config))
            .unwrap_or(self.config.unknown_score)
    }

    /// Drop excluded candidates and order the rest best-first.
    ///
    /// The sort is stable, so candidates with equal scores keep the order
    /// they were given in.
    pub fn rank(&self, candidates: &[String]) -> Vec<String> {
        let instances = self.lock();
        let mut scored: Vec<(f64, &String)> = candidates
            .iter()
            .filter_map(|url| match instances.get(url) {
                Some(h) if h.consecutive_fails >= self.config.max_consecutive_failures => None,
                Some(h) => Some((h.score(&self.config), url)),
                None => Some((self.config.unknown_score, url)),
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.into_iter().map(|(_, url)| url.clone()).collect()
    }

    /// Lift exclusions if the directory has published a new generation.
    pub fn sync_generation(&self, generation: u64) {
        let previous = self.generation.swap(generation, Ordering::AcqRel);
        if previous == generation {
            return;
        }
        let mut instances = self.lock();
        for health in instances.values_mut() {
            health.consecutive_fails = 0;
        }
        debug!(family = %self.family, generation, "instance list refreshed, exclusions lifted");
    }

    /// Snapshot of every instance seen so far, sorted by URL.
    pub fn stats(&self) -> Vec<InstanceStats> {
        let instances = self.lock();
        let mut stats: Vec<InstanceStats> = instances
            .iter()
            .map(|(url, h)| InstanceStats {
                url: url.clone(),
                success_count: h.success_count,
                fail_count: h.fail_count,
                consecutive_fails: h.consecutive_fails,
                total_requests: h.total(),
                success_rate: h.success_rate(),
                avg_latency_ms: h.avg_latency_secs.map(|s| s * 1000.0),
                last_used_secs_ago: h.last_used.map(|t| t.elapsed().as_secs_f64()),
                score: h.score(&self.config),
                excluded: h.consecutive_fails >= self.config.max_consecutive_failures,
            })
            .collect();
        stats.sort_by(|a, b| a.url.cmp(&b.url));
        stats
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, InstanceHealth>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for InstanceHealthTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceHealthTracker")
            .field("family", &self.family)
            .field("instances", &self.lock().len())
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish()
    }
}
