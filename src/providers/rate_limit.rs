//! Per-domain rate limiting and backoff.
//!
//! Every provider adapter shares one [`RateLimiter`]. Each domain key has a
//! sliding window of request timestamps (quota per minute) and an optional
//! backoff window opened by errors:
//!
//! - the first error opens a 5s backoff (30s for an explicit rate-limit
//!   signal);
//! - each further error while a backoff exists doubles it, capped at 300s;
//! - the next success clears it.
//!
//! A `Retry-After` delay sent with a 429 replaces the schedule for that
//! error (still capped at 300s).
//!
//! Domain keys are derived by case-insensitive substring matching against
//! the configured domains, falling back to a shared `"default"` bucket.
//!
//! All timestamps are [`tokio::time::Instant`], so tests can drive the
//! limiter with a paused clock.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{BifrostError, telemetry};

/// Key used for targets that match no configured domain.
pub const DEFAULT_DOMAIN: &str = "default";

/// Per-minute quota for one domain pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainLimit {
    /// Substring matched (case-insensitively) against the target.
    pub pattern: String,
    pub per_minute: u32,
}

impl DomainLimit {
    pub fn new(pattern: impl Into<String>, per_minute: u32) -> Self {
        Self {
            pattern: pattern.into().to_lowercase(),
            per_minute,
        }
    }
}

/// Configuration for the rate limiter.
///
/// ```rust
/// # use bifrost::RateLimitConfig;
/// # use std::time::Duration;
/// let config = RateLimitConfig::new()
///     .domain("savetube", 5)
///     .max_backoff(Duration::from_secs(120));
/// assert_eq!(config.limit_for("savetube"), 5);
/// ```
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Quota for the `"default"` bucket. Default: 30/min.
    pub default_per_minute: u32,
    /// Known domains, matched in order. First match wins.
    pub domains: Vec<DomainLimit>,
    /// Sliding window length. Default: 60s.
    pub window: Duration,
    /// Backoff opened by the first ordinary error. Default: 5s.
    pub initial_backoff: Duration,
    /// Backoff opened by the first explicit rate-limit signal. Default: 30s.
    pub rate_limited_backoff: Duration,
    /// Cap on backoff growth. Default: 300s.
    pub max_backoff: Duration,
    /// Longest [`RateLimiter::wait_if_needed`] will sleep for a backoff.
    /// Default: 5s.
    pub max_wait: Duration,
    /// Pause before re-checking an exhausted quota. Default: 1s.
    pub quota_retry_delay: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_per_minute: 30,
            domains: vec![
                DomainLimit::new("youtube.com", 10),
                DomainLimit::new("googlevideo.com", 20),
                DomainLimit::new("piped", 20),
                DomainLimit::new("invidious", 20),
                DomainLimit::new("cobalt", 30),
            ],
            window: Duration::from_secs(60),
            initial_backoff: Duration::from_secs(5),
            rate_limited_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(300),
            max_wait: Duration::from_secs(5),
            quota_retry_delay: Duration::from_secs(1),
        }
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or add) the per-minute quota for a domain pattern.
    pub fn domain(mut self, pattern: impl Into<String>, per_minute: u32) -> Self {
        let limit = DomainLimit::new(pattern, per_minute);
        match self.domains.iter_mut().find(|d| d.pattern == limit.pattern) {
            Some(existing) => existing.per_minute = per_minute,
            None => self.domains.push(limit),
        }
        self
    }

    pub fn default_per_minute(mut self, n: u32) -> Self {
        self.default_per_minute = n;
        self
    }

    pub fn initial_backoff(mut self, d: Duration) -> Self {
        self.initial_backoff = d;
        self
    }

    pub fn rate_limited_backoff(mut self, d: Duration) -> Self {
        self.rate_limited_backoff = d;
        self
    }

    pub fn max_backoff(mut self, d: Duration) -> Self {
        self.max_backoff = d;
        self
    }

    pub fn max_wait(mut self, d: Duration) -> Self {
        self.max_wait = d;
        self
    }

    /// Map a URL or provider name onto a domain key.
    pub fn domain_key(&self, target: &str) -> String {
        let lower = target.to_lowercase();
        self.domains
            .iter()
            .find(|d| lower.contains(&d.pattern))
            .map(|d| d.pattern.clone())
            .unwrap_or_else(|| DEFAULT_DOMAIN.to_string())
    }

    /// Per-minute quota for a domain key.
    pub fn limit_for(&self, key: &str) -> u32 {
        self.domains
            .iter()
            .find(|d| d.pattern == key)
            .map(|d| d.per_minute)
            .unwrap_or(self.default_per_minute)
    }

    /// Backoff to apply after an error, given the backoff currently in force.
    ///
    /// Doubles an existing backoff (capped at `max_backoff`); otherwise opens
    /// the initial window for the kind of error.
    pub fn next_backoff(&self, current: Option<Duration>, rate_limited: bool) -> Duration {
        match current {
            Some(d) => d.saturating_mul(2).min(self.max_backoff),
            None if rate_limited => self.rate_limited_backoff.min(self.max_backoff),
            None => self.initial_backoff.min(self.max_backoff),
        }
    }

    /// Backoff after an error, respecting a server `Retry-After` hint.
    ///
    /// A hint takes precedence over the doubling schedule and is capped at
    /// `max_backoff`.
    pub fn effective_backoff(
        &self,
        current: Option<Duration>,
        rate_limited: bool,
        retry_after: Option<Duration>,
    ) -> Duration {
        match retry_after {
            Some(hint) => hint.min(self.max_backoff),
            None => self.next_backoff(current, rate_limited),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Backoff {
    until: Instant,
    length: Duration,
}

/// Sliding window plus optional backoff for one domain key.
#[derive(Debug, Default)]
struct RateWindow {
    requests: VecDeque<Instant>,
    backoff: Option<Backoff>,
}

impl RateWindow {
    fn trim(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.requests.front() {
            if now.duration_since(oldest) >= window {
                self.requests.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Read-only view of one domain's limiter state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainStats {
    pub requests_last_minute: usize,
    pub limit: u32,
    /// Quota usage in percent.
    pub usage: f64,
    /// Remaining backoff in seconds, if a backoff is in force.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_remaining_secs: Option<f64>,
}

/// Shared per-domain rate limiter and circuit breaker.
///
/// Locks guard only the in-memory windows and are never held across an
/// await point.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Domain key for a URL or provider name.
    pub fn domain_key(&self, target: &str) -> String {
        self.config.domain_key(target)
    }

    /// Whether a request to `target` is permitted right now.
    ///
    /// False while inside a backoff window or when the per-minute quota is
    /// used up. An elapsed backoff is dropped here.
    pub fn can_request(&self, target: &str) -> bool {
        let key = self.domain_key(target);
        let now = Instant::now();
        let mut windows = self.lock();
        let window = windows.entry(key.clone()).or_default();

        if let Some(backoff) = window.backoff {
            if now < backoff.until {
                return false;
            }
            window.backoff = None;
        }

        window.trim(now, self.config.window);
        window.requests.len() < self.config.limit_for(&key) as usize
    }

    /// Count a request against `target`'s quota.
    pub fn record_request(&self, target: &str) {
        let key = self.domain_key(target);
        self.lock()
            .entry(key)
            .or_default()
            .requests
            .push_back(Instant::now());
    }

    /// Open or extend the backoff window for `target`.
    ///
    /// Returns the new backoff length.
    pub fn record_error(&self, target: &str, rate_limited: bool) -> Duration {
        self.open_backoff(target, rate_limited, None)
    }

    /// Open or extend the backoff window for `target` after `error`.
    ///
    /// A `RateLimited` error uses its `Retry-After` delay when the server
    /// sent one; anything else counts as an ordinary error.
    pub fn record_failure(&self, target: &str, error: &BifrostError) -> Duration {
        self.open_backoff(target, error.is_rate_limited(), error.retry_after())
    }

    fn open_backoff(
        &self,
        target: &str,
        rate_limited: bool,
        retry_after: Option<Duration>,
    ) -> Duration {
        let key = self.domain_key(target);
        let now = Instant::now();
        let length = {
            let mut windows = self.lock();
            let window = windows.entry(key.clone()).or_default();
            let length = self.config.effective_backoff(
                window.backoff.map(|b| b.length),
                rate_limited,
                retry_after,
            );
            window.backoff = Some(Backoff {
                until: now + length,
                length,
            });
            length
        };
        metrics::counter!(telemetry::BACKOFFS_TOTAL, "domain" => key.clone()).increment(1);
        warn!(
            domain = %key,
            rate_limited,
            backoff_secs = length.as_secs_f64(),
            "backing off"
        );
        length
    }

    /// Clear any backoff for `target`.
    pub fn record_success(&self, target: &str) {
        let key = self.domain_key(target);
        if let Some(window) = self.lock().get_mut(&key)
            && window.backoff.take().is_some()
        {
            debug!(domain = %key, "backoff cleared");
        }
    }

    /// Remaining backoff for `target`, if one is in force.
    pub fn backoff_remaining(&self, target: &str) -> Option<Duration> {
        let key = self.domain_key(target);
        let now = Instant::now();
        self.lock()
            .get(&key)
            .and_then(|w| w.backoff)
            .map(|b| b.until.saturating_duration_since(now))
            .filter(|d| !d.is_zero())
    }

    /// Wait briefly if `target` is throttled, then report whether to proceed.
    ///
    /// Returns `false` immediately when the remaining backoff exceeds
    /// `max_wait` (the caller should skip this provider this round). Sleeps
    /// out a shorter backoff. If the quota is exhausted, pauses once for
    /// `quota_retry_delay` and re-checks.
    pub async fn wait_if_needed(&self, target: &str) -> bool {
        if let Some(remaining) = self.backoff_remaining(target) {
            if remaining > self.config.max_wait {
                debug!(target, remaining_secs = remaining.as_secs_f64(), "skipping, backoff too long");
                return false;
            }
            tokio::time::sleep(remaining).await;
        }

        if !self.can_request(target) {
            tokio::time::sleep(self.config.quota_retry_delay).await;
            if !self.can_request(target) {
                debug!(target, "skipping, quota exhausted");
                return false;
            }
        }
        true
    }

    /// Snapshot of every domain seen so far.
    pub fn stats(&self) -> BTreeMap<String, DomainStats> {
        let now = Instant::now();
        let mut windows = self.lock();
        windows
            .iter_mut()
            .map(|(key, window)| {
                window.trim(now, self.config.window);
                let limit = self.config.limit_for(key);
                let requests = window.requests.len();
                let backoff_remaining_secs = window
                    .backoff
                    .map(|b| b.until.saturating_duration_since(now))
                    .filter(|d| !d.is_zero())
                    .map(|d| d.as_secs_f64());
                let stats = DomainStats {
                    requests_last_minute: requests,
                    limit,
                    usage: if limit > 0 {
                        requests as f64 / limit as f64 * 100.0
                    } else {
                        100.0
                    },
                    backoff_remaining_secs,
                };
                (key.clone(), stats)
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RateWindow>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
