//! Federation layer: race mirror instances and alternative sources.
//!
//! One attempt is launched per healthy candidate (up to
//! `candidates_per_family` per mirror family) plus one per configured
//! alternative, all raced through [`race`](super::race::race). Attempts
//! record their own health and rate-limit outcomes, so stragglers cut off
//! by the race leave no partial bookkeeping behind.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use reqwest::Client;
use tracing::{debug, instrument};

use super::alternative::AlternativeSpec;
use super::health::InstanceHealthTracker;
use super::http;
use super::mirrors::MirrorProtocol;
use super::race::{RaceConfig, race};
use super::rate_limit::RateLimiter;
use super::traits::{FamilyHealth, OutcomeCounters, ProviderHealth, StreamProvider};
use crate::directory::InstanceDirectory;
use crate::types::ResolveRequest;
use crate::{Result, telemetry};

/// Configuration for the federation layer.
#[derive(Debug, Clone)]
pub struct FederationConfig {
    /// Instances raced per mirror family. Default: 3.
    pub candidates_per_family: usize,
    pub race: RaceConfig,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            candidates_per_family: 3,
            race: RaceConfig::default(),
        }
    }
}

impl FederationConfig {
    pub fn window(mut self, d: Duration) -> Self {
        self.race.window = d;
        self
    }

    pub fn grace(mut self, d: Duration) -> Self {
        self.race.grace = d;
        self
    }
}

struct Mirror {
    protocol: MirrorProtocol,
    health: Arc<InstanceHealthTracker>,
}

/// The federation cascade layer.
pub struct FederationProvider {
    http: Client,
    directory: Arc<InstanceDirectory>,
    limiter: Arc<RateLimiter>,
    mirrors: Vec<Mirror>,
    alternatives: Vec<Arc<AlternativeSpec>>,
    config: FederationConfig,
    outcomes: OutcomeCounters,
}

impl FederationProvider {
    pub fn new(
        http: Client,
        directory: Arc<InstanceDirectory>,
        limiter: Arc<RateLimiter>,
        config: FederationConfig,
    ) -> Self {
        Self {
            http,
            directory,
            limiter,
            mirrors: Vec::new(),
            alternatives: Vec::new(),
            config,
            outcomes: OutcomeCounters::default(),
        }
    }

    /// Add a mirror family with its health tracker.
    pub fn mirror(mut self, protocol: MirrorProtocol, health: Arc<InstanceHealthTracker>) -> Self {
        self.mirrors.push(Mirror { protocol, health });
        self
    }

    /// Add an alternative source to every race.
    pub fn alternative(mut self, spec: AlternativeSpec) -> Self {
        self.alternatives.push(Arc::new(spec));
        self
    }

    fn attempts(&self, request: &ResolveRequest) -> Vec<BoxFuture<'static, Result<String>>> {
        let mut attempts = Vec::new();
        let generation = self.directory.generation();

        for mirror in &self.mirrors {
            let key = mirror.protocol.name();
            mirror.health.sync_generation(generation);
            let candidates = mirror.health.rank(&self.directory.candidates_where(
                mirror.protocol.family(),
                self.config.candidates_per_family,
                |url| !mirror.health.is_excluded(url),
            ));
            for instance in candidates {
                if !self.limiter.can_request(key) {
                    debug!(family = key, "mirror family throttled");
                    break;
                }
                self.limiter.record_request(key);
                attempts.push(
                    mirror_attempt(
                        self.http.clone(),
                        mirror.protocol,
                        instance,
                        request.id.clone(),
                        Arc::clone(&mirror.health),
                        Arc::clone(&self.limiter),
                    )
                    .boxed(),
                );
            }
        }

        for spec in &self.alternatives {
            if !self.limiter.can_request(&spec.name) {
                debug!(alternative = %spec.name, "alternative throttled");
                continue;
            }
            self.limiter.record_request(&spec.name);
            attempts.push(
                alternative_attempt(
                    self.http.clone(),
                    Arc::clone(spec),
                    request.clone(),
                    Arc::clone(&self.limiter),
                )
                .boxed(),
            );
        }

        attempts
    }
}

async fn mirror_attempt(
    client: Client,
    protocol: MirrorProtocol,
    instance: String,
    video_id: String,
    health: Arc<InstanceHealthTracker>,
    limiter: Arc<RateLimiter>,
) -> Result<String> {
    let key = protocol.name();
    let start = Instant::now();
    let result = http::send_json(client.get(protocol.endpoint(&instance, &video_id)))
        .await
        .and_then(|body| protocol.best_audio(body));
    match &result {
        Ok(_) => {
            health.record_success(&instance, start.elapsed());
            limiter.record_success(key);
            record_attempt(key, "ok");
        }
        Err(e) => {
            health.record_failure(&instance);
            if e.is_rate_limited() {
                limiter.record_failure(key, e);
            }
            record_attempt(key, "error");
            debug!(family = key, instance, error = %e, "mirror attempt failed");
        }
    }
    result
}

async fn alternative_attempt(
    client: Client,
    spec: Arc<AlternativeSpec>,
    request: ResolveRequest,
    limiter: Arc<RateLimiter>,
) -> Result<String> {
    let result = spec.fetch(&client, &request).await;
    match &result {
        Ok(_) => {
            limiter.record_success(&spec.name);
            record_attempt("alternative", "ok");
        }
        Err(e) => {
            if e.is_transient() {
                limiter.record_failure(&spec.name, e);
            }
            record_attempt("alternative", "error");
            debug!(alternative = %spec.name, error = %e, "alternative attempt failed");
        }
    }
    result
}

#[async_trait]
impl StreamProvider for FederationProvider {
    fn name(&self) -> &str {
        "federation"
    }

    #[instrument(name = "federation.resolve", skip_all, fields(id = %request.id))]
    async fn resolve(&self, request: &ResolveRequest) -> Option<String> {
        if !request.has_video_id() {
            debug!("not a video id, skipping");
            return None;
        }

        let attempts = self.attempts(request);
        if attempts.is_empty() {
            debug!("no federation candidates");
            self.outcomes.record(false);
            return None;
        }

        debug!(attempts = attempts.len(), "racing federation");
        let found = race(attempts, self.config.race).await;
        self.outcomes.record(found.is_some());
        found
    }

    fn health(&self) -> ProviderHealth {
        let families = self
            .mirrors
            .iter()
            .map(|m| FamilyHealth {
                family: m.health.family().to_string(),
                instances: m.health.stats(),
            })
            .collect();
        self.outcomes.snapshot(self.name(), families)
    }
}

fn record_attempt(provider: &'static str, status: &'static str) {
    metrics::counter!(
        telemetry::PROVIDER_ATTEMPTS_TOTAL,
        "provider" => provider,
        "status" => status
    )
    .increment(1);
}

impl std::fmt::Debug for FederationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationProvider")
            .field("mirrors", &self.mirrors.iter().map(|m| m.protocol).collect::<Vec<_>>())
            .field("alternatives", &self.alternatives.iter().map(|a| &a.name).collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}
