//! Primary layer: cobalt-style extraction API.
//!
//! Candidates come from the directory's cobalt family, ranked by the
//! health tracker, and are tried one after another. Each instance gets a
//! `POST {instance}/api/json`; the response is a tagged union on `status`
//! that [`CobaltResponse::into_url`] normalizes to a single URL.
//!
//! A 429 from any instance backs off the whole family and ends the attempt.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use super::health::InstanceHealthTracker;
use super::http;
use super::rate_limit::RateLimiter;
use super::traits::{FamilyHealth, OutcomeCounters, ProviderHealth, StreamProvider};
use crate::directory::{Family, InstanceDirectory};
use crate::types::ResolveRequest;
use crate::{BifrostError, Result, telemetry};

/// Rate-limit key shared by every cobalt instance.
const RATE_KEY: &str = "cobalt";

/// Configuration for the primary adapter.
#[derive(Debug, Clone)]
pub struct CobaltConfig {
    /// Instances tried per resolution. Default: 3.
    pub candidates: usize,
    /// Bound on the whole adapter call. Default: 5s.
    pub timeout: Duration,
}

impl Default for CobaltConfig {
    fn default() -> Self {
        Self {
            candidates: 3,
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CobaltRequest<'a> {
    url: &'a str,
    is_audio_only: bool,
    a_format: &'a str,
    filename_pattern: &'a str,
    download_mode: &'a str,
}

impl<'a> CobaltRequest<'a> {
    fn audio(url: &'a str) -> Self {
        Self {
            url,
            is_audio_only: true,
            a_format: "best",
            filename_pattern: "basic",
            download_mode: "audio",
        }
    }
}

/// One option of a `picker` response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PickerItem {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Response of `POST /api/json`, tagged by `status`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum CobaltResponse {
    Stream { url: String },
    Redirect { url: String },
    Tunnel { url: String },
    Picker {
        #[serde(default)]
        picker: Vec<PickerItem>,
    },
    Error {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        error: Option<Value>,
    },
    RateLimit,
}

impl CobaltResponse {
    /// Normalize to a playable URL.
    ///
    /// A picker yields its first audio item, else its first item.
    pub fn into_url(self) -> Result<String> {
        let url = match self {
            CobaltResponse::Stream { url }
            | CobaltResponse::Redirect { url }
            | CobaltResponse::Tunnel { url } => Some(url),
            CobaltResponse::Picker { picker } => {
                let audio = picker
                    .iter()
                    .position(|item| item.kind.as_deref() == Some("audio"))
                    .unwrap_or(0);
                picker.into_iter().nth(audio).and_then(|item| item.url)
            }
            CobaltResponse::Error { text, error } => {
                let reason = text
                    .or_else(|| {
                        error
                            .as_ref()
                            .and_then(|e| e.get("code"))
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    })
                    .unwrap_or_else(|| "unknown error".into());
                return Err(BifrostError::NotFound(reason));
            }
            CobaltResponse::RateLimit => {
                return Err(BifrostError::RateLimited { retry_after: None });
            }
        };
        url.filter(|u| !u.is_empty())
            .ok_or_else(|| BifrostError::Malformed("cobalt response without url".into()))
    }
}

/// Decode a cobalt response body.
///
/// An unrecognised `status` still yields a top-level `url` if there is one.
pub fn parse_response(body: Value) -> Result<String> {
    match serde_json::from_value::<CobaltResponse>(body.clone()) {
        Ok(response) => response.into_url(),
        Err(e) => body
            .get("url")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .ok_or_else(|| BifrostError::Malformed(format!("unrecognised cobalt response: {e}"))),
    }
}

/// The primary cascade layer.
pub struct CobaltProvider {
    http: Client,
    directory: Arc<InstanceDirectory>,
    health: Arc<InstanceHealthTracker>,
    limiter: Arc<RateLimiter>,
    config: CobaltConfig,
    outcomes: OutcomeCounters,
}

impl CobaltProvider {
    pub fn new(
        http: Client,
        directory: Arc<InstanceDirectory>,
        health: Arc<InstanceHealthTracker>,
        limiter: Arc<RateLimiter>,
        config: CobaltConfig,
    ) -> Self {
        Self {
            http,
            directory,
            health,
            limiter,
            config,
            outcomes: OutcomeCounters::default(),
        }
    }

    async fn try_instance(&self, instance: &str, video_url: &str) -> Result<String> {
        let request = self
            .http
            .post(http::join_url(instance, "/api/json"))
            .json(&CobaltRequest::audio(video_url));
        let body = http::send_json(request).await?;
        parse_response(body)
    }

    async fn try_candidates(&self, candidates: &[String], video_url: &str) -> Option<String> {
        let mut last_error = None;
        for instance in candidates {
            self.limiter.record_request(RATE_KEY);
            let start = Instant::now();
            match self.try_instance(instance, video_url).await {
                Ok(url) => {
                    self.health.record_success(instance, start.elapsed());
                    self.limiter.record_success(RATE_KEY);
                    record_attempt("ok");
                    debug!(instance, elapsed_ms = start.elapsed().as_millis() as u64, "cobalt resolved");
                    return Some(url);
                }
                Err(e) => {
                    self.health.record_failure(instance);
                    record_attempt("error");
                    debug!(instance, error = %e, "cobalt attempt failed");
                    if e.is_rate_limited() {
                        // The backoff covers the whole family; stop here.
                        self.limiter.record_failure(RATE_KEY, &e);
                        return None;
                    }
                    last_error = Some(e);
                }
            }
        }

        // Every instance unreachable: back off the whole family.
        if let Some(e) = last_error
            && matches!(e, BifrostError::Unreachable(_))
        {
            self.limiter.record_error(RATE_KEY, false);
        }
        None
    }
}

#[async_trait]
impl StreamProvider for CobaltProvider {
    fn name(&self) -> &str {
        "cobalt"
    }

    #[instrument(name = "cobalt.resolve", skip_all, fields(id = %request.id))]
    async fn resolve(&self, request: &ResolveRequest) -> Option<String> {
        let Some(video_url) = request.video_url() else {
            debug!("not a video id, skipping");
            return None;
        };
        if !self.limiter.wait_if_needed(RATE_KEY).await {
            return None;
        }

        self.health.sync_generation(self.directory.generation());
        let candidates = self.health.rank(&self.directory.candidates_where(
            Family::Cobalt,
            self.config.candidates,
            |url| !self.health.is_excluded(url),
        ));
        if candidates.is_empty() {
            debug!("no healthy cobalt instances");
            self.outcomes.record(false);
            return None;
        }

        let found = tokio::time::timeout(
            self.config.timeout,
            self.try_candidates(&candidates, &video_url),
        )
        .await
        .unwrap_or_else(|_| {
            debug!("cobalt timed out");
            None
        });
        self.outcomes.record(found.is_some());
        found
    }

    fn health(&self) -> ProviderHealth {
        self.outcomes.snapshot(
            self.name(),
            vec![FamilyHealth {
                family: self.health.family().to_string(),
                instances: self.health.stats(),
            }],
        )
    }
}

fn record_attempt(status: &'static str) {
    metrics::counter!(
        telemetry::PROVIDER_ATTEMPTS_TOTAL,
        "provider" => "cobalt",
        "status" => status
    )
    .increment(1);
}
