//! Fallback layer: the universal extractor.
//!
//! Slow but durable. Extraction is blocking work (a subprocess by default),
//! so it runs on tokio's blocking pool behind a semaphore that bounds the
//! number of concurrent extractions. Unlike the other layers it accepts
//! requests without a video id, searching by title and artist instead.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use super::traits::{OutcomeCounters, ProviderHealth, StreamProvider};
use crate::types::ResolveRequest;
use crate::{BifrostError, Result, telemetry};

/// What the extractor should look up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractTarget {
    /// A canonical watch URL.
    Video(String),
    /// A free-text search; the first hit is used.
    Search(String),
}

impl ExtractTarget {
    /// The watch URL for a valid id, else a title/artist search, else nothing.
    pub fn from_request(request: &ResolveRequest) -> Option<Self> {
        request
            .video_url()
            .map(ExtractTarget::Video)
            .or_else(|| request.search_query().map(ExtractTarget::Search))
    }
}

/// A blocking audio URL extractor.
///
/// Implementations may block freely; callers run them off the async pool.
pub trait BlockingExtractor: Send + Sync {
    fn name(&self) -> &str;

    fn extract(&self, target: &ExtractTarget) -> Result<String>;
}

/// [`BlockingExtractor`] backed by the `yt-dlp` command line tool.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    binary: PathBuf,
    extra_args: Vec<OsString>,
}

impl Default for YtDlpExtractor {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

impl YtDlpExtractor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            extra_args: Vec::new(),
        }
    }

    /// Extra arguments passed before the target (e.g. `--cookies`).
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    fn target_arg(target: &ExtractTarget) -> String {
        match target {
            ExtractTarget::Video(url) => url.clone(),
            ExtractTarget::Search(query) => format!("ytsearch1:{query}"),
        }
    }
}

impl BlockingExtractor for YtDlpExtractor {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    fn extract(&self, target: &ExtractTarget) -> Result<String> {
        let output = Command::new(&self.binary)
            .args(["-f", "bestaudio/best", "--no-playlist", "--no-warnings", "-q", "-g"])
            .args(&self.extra_args)
            .arg(Self::target_arg(target))
            .output()
            .map_err(|e| {
                BifrostError::Configuration(format!(
                    "failed to run {}: {e}",
                    self.binary.display()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BifrostError::NotFound(
                stderr.lines().last().unwrap_or("extractor failed").trim().to_string(),
            ));
        }

        first_url(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| BifrostError::Malformed("extractor printed no url".into()))
    }
}

/// First line of extractor output that looks like a URL.
fn first_url(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("http://") || line.starts_with("https://"))
        .map(str::to_string)
}

/// Configuration for the fallback layer.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// Concurrent extractions. Default: 3.
    pub workers: usize,
    /// Extractor binary. Default: `yt-dlp` on `PATH`.
    pub binary: PathBuf,
    pub extra_args: Vec<String>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            binary: PathBuf::from("yt-dlp"),
            extra_args: Vec::new(),
        }
    }
}

impl FallbackConfig {
    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary = path.into();
        self
    }

    /// The `yt-dlp` extractor this config describes.
    pub fn extractor(&self) -> YtDlpExtractor {
        YtDlpExtractor::new(&self.binary).args(&self.extra_args)
    }
}

/// The fallback cascade layer.
pub struct UniversalExtractor {
    extractor: Arc<dyn BlockingExtractor>,
    workers: Arc<Semaphore>,
    outcomes: OutcomeCounters,
}

impl UniversalExtractor {
    pub fn new(extractor: Arc<dyn BlockingExtractor>, workers: usize) -> Self {
        Self {
            extractor,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            outcomes: OutcomeCounters::default(),
        }
    }

    pub fn from_config(config: &FallbackConfig) -> Self {
        Self::new(Arc::new(config.extractor()), config.workers)
    }

    async fn run(&self, target: ExtractTarget) -> Result<String> {
        let permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|_| BifrostError::Unreachable("extractor pool closed".into()))?;
        let extractor = Arc::clone(&self.extractor);
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            extractor.extract(&target)
        })
        .await
        .map_err(|e| BifrostError::Unreachable(format!("extractor task failed: {e}")))?
    }
}

#[async_trait]
impl StreamProvider for UniversalExtractor {
    fn name(&self) -> &str {
        "fallback"
    }

    #[instrument(name = "fallback.resolve", skip_all, fields(id = %request.id))]
    async fn resolve(&self, request: &ResolveRequest) -> Option<String> {
        let Some(target) = ExtractTarget::from_request(request) else {
            debug!("neither a video id nor a title, skipping");
            return None;
        };

        let start = Instant::now();
        let result = self.run(target).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(
            telemetry::PROVIDER_ATTEMPTS_TOTAL,
            "provider" => "fallback",
            "status" => status
        )
        .increment(1);

        let found = match result {
            Ok(url) => {
                debug!(
                    extractor = self.extractor.name(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "extractor resolved"
                );
                Some(url)
            }
            Err(e @ BifrostError::Configuration(_)) => {
                warn!(error = %e, "extractor unavailable");
                None
            }
            Err(e) => {
                debug!(error = %e, "extractor failed");
                None
            }
        };
        self.outcomes.record(found.is_some());
        found
    }

    fn health(&self) -> ProviderHealth {
        self.outcomes.snapshot(self.name(), Vec::new())
    }
}
