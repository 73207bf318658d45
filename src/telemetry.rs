//! Telemetry metric name constants.
//!
//! Centralised metric names for bifrost operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `bifrost_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `layer`: cascade layer: "cache", "primary", "federation", "fallback", "none"
//! - `provider`: adapter or family name (e.g. "cobalt", "piped")
//! - `status`: outcome: "ok" or "error"
//! - `namespace`: cache namespace: "url" or "metadata"

/// Total resolutions, labelled by the layer that produced the result
/// ("none" for exhausted cascades).
///
/// Labels: `layer`.
pub const RESOLUTIONS_TOTAL: &str = "bifrost_resolutions_total";

/// Time spent inside a single cascade layer, whatever its outcome.
///
/// Labels: `layer`.
pub const LAYER_DURATION_SECONDS: &str = "bifrost_layer_duration_seconds";

/// Total cache hits.
///
/// Labels: `namespace`.
pub const CACHE_HITS_TOTAL: &str = "bifrost_cache_hits_total";

/// Total cache misses (including reads of expired entries).
///
/// Labels: `namespace`.
pub const CACHE_MISSES_TOTAL: &str = "bifrost_cache_misses_total";

/// Total upstream attempts made by provider adapters.
///
/// Labels: `provider`, `status`.
pub const PROVIDER_ATTEMPTS_TOTAL: &str = "bifrost_provider_attempts_total";

/// Total backoff windows opened or extended by the rate limiter.
///
/// Labels: `domain`.
pub const BACKOFFS_TOTAL: &str = "bifrost_backoffs_total";

/// Total instance-discovery refreshes.
///
/// Labels: `family`, `status` ("ok" | "fallback").
pub const DISCOVERY_REFRESHES_TOTAL: &str = "bifrost_discovery_refreshes_total";
