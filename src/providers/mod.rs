//! Provider adapters and the shared machinery they use.
//!
//! Each cascade layer is a [`StreamProvider`]:
//!
//! - [`CobaltProvider`]: the primary layer, sequential over ranked instances
//! - [`FederationProvider`]: races Piped/Invidious mirrors and alternatives
//! - [`UniversalExtractor`]: the blocking fallback extractor
//!
//! Shared by all of them:
//!
//! - [`RateLimiter`]: per-domain quotas and backoff
//! - [`InstanceHealthTracker`]: per-instance health and ranking
//! - [`race`](race::race): first-success racing with a grace period

pub mod alternative;
pub mod cobalt;
pub mod fallback;
pub mod federation;
pub mod health;
pub mod http;
pub mod mirrors;
pub mod race;
pub mod rate_limit;
mod traits;

pub use alternative::{AlternativeSpec, HttpMethod};
pub use cobalt::{CobaltConfig, CobaltProvider, CobaltResponse};
pub use fallback::{
    BlockingExtractor, ExtractTarget, FallbackConfig, UniversalExtractor, YtDlpExtractor,
};
pub use federation::{FederationConfig, FederationProvider};
pub use health::{HealthConfig, InstanceHealthTracker, InstanceStats};
pub use mirrors::MirrorProtocol;
pub use race::RaceConfig;
pub use rate_limit::{DomainLimit, DomainStats, RateLimitConfig, RateLimiter};
pub use traits::{FamilyHealth, ProviderHealth, StreamProvider};
