//! The provider contract shared by every cascade layer.
//!
//! Each layer of the cascade (primary, federation, fallback) is one
//! [`StreamProvider`]. Providers absorb their own failures: `resolve`
//! returns `None` for "nothing from this layer" and the orchestrator moves
//! on. Errors never cross this boundary.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use bifrost::{ResolveRequest, StreamProvider};
//!
//! struct Fixed(&'static str);
//!
//! #[async_trait]
//! impl StreamProvider for Fixed {
//!     fn name(&self) -> &str {
//!         "fixed"
//!     }
//!
//!     async fn resolve(&self, _request: &ResolveRequest) -> Option<String> {
//!         Some(self.0.to_string())
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde::Serialize;

use crate::providers::health::InstanceStats;
use crate::types::ResolveRequest;

/// Self-reported health of a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderHealth {
    pub provider: String,
    /// Successful resolutions by this provider.
    pub successes: u64,
    /// Calls that produced nothing.
    pub failures: u64,
    /// Per-instance health, grouped by family name.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub families: Vec<FamilyHealth>,
}

/// Health of every instance in one family.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FamilyHealth {
    pub family: String,
    pub instances: Vec<InstanceStats>,
}

/// One strategy for turning a request into a playable audio URL.
#[async_trait]
pub trait StreamProvider: Send + Sync {
    /// Provider name for logging/debugging.
    fn name(&self) -> &str;

    /// Resolve a request, or `None` if this provider has nothing.
    async fn resolve(&self, request: &ResolveRequest) -> Option<String>;

    /// Read-only health snapshot. The default reports only the name.
    fn health(&self) -> ProviderHealth {
        ProviderHealth {
            provider: self.name().to_string(),
            ..ProviderHealth::default()
        }
    }
}

/// Success/failure counters behind [`StreamProvider::health`].
#[derive(Debug, Default)]
pub(crate) struct OutcomeCounters {
    successes: std::sync::atomic::AtomicU64,
    failures: std::sync::atomic::AtomicU64,
}

impl OutcomeCounters {
    pub(crate) fn record(&self, found: bool) {
        use std::sync::atomic::Ordering;
        if found {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self, provider: &str, families: Vec<FamilyHealth>) -> ProviderHealth {
        use std::sync::atomic::Ordering;
        ProviderHealth {
            provider: provider.to_string(),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            families,
        }
    }
}
