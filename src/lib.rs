//! Bifrost - Resilient multi-source audio stream resolver
//!
//! Given a video identifier (and optionally a title and artist), Bifrost
//! returns a playable audio stream URL by walking a cascade of sources:
//! a TTL cache, a primary extraction API (cobalt), a federation of
//! community mirrors (Piped and Invidious) raced in parallel, and finally
//! a slow but durable universal extractor. The first layer to succeed wins
//! and its answer is cached.
//!
//! # Example
//!
//! ```rust,no_run
//! use bifrost::{Bifrost, SourceLayer};
//!
//! #[tokio::main]
//! async fn main() -> bifrost::Result<()> {
//!     let resolver = Bifrost::builder().build()?;
//!
//!     let resolution = resolver
//!         .resolve("dQw4w9WgXcQ", Some("Never Gonna Give You Up"), Some("Rick Astley"))
//!         .await;
//!
//!     match resolution.url() {
//!         Some(url) => println!("{url} (via {})", resolution.source()),
//!         None => assert_eq!(resolution.source(), SourceLayer::None),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Custom layers
//!
//! Any layer can be replaced with your own [`StreamProvider`]:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bifrost::{Bifrost, ResolveRequest, StreamProvider};
//!
//! struct Static;
//!
//! #[async_trait::async_trait]
//! impl StreamProvider for Static {
//!     fn name(&self) -> &str {
//!         "static"
//!     }
//!
//!     async fn resolve(&self, request: &ResolveRequest) -> Option<String> {
//!         Some(format!("https://cdn.example/{}.m4a", request.id))
//!     }
//! }
//!
//! # fn main() -> bifrost::Result<()> {
//! let resolver = Bifrost::builder()
//!     .in_memory_cache()
//!     .primary(Arc::new(Static))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod directory;
pub mod error;
pub mod providers;
pub mod resolver;
pub mod telemetry;
pub mod types;
pub mod version;

// Re-export main types at crate root
pub use cache::{CacheConfig, CacheStats, Clock, ManualClock, ResultCache, SystemClock};
pub use config::Config;
pub use directory::{DiscoveryConfig, DiscoveryStats, Family, InstanceDirectory};
pub use error::{BifrostError, Result};
pub use providers::{
    AlternativeSpec, BlockingExtractor, ExtractTarget, FallbackConfig, HealthConfig,
    ProviderHealth, RateLimitConfig, StreamProvider,
};
pub use resolver::{Bifrost, BifrostBuilder, Resolver, ResolverConfig, ResolverStats, StatsReport};
pub use types::{ResolveRequest, Resolution, SourceLayer};
pub use version::{PKG_VERSION, version_string};
