//! Resolution outcome types.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BifrostError, Result};

/// Cascade layer that produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceLayer {
    Cache,
    Primary,
    Federation,
    Fallback,
    /// Every layer failed.
    None,
}

impl SourceLayer {
    /// Layers in cascade order (excluding `None`).
    pub const CASCADE: [SourceLayer; 4] = [
        SourceLayer::Cache,
        SourceLayer::Primary,
        SourceLayer::Federation,
        SourceLayer::Fallback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceLayer::Cache => "cache",
            SourceLayer::Primary => "primary",
            SourceLayer::Federation => "federation",
            SourceLayer::Fallback => "fallback",
            SourceLayer::None => "none",
        }
    }
}

impl fmt::Display for SourceLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of [`Resolver::resolve`](crate::Resolver::resolve).
///
/// Never partially populated: `url` is `Some` iff `source != None`. The
/// fields are private so that invariant holds by construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    url: Option<String>,
    source: SourceLayer,
    #[serde(rename = "elapsed_seconds", serialize_with = "serialize_secs")]
    elapsed: Duration,
}

impl Resolution {
    /// A successful resolution from `source`.
    ///
    /// # Panics
    ///
    /// Debug builds assert that `source` is not [`SourceLayer::None`].
    pub fn found(url: impl Into<String>, source: SourceLayer, elapsed: Duration) -> Self {
        debug_assert!(source != SourceLayer::None, "found() requires a real layer");
        Self {
            url: Some(url.into()),
            source,
            elapsed,
        }
    }

    /// An exhausted cascade.
    pub fn exhausted(elapsed: Duration) -> Self {
        Self {
            url: None,
            source: SourceLayer::None,
            elapsed,
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn source(&self) -> SourceLayer {
        self.source
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn is_found(&self) -> bool {
        self.url.is_some()
    }

    /// Convert into a `Result`, mapping an exhausted cascade to
    /// [`BifrostError::Exhausted`].
    pub fn into_result(self) -> Result<String> {
        self.url.ok_or(BifrostError::Exhausted)
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn found_carries_url_and_layer() {
        let r = Resolution::found("https://p.example/a", SourceLayer::Primary, Duration::ZERO);
        assert!(r.is_found());
        assert_eq!(r.url(), Some("https://p.example/a"));
        assert_eq!(r.source(), SourceLayer::Primary);
    }

    #[test]
    fn exhausted_has_no_url() {
        let r = Resolution::exhausted(Duration::from_millis(5));
        assert!(!r.is_found());
        assert_eq!(r.source(), SourceLayer::None);
        assert!(matches!(r.into_result(), Err(BifrostError::Exhausted)));
    }

    #[test]
    fn serializes_external_shape() {
        let r = Resolution::found(
            "https://m2.example/a.m4a",
            SourceLayer::Federation,
            Duration::from_millis(1500),
        );
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["url"], "https://m2.example/a.m4a");
        assert_eq!(json["source"], "federation");
        assert_eq!(json["elapsed_seconds"], 1.5);

        let none = serde_json::to_value(Resolution::exhausted(Duration::ZERO)).unwrap();
        assert!(none["url"].is_null());
        assert_eq!(none["source"], "none");
    }
}
