//! Resolver statistics.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::types::SourceLayer;

#[derive(Debug, Default)]
struct LayerRecord {
    attempts: u64,
    successes: u64,
    recent: VecDeque<Duration>,
}

#[derive(Debug, Default)]
struct Counters {
    layers: HashMap<SourceLayer, LayerRecord>,
    total: u64,
    failed: u64,
}

/// Per-layer counters plus a bounded latency history.
#[derive(Debug)]
pub(crate) struct StatsRecorder {
    history: usize,
    counters: Mutex<Counters>,
}

impl StatsRecorder {
    pub(crate) fn new(history: usize) -> Self {
        Self {
            history: history.max(1),
            counters: Mutex::new(Counters::default()),
        }
    }

    pub(crate) fn record_request(&self) {
        self.lock().total += 1;
    }

    pub(crate) fn record_layer(&self, layer: SourceLayer, elapsed: Duration, found: bool) {
        let mut counters = self.lock();
        let record = counters.layers.entry(layer).or_default();
        record.attempts += 1;
        if found {
            record.successes += 1;
        }
        if record.recent.len() == self.history {
            record.recent.pop_front();
        }
        record.recent.push_back(elapsed);
    }

    pub(crate) fn record_exhausted(&self) {
        self.lock().failed += 1;
    }

    pub(crate) fn snapshot(&self) -> ResolverStats {
        let counters = self.lock();
        let layers: BTreeMap<String, LayerStats> = SourceLayer::CASCADE
            .iter()
            .map(|layer| {
                let stats = counters
                    .layers
                    .get(layer)
                    .map(LayerStats::from_record)
                    .unwrap_or_default();
                (layer.as_str().to_string(), stats)
            })
            .collect();

        let percent = |n: u64| {
            if counters.total > 0 {
                n as f64 / counters.total as f64 * 100.0
            } else {
                0.0
            }
        };
        let cache_hits = counters
            .layers
            .get(&SourceLayer::Cache)
            .map(|r| r.successes)
            .unwrap_or(0);

        ResolverStats {
            total: counters.total,
            failed: counters.failed,
            cache_rate: percent(cache_hits),
            success_rate: percent(counters.total.saturating_sub(counters.failed)),
            layers,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Counters for one cascade layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayerStats {
    pub attempts: u64,
    pub successes: u64,
    /// Mean latency over the recent history, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_recent_ms: Option<f64>,
    pub samples: usize,
}

impl LayerStats {
    fn from_record(record: &LayerRecord) -> Self {
        let samples = record.recent.len();
        let avg_recent_ms = (samples > 0).then(|| {
            record.recent.iter().map(Duration::as_secs_f64).sum::<f64>() / samples as f64 * 1000.0
        });
        Self {
            attempts: record.attempts,
            successes: record.successes,
            avg_recent_ms,
            samples,
        }
    }
}

/// Read-only snapshot of resolver activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolverStats {
    /// Resolutions requested.
    pub total: u64,
    /// Resolutions that exhausted every layer.
    pub failed: u64,
    /// Share of resolutions answered from cache, in percent.
    pub cache_rate: f64,
    /// Share of resolutions that produced a URL, in percent.
    pub success_rate: f64,
    pub layers: BTreeMap<String, LayerStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_bounded() {
        let stats = StatsRecorder::new(3);
        for ms in [10, 20, 30, 40] {
            stats.record_layer(SourceLayer::Primary, Duration::from_millis(ms), true);
        }
        let snapshot = stats.snapshot();
        let primary = &snapshot.layers["primary"];
        assert_eq!(primary.attempts, 4);
        assert_eq!(primary.samples, 3);
        assert!((primary.avg_recent_ms.unwrap() - 30.0).abs() < 1e-6);
    }

    #[test]
    fn rates() {
        let stats = StatsRecorder::new(100);
        for _ in 0..4 {
            stats.record_request();
        }
        stats.record_layer(SourceLayer::Cache, Duration::ZERO, true);
        stats.record_exhausted();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total, 4);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.cache_rate, 25.0);
        assert_eq!(snapshot.success_rate, 75.0);
        assert_eq!(snapshot.layers["fallback"], LayerStats::default());
    }
}
