//! Structured racing of concurrent attempts.
//!
//! [`race`] spawns every attempt into a [`JoinSet`], returns the first
//! success, and aborts the rest. If the first completion is a failure the
//! remaining attempts get at most `grace` longer (and never beyond the
//! overall `window`). Dropping the set aborts anything still running, so
//! cancellation is best-effort but never leaks tasks past the race.

use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::debug;

use crate::Result;

/// Timing for one race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaceConfig {
    /// Upper bound on the whole race. Default: 4s.
    pub window: Duration,
    /// Extra wait after the first failed completion. Default: 1s.
    pub grace: Duration,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(4),
            grace: Duration::from_secs(1),
        }
    }
}

/// Race `attempts` and return the first `Ok` value.
///
/// Returns `None` when every attempt fails, when the window closes, or when
/// `attempts` is empty.
pub async fn race<T>(attempts: Vec<BoxFuture<'static, Result<T>>>, config: RaceConfig) -> Option<T>
where
    T: Send + 'static,
{
    if attempts.is_empty() {
        return None;
    }

    let mut set = JoinSet::new();
    for attempt in attempts {
        set.spawn(attempt);
    }

    let mut deadline = Instant::now() + config.window;
    let mut grace_applied = false;

    loop {
        let joined = match tokio::time::timeout_at(deadline, set.join_next()).await {
            Ok(Some(joined)) => joined,
            Ok(None) => return None,
            Err(_) => {
                debug!(pending = set.len(), "race window closed");
                return None;
            }
        };

        match joined {
            Ok(Ok(value)) => {
                set.abort_all();
                return Some(value);
            }
            Ok(Err(e)) => debug!(error = %e, "race attempt failed"),
            Err(e) => debug!(error = %e, "race attempt aborted"),
        }

        if !grace_applied {
            grace_applied = true;
            deadline = deadline.min(Instant::now() + config.grace);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BifrostError;
    use futures_util::FutureExt;

    fn after(ms: u64, outcome: Result<&'static str>) -> BoxFuture<'static, Result<&'static str>> {
        async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            outcome
        }
        .boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_wins() {
        let winner = race(
            vec![after(300, Ok("slow")), after(100, Ok("fast"))],
            RaceConfig::default(),
        )
        .await;
        assert_eq!(winner, Some("fast"));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_then_success_within_grace() {
        let start = Instant::now();
        let winner = race(
            vec![
                after(100, Err(BifrostError::Unreachable("down".into()))),
                after(600, Ok("https://m2.example/a.m4a")),
            ],
            RaceConfig::default(),
        )
        .await;
        assert_eq!(winner, Some("https://m2.example/a.m4a"));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn grace_cuts_off_stragglers() {
        let winner = race(
            vec![
                after(100, Err(BifrostError::Unreachable("down".into()))),
                after(3_000, Ok("too late")),
            ],
            RaceConfig::default(),
        )
        .await;
        assert_eq!(winner, None);
    }

    #[tokio::test(start_paused = true)]
    async fn window_bounds_the_race() {
        let start = Instant::now();
        let winner = race(vec![after(10_000, Ok("never"))], RaceConfig::default()).await;
        assert_eq!(winner, None);
        assert!(start.elapsed() <= Duration::from_secs(4) + Duration::from_millis(10));
    }

    #[tokio::test]
    async fn empty_race_is_none() {
        assert_eq!(race::<()>(Vec::new(), RaceConfig::default()).await, None);
    }
}
