//! Integration tests for [`InstanceHealthTracker`] ranking and exclusion.

use std::time::Duration;

use bifrost::HealthConfig;
use bifrost::providers::InstanceHealthTracker;

fn urls(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn excluded_after_k_failures_and_reset_by_success() {
    let tracker = InstanceHealthTracker::new("piped", HealthConfig::new().max_consecutive_failures(3));
    let candidates = urls(&["https://a", "https://b"]);

    tracker.record_failure("https://a");
    tracker.record_failure("https://a");
    assert_eq!(tracker.rank(&candidates).len(), 2);

    tracker.record_failure("https://a");
    assert!(tracker.is_excluded("https://a"));
    assert_eq!(tracker.rank(&candidates), urls(&["https://b"]));

    tracker.record_success("https://a", Duration::from_millis(200));
    assert!(!tracker.is_excluded("https://a"));
    assert_eq!(tracker.rank(&candidates).len(), 2);
}

#[test]
fn faster_instance_ranks_first() {
    let tracker = InstanceHealthTracker::new("invidious", HealthConfig::new());
    tracker.record_success("https://slow", Duration::from_secs(2));
    tracker.record_success("https://fast", Duration::from_millis(150));

    let ranked = tracker.rank(&urls(&["https://slow", "https://fast"]));
    assert_eq!(ranked, urls(&["https://fast", "https://slow"]));
}

#[test]
fn unknown_instances_keep_given_order() {
    let tracker = InstanceHealthTracker::new("piped", HealthConfig::new());
    let candidates = urls(&["https://c", "https://a", "https://b"]);
    assert_eq!(tracker.rank(&candidates), candidates);
}

#[test]
fn failing_instance_drops_below_untried() {
    let tracker = InstanceHealthTracker::new("piped", HealthConfig::new());
    tracker.record_success("https://flaky", Duration::from_secs(1));
    tracker.record_failure("https://flaky");
    tracker.record_failure("https://flaky");

    // success rate 1/3, one second latency: scores below the neutral 0.5
    let ranked = tracker.rank(&urls(&["https://flaky", "https://new"]));
    assert_eq!(ranked, urls(&["https://new", "https://flaky"]));
}

#[test]
fn new_generation_lifts_exclusion() {
    let tracker = InstanceHealthTracker::new("cobalt", HealthConfig::new().max_consecutive_failures(2));
    tracker.sync_generation(1);
    tracker.record_failure("https://a");
    tracker.record_failure("https://a");
    assert!(tracker.is_excluded("https://a"));

    tracker.sync_generation(1);
    assert!(tracker.is_excluded("https://a"), "same generation keeps exclusion");

    tracker.sync_generation(2);
    assert!(!tracker.is_excluded("https://a"));
}

#[test]
fn stats_expose_counters() {
    let tracker = InstanceHealthTracker::new("piped", HealthConfig::new().max_consecutive_failures(5));
    tracker.record_success("https://a", Duration::from_millis(500));
    tracker.record_failure("https://a");
    tracker.record_failure("https://b");

    let stats = tracker.stats();
    assert_eq!(stats.len(), 2);
    let a = &stats[0];
    assert_eq!(a.url, "https://a");
    assert_eq!(a.total_requests, 2);
    assert_eq!(a.success_rate, Some(0.5));
    assert_eq!(a.consecutive_fails, 1);
    assert!(a.last_used_secs_ago.is_some());
    assert!(!a.excluded);
    assert_eq!(stats[1].success_count, 0);
}
