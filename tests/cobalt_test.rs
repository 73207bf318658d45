//! Integration tests for the primary (cobalt) adapter against mock
//! instances.

use std::sync::Arc;
use std::time::Duration;

use bifrost::providers::{
    CobaltConfig, CobaltProvider, InstanceHealthTracker, RateLimiter, StreamProvider, http,
};
use bifrost::{DiscoveryConfig, Family, HealthConfig, InstanceDirectory, ResolveRequest};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const VIDEO_ID: &str = "abc12345678";

struct Harness {
    provider: CobaltProvider,
    health: Arc<InstanceHealthTracker>,
    limiter: Arc<RateLimiter>,
}

fn harness(instances: Vec<String>, config: CobaltConfig) -> Harness {
    let client = http::build_client(Duration::from_secs(2)).unwrap();
    let directory = Arc::new(InstanceDirectory::with_client(
        DiscoveryConfig::new().seeds(Family::Cobalt, instances),
        client.clone(),
    ));
    let health = Arc::new(InstanceHealthTracker::new(
        "cobalt",
        HealthConfig::new().max_consecutive_failures(3),
    ));
    let limiter = Arc::new(RateLimiter::default());
    let provider = CobaltProvider::new(
        client,
        directory,
        Arc::clone(&health),
        Arc::clone(&limiter),
        config,
    );
    Harness {
        provider,
        health,
        limiter,
    }
}

async fn mount(server: &MockServer, instance: &str, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path(format!("/{instance}/api/json")))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn stream_response_resolves_with_audio_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/a/api/json"))
        .and(body_partial_json(json!({
            "url": "https://www.youtube.com/watch?v=abc12345678",
            "isAudioOnly": true,
            "aFormat": "best",
            "downloadMode": "audio"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "stream",
            "url": "https://p.example/audio1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(vec![format!("{}/a", server.uri())], CobaltConfig::default());
    let url = h.provider.resolve(&ResolveRequest::new(VIDEO_ID)).await;
    assert_eq!(url.as_deref(), Some("https://p.example/audio1"));

    let stats = h.health.stats();
    assert_eq!(stats[0].success_count, 1);
    assert_eq!(h.provider.health().successes, 1);
}

#[tokio::test]
async fn failing_instance_falls_through_to_next() {
    let server = MockServer::start().await;
    mount(&server, "a", ResponseTemplate::new(500)).await;
    mount(
        &server,
        "b",
        ResponseTemplate::new(200).set_body_json(json!({
            "status": "picker",
            "picker": [
                {"type": "video", "url": "https://p.example/v"},
                {"type": "audio", "url": "https://p.example/a.m4a"}
            ]
        })),
    )
    .await;

    let a = format!("{}/a", server.uri());
    let b = format!("{}/b", server.uri());
    let h = harness(vec![a.clone(), b], CobaltConfig::default());

    let url = h.provider.resolve(&ResolveRequest::new(VIDEO_ID)).await;
    assert_eq!(url.as_deref(), Some("https://p.example/a.m4a"));

    let failed = h.health.stats().into_iter().find(|s| s.url == a).unwrap();
    assert_eq!(failed.consecutive_fails, 1);
}

#[tokio::test]
async fn error_status_is_no_result_without_backoff() {
    let server = MockServer::start().await;
    mount(
        &server,
        "a",
        ResponseTemplate::new(200).set_body_json(json!({
            "status": "error",
            "error": {"code": "error.api.content.video.unavailable"}
        })),
    )
    .await;

    let h = harness(vec![format!("{}/a", server.uri())], CobaltConfig::default());
    assert!(h.provider.resolve(&ResolveRequest::new(VIDEO_ID)).await.is_none());
    assert!(h.limiter.backoff_remaining("cobalt").is_none());
}

#[tokio::test]
async fn rate_limit_opens_family_backoff() {
    let server = MockServer::start().await;
    mount(
        &server,
        "a",
        ResponseTemplate::new(429).insert_header("Retry-After", "60"),
    )
    .await;
    for instance in ["b", "c"] {
        Mock::given(method("POST"))
            .and(path(format!("/{instance}/api/json")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "stream",
                "url": "https://p.example/audio1"
            })))
            .expect(0)
            .mount(&server)
            .await;
    }

    let h = harness(
        ["a", "b", "c"]
            .iter()
            .map(|i| format!("{}/{i}", server.uri()))
            .collect(),
        CobaltConfig::default(),
    );
    assert!(h.provider.resolve(&ResolveRequest::new(VIDEO_ID)).await.is_none());

    // The server's Retry-After sets the family backoff, and the remaining
    // instances are not contacted under it.
    let remaining = h.limiter.backoff_remaining("cobalt").unwrap();
    assert!(remaining > Duration::from_secs(55));
    assert!(remaining <= Duration::from_secs(60));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    // Backoff is longer than the wait budget: the next call is skipped
    // without touching the network.
    assert!(h.provider.resolve(&ResolveRequest::new(VIDEO_ID)).await.is_none());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn excluded_top_candidates_make_room_for_healthy_ones() {
    let server = MockServer::start().await;
    for instance in ["a", "b", "c"] {
        mount(&server, instance, ResponseTemplate::new(502)).await;
    }
    mount(
        &server,
        "d",
        ResponseTemplate::new(200).set_body_json(json!({
            "status": "stream",
            "url": "https://p.example/from-d"
        })),
    )
    .await;

    let instances: Vec<String> = ["a", "b", "c", "d"]
        .iter()
        .map(|i| format!("{}/{i}", server.uri()))
        .collect();
    let h = harness(instances.clone(), CobaltConfig::default());
    for instance in &instances[..3] {
        for _ in 0..3 {
            h.health.record_failure(instance);
        }
    }

    let url = h.provider.resolve(&ResolveRequest::new(VIDEO_ID)).await;
    assert_eq!(url.as_deref(), Some("https://p.example/from-d"));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn all_unreachable_backs_off_family() {
    // Nothing listens on port 9 on a test host.
    let h = harness(
        vec!["http://127.0.0.1:9".into(), "http://127.0.0.1:9/alt".into()],
        CobaltConfig::default(),
    );
    assert!(h.provider.resolve(&ResolveRequest::new(VIDEO_ID)).await.is_none());
    assert!(h.limiter.backoff_remaining("cobalt").is_some());
    assert_eq!(h.provider.health().failures, 1);
}

#[tokio::test]
async fn excluded_instance_is_skipped() {
    let server = MockServer::start().await;
    mount(
        &server,
        "good",
        ResponseTemplate::new(200).set_body_json(json!({
            "status": "tunnel",
            "url": "https://p.example/tunnel"
        })),
    )
    .await;

    let bad = format!("{}/bad", server.uri());
    let good = format!("{}/good", server.uri());
    let h = harness(vec![bad.clone(), good], CobaltConfig::default());
    for _ in 0..3 {
        h.health.record_failure(&bad);
    }

    let url = h.provider.resolve(&ResolveRequest::new(VIDEO_ID)).await;
    assert_eq!(url.as_deref(), Some("https://p.example/tunnel"));
    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| !r.url.path().starts_with("/bad")));
}

#[tokio::test]
async fn slow_instance_hits_adapter_timeout() {
    let server = MockServer::start().await;
    mount(
        &server,
        "a",
        ResponseTemplate::new(200)
            .set_body_json(json!({"status": "stream", "url": "https://p.example/late"}))
            .set_delay(Duration::from_millis(500)),
    )
    .await;

    let config = CobaltConfig {
        timeout: Duration::from_millis(100),
        ..CobaltConfig::default()
    };
    let h = harness(vec![format!("{}/a", server.uri())], config);
    assert!(h.provider.resolve(&ResolveRequest::new(VIDEO_ID)).await.is_none());
}

#[tokio::test]
async fn non_video_id_is_skipped() {
    let server = MockServer::start().await;
    let h = harness(vec![server.uri()], CobaltConfig::default());

    let request = ResolveRequest::new("spotify:track:1").title("Song");
    assert!(h.provider.resolve(&request).await.is_none());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn candidate_count_is_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let instances = (0..5).map(|i| format!("{}/i{i}", server.uri())).collect();
    let config = CobaltConfig {
        candidates: 2,
        ..CobaltConfig::default()
    };
    let h = harness(instances, config);
    assert!(h.provider.resolve(&ResolveRequest::new(VIDEO_ID)).await.is_none());
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}
