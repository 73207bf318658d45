//! Integration tests for the federation layer: mirror racing, grace
//! handling and alternative sources.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bifrost::providers::{
    AlternativeSpec, FederationConfig, FederationProvider, InstanceHealthTracker, MirrorProtocol,
    RateLimiter, StreamProvider, http,
};
use bifrost::{DiscoveryConfig, Family, HealthConfig, InstanceDirectory, ResolveRequest};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const VIDEO_ID: &str = "abc12345678";

struct Harness {
    provider: FederationProvider,
    piped: Arc<InstanceHealthTracker>,
    limiter: Arc<RateLimiter>,
}

fn harness(
    piped: Vec<String>,
    invidious: Vec<String>,
    config: FederationConfig,
    alternatives: Vec<AlternativeSpec>,
) -> Harness {
    let client = http::build_client(Duration::from_secs(5)).unwrap();
    let directory = Arc::new(InstanceDirectory::with_client(
        DiscoveryConfig::new()
            .seeds(Family::Piped, piped)
            .seeds(Family::Invidious, invidious),
        client.clone(),
    ));
    let limiter = Arc::new(RateLimiter::default());
    let piped_health = Arc::new(InstanceHealthTracker::new("piped", HealthConfig::new()));
    let invidious_health = Arc::new(InstanceHealthTracker::new("invidious", HealthConfig::new()));

    let mut provider = FederationProvider::new(client, directory, Arc::clone(&limiter), config)
        .mirror(MirrorProtocol::Piped, Arc::clone(&piped_health))
        .mirror(MirrorProtocol::Invidious, invidious_health);
    for spec in alternatives {
        provider = provider.alternative(spec);
    }
    Harness {
        provider,
        piped: piped_health,
        limiter,
    }
}

fn piped_body(url: &str) -> serde_json::Value {
    json!({
        "title": "Song",
        "audioStreams": [
            {"url": "https://m.example/low.m4a", "bitrate": 48000},
            {"url": url, "bitrate": 128000}
        ]
    })
}

async fn mount_piped(server: &MockServer, instance: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(format!("/{instance}/streams/{VIDEO_ID}")))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn first_success_wins_after_other_errors() {
    let server = MockServer::start().await;
    mount_piped(&server, "m1", ResponseTemplate::new(502)).await;
    mount_piped(
        &server,
        "m2",
        ResponseTemplate::new(200)
            .set_body_json(piped_body("https://m2.example/a.m4a"))
            .set_delay(Duration::from_millis(100)),
    )
    .await;

    let h = harness(
        vec![format!("{}/m1", server.uri()), format!("{}/m2", server.uri())],
        Vec::new(),
        FederationConfig::default(),
        Vec::new(),
    );
    let url = h.provider.resolve(&ResolveRequest::new(VIDEO_ID)).await;
    assert_eq!(url.as_deref(), Some("https://m2.example/a.m4a"));

    let stats = h.piped.stats();
    assert_eq!(stats.iter().map(|s| s.total_requests).sum::<u64>(), 2);
}

#[tokio::test]
async fn does_not_wait_for_slow_candidates() {
    let server = MockServer::start().await;
    mount_piped(
        &server,
        "fast",
        ResponseTemplate::new(200).set_body_json(piped_body("https://fast.example/a.m4a")),
    )
    .await;
    mount_piped(
        &server,
        "slow",
        ResponseTemplate::new(200)
            .set_body_json(piped_body("https://slow.example/a.m4a"))
            .set_delay(Duration::from_secs(3)),
    )
    .await;

    let h = harness(
        vec![format!("{}/slow", server.uri()), format!("{}/fast", server.uri())],
        Vec::new(),
        FederationConfig::default(),
        Vec::new(),
    );
    let start = Instant::now();
    let url = h.provider.resolve(&ResolveRequest::new(VIDEO_ID)).await;
    assert_eq!(url.as_deref(), Some("https://fast.example/a.m4a"));
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn grace_cuts_off_after_first_failure() {
    let server = MockServer::start().await;
    mount_piped(&server, "broken", ResponseTemplate::new(500)).await;
    mount_piped(
        &server,
        "late",
        ResponseTemplate::new(200)
            .set_body_json(piped_body("https://late.example/a.m4a"))
            .set_delay(Duration::from_millis(1500)),
    )
    .await;

    let config = FederationConfig::default()
        .window(Duration::from_secs(4))
        .grace(Duration::from_millis(300));
    let h = harness(
        vec![format!("{}/broken", server.uri()), format!("{}/late", server.uri())],
        Vec::new(),
        config,
        Vec::new(),
    );
    let start = Instant::now();
    assert!(h.provider.resolve(&ResolveRequest::new(VIDEO_ID)).await.is_none());
    assert!(start.elapsed() < Duration::from_millis(1200));
}

#[tokio::test]
async fn invidious_picks_highest_audio_bitrate() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/inv/api/v1/videos/{VIDEO_ID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "adaptiveFormats": [
                {"type": "video/mp4", "url": "https://inv.example/video", "bitrate": "999999"},
                {"type": "audio/mp4; codecs=\"mp4a.40.2\"", "url": "https://inv.example/aac", "bitrate": "130000"},
                {"type": "audio/webm; codecs=\"opus\"", "url": "https://inv.example/opus", "bitrate": 160000}
            ]
        })))
        .mount(&server)
        .await;

    let h = harness(
        Vec::new(),
        vec![format!("{}/inv", server.uri())],
        FederationConfig::default(),
        Vec::new(),
    );
    let url = h.provider.resolve(&ResolveRequest::new(VIDEO_ID)).await;
    assert_eq!(url.as_deref(), Some("https://inv.example/opus"));
}

#[tokio::test]
async fn alternative_races_with_mirrors() {
    let server = MockServer::start().await;
    mount_piped(&server, "down", ResponseTemplate::new(503)).await;
    Mock::given(method("POST"))
        .and(path("/loader/api"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "result": {"link": "https://loader.example/a.mp3"}
        })))
        .mount(&server)
        .await;

    let spec = AlternativeSpec::new("loader", format!("{}/loader/api", server.uri()))
        .post(json!({"url": "{video_url}"}))
        .url_pointer("/result/url")
        .url_pointer("/result/link")
        .success_pointer("/status");
    let h = harness(
        vec![format!("{}/down", server.uri())],
        Vec::new(),
        FederationConfig::default(),
        vec![spec],
    );
    let url = h.provider.resolve(&ResolveRequest::new(VIDEO_ID)).await;
    assert_eq!(url.as_deref(), Some("https://loader.example/a.mp3"));
}

#[tokio::test]
async fn mirror_rate_limit_backs_off_family() {
    let server = MockServer::start().await;
    mount_piped(&server, "m1", ResponseTemplate::new(429)).await;

    let h = harness(
        vec![format!("{}/m1", server.uri())],
        Vec::new(),
        FederationConfig::default(),
        Vec::new(),
    );
    assert!(h.provider.resolve(&ResolveRequest::new(VIDEO_ID)).await.is_none());
    assert!(h.limiter.backoff_remaining("piped").is_some());

    // Throttled family contributes no attempts on the next call.
    let before = server.received_requests().await.unwrap().len();
    assert!(h.provider.resolve(&ResolveRequest::new(VIDEO_ID)).await.is_none());
    assert_eq!(server.received_requests().await.unwrap().len(), before);
}

#[tokio::test]
async fn excluded_mirrors_make_room_for_lower_ranked_ones() {
    let server = MockServer::start().await;
    for instance in ["m0", "m1", "m2"] {
        mount_piped(&server, instance, ResponseTemplate::new(502)).await;
    }
    for instance in ["m3", "m4"] {
        mount_piped(
            &server,
            instance,
            ResponseTemplate::new(200).set_body_json(piped_body("https://m.example/healthy.m4a")),
        )
        .await;
    }

    let h = harness(
        (0..5).map(|i| format!("{}/m{i}", server.uri())).collect(),
        Vec::new(),
        FederationConfig::default(),
        Vec::new(),
    );

    // Three rounds push the three top-ranked mirrors over the failure
    // threshold; the fourth reaches the healthy ones further down.
    let mut results = Vec::new();
    for _ in 0..4 {
        results.push(h.provider.resolve(&ResolveRequest::new(VIDEO_ID)).await);
    }
    assert!(results[..3].iter().all(Option::is_none), "{results:?}");
    assert_eq!(results[3].as_deref(), Some("https://m.example/healthy.m4a"));

    let excluded = h.piped.stats().iter().filter(|s| s.excluded).count();
    assert_eq!(excluded, 3);
}

#[tokio::test]
async fn no_candidates_returns_none() {
    let h = harness(Vec::new(), Vec::new(), FederationConfig::default(), Vec::new());
    assert!(h.provider.resolve(&ResolveRequest::new(VIDEO_ID)).await.is_none());
    assert_eq!(h.provider.health().failures, 1);
}

#[tokio::test]
async fn health_reports_each_family() {
    let server = MockServer::start().await;
    mount_piped(
        &server,
        "m1",
        ResponseTemplate::new(200).set_body_json(piped_body("https://m1.example/a.m4a")),
    )
    .await;

    let h = harness(
        vec![format!("{}/m1", server.uri())],
        Vec::new(),
        FederationConfig::default(),
        Vec::new(),
    );
    h.provider.resolve(&ResolveRequest::new(VIDEO_ID)).await;

    let health = h.provider.health();
    assert_eq!(health.provider, "federation");
    assert_eq!(health.successes, 1);
    let families: Vec<_> = health.families.iter().map(|f| f.family.as_str()).collect();
    assert_eq!(families, ["piped", "invidious"]);
    assert_eq!(health.families[0].instances[0].success_count, 1);
}
