//! Parsers for the public instance lists.
//!
//! Each parser is lenient per entry: an entry that does not match the
//! expected shape is skipped, never failing the whole list.

use serde::Deserialize;
use serde_json::Value;

use super::DiscoveredInstance;

#[derive(Debug, Deserialize)]
struct PipedListing {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    api_url: Option<String>,
    #[serde(default)]
    locations: Option<String>,
    #[serde(default)]
    cdn: bool,
    #[serde(default, alias = "uptime_24h")]
    uptime: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct InvidiousListing {
    #[serde(default)]
    api: Option<bool>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    stats: Option<Value>,
}

/// Parse the Piped instance list.
///
/// Keeps entries with an `api_url` that are not CDN-only, scored by uptime.
pub fn parse_piped(body: &Value) -> Vec<DiscoveredInstance> {
    let Some(entries) = body.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| serde_json::from_value::<PipedListing>(entry.clone()).ok())
        .filter(|listing| !listing.cdn)
        .filter_map(|listing| {
            let url = listing.api_url.filter(|u| !u.trim().is_empty())?;
            Some(DiscoveredInstance {
                url: url.trim_end_matches('/').to_string(),
                name: listing.name.unwrap_or_else(|| "Unknown".into()),
                region: listing.locations,
                score: listing.uptime.unwrap_or(0.0),
                version: None,
            })
        })
        .collect()
}

/// Parse the Invidious instance list (`[[host, info], ...]`).
///
/// Keeps HTTPS instances with the API enabled, scored by total users.
pub fn parse_invidious(body: &Value) -> Vec<DiscoveredInstance> {
    let Some(entries) = body.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            serde_json::from_value::<(String, InvidiousListing)>(entry.clone()).ok()
        })
        .filter(|(_, info)| info.api == Some(true) && info.kind.as_deref() == Some("https"))
        .map(|(host, info)| {
            let users = info
                .stats
                .as_ref()
                .and_then(|s| s.pointer("/usage/users/total"))
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            DiscoveredInstance {
                url: format!("https://{}", host.trim_end_matches('/')),
                name: host,
                region: info.region,
                score: users,
                version: None,
            }
        })
        .collect()
}

/// Interpret a cobalt instance's root document.
///
/// An instance is live if its `GET /` JSON carries a `cobalt` object.
pub fn parse_cobalt_probe(url: &str, body: &Value) -> Option<DiscoveredInstance> {
    let info = body.get("cobalt")?.as_object()?;
    Some(DiscoveredInstance {
        url: url.trim_end_matches('/').to_string(),
        name: info
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or(url)
            .to_string(),
        region: None,
        score: 0.0,
        version: info
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Sort best-first by score and keep the top `max`.
pub fn rank_and_truncate(mut instances: Vec<DiscoveredInstance>, max: usize) -> Vec<DiscoveredInstance> {
    instances.sort_by(|a, b| b.score.total_cmp(&a.score));
    instances.truncate(max);
    instances
}
