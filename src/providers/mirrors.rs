//! Mirror protocols: Piped and Invidious.
//!
//! Both expose per-video JSON listing several audio formats; the adapter
//! takes the highest bitrate.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::http;
use crate::directory::Family;
use crate::{BifrostError, Result};

/// A federated mirror API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorProtocol {
    Piped,
    Invidious,
}

impl MirrorProtocol {
    pub const ALL: [MirrorProtocol; 2] = [MirrorProtocol::Piped, MirrorProtocol::Invidious];

    pub fn family(&self) -> Family {
        match self {
            MirrorProtocol::Piped => Family::Piped,
            MirrorProtocol::Invidious => Family::Invidious,
        }
    }

    pub fn name(&self) -> &'static str {
        self.family().as_str()
    }

    /// Per-video endpoint on `instance`.
    pub fn endpoint(&self, instance: &str, video_id: &str) -> String {
        match self {
            MirrorProtocol::Piped => http::join_url(instance, &format!("/streams/{video_id}")),
            MirrorProtocol::Invidious => {
                http::join_url(instance, &format!("/api/v1/videos/{video_id}"))
            }
        }
    }

    /// Pick the best audio URL out of a response body.
    pub fn best_audio(&self, body: Value) -> Result<String> {
        let best = match self {
            MirrorProtocol::Piped => {
                let streams: PipedStreams = serde_json::from_value(body)
                    .map_err(|e| BifrostError::Malformed(e.to_string()))?;
                streams
                    .audio_streams
                    .into_iter()
                    .filter_map(|s| Some((s.bitrate, s.url.filter(|u| !u.is_empty())?)))
                    .max_by_key(|(bitrate, _)| *bitrate)
            }
            MirrorProtocol::Invidious => {
                let video: InvidiousVideo = serde_json::from_value(body)
                    .map_err(|e| BifrostError::Malformed(e.to_string()))?;
                video
                    .adaptive_formats
                    .into_iter()
                    .filter(|f| f.mime.starts_with("audio/"))
                    .filter_map(|f| Some((f.bitrate, f.url.filter(|u| !u.is_empty())?)))
                    .max_by_key(|(bitrate, _)| *bitrate)
            }
        };
        best.map(|(_, url)| url)
            .ok_or_else(|| BifrostError::NotFound(format!("{} listed no audio streams", self.name())))
    }
}

#[derive(Debug, Deserialize)]
struct PipedStreams {
    #[serde(default, rename = "audioStreams")]
    audio_streams: Vec<PipedAudioStream>,
}

#[derive(Debug, Deserialize)]
struct PipedAudioStream {
    #[serde(default)]
    url: Option<String>,
    #[serde(default, deserialize_with = "lenient_bitrate")]
    bitrate: u64,
}

#[derive(Debug, Deserialize)]
struct InvidiousVideo {
    #[serde(default, rename = "adaptiveFormats")]
    adaptive_formats: Vec<InvidiousFormat>,
}

#[derive(Debug, Deserialize)]
struct InvidiousFormat {
    #[serde(default, rename = "type")]
    mime: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default, deserialize_with = "lenient_bitrate")]
    bitrate: u64,
}

/// Bitrates arrive as numbers or numeric strings; anything else is 0.
fn lenient_bitrate<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}
