//! Configurable JSON-over-HTTP sources.
//!
//! An [`AlternativeSpec`] describes a one-request extraction service: a URL
//! template, an optional JSON body template, and JSON pointers to where the
//! audio URL lives in the response. Templates may use `{id}` and
//! `{video_url}`. Alternatives race inside the federation layer.
//!
//! ```toml
//! [[alternatives]]
//! name = "savetube"
//! method = "get"
//! url = "https://api.savetube.example/info?url={video_url}"
//! url_pointers = ["/audio/url", "/formats/0/url"]
//! success_pointer = "/ok"
//! ```

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::http;
use crate::types::ResolveRequest;
use crate::{BifrostError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

/// Description of one alternative source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativeSpec {
    /// Name, also used as the rate-limit key.
    pub name: String,
    #[serde(default)]
    pub method: HttpMethod,
    /// URL template.
    pub url: String,
    /// JSON body template, sent with `POST`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// JSON pointers tried in order; the first non-empty string wins.
    pub url_pointers: Vec<String>,
    /// Pointer to a field that must be `true` or `"ok"` for the response to
    /// count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_pointer: Option<String>,
}

impl AlternativeSpec {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method: HttpMethod::Get,
            url: url.into(),
            body: None,
            url_pointers: Vec::new(),
            success_pointer: None,
        }
    }

    pub fn post(mut self, body: Value) -> Self {
        self.method = HttpMethod::Post;
        self.body = Some(body);
        self
    }

    pub fn url_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.url_pointers.push(pointer.into());
        self
    }

    pub fn success_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.success_pointer = Some(pointer.into());
        self
    }

    /// Reject specs that could never produce a URL.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(BifrostError::Configuration(format!(
                "alternative '{}': {reason}",
                self.name
            )))
        };
        if self.name.trim().is_empty() {
            return invalid("name is empty");
        }
        if self.url_pointers.is_empty() {
            return invalid("no url_pointers");
        }
        let pointers = self.url_pointers.iter().chain(self.success_pointer.iter());
        if let Some(bad) = pointers.into_iter().find(|p| !p.starts_with('/')) {
            return invalid(&format!("pointer '{bad}' must start with '/'"));
        }
        Ok(())
    }

    /// Substitute request fields into a template string.
    pub fn render(template: &str, request: &ResolveRequest) -> String {
        let video_url = request.video_url().unwrap_or_default();
        template
            .replace("{id}", &request.id)
            .replace("{video_url}", &video_url)
    }

    fn render_body(value: &Value, request: &ResolveRequest) -> Value {
        match value {
            Value::String(s) => Value::String(Self::render(s, request)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| Self::render_body(v, request)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::render_body(v, request)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Pull the audio URL out of a response body.
    pub fn extract(&self, body: &Value) -> Result<String> {
        if let Some(pointer) = &self.success_pointer {
            let status = body.pointer(pointer);
            let ok = matches!(status, Some(Value::Bool(true)))
                || status.and_then(Value::as_str) == Some("ok");
            if !ok {
                return Err(BifrostError::NotFound(format!(
                    "{} reported failure",
                    self.name
                )));
            }
        }
        self.url_pointers
            .iter()
            .filter_map(|p| body.pointer(p).and_then(Value::as_str))
            .find(|u| !u.is_empty())
            .map(str::to_string)
            .ok_or_else(|| BifrostError::Malformed(format!("{} response has no url", self.name)))
    }

    /// Issue the request and extract the URL.
    pub async fn fetch(&self, client: &Client, request: &ResolveRequest) -> Result<String> {
        let url = Self::render(&self.url, request);
        let builder = match self.method {
            HttpMethod::Get => client.get(url),
            HttpMethod::Post => {
                let body = self
                    .body
                    .as_ref()
                    .map(|b| Self::render_body(b, request))
                    .unwrap_or(Value::Null);
                client.post(url).json(&body)
            }
        };
        let body = http::send_json(builder).await?;
        self.extract(&body)
    }
}
