//! Resolution request type.

use serde::{Deserialize, Serialize};

/// Length of a provider-native video identifier.
const VIDEO_ID_LEN: usize = 11;

/// Whether `id` looks like a provider-native 11-character video identifier.
///
/// Only the primary and federation layers require this; the fallback layer
/// can search by title/artist instead.
pub fn is_video_id(id: &str) -> bool {
    id.len() == VIDEO_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// A single resolution request: the identifier plus optional search hints.
///
/// ```rust
/// # use bifrost::ResolveRequest;
/// let req = ResolveRequest::new("dQw4w9WgXcQ").title("Never Gonna Give You Up");
/// assert!(req.has_video_id());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveRequest {
    /// Content identifier.
    pub id: String,
    /// Track title hint, used by the fallback search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Artist hint, used by the fallback search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
}

impl ResolveRequest {
    /// Create a request for an identifier with no hints.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Set the title hint. Empty strings are treated as absent.
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = non_empty(title.into());
        self
    }

    /// Set the artist hint. Empty strings are treated as absent.
    pub fn artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = non_empty(artist.into());
        self
    }

    /// Whether the identifier is a valid provider-native video id.
    pub fn has_video_id(&self) -> bool {
        is_video_id(&self.id)
    }

    /// Canonical watch URL for the identifier, if it is a video id.
    pub fn video_url(&self) -> Option<String> {
        self.has_video_id()
            .then(|| format!("https://www.youtube.com/watch?v={}", self.id))
    }

    /// Free-text search query built from the hints (`"{title} {artist} audio"`).
    ///
    /// Returns `None` without a title.
    pub fn search_query(&self) -> Option<String> {
        let title = self.title.as_deref()?;
        let query = match self.artist.as_deref() {
            Some(artist) => format!("{title} {artist} audio"),
            None => format!("{title} audio"),
        };
        Some(query)
    }

    /// Key under which this request's result is cached.
    ///
    /// A video id is its own key. Anything else is resolved by search, so it
    /// is keyed on the normalized query (`"search:..."`). Requests with
    /// neither are not cacheable.
    pub fn cache_key(&self) -> Option<String> {
        if self.has_video_id() {
            return Some(self.id.clone());
        }
        let query = self.search_query()?;
        let normalized = query
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        Some(format!("search:{normalized}"))
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_eleven_char_ids() {
        assert!(is_video_id("abc12345678"));
        assert!(is_video_id("dQw4w9WgXcQ"));
        assert!(is_video_id("a-b_c-d_e-f"));
    }

    #[test]
    fn rejects_wrong_length_or_charset() {
        assert!(!is_video_id(""));
        assert!(!is_video_id("abc"));
        assert!(!is_video_id("abc123456789"));
        assert!(!is_video_id("abc 2345678"));
        assert!(!is_video_id("abc/2345678"));
    }

    #[test]
    fn video_url_only_for_valid_ids() {
        assert_eq!(
            ResolveRequest::new("abc12345678").video_url().as_deref(),
            Some("https://www.youtube.com/watch?v=abc12345678")
        );
        assert!(ResolveRequest::new("song-42").video_url().is_none());
    }

    #[test]
    fn search_query_from_hints() {
        let req = ResolveRequest::new("song-42")
            .title("Blue Monday")
            .artist("New Order");
        assert_eq!(
            req.search_query().as_deref(),
            Some("Blue Monday New Order audio")
        );

        let title_only = ResolveRequest::new("song-42").title("Blue Monday");
        assert_eq!(
            title_only.search_query().as_deref(),
            Some("Blue Monday audio")
        );
    }

    #[test]
    fn blank_hints_are_absent() {
        let req = ResolveRequest::new("x").title("  ").artist("");
        assert!(req.title.is_none());
        assert!(req.artist.is_none());
        assert!(req.search_query().is_none());
    }

    #[test]
    fn cache_key_is_the_video_id() {
        let req = ResolveRequest::new("dQw4w9WgXcQ").title("Song");
        assert_eq!(req.cache_key().as_deref(), Some("dQw4w9WgXcQ"));
    }

    #[test]
    fn search_requests_key_on_normalized_query() {
        let a = ResolveRequest::new("").title("Blue  Monday").artist("New Order");
        let b = ResolveRequest::new("deezer:1").title("blue monday").artist("NEW ORDER");
        assert_eq!(a.cache_key().as_deref(), Some("search:blue monday new order audio"));
        assert_eq!(a.cache_key(), b.cache_key());

        let other = ResolveRequest::new("").title("Temptation").artist("New Order");
        assert_ne!(a.cache_key(), other.cache_key());
    }

    #[test]
    fn no_id_and_no_title_is_uncacheable() {
        assert!(ResolveRequest::new("").cache_key().is_none());
        assert!(ResolveRequest::new("song-42").artist("Band").cache_key().is_none());
    }
}
