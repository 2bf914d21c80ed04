//! Endpoint context and URL building.
//!
//! Bundles the server base URL and endpoint paths that every connection
//! (audio stream, event subscription, control-plane calls) derives from.
//! Once a fingerprint is known it must appear on every subsequent stream
//! and event URL; the builders here take it explicitly so callers cannot
//! forget it.

use uuid::Uuid;

use crate::protocol::{
    CACHE_BUST_PARAM, DEFAULT_EVENTS_PATH, DEFAULT_SNAPSHOT_PATH, DEFAULT_STREAM_PATH,
    FINGERPRINT_PARAM, NEXT_TRACK_PATH, REFRESH_PATH,
};

/// Server endpoint configuration shared across the session.
#[derive(Debug, Clone)]
pub struct EndpointContext {
    base_url: String,
    stream_path: String,
    events_path: String,
    snapshot_path: String,
}

impl EndpointContext {
    /// Creates a context with default endpoint paths.
    ///
    /// A trailing slash on the base URL is stripped so path joins stay
    /// predictable.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            events_path: DEFAULT_EVENTS_PATH.to_string(),
            snapshot_path: DEFAULT_SNAPSHOT_PATH.to_string(),
        }
    }

    /// Overrides the audio stream path.
    #[must_use]
    pub fn with_stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = path.into();
        self
    }

    /// Overrides the event subscription path.
    #[must_use]
    pub fn with_events_path(mut self, path: impl Into<String>) -> Self {
        self.events_path = path.into();
        self
    }

    /// Overrides the snapshot path.
    #[must_use]
    pub fn with_snapshot_path(mut self, path: impl Into<String>) -> Self {
        self.snapshot_path = path.into();
        self
    }

    /// Composes the audio stream URL.
    ///
    /// Always carries a cache-bust token; carries the fingerprint once one
    /// is bound. A missing fingerprint asks the server to mint a session.
    #[must_use]
    pub fn stream_url(&self, fingerprint: Option<&str>) -> String {
        let mut url = format!(
            "{}{}?{}={}",
            self.base_url,
            self.stream_path,
            CACHE_BUST_PARAM,
            Uuid::new_v4().simple()
        );
        if let Some(fp) = fingerprint {
            url.push_str(&format!("&{}={}", FINGERPRINT_PARAM, fp));
        }
        url
    }

    /// Composes the event subscription URL.
    #[must_use]
    pub fn events_url(&self, fingerprint: Option<&str>) -> String {
        match fingerprint {
            Some(fp) => format!(
                "{}{}?{}={}",
                self.base_url, self.events_path, FINGERPRINT_PARAM, fp
            ),
            None => format!("{}{}", self.base_url, self.events_path),
        }
    }

    /// URL of the explorer snapshot endpoint.
    #[must_use]
    pub fn snapshot_url(&self) -> String {
        format!("{}{}", self.base_url, self.snapshot_path)
    }

    /// URL of the session refresh endpoint.
    #[must_use]
    pub fn refresh_url(&self) -> String {
        format!("{}{}", self.base_url, REFRESH_PATH)
    }

    /// URL of the manual next-track endpoint.
    #[must_use]
    pub fn next_track_url(&self) -> String {
        format!("{}{}", self.base_url, NEXT_TRACK_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_stripped() {
        let ctx = EndpointContext::new("http://localhost:3000/");
        assert_eq!(ctx.snapshot_url(), "http://localhost:3000/explorer-snapshot");
    }

    #[test]
    fn stream_url_without_fingerprint_has_only_cache_bust() {
        let ctx = EndpointContext::new("http://localhost:3000");
        let url = ctx.stream_url(None);
        assert!(url.starts_with("http://localhost:3000/stream?t="));
        assert!(!url.contains("fingerprint"));
    }

    #[test]
    fn stream_url_propagates_fingerprint() {
        let ctx = EndpointContext::new("http://localhost:3000");
        let url = ctx.stream_url(Some("fp-123"));
        assert!(url.contains("fingerprint=fp-123"));
    }

    #[test]
    fn stream_urls_differ_per_call() {
        let ctx = EndpointContext::new("http://localhost:3000");
        assert_ne!(ctx.stream_url(None), ctx.stream_url(None));
    }

    #[test]
    fn events_url_with_and_without_fingerprint() {
        let ctx = EndpointContext::new("http://localhost:3000");
        assert_eq!(ctx.events_url(None), "http://localhost:3000/events");
        assert_eq!(
            ctx.events_url(Some("fp")),
            "http://localhost:3000/events?fingerprint=fp"
        );
    }

    #[test]
    fn custom_paths_are_honored() {
        let ctx = EndpointContext::new("http://localhost:3000")
            .with_stream_path("/audio")
            .with_events_path("/sse")
            .with_snapshot_path("/explorer");
        assert!(ctx.stream_url(None).starts_with("http://localhost:3000/audio?"));
        assert_eq!(ctx.events_url(None), "http://localhost:3000/sse");
        assert_eq!(ctx.snapshot_url(), "http://localhost:3000/explorer");
    }
}
