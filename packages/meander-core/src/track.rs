//! Track and explorer snapshot wire types.
//!
//! Tracks are opaque identifiers plus display metadata. The explorer
//! snapshot is a replaceable payload describing the navigational directions
//! available from the current track.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A track as described by the server.
///
/// The identifier is opaque (an md5 on the wire); durations travel in
/// milliseconds and are converted to seconds at the presentation boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Opaque track identifier.
    pub identifier: String,

    /// Display title.
    #[serde(default)]
    pub title: String,

    /// Display artist.
    #[serde(default)]
    pub artist: String,

    /// Track duration in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,

    /// Optional album cover URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_cover_url: Option<String>,

    /// Server-side start time of this track within the stream, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
}

impl Track {
    /// Track duration in seconds.
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        self.duration_ms as f64 / 1000.0
    }
}

/// The server's (or the user's) proposal for what plays next.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextTrackProposal {
    /// The proposed track, when the server has resolved one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<Track>,

    /// Human-readable direction name the proposal came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,

    /// Direction key into the snapshot's direction map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction_key: Option<String>,
}

impl NextTrackProposal {
    /// Identifier of the proposed track, if any.
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        self.track.as_ref().map(|t| t.identifier.as_str())
    }
}

/// One navigational direction from the current track.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectionInfo {
    /// Sample tracks reachable in this direction.
    #[serde(default)]
    pub sample_tracks: Vec<Track>,

    /// Key of the opposite direction, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opposite_direction: Option<String>,

    /// Whether this direction points at an outlier cluster.
    #[serde(default)]
    pub is_outlier: bool,
}

/// The latest accepted explorer payload.
///
/// Treated as replaceable: the reconciler stores the most recent accepted
/// snapshot plus one cloned backup for stale-deck fallback.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorerSnapshot {
    /// The track the snapshot was computed for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_track: Option<Track>,

    /// Direction key to direction record.
    #[serde(default)]
    pub directions: HashMap<String, DirectionInfo>,

    /// The server's next-track proposal as of this snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_track: Option<NextTrackProposal>,
}

impl ExplorerSnapshot {
    /// Identifier of the snapshot's current track, if any.
    #[must_use]
    pub fn current_identifier(&self) -> Option<&str> {
        self.current_track.as_ref().map(|t| t.identifier.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str) -> Track {
        Track {
            identifier: id.to_string(),
            title: "Title".to_string(),
            artist: "Artist".to_string(),
            duration_ms: 215_000,
            album_cover_url: None,
            start_time: None,
        }
    }

    #[test]
    fn duration_converts_to_seconds() {
        assert!((track("a").duration_secs() - 215.0).abs() < f64::EPSILON);
    }

    #[test]
    fn track_deserializes_from_camel_case() {
        let json = r#"{
            "identifier": "d41d8cd9",
            "title": "Song",
            "artist": "Band",
            "durationMs": 180000,
            "albumCoverUrl": "http://example/cover.jpg"
        }"#;
        let t: Track = serde_json::from_str(json).unwrap();
        assert_eq!(t.identifier, "d41d8cd9");
        assert_eq!(t.duration_ms, 180_000);
        assert_eq!(t.album_cover_url.as_deref(), Some("http://example/cover.jpg"));
    }

    #[test]
    fn snapshot_tolerates_missing_fields() {
        let snap: ExplorerSnapshot = serde_json::from_str("{}").unwrap();
        assert!(snap.current_track.is_none());
        assert!(snap.directions.is_empty());
        assert!(snap.next_track.is_none());
    }

    #[test]
    fn snapshot_parses_directions() {
        let json = r#"{
            "currentTrack": {"identifier": "abc"},
            "directions": {
                "faster": {"sampleTracks": [{"identifier": "x"}], "oppositeDirection": "slower"},
                "weirder": {"isOutlier": true}
            },
            "nextTrack": {"track": {"identifier": "x"}, "directionKey": "faster"}
        }"#;
        let snap: ExplorerSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.current_identifier(), Some("abc"));
        assert_eq!(snap.directions.len(), 2);
        assert_eq!(
            snap.directions["faster"].opposite_direction.as_deref(),
            Some("slower")
        );
        assert!(snap.directions["weirder"].is_outlier);
        assert_eq!(snap.next_track.unwrap().identifier(), Some("x"));
    }
}
