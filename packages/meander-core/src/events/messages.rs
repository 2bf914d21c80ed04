//! Wire types of the event subscription.

use serde::Deserialize;

use crate::track::{NextTrackProposal, Track};

/// One record of the newline-delimited JSON event stream.
///
/// Unknown `type` values fail to parse and are skipped by the channel;
/// `explorer_snapshot` is recognized but deprecated (snapshots travel over
/// their own request/response endpoint).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Bootstrap: carries the session id and fingerprint binding.
    Connected(ConnectedMessage),
    /// Advisory current/next track and timing.
    Heartbeat(Heartbeat),
    /// The server accepted a manual selection.
    SelectionAck(SelectionMessage),
    /// A manual selection is queued and ready.
    SelectionReady(SelectionMessage),
    /// A manual selection was rejected.
    SelectionFailed(SelectionMessage),
    /// Server-side error payload.
    Error(ErrorMessage),
    /// Deprecated inline snapshot; ignored.
    ExplorerSnapshot(serde_json::Value),
}

/// Payload of the `connected` bootstrap message.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedMessage {
    /// Server-assigned session id.
    #[serde(default)]
    pub session_id: Option<String>,
    /// The fingerprint binding audio stream and event channel.
    #[serde(default)]
    pub fingerprint: Option<String>,
}

/// Advisory heartbeat.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    /// Fingerprint the heartbeat was addressed to.
    #[serde(default)]
    pub fingerprint: Option<String>,

    /// What the server believes is playing right now.
    pub current_track: Track,

    /// The server's next-track proposal.
    #[serde(default)]
    pub next_track: Option<NextTrackProposal>,

    /// Whether the server acknowledges a manual override as its proposal.
    #[serde(default, rename = "override")]
    pub override_active: Option<bool>,

    /// Server-side drift classification, informational only.
    #[serde(default)]
    pub drift_state: Option<String>,

    /// Server-side timing for the current track.
    #[serde(default)]
    pub timing: Option<HeartbeatTiming>,
}

impl Heartbeat {
    /// Server-side elapsed position within the current track, in seconds.
    #[must_use]
    pub fn elapsed_secs(&self) -> Option<f64> {
        self.timing
            .as_ref()
            .and_then(|t| t.elapsed_ms)
            .map(|ms| ms / 1000.0)
    }
}

/// Timing block of a heartbeat.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatTiming {
    /// Milliseconds into the current track.
    #[serde(default)]
    pub elapsed_ms: Option<f64>,
}

/// Payload shared by the selection acknowledgement messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionMessage {
    /// Identifier of the selected track.
    #[serde(default)]
    pub track_md5: Option<String>,

    /// The resolved track, when the server includes it.
    #[serde(default)]
    pub track: Option<Track>,

    /// Failure reason, on `selection_failed`.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Server error payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    /// Machine-readable reason.
    #[serde(default)]
    pub reason: Option<String>,

    /// Human-readable message.
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorMessage {
    /// Whether the server no longer knows our fingerprint. This escalates
    /// straight to a new session instead of a reconnect.
    #[must_use]
    pub fn is_fingerprint_not_found(&self) -> bool {
        let marker = "fingerprint_not_found";
        self.reason.as_deref() == Some(marker) || self.message.as_deref() == Some(marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connected() {
        let msg: ServerMessage = serde_json::from_str(
            r#"{"type":"connected","sessionId":"s-1","fingerprint":"fp-9"}"#,
        )
        .unwrap();
        match msg {
            ServerMessage::Connected(c) => {
                assert_eq!(c.session_id.as_deref(), Some("s-1"));
                assert_eq!(c.fingerprint.as_deref(), Some("fp-9"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_heartbeat_with_timing() {
        let msg: ServerMessage = serde_json::from_str(
            r#"{
                "type": "heartbeat",
                "fingerprint": "fp-9",
                "currentTrack": {"identifier": "abc", "title": "T", "artist": "A", "durationMs": 200000},
                "nextTrack": {"track": {"identifier": "def"}, "directionKey": "faster"},
                "override": false,
                "timing": {"elapsedMs": 62500}
            }"#,
        )
        .unwrap();
        match msg {
            ServerMessage::Heartbeat(hb) => {
                assert_eq!(hb.current_track.identifier, "abc");
                assert_eq!(hb.next_track.as_ref().unwrap().identifier(), Some("def"));
                assert_eq!(hb.elapsed_secs(), Some(62.5));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_selection_messages() {
        let ack: ServerMessage =
            serde_json::from_str(r#"{"type":"selection_ack","trackMd5":"abc"}"#).unwrap();
        assert!(matches!(ack, ServerMessage::SelectionAck(_)));

        let failed: ServerMessage =
            serde_json::from_str(r#"{"type":"selection_failed","reason":"not_found"}"#).unwrap();
        match failed {
            ServerMessage::SelectionFailed(s) => {
                assert_eq!(s.reason.as_deref(), Some("not_found"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn detects_fingerprint_not_found() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"error","reason":"fingerprint_not_found"}"#).unwrap();
        match msg {
            ServerMessage::Error(e) => assert!(e.is_fingerprint_not_found()),
            other => panic!("unexpected message: {other:?}"),
        }

        let generic: ServerMessage =
            serde_json::from_str(r#"{"type":"error","message":"backlog"}"#).unwrap();
        match generic {
            ServerMessage::Error(e) => assert!(!e.is_fingerprint_not_found()),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn explorer_snapshot_is_recognized_but_opaque() {
        let msg: ServerMessage = serde_json::from_str(
            r#"{"type":"explorer_snapshot","directions":{"faster":{}}}"#,
        )
        .unwrap();
        assert!(matches!(msg, ServerMessage::ExplorerSnapshot(_)));
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        assert!(serde_json::from_str::<ServerMessage>(r#"{"type":"telemetry"}"#).is_err());
    }
}
