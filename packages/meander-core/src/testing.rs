//! Shared fixtures for unit tests: recording hooks and a scripted
//! control plane.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::api::{ControlPlane, NextTrackRequest, RefreshRequest, RefreshResponse};
use crate::error::{ApiError, ApiResult};
use crate::hooks::{CrossfadePhase, PresentationHooks};
use crate::state::HealthIndicator;
use crate::track::{ExplorerSnapshot, NextTrackProposal, Track};

/// Builds a track with the given identifier and a 3-minute duration.
pub fn track(id: &str) -> Track {
    Track {
        identifier: id.to_string(),
        title: format!("Title {id}"),
        artist: format!("Artist {id}"),
        duration_ms: 180_000,
        album_cover_url: None,
        start_time: None,
    }
}

/// Builds a snapshot whose current track is `id`.
pub fn snapshot_for(id: &str) -> ExplorerSnapshot {
    ExplorerSnapshot {
        current_track: Some(track(id)),
        directions: std::collections::HashMap::new(),
        next_track: None,
    }
}

/// One observed presentation callback.
#[derive(Debug, Clone, PartialEq)]
pub enum HookCall {
    NowPlaying(String),
    PopPlaylistHead(String),
    StartProgress {
        duration_secs: f64,
        start_position_secs: f64,
        resync: bool,
    },
    ClearPendingProgress,
    ShowNextTrack(Option<String>),
    RenderDirections(Option<String>),
    Crossfade(CrossfadePhase),
    SetHealth(HealthIndicator),
    MarkDeckStale(bool),
    RequestReload(String),
}

/// Hooks implementation that records every call.
#[derive(Default)]
pub struct RecordingHooks {
    calls: Mutex<Vec<HookCall>>,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded calls.
    pub fn calls(&self) -> Vec<HookCall> {
        self.calls.lock().clone()
    }

    /// Drops everything recorded so far.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    /// Counts calls matching the predicate.
    pub fn count(&self, pred: impl Fn(&HookCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    fn push(&self, call: HookCall) {
        self.calls.lock().push(call);
    }
}

impl PresentationHooks for RecordingHooks {
    fn show_now_playing(&self, track: &Track) {
        self.push(HookCall::NowPlaying(track.identifier.clone()));
    }

    fn pop_playlist_head(&self, track_id: &str) {
        self.push(HookCall::PopPlaylistHead(track_id.to_string()));
    }

    fn start_progress(&self, duration_secs: f64, start_position_secs: f64, resync: bool) {
        self.push(HookCall::StartProgress {
            duration_secs,
            start_position_secs,
            resync,
        });
    }

    fn clear_pending_progress(&self) {
        self.push(HookCall::ClearPendingProgress);
    }

    fn show_next_track(&self, proposal: Option<&NextTrackProposal>) {
        self.push(HookCall::ShowNextTrack(
            proposal.and_then(|p| p.identifier()).map(str::to_string),
        ));
    }

    fn render_directions(&self, snapshot: &ExplorerSnapshot) {
        self.push(HookCall::RenderDirections(
            snapshot.current_identifier().map(str::to_string),
        ));
    }

    fn crossfade(&self, phase: CrossfadePhase) {
        self.push(HookCall::Crossfade(phase));
    }

    fn set_health(&self, health: HealthIndicator, _code: Option<&'static str>) {
        self.push(HookCall::SetHealth(health));
    }

    fn mark_deck_stale(&self, stale: bool) {
        self.push(HookCall::MarkDeckStale(stale));
    }

    fn request_reload(&self, reason: &str) {
        self.push(HookCall::RequestReload(reason.to_string()));
    }
}

/// Scripted control plane recording every request.
#[derive(Default)]
pub struct MockControlPlane {
    /// Queued snapshot responses; when empty, snapshot fetches fail.
    pub snapshot_responses: Mutex<VecDeque<ApiResult<ExplorerSnapshot>>>,
    /// Queued refresh responses; when empty, refreshes fail.
    pub refresh_responses: Mutex<VecDeque<ApiResult<RefreshResponse>>>,
    /// Whether next-track submissions succeed.
    pub accept_selections: Mutex<bool>,

    pub snapshot_requests: Mutex<Vec<String>>,
    pub refresh_requests: Mutex<Vec<RefreshRequest>>,
    pub next_track_requests: Mutex<Vec<NextTrackRequest>>,
}

impl MockControlPlane {
    pub fn new() -> Self {
        Self {
            accept_selections: Mutex::new(true),
            ..Self::default()
        }
    }

    pub fn queue_snapshot(&self, response: ApiResult<ExplorerSnapshot>) {
        self.snapshot_responses.lock().push_back(response);
    }

    pub fn queue_refresh(&self, response: ApiResult<RefreshResponse>) {
        self.refresh_responses.lock().push_back(response);
    }

    pub fn refresh_stages(&self) -> Vec<Option<String>> {
        self.refresh_requests
            .lock()
            .iter()
            .map(|r| r.stage.clone())
            .collect()
    }
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn fetch_snapshot(&self, current_track_id: &str) -> ApiResult<ExplorerSnapshot> {
        self.snapshot_requests
            .lock()
            .push(current_track_id.to_string());
        self.snapshot_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Status(503)))
    }

    async fn refresh(&self, request: RefreshRequest) -> ApiResult<RefreshResponse> {
        self.refresh_requests.lock().push(request);
        self.refresh_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Status(503)))
    }

    async fn submit_next_track(&self, request: NextTrackRequest) -> ApiResult<()> {
        self.next_track_requests.lock().push(request);
        if *self.accept_selections.lock() {
            Ok(())
        } else {
            Err(ApiError::Rejected("selection rejected".into()))
        }
    }
}
