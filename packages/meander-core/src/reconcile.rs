//! Presentation reconciler.
//!
//! Reconciles what the server says is playing with what the listener
//! actually hears. Heartbeats are advisory: a track-change heartbeat only
//! arms a fallback, and the visual flip waits for the `track-boundary`
//! sentinel plus the buffer-delay between decode and the listener's ears.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
// Timer-driven state keeps tokio's clock so paused-time tests stay coherent.
use tokio::time::Instant;

use crate::api::ControlPlane;
use crate::error::ErrorCode;
use crate::events::{Heartbeat, SelectionMessage};
use crate::hooks::{CrossfadePhase, PresentationHooks};
use crate::output::{OutputSink, PlaybackClock};
use crate::pcm::Sentinel;
use crate::state::{PlayerState, ReconcileConfig};
use crate::track::{ExplorerSnapshot, NextTrackProposal, Track};

/// Requests the reconciler raises back to the session controller.
#[derive(Debug)]
pub enum ReconcilerRequest {
    /// The server and the local view disagree beyond tolerance; the
    /// session should resynchronize from scratch.
    FullResync {
        /// Human-readable cause for the log.
        reason: String,
    },
}

// Timer slots, cleared on teardown.
const TIMER_FALLBACK: &str = "heartbeat-fallback";
const TIMER_FLIP: &str = "sentinel-flip";
const TIMER_FORCE_SNAPSHOT: &str = "snapshot-force-apply";
const TIMER_REVEAL: &str = "next-track-reveal";
const TIMER_SNAPSHOT_FETCH: &str = "snapshot-fetch";

/// Named abortable timers; arming a slot aborts its predecessor.
#[derive(Default)]
struct TimerBag {
    handles: Mutex<HashMap<&'static str, AbortHandle>>,
}

impl TimerBag {
    fn arm(&self, key: &'static str, handle: AbortHandle) {
        if let Some(old) = self.handles.lock().insert(key, handle) {
            old.abort();
        }
    }

    fn cancel(&self, key: &'static str) {
        if let Some(handle) = self.handles.lock().remove(key) {
            handle.abort();
        }
    }

    fn cancel_all(&self) {
        for (_, handle) in self.handles.lock().drain() {
            handle.abort();
        }
    }
}

/// Where the progress animation was anchored, for drift measurement.
#[derive(Debug, Clone)]
struct ProgressAnchor {
    duration_secs: f64,
    start_position_secs: f64,
    /// Software clock position when the animation started.
    clock_at_start: f64,
    /// Wall time when the animation started (the UI animates on wall time).
    wall_at_start: Instant,
}

impl ProgressAnchor {
    fn audio_elapsed(&self, clock_now: f64) -> f64 {
        self.start_position_secs + (clock_now - self.clock_at_start).max(0.0)
    }

    fn visual_elapsed(&self, now: Instant) -> f64 {
        self.start_position_secs + now.duration_since(self.wall_at_start).as_secs_f64()
    }

    fn visual_fraction(&self, now: Instant) -> f64 {
        if self.duration_secs <= 0.0 {
            return 1.0;
        }
        (self.visual_elapsed(now) / self.duration_secs).clamp(0.0, 1.0)
    }
}

#[derive(Default)]
struct ReconcileState {
    /// What the listener is hearing, per the last applied flip.
    current: Option<Track>,
    /// The server's next-track proposal.
    server_next: Option<NextTrackProposal>,
    /// User override: wins over the server proposal until adopted or the
    /// track changes.
    pending_manual: Option<String>,
    /// Target of an armed heartbeat fallback.
    pending_heartbeat_target: Option<Track>,
    /// Proposal held back to avoid end-of-card flicker.
    deferred_next: Option<NextTrackProposal>,
    /// Latest accepted snapshot and its clone for stale-deck fallback.
    snapshot: Option<ExplorerSnapshot>,
    snapshot_backup: Option<ExplorerSnapshot>,
    /// Snapshot that arrived ahead of the flip, buffered until the
    /// heartbeat confirms it (or the force-apply timer expires).
    pending_snapshot: Option<ExplorerSnapshot>,
    progress: Option<ProgressAnchor>,
    last_sentinel_at: Option<Instant>,
    /// When the server first disagreed about the current track.
    mismatch_since: Option<Instant>,
}

/// The presentation synchronisation engine.
pub struct Reconciler {
    config: ReconcileConfig,
    hooks: Arc<dyn PresentationHooks>,
    api: Arc<dyn ControlPlane>,
    clock: Arc<PlaybackClock>,
    player: Arc<PlayerState>,
    requests: mpsc::UnboundedSender<ReconcilerRequest>,
    /// Current sink, for buffer-delay probes; swapped across rebuilds.
    sink: Mutex<Option<Arc<dyn OutputSink>>>,
    state: Mutex<ReconcileState>,
    timers: TimerBag,
}

impl Reconciler {
    /// Creates a reconciler wired to its collaborators.
    pub fn new(
        config: ReconcileConfig,
        hooks: Arc<dyn PresentationHooks>,
        api: Arc<dyn ControlPlane>,
        clock: Arc<PlaybackClock>,
        player: Arc<PlayerState>,
        requests: mpsc::UnboundedSender<ReconcilerRequest>,
    ) -> Self {
        Self {
            config,
            hooks,
            api,
            clock,
            player,
            requests,
            sink: Mutex::new(None),
            state: Mutex::new(ReconcileState::default()),
            timers: TimerBag::default(),
        }
    }

    /// Points the buffer-delay probe at the active sink.
    pub fn set_sink(&self, sink: Option<Arc<dyn OutputSink>>) {
        *self.sink.lock() = sink;
    }

    fn buffer_delay(&self) -> f64 {
        self.sink
            .lock()
            .as_ref()
            .map(|s| s.buffer_delay_secs())
            .unwrap_or(0.0)
    }

    /// Identifier of the track the card currently shows.
    #[must_use]
    pub fn current_track_id(&self) -> Option<String> {
        self.state.lock().current.as_ref().map(|t| t.identifier.clone())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Heartbeats
    // ─────────────────────────────────────────────────────────────────────

    /// Handles an advisory heartbeat.
    pub fn on_heartbeat(self: &Arc<Self>, hb: Heartbeat) {
        // Server-bug guard: a next-track equal to the current track is
        // nonsense; drop the whole heartbeat.
        if hb
            .next_track
            .as_ref()
            .and_then(NextTrackProposal::identifier)
            == Some(hb.current_track.identifier.as_str())
        {
            log::debug!("[Reconcile] Ignoring heartbeat: nextTrack equals currentTrack");
            return;
        }

        let now = Instant::now();
        let current_id = self
            .state
            .lock()
            .current
            .as_ref()
            .map(|t| t.identifier.clone());

        match current_id {
            // First-ever track: nothing is on screen yet and no sentinel
            // will announce it, so apply immediately.
            None => self.apply_first_heartbeat(hb, now),
            Some(id) if id == hb.current_track.identifier => self.apply_same_track(hb, now),
            Some(_) => self.arm_track_change(hb, now),
        }
    }

    fn apply_first_heartbeat(self: &Arc<Self>, hb: Heartbeat, now: Instant) {
        let track = hb.current_track.clone();
        let start = hb.elapsed_secs().unwrap_or(0.0);
        let show_next;
        {
            let mut st = self.state.lock();
            st.current = Some(track.clone());
            st.mismatch_since = None;
            st.progress = Some(ProgressAnchor {
                duration_secs: track.duration_secs(),
                start_position_secs: start,
                clock_at_start: self.clock.position_secs(),
                wall_at_start: now,
            });
            show_next = self.adopt_proposal_locked(&mut st, hb.next_track, now);
        }
        self.hooks.show_now_playing(&track);
        self.hooks.start_progress(track.duration_secs(), start, false);
        if let Some(proposal) = show_next {
            self.hooks.show_next_track(Some(&proposal));
        }
        self.request_snapshot(track.identifier);
    }

    fn apply_same_track(self: &Arc<Self>, hb: Heartbeat, now: Instant) {
        let mut resync: Option<(f64, f64)> = None;
        let show_next;
        {
            let mut st = self.state.lock();
            st.mismatch_since = None;

            match st.progress.clone() {
                Some(anchor) => {
                    let audio = anchor.audio_elapsed(self.clock.position_secs());
                    let visual = anchor.visual_elapsed(now);
                    if (audio - visual).abs() > self.config.drift_resync_secs {
                        st.progress = Some(ProgressAnchor {
                            duration_secs: anchor.duration_secs,
                            start_position_secs: audio,
                            clock_at_start: self.clock.position_secs(),
                            wall_at_start: now,
                        });
                        resync = Some((anchor.duration_secs, audio));
                    }
                }
                None => {
                    // Progress was never anchored (reconciler restart);
                    // adopt the server's timing once.
                    let start = hb.elapsed_secs().unwrap_or(0.0);
                    st.progress = Some(ProgressAnchor {
                        duration_secs: hb.current_track.duration_secs(),
                        start_position_secs: start,
                        clock_at_start: self.clock.position_secs(),
                        wall_at_start: now,
                    });
                    resync = Some((hb.current_track.duration_secs(), start));
                }
            }

            show_next = self.adopt_proposal_locked(&mut st, hb.next_track, now);
        }

        if let Some((duration, position)) = resync {
            log::info!(
                "[Reconcile] Progress resync to {:.2}s (drift exceeded {:.2}s)",
                position,
                self.config.drift_resync_secs
            );
            self.hooks.start_progress(duration, position, true);
        }
        if let Some(proposal) = show_next {
            self.hooks.show_next_track(Some(&proposal));
        }
    }

    fn arm_track_change(self: &Arc<Self>, hb: Heartbeat, now: Instant) {
        let target = hb.current_track.clone();
        let mut full_resync = false;
        {
            let mut st = self.state.lock();

            let already_armed = st
                .pending_heartbeat_target
                .as_ref()
                .is_some_and(|t| t.identifier == target.identifier);
            if !already_armed {
                st.pending_heartbeat_target = Some(target.clone());
                // Extended past the nominal fallback when the buffer holds
                // more audio than the fallback would wait for, so a slow
                // drain cannot beat its own sentinel.
                let delay = self
                    .config
                    .heartbeat_fallback_secs
                    .max(self.buffer_delay() + 2.0);
                let this = Arc::clone(self);
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                    this.fallback_fired();
                });
                self.timers.arm(TIMER_FALLBACK, handle.abort_handle());
                log::debug!(
                    "[Reconcile] Track change to {} deferred to sentinel (fallback {:.1}s)",
                    target.identifier,
                    delay
                );
            }

            // Steady-state guard: a persistent disagreement with no recent
            // sentinel means the flip was missed entirely.
            let mismatch_since = *st.mismatch_since.get_or_insert(now);
            let sentinel_recent = st.last_sentinel_at.is_some_and(|t| {
                now.duration_since(t).as_secs_f64() < self.config.steady_mismatch_secs
            });
            if !sentinel_recent
                && now.duration_since(mismatch_since).as_secs_f64()
                    > self.config.steady_mismatch_secs
            {
                st.mismatch_since = None;
                full_resync = true;
            }
        }

        if full_resync {
            let _ = self.requests.send(ReconcilerRequest::FullResync {
                reason: "steady-state current-track mismatch".to_string(),
            });
        }
    }

    /// The fallback timer expired with the card still showing the old
    /// track: apply the heartbeat's data without a sentinel.
    fn fallback_fired(self: &Arc<Self>) {
        let target = {
            let mut st = self.state.lock();
            match st.pending_heartbeat_target.take() {
                Some(target)
                    if st
                        .current
                        .as_ref()
                        .map_or(true, |c| c.identifier != target.identifier) =>
                {
                    Some(target)
                }
                _ => None,
            }
        };
        if let Some(target) = target {
            log::warn!(
                "[Reconcile] Sentinel never arrived; heartbeat fallback flipping to {}",
                target.identifier
            );
            self.apply_track_change(target);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sentinels
    // ─────────────────────────────────────────────────────────────────────

    /// Handles a sentinel observed in the PCM, with the buffer-delay
    /// captured at the moment of observation.
    pub fn on_sentinel(self: &Arc<Self>, kind: Sentinel, buffer_delay_secs: f64) {
        match kind {
            Sentinel::CrossfadeStart => self.hooks.crossfade(CrossfadePhase::Start),
            Sentinel::CrossfadeEnd => self.hooks.crossfade(CrossfadePhase::End),
            Sentinel::TrackBoundary => self.on_track_boundary(buffer_delay_secs),
        }
    }

    fn on_track_boundary(self: &Arc<Self>, buffer_delay_secs: f64) {
        let now = Instant::now();
        let target = {
            let mut st = self.state.lock();
            st.last_sentinel_at = Some(now);
            st.pending_heartbeat_target
                .take()
                .or_else(|| {
                    // Sentinel before heartbeat: the override (when set)
                    // wins over the server proposal as the expected next.
                    st.pending_manual
                        .as_deref()
                        .and_then(|md5| lookup_track(st.snapshot.as_ref(), md5))
                })
                .or_else(|| st.server_next.as_ref().and_then(|p| p.track.clone()))
        };
        self.timers.cancel(TIMER_FALLBACK);

        let Some(target) = target else {
            log::debug!("[Reconcile] Track boundary with no known target; waiting for heartbeat");
            return;
        };

        // Frames between the decoder and the listener's ears: delay the
        // visual flip so both land together.
        let delay = buffer_delay_secs
            .clamp(0.0, self.config.presentation_delay_cap_secs);
        log::info!(
            "[Reconcile] Track boundary observed; flipping to {} in {:.2}s",
            target.identifier,
            delay
        );
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
            this.apply_track_change(target);
        });
        self.timers.arm(TIMER_FLIP, handle.abort_handle());
    }

    /// Atomically flips the presentation to `target`.
    fn apply_track_change(self: &Arc<Self>, target: Track) {
        let now = Instant::now();
        self.timers.cancel(TIMER_FALLBACK);
        self.timers.cancel(TIMER_REVEAL);

        let adopted_snapshot;
        {
            let mut st = self.state.lock();
            st.current = Some(target.clone());
            st.pending_heartbeat_target = None;
            // The override's purpose is within-track protection only.
            st.pending_manual = None;
            st.server_next = None;
            st.deferred_next = None;
            st.mismatch_since = None;
            st.progress = Some(ProgressAnchor {
                duration_secs: target.duration_secs(),
                start_position_secs: 0.0,
                clock_at_start: self.clock.position_secs(),
                wall_at_start: now,
            });

            adopted_snapshot = match st.pending_snapshot.take() {
                Some(snap) if snap.current_identifier() == Some(target.identifier.as_str()) => {
                    self.adopt_snapshot_locked(&mut st, snap.clone(), now);
                    Some(snap)
                }
                other => {
                    st.pending_snapshot = other;
                    None
                }
            };
        }

        self.hooks.show_now_playing(&target);
        self.hooks.pop_playlist_head(&target.identifier);
        self.hooks.start_progress(target.duration_secs(), 0.0, false);
        self.hooks.show_next_track(None);

        match adopted_snapshot {
            Some(snap) => {
                self.timers.cancel(TIMER_FORCE_SNAPSHOT);
                self.hooks.render_directions(&snap);
                self.hooks.mark_deck_stale(false);
            }
            None => self.request_snapshot(target.identifier),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Snapshots
    // ─────────────────────────────────────────────────────────────────────

    /// Handles a snapshot response.
    pub fn on_snapshot(self: &Arc<Self>, snapshot: ExplorerSnapshot) {
        let now = Instant::now();
        let mut render = None;
        let mut show_next = None;
        let mut buffered = false;
        {
            let mut st = self.state.lock();
            let matches_current = match (&st.current, snapshot.current_identifier()) {
                (Some(current), Some(snap_id)) => current.identifier == snap_id,
                (None, _) => true,
                (_, None) => true,
            };

            if matches_current {
                show_next =
                    self.adopt_proposal_locked(&mut st, snapshot.next_track.clone(), now);
                self.adopt_snapshot_locked(&mut st, snapshot.clone(), now);
                render = Some(snapshot);
            } else {
                // The snapshot is ahead of the flip; hold it until the
                // heartbeat (or sentinel) confirms, or force-apply.
                st.pending_snapshot = Some(snapshot);
                buffered = true;
            }
        }

        if let Some(snapshot) = render {
            self.timers.cancel(TIMER_FORCE_SNAPSHOT);
            self.hooks.render_directions(&snapshot);
            self.hooks.mark_deck_stale(false);
            if let Some(proposal) = show_next {
                self.hooks.show_next_track(Some(&proposal));
            }
        } else if buffered {
            let force_after = Duration::from_millis(self.config.snapshot_force_apply_ms);
            let this = Arc::clone(self);
            let handle = tokio::spawn(async move {
                tokio::time::sleep(force_after).await;
                this.force_apply_snapshot();
            });
            self.timers.arm(TIMER_FORCE_SNAPSHOT, handle.abort_handle());
        }
    }

    fn force_apply_snapshot(self: &Arc<Self>) {
        let now = Instant::now();
        let applied = {
            let mut st = self.state.lock();
            st.pending_snapshot.take().map(|snap| {
                self.adopt_snapshot_locked(&mut st, snap.clone(), now);
                snap
            })
        };
        if let Some(snap) = applied {
            log::warn!(
                "[Reconcile] Force-applying snapshot for {} ahead of confirmed flip",
                snap.current_identifier().unwrap_or("unknown")
            );
            self.hooks.render_directions(&snap);
        }
    }

    fn adopt_snapshot_locked(
        &self,
        st: &mut ReconcileState,
        snapshot: ExplorerSnapshot,
        _now: Instant,
    ) {
        st.snapshot_backup = Some(snapshot.clone());
        st.snapshot = Some(snapshot);
    }

    /// Requests a fresh snapshot for the current track.
    pub fn refresh_snapshot(self: &Arc<Self>) {
        if let Some(id) = self.current_track_id() {
            self.request_snapshot(id);
        }
    }

    fn request_snapshot(self: &Arc<Self>, track_id: String) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let per_attempt = Duration::from_millis(this.config.snapshot_force_apply_ms.max(1));
            for attempt in 1..=this.config.snapshot_retry_attempts {
                match tokio::time::timeout(per_attempt, this.api.fetch_snapshot(&track_id)).await {
                    Ok(Ok(snapshot)) => {
                        this.on_snapshot(snapshot);
                        return;
                    }
                    Ok(Err(err)) => {
                        log::warn!(
                            "[Reconcile] Snapshot fetch failed (attempt {}/{}): {}",
                            attempt,
                            this.config.snapshot_retry_attempts,
                            err
                        );
                    }
                    Err(_) => {
                        log::warn!(
                            "[Reconcile] Snapshot fetch timed out (attempt {}/{})",
                            attempt,
                            this.config.snapshot_retry_attempts
                        );
                    }
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }

            // All attempts failed: serve the stale backup when it still
            // describes the current track.
            let backup = {
                let st = this.state.lock();
                st.snapshot_backup
                    .clone()
                    .filter(|b| b.current_identifier() == Some(track_id.as_str()))
            };
            match backup {
                Some(backup) => {
                    log::warn!("[Reconcile] Serving stale snapshot backup for {track_id}");
                    this.hooks.render_directions(&backup);
                    this.hooks.mark_deck_stale(true);
                }
                None => {
                    log::error!("[Reconcile] No usable snapshot for {track_id}");
                }
            }
        });
        self.timers.arm(TIMER_SNAPSHOT_FETCH, handle.abort_handle());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Next-track proposals and manual overrides
    // ─────────────────────────────────────────────────────────────────────

    /// Adopts a server proposal, honoring overrides and flicker deferral.
    /// Returns the proposal to display, when the display should change.
    fn adopt_proposal_locked(
        self: &Arc<Self>,
        st: &mut ReconcileState,
        proposal: Option<NextTrackProposal>,
        now: Instant,
    ) -> Option<NextTrackProposal> {
        let proposal = proposal?;

        if let Some(manual) = st.pending_manual.as_deref() {
            if proposal.identifier() == Some(manual) {
                // The server adopted the override as its own proposal.
                st.pending_manual = None;
                st.server_next = Some(proposal.clone());
                return Some(proposal);
            }
            // Override wins: remember the server's idea, show nothing new.
            st.server_next = Some(proposal);
            return None;
        }

        let changed = st
            .server_next
            .as_ref()
            .map(NextTrackProposal::identifier)
            != Some(proposal.identifier());
        if !changed {
            st.server_next = Some(proposal);
            return None;
        }

        let replacing = st.server_next.is_some();
        let fraction = st
            .progress
            .as_ref()
            .map_or(1.0, |a| a.visual_fraction(now));
        if replacing && fraction < self.config.next_track_reveal_fraction {
            // A changed proposal mid-card flickers; hold it until late in
            // the track.
            let remaining = st.progress.as_ref().map_or(0.0, |a| {
                (self.config.next_track_reveal_fraction * a.duration_secs
                    - a.visual_elapsed(now))
                .max(0.0)
            });
            st.deferred_next = Some(proposal);
            let this = Arc::clone(self);
            let handle = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs_f64(remaining)).await;
                this.reveal_deferred();
            });
            self.timers.arm(TIMER_REVEAL, handle.abort_handle());
            return None;
        }

        st.server_next = Some(proposal.clone());
        Some(proposal)
    }

    fn reveal_deferred(self: &Arc<Self>) {
        let proposal = {
            let mut st = self.state.lock();
            match st.deferred_next.take() {
                Some(p) if st.pending_manual.is_none() => {
                    st.server_next = Some(p.clone());
                    Some(p)
                }
                _ => None,
            }
        };
        if let Some(proposal) = proposal {
            self.hooks.show_next_track(Some(&proposal));
        }
    }

    /// Records a user's manual next-track selection and submits it.
    pub fn select_manual(self: &Arc<Self>, track_md5: String, direction: Option<String>) {
        let display = {
            let mut st = self.state.lock();
            st.pending_manual = Some(track_md5.clone());
            NextTrackProposal {
                track: lookup_track(st.snapshot.as_ref(), &track_md5),
                direction: direction.clone(),
                direction_key: None,
            }
        };
        self.hooks.show_next_track(Some(&display));

        let request = crate::api::NextTrackRequest {
            track_md5: track_md5.clone(),
            direction,
            source: "user".to_string(),
            fingerprint: self.player.fingerprint(),
            session_id: self.player.session_id(),
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = this.api.submit_next_track(request).await {
                log::warn!("[Reconcile] Next-track submission failed: {err}");
                this.clear_manual(Some(&track_md5));
            }
        });
    }

    /// Server accepted the selection; the override stays armed until the
    /// server proposes it back or the track changes.
    pub fn on_selection_ack(&self, msg: SelectionMessage) {
        log::debug!(
            "[Reconcile] Selection acknowledged: {}",
            msg.track_md5.as_deref().unwrap_or("unknown")
        );
    }

    /// The selection is queued server-side, possibly with resolved
    /// metadata worth displaying.
    pub fn on_selection_ready(self: &Arc<Self>, msg: SelectionMessage) {
        let display = {
            let st = self.state.lock();
            match (&st.pending_manual, &msg.track) {
                (Some(manual), Some(track)) if *manual == track.identifier => {
                    Some(NextTrackProposal {
                        track: Some(track.clone()),
                        direction: None,
                        direction_key: None,
                    })
                }
                _ => None,
            }
        };
        if let Some(proposal) = display {
            self.hooks.show_next_track(Some(&proposal));
        }
    }

    /// The selection was rejected: drop the override and fall back to the
    /// server's proposal.
    pub fn on_selection_failed(self: &Arc<Self>, msg: SelectionMessage) {
        log::warn!(
            "[Reconcile] Selection failed: {}",
            msg.reason.as_deref().unwrap_or("unknown reason")
        );
        self.clear_manual(msg.track_md5.as_deref());
    }

    fn clear_manual(self: &Arc<Self>, track_md5: Option<&str>) {
        let fallback = {
            let mut st = self.state.lock();
            let matches = match (&st.pending_manual, track_md5) {
                (Some(manual), Some(md5)) => manual == md5,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if matches {
                st.pending_manual = None;
                Some(st.server_next.clone())
            } else {
                None
            }
        };
        if let Some(server_next) = fallback {
            self.hooks.show_next_track(server_next.as_ref());
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Clears the presentation state so the next heartbeat re-applies from
    /// scratch. Used by the session's full resync.
    pub fn reset_presentation(&self, reason: &str) {
        log::info!("[Reconcile] Presentation reset: {reason}");
        self.timers.cancel_all();
        let mut st = self.state.lock();
        *st = ReconcileState::default();
        drop(st);
        self.hooks.clear_pending_progress();
    }

    /// Aborts every armed timer. Part of session teardown.
    pub fn cancel_timers(&self) {
        self.timers.cancel_all();
    }

    /// Surfaces an error code through the health indicator.
    pub fn surface_error(&self, health: crate::state::HealthIndicator, err: &dyn ErrorCode) {
        if self.player.set_health(health) {
            self.hooks.set_health(health, Some(err.code()));
        }
    }
}

/// Finds a track by identifier in the snapshot's proposal or sample decks.
fn lookup_track(snapshot: Option<&ExplorerSnapshot>, md5: &str) -> Option<Track> {
    let snapshot = snapshot?;
    if let Some(track) = snapshot
        .next_track
        .as_ref()
        .and_then(|p| p.track.as_ref())
        .filter(|t| t.identifier == md5)
    {
        return Some(track.clone());
    }
    snapshot
        .directions
        .values()
        .flat_map(|d| d.sample_tracks.iter())
        .find(|t| t.identifier == md5)
        .cloned()
}
