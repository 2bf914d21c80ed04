//! Presentation callback surface.
//!
//! The core never renders anything itself. Card layout, playlist tray,
//! progress animation, and theming live behind this trait, injected at
//! construction so the dependency graph stays linear.

use crate::state::HealthIndicator;
use crate::track::{ExplorerSnapshot, NextTrackProposal, Track};

/// Crossfade edge, advisory for UI transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossfadePhase {
    /// A crossfade between tracks has begun.
    Start,
    /// A crossfade between tracks has ended.
    End,
}

/// Callbacks the core invokes on the presentation layer.
///
/// Every method is fire-and-forget from the core's point of view;
/// implementations must not block.
pub trait PresentationHooks: Send + Sync {
    /// Updates the now-playing card. Called only when the listener
    /// actually hears the new track (or a fallback path concluded they
    /// must be hearing it).
    fn show_now_playing(&self, track: &Track);

    /// Pops the playlist tray's head if it shows this track.
    fn pop_playlist_head(&self, track_id: &str);

    /// Starts (or resyncs) the progress animation from a position within
    /// the track. `resync` distinguishes a drift correction from a fresh
    /// track start.
    fn start_progress(&self, duration_secs: f64, start_position_secs: f64, resync: bool);

    /// Clears a progress start that was scheduled but not yet applied.
    fn clear_pending_progress(&self);

    /// Displays (or clears) the next-track proposal.
    fn show_next_track(&self, proposal: Option<&NextTrackProposal>);

    /// Renders the direction deck from a snapshot.
    fn render_directions(&self, snapshot: &ExplorerSnapshot);

    /// Advisory crossfade tint.
    fn crossfade(&self, phase: CrossfadePhase);

    /// Pushes the health indicator, with a machine-readable code when one
    /// applies.
    fn set_health(&self, health: HealthIndicator, code: Option<&'static str>);

    /// Flags the direction deck as stale (served from backup).
    fn mark_deck_stale(&self, stale: bool);

    /// Last rung of the recovery ladder: the process should reload.
    fn request_reload(&self, reason: &str);
}

/// No-op hooks for headless operation or testing.
pub struct NoopHooks;

impl PresentationHooks for NoopHooks {
    fn show_now_playing(&self, _track: &Track) {}
    fn pop_playlist_head(&self, _track_id: &str) {}
    fn start_progress(&self, _duration_secs: f64, _start_position_secs: f64, _resync: bool) {}
    fn clear_pending_progress(&self) {}
    fn show_next_track(&self, _proposal: Option<&NextTrackProposal>) {}
    fn render_directions(&self, _snapshot: &ExplorerSnapshot) {}
    fn crossfade(&self, _phase: CrossfadePhase) {}
    fn set_health(&self, _health: HealthIndicator, _code: Option<&'static str>) {}
    fn mark_deck_stale(&self, _stale: bool) {}
    fn request_reload(&self, _reason: &str) {}
}

/// Logging hooks for the headless player and development.
pub struct LoggingHooks;

impl PresentationHooks for LoggingHooks {
    fn show_now_playing(&self, track: &Track) {
        log::info!(
            "[Ui] Now playing: {} - {} ({}s)",
            track.artist,
            track.title,
            track.duration_secs().round()
        );
    }

    fn pop_playlist_head(&self, track_id: &str) {
        log::debug!("[Ui] Playlist head popped: {track_id}");
    }

    fn start_progress(&self, duration_secs: f64, start_position_secs: f64, resync: bool) {
        log::debug!(
            "[Ui] Progress {} at {:.2}s / {:.0}s",
            if resync { "resynced" } else { "started" },
            start_position_secs,
            duration_secs
        );
    }

    fn clear_pending_progress(&self) {
        log::debug!("[Ui] Pending progress start cleared");
    }

    fn show_next_track(&self, proposal: Option<&NextTrackProposal>) {
        match proposal.and_then(|p| p.track.as_ref()) {
            Some(track) => log::info!("[Ui] Up next: {} - {}", track.artist, track.title),
            None => log::debug!("[Ui] Next track cleared"),
        }
    }

    fn render_directions(&self, snapshot: &ExplorerSnapshot) {
        log::info!("[Ui] Direction deck: {} directions", snapshot.directions.len());
    }

    fn crossfade(&self, phase: CrossfadePhase) {
        log::debug!("[Ui] Crossfade {phase:?}");
    }

    fn set_health(&self, health: HealthIndicator, code: Option<&'static str>) {
        log::info!("[Ui] Health: {health:?} (code={})", code.unwrap_or("none"));
    }

    fn mark_deck_stale(&self, stale: bool) {
        log::info!("[Ui] Deck stale: {stale}");
    }

    fn request_reload(&self, reason: &str) {
        log::error!("[Ui] Process reload requested: {reason}");
    }
}
