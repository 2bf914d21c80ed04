//! Playback health: stall detection and instability windows.
//!
//! The session controller feeds position reports into the watchdog and
//! qualifying failures into the windows; a window reaching its threshold
//! triggers a full pipeline rebuild.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
// Timestamps use tokio's clock so paused-time tests stay coherent.
use tokio::time::Instant;

use crate::state::RecoveryConfig;

/// The two kinds of instability tracked in windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstabilityKind {
    /// Playback stalled but the session may still be alive.
    Stall,
    /// The session is considered dead (unrecovered stall, play-retry
    /// exhaustion, stream failure).
    Dead,
}

/// Windowed instability counters keyed by kind.
///
/// Entries older than the kind's window are discarded on every record;
/// reaching the kind's threshold empties the window and reports a trigger.
pub struct InstabilityWindows {
    windows: DashMap<InstabilityKind, VecDeque<Instant>>,
    stall_window: Duration,
    stall_threshold: usize,
    dead_window: Duration,
    dead_threshold: usize,
}

impl InstabilityWindows {
    /// Creates empty windows from the recovery configuration.
    #[must_use]
    pub fn new(config: &RecoveryConfig) -> Self {
        Self {
            windows: DashMap::new(),
            stall_window: Duration::from_secs(config.stall_window_secs),
            stall_threshold: config.stall_threshold.max(1),
            dead_window: Duration::from_secs(config.dead_window_secs),
            dead_threshold: config.dead_threshold.max(1),
        }
    }

    fn params(&self, kind: InstabilityKind) -> (Duration, usize) {
        match kind {
            InstabilityKind::Stall => (self.stall_window, self.stall_threshold),
            InstabilityKind::Dead => (self.dead_window, self.dead_threshold),
        }
    }

    /// Appends an event at `now`. Returns `true` when the window reached
    /// its threshold (the window is emptied in that case).
    pub fn record(&self, kind: InstabilityKind, now: Instant) -> bool {
        let (window, threshold) = self.params(kind);
        let mut entry = self.windows.entry(kind).or_default();
        while entry
            .front()
            .is_some_and(|&t| now.duration_since(t) > window)
        {
            entry.pop_front();
        }
        entry.push_back(now);
        if entry.len() >= threshold {
            entry.clear();
            true
        } else {
            false
        }
    }

    /// Events currently inside the kind's window.
    #[must_use]
    pub fn count(&self, kind: InstabilityKind, now: Instant) -> usize {
        let (window, _) = self.params(kind);
        self.windows
            .get(&kind)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|&&t| now.duration_since(t) <= window)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Empties every window (pipeline rebuild).
    pub fn clear(&self) {
        self.windows.clear();
    }
}

/// Why the watchdog considers playback stalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallCause {
    /// No position report arrived within the tolerance.
    NoPositionReport,
    /// Audio is buffered but the position has stopped advancing.
    NoProgress,
}

impl std::fmt::Display for StallCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoPositionReport => write!(f, "no position report"),
            Self::NoProgress => write!(f, "buffered audio without progress"),
        }
    }
}

/// Detects a silent death of the render path.
///
/// Two signals: position reports stop arriving entirely, or reports keep
/// arriving with buffered audio while the position never advances.
pub struct PlaybackWatchdog {
    inner: Mutex<WatchdogInner>,
}

struct WatchdogInner {
    last_report_at: Instant,
    last_position: f64,
    last_progress_at: Instant,
    paused: bool,
}

impl PlaybackWatchdog {
    /// Creates a watchdog anchored at `now`.
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            inner: Mutex::new(WatchdogInner {
                last_report_at: now,
                last_position: 0.0,
                last_progress_at: now,
                paused: false,
            }),
        }
    }

    /// Records a position report from the output stage.
    pub fn note_report(&self, position_secs: f64, now: Instant) {
        let mut inner = self.inner.lock();
        inner.last_report_at = now;
        if position_secs > inner.last_position + f64::EPSILON {
            inner.last_position = position_secs;
            inner.last_progress_at = now;
        }
    }

    /// Suspends stall detection while playback is intentionally paused.
    pub fn set_paused(&self, paused: bool, now: Instant) {
        let mut inner = self.inner.lock();
        inner.paused = paused;
        if !paused {
            // A resume should not inherit the pause as silence.
            inner.last_report_at = now;
            inner.last_progress_at = now;
        }
    }

    /// Re-anchors the watchdog after a teardown or rebuild.
    pub fn reset(&self, now: Instant) {
        let mut inner = self.inner.lock();
        inner.last_report_at = now;
        inner.last_position = 0.0;
        inner.last_progress_at = now;
    }

    /// Evaluates the stall conditions at `now`.
    #[must_use]
    pub fn check(
        &self,
        buffer_delay_secs: f64,
        config: &RecoveryConfig,
        now: Instant,
    ) -> Option<StallCause> {
        let inner = self.inner.lock();
        if inner.paused {
            return None;
        }
        let since_report = now.duration_since(inner.last_report_at).as_secs_f64();
        if since_report > config.stall_no_report_secs {
            return Some(StallCause::NoPositionReport);
        }
        let since_progress = now.duration_since(inner.last_progress_at).as_secs_f64();
        if buffer_delay_secs > 0.0 && since_progress > config.stall_no_progress_secs {
            return Some(StallCause::NoProgress);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RecoveryConfig {
        RecoveryConfig::default()
    }

    // ─────────────────────────────────────────────────────────────────────
    // InstabilityWindows
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn threshold_triggers_and_empties_window() {
        let windows = InstabilityWindows::new(&config());
        let t0 = Instant::now();

        assert!(!windows.record(InstabilityKind::Stall, t0));
        assert!(!windows.record(InstabilityKind::Stall, t0 + Duration::from_secs(1)));
        // Third stall within the window triggers.
        assert!(windows.record(InstabilityKind::Stall, t0 + Duration::from_secs(2)));
        // Window emptied: counting restarts.
        assert_eq!(windows.count(InstabilityKind::Stall, t0 + Duration::from_secs(2)), 0);
    }

    #[test]
    fn old_entries_fall_out_of_the_window() {
        let windows = InstabilityWindows::new(&config());
        let t0 = Instant::now();

        windows.record(InstabilityKind::Stall, t0);
        windows.record(InstabilityKind::Stall, t0 + Duration::from_secs(1));
        // Two minutes later both entries are stale; this is a fresh first.
        assert!(!windows.record(InstabilityKind::Stall, t0 + Duration::from_secs(200)));
    }

    #[test]
    fn dead_threshold_is_two_events() {
        let windows = InstabilityWindows::new(&config());
        let t0 = Instant::now();

        assert!(!windows.record(InstabilityKind::Dead, t0));
        assert!(windows.record(InstabilityKind::Dead, t0 + Duration::from_secs(30)));
    }

    #[test]
    fn kinds_are_tracked_independently() {
        let windows = InstabilityWindows::new(&config());
        let t0 = Instant::now();

        windows.record(InstabilityKind::Stall, t0);
        windows.record(InstabilityKind::Dead, t0);
        assert_eq!(windows.count(InstabilityKind::Stall, t0), 1);
        assert_eq!(windows.count(InstabilityKind::Dead, t0), 1);
    }

    #[test]
    fn clear_empties_all_windows() {
        let windows = InstabilityWindows::new(&config());
        let t0 = Instant::now();
        windows.record(InstabilityKind::Stall, t0);
        windows.record(InstabilityKind::Dead, t0);
        windows.clear();
        assert_eq!(windows.count(InstabilityKind::Stall, t0), 0);
        assert_eq!(windows.count(InstabilityKind::Dead, t0), 0);
    }

    // ─────────────────────────────────────────────────────────────────────
    // PlaybackWatchdog
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn healthy_reports_raise_no_stall() {
        let t0 = Instant::now();
        let watchdog = PlaybackWatchdog::new(t0);
        watchdog.note_report(1.0, t0 + Duration::from_secs(1));
        watchdog.note_report(2.0, t0 + Duration::from_secs(2));
        assert_eq!(
            watchdog.check(3.0, &config(), t0 + Duration::from_secs(3)),
            None
        );
    }

    #[test]
    fn missing_reports_stall_after_tolerance() {
        let t0 = Instant::now();
        let watchdog = PlaybackWatchdog::new(t0);
        watchdog.note_report(1.0, t0);
        assert_eq!(
            watchdog.check(0.0, &config(), t0 + Duration::from_secs(13)),
            Some(StallCause::NoPositionReport)
        );
    }

    #[test]
    fn buffered_audio_without_progress_stalls() {
        let t0 = Instant::now();
        let watchdog = PlaybackWatchdog::new(t0);
        watchdog.note_report(5.0, t0);
        // Reports keep arriving with the same position.
        watchdog.note_report(5.0, t0 + Duration::from_secs(4));
        watchdog.note_report(5.0, t0 + Duration::from_secs(9));
        assert_eq!(
            watchdog.check(2.0, &config(), t0 + Duration::from_secs(9)),
            Some(StallCause::NoProgress)
        );
    }

    #[test]
    fn no_progress_without_buffered_audio_is_not_a_stall() {
        // An empty buffer with a frozen position is starvation, not a
        // render stall; underruns are handled separately.
        let t0 = Instant::now();
        let watchdog = PlaybackWatchdog::new(t0);
        watchdog.note_report(5.0, t0);
        watchdog.note_report(5.0, t0 + Duration::from_secs(9));
        assert_eq!(
            watchdog.check(0.0, &config(), t0 + Duration::from_secs(9)),
            None
        );
    }

    #[test]
    fn pause_suppresses_detection() {
        let t0 = Instant::now();
        let watchdog = PlaybackWatchdog::new(t0);
        watchdog.note_report(5.0, t0);
        watchdog.set_paused(true, t0);
        assert_eq!(
            watchdog.check(2.0, &config(), t0 + Duration::from_secs(60)),
            None
        );

        // Resume re-anchors; no instant stall from the paused gap.
        watchdog.set_paused(false, t0 + Duration::from_secs(60));
        assert_eq!(
            watchdog.check(2.0, &config(), t0 + Duration::from_secs(61)),
            None
        );
    }

    #[test]
    fn reset_reanchors_after_rebuild() {
        let t0 = Instant::now();
        let watchdog = PlaybackWatchdog::new(t0);
        watchdog.note_report(5.0, t0);
        watchdog.reset(t0 + Duration::from_secs(20));
        assert_eq!(
            watchdog.check(0.0, &config(), t0 + Duration::from_secs(21)),
            None
        );
    }
}
