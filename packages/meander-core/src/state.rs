//! Core state types.
//!
//! Provides configuration ([`Config`] and its per-concern sub-structs) and
//! the shared session state record ([`PlayerState`]). The state record is
//! owned by the session and handed to components at construction; there are
//! no process-wide singletons.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Tunables for the stream pump.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PumpConfig {
    /// Fill fraction above which the pump stops feeding.
    pub backpressure_high: f64,

    /// Fill fraction at which a paused pump resumes feeding.
    pub backpressure_low: f64,

    /// Poll interval while waiting for the buffer to drain (ms).
    pub backpressure_poll_ms: u64,

    /// Segments delivered between explicit yields to the scheduler.
    pub yield_every_segments: usize,

    /// A single network read pending longer than this is logged as a
    /// potential server stall (seconds). Not fatal.
    pub slow_read_warn_secs: u64,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            backpressure_high: 0.75,
            backpressure_low: 0.50,
            backpressure_poll_ms: 50,
            yield_every_segments: 20,
            slow_read_warn_secs: 2,
        }
    }
}

impl PumpConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.backpressure_high)
            || !(0.0..=1.0).contains(&self.backpressure_low)
        {
            return Err("backpressure fractions must be within [0, 1]".to_string());
        }
        if self.backpressure_low > self.backpressure_high {
            return Err("backpressure_low must not exceed backpressure_high".to_string());
        }
        if self.yield_every_segments == 0 {
            return Err("yield_every_segments must be >= 1".to_string());
        }
        Ok(())
    }
}

/// Tunables for the output stage.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OutputConfig {
    /// Sink buffer capacity in seconds of nominal-rate audio.
    pub buffer_capacity_secs: f64,

    /// Seconds of audio that must be buffered before `ready` fires.
    pub ready_threshold_secs: f64,

    /// Interval between position reports (ms).
    pub position_report_interval_ms: u64,

    /// Pull cadence of the fallback (deviceless) sink (ms).
    pub fallback_tick_ms: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            buffer_capacity_secs: 8.0,
            ready_threshold_secs: 3.0,
            position_report_interval_ms: 500,
            fallback_tick_ms: 100,
        }
    }
}

/// Tunables for the session controller's recovery machinery.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecoveryConfig {
    /// Startup grace window suppressing dead-session restarts until the
    /// first `ready` of the process (seconds).
    pub startup_grace_secs: u64,

    /// Initial quarantine duration after a network-indicated failure (seconds).
    pub quarantine_base_secs: f64,

    /// Multiplier applied to the quarantine duration on re-entry.
    pub quarantine_factor: f64,

    /// Quarantine duration cap (seconds).
    pub quarantine_max_secs: f64,

    /// Attempts to resume playback after a user gesture before giving up.
    pub play_retry_attempts: u32,

    /// Fixed delay between play retries (ms).
    pub play_retry_delay_ms: u64,

    /// Stall instability window length (seconds).
    pub stall_window_secs: u64,

    /// Stall events within the window that trigger a rebuild.
    pub stall_threshold: usize,

    /// Dead instability window length (seconds).
    pub dead_window_secs: u64,

    /// Dead events within the window that trigger a rebuild.
    pub dead_threshold: usize,

    /// No position report for longer than this marks a stall (seconds).
    pub stall_no_report_secs: f64,

    /// Buffered audio with no position progress for longer than this marks
    /// a stall (seconds).
    pub stall_no_progress_secs: f64,

    /// How long a fresh session may take to acquire a fingerprint before
    /// the ladder escalates to a process reload (seconds).
    pub new_session_fingerprint_timeout_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            startup_grace_secs: 30,
            quarantine_base_secs: 5.0,
            quarantine_factor: 1.5,
            quarantine_max_secs: 60.0,
            play_retry_attempts: 3,
            play_retry_delay_ms: 750,
            stall_window_secs: 120,
            stall_threshold: 3,
            dead_window_secs: 600,
            dead_threshold: 2,
            stall_no_report_secs: 12.0,
            stall_no_progress_secs: 8.0,
            new_session_fingerprint_timeout_secs: 5,
        }
    }
}

/// Tunables for the event channel.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChannelConfig {
    /// No message for this long marks the subscription as stuck (seconds).
    pub stuck_after_secs: u64,

    /// Delay before reconnecting a dropped subscription (ms).
    pub reconnect_delay_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            stuck_after_secs: 60,
            reconnect_delay_ms: 1000,
        }
    }
}

/// Tunables for the presentation reconciler.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReconcileConfig {
    /// Fallback timer armed when a heartbeat reports a track change before
    /// the boundary sentinel has fired (seconds).
    pub heartbeat_fallback_secs: f64,

    /// Visible drift beyond which a progress resync is pushed (seconds).
    pub drift_resync_secs: f64,

    /// Cap applied to the sentinel presentation delay (seconds).
    pub presentation_delay_cap_secs: f64,

    /// Force-apply timer for snapshots that arrive ahead of the heartbeat
    /// flip, and the per-attempt snapshot fetch timeout (ms).
    pub snapshot_force_apply_ms: u64,

    /// Snapshot fetch attempts before falling back to the cloned backup.
    pub snapshot_retry_attempts: u32,

    /// Visual progress fraction below which a changed `nextTrack` is
    /// deferred to avoid flicker.
    pub next_track_reveal_fraction: f64,

    /// Steady-state current-track mismatch tolerated before a full resync
    /// (seconds).
    pub steady_mismatch_secs: f64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            heartbeat_fallback_secs: 8.0,
            drift_resync_secs: 1.25,
            presentation_delay_cap_secs: 10.0,
            snapshot_force_apply_ms: 4000,
            snapshot_retry_attempts: 3,
            next_track_reveal_fraction: 0.8,
            steady_mismatch_secs: 15.0,
        }
    }
}

/// Configuration for the Meander client core.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Stream pump tunables.
    #[serde(default)]
    pub pump: PumpConfig,

    /// Output stage tunables.
    #[serde(default)]
    pub output: OutputConfig,

    /// Recovery ladder tunables.
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Event channel tunables.
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Presentation reconciler tunables.
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        self.pump.validate()?;
        if self.output.buffer_capacity_secs <= 0.0 {
            return Err("buffer_capacity_secs must be positive".to_string());
        }
        if self.output.ready_threshold_secs > self.output.buffer_capacity_secs {
            return Err("ready_threshold_secs must not exceed buffer capacity".to_string());
        }
        if self.reconcile.next_track_reveal_fraction < 0.0
            || self.reconcile.next_track_reveal_fraction > 1.0
        {
            return Err("next_track_reveal_fraction must be within [0, 1]".to_string());
        }
        if self.recovery.quarantine_factor < 1.0 {
            return Err("quarantine_factor must be >= 1".to_string());
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared Session State
// ─────────────────────────────────────────────────────────────────────────────

/// Health states surfaced to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum HealthIndicator {
    /// Audio and event channel are both healthy.
    #[default]
    Ok,
    /// Playback continues but instability has been observed.
    Degraded,
    /// Playback is dead and recovery is in progress.
    Error,
}

/// Shared state record for one streaming session.
///
/// Written by the session controller and the reconciler; read everywhere.
/// All writers run on the main scheduler; atomics cover the flags the audio
/// side reads without locking.
#[derive(Debug, Default)]
pub struct PlayerState {
    /// Opaque per-session fingerprint. Set once per session by the event
    /// channel's `connected` message, cleared on session reset, never
    /// mutated in place.
    fingerprint: RwLock<Option<String>>,

    /// Server-assigned session id from the `connected` message.
    session_id: RwLock<Option<String>>,

    /// Whether the event subscription currently has a live connection.
    channel_online: AtomicBool,

    /// Whether the audio pipeline currently has a live connection.
    audio_online: AtomicBool,

    /// Latest health state pushed to the presentation layer.
    health: RwLock<HealthIndicator>,

    /// Playback volume in [0, 1], stored as f32 bits for lock-free reads
    /// from the audio callback side.
    volume_bits: AtomicU32,
}

impl PlayerState {
    /// Creates a fresh state record with full volume.
    #[must_use]
    pub fn new() -> Self {
        let state = Self::default();
        state.volume_bits.store(1.0_f32.to_bits(), Ordering::Relaxed);
        state
    }

    /// Current fingerprint, if bound.
    #[must_use]
    pub fn fingerprint(&self) -> Option<String> {
        self.fingerprint.read().clone()
    }

    /// Binds a fingerprint. Returns `false` when an identical binding
    /// already exists (rebroadcasts repeat the `connected` message).
    pub fn bind_fingerprint(&self, fingerprint: &str) -> bool {
        let mut slot = self.fingerprint.write();
        if slot.as_deref() == Some(fingerprint) {
            return false;
        }
        if let Some(old) = slot.as_deref() {
            tracing::warn!(old, new = fingerprint, "fingerprint rebound");
        }
        *slot = Some(fingerprint.to_string());
        true
    }

    /// Clears the fingerprint as part of a session reset.
    pub fn clear_fingerprint(&self, reason: &str) {
        let mut slot = self.fingerprint.write();
        if let Some(old) = slot.take() {
            tracing::info!(fingerprint = %old, reason, "fingerprint cleared");
        }
    }

    /// Server-assigned session id, if known.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    /// Records the session id from a `connected` message.
    pub fn set_session_id(&self, session_id: &str) {
        *self.session_id.write() = Some(session_id.to_string());
    }

    /// Whether the event subscription is currently connected.
    #[must_use]
    pub fn channel_online(&self) -> bool {
        self.channel_online.load(Ordering::Relaxed)
    }

    /// Marks the event subscription connected or disconnected.
    pub fn set_channel_online(&self, online: bool) {
        self.channel_online.store(online, Ordering::Relaxed);
    }

    /// Whether the audio pipeline is currently connected.
    #[must_use]
    pub fn audio_online(&self) -> bool {
        self.audio_online.load(Ordering::Relaxed)
    }

    /// Marks the audio pipeline connected or disconnected.
    pub fn set_audio_online(&self, online: bool) {
        self.audio_online.store(online, Ordering::Relaxed);
    }

    /// Latest health indicator.
    #[must_use]
    pub fn health(&self) -> HealthIndicator {
        *self.health.read()
    }

    /// Updates the health indicator. Returns `true` if it changed.
    pub fn set_health(&self, health: HealthIndicator) -> bool {
        let mut slot = self.health.write();
        if *slot == health {
            return false;
        }
        *slot = health;
        true
    }

    /// Current volume in [0, 1].
    #[must_use]
    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    /// Sets the volume, clamped to [0, 1].
    pub fn set_volume(&self, volume: f32) {
        self.volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    /// Serializes the record for diagnostics output.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "fingerprint": *self.fingerprint.read(),
            "sessionId": *self.session_id.read(),
            "channelOnline": self.channel_online(),
            "audioOnline": self.audio_online(),
            "health": self.health(),
            "volume": self.volume(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn pump_config_rejects_inverted_backpressure() {
        let mut pump = PumpConfig::default();
        pump.backpressure_low = 0.9;
        assert!(pump.validate().is_err());
    }

    #[test]
    fn config_rejects_zero_buffer_capacity() {
        let mut config = Config::default();
        config.output.buffer_capacity_secs = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn fingerprint_binds_once_per_value() {
        let state = PlayerState::new();
        assert!(state.bind_fingerprint("fp-1"));
        assert!(!state.bind_fingerprint("fp-1"));
        assert_eq!(state.fingerprint().as_deref(), Some("fp-1"));
    }

    #[test]
    fn fingerprint_clear_then_rebind() {
        let state = PlayerState::new();
        state.bind_fingerprint("fp-1");
        state.clear_fingerprint("session reset");
        assert!(state.fingerprint().is_none());
        assert!(state.bind_fingerprint("fp-2"));
        assert_eq!(state.fingerprint().as_deref(), Some("fp-2"));
    }

    #[test]
    fn health_set_reports_change() {
        let state = PlayerState::new();
        assert!(state.set_health(HealthIndicator::Degraded));
        assert!(!state.set_health(HealthIndicator::Degraded));
        assert!(state.set_health(HealthIndicator::Ok));
    }

    #[test]
    fn volume_is_clamped() {
        let state = PlayerState::new();
        state.set_volume(1.7);
        assert!((state.volume() - 1.0).abs() < f32::EPSILON);
        state.set_volume(-0.3);
        assert!(state.volume().abs() < f32::EPSILON);
    }
}
