//! Software playback clock.
//!
//! The authoritative playback position: frames actually rendered divided by
//! the output device's true sample rate. Never derived from wall-clock time
//! and never from the server.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::protocol::PCM_SAMPLE_RATE;

/// Monotonic playback position in seconds.
///
/// The counter only ever increases; [`PlaybackClock::reset`] is called
/// solely by an explicit pipeline teardown.
#[derive(Debug)]
pub struct PlaybackClock {
    frames_rendered: AtomicU64,
    true_rate: AtomicU32,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self {
            frames_rendered: AtomicU64::new(0),
            true_rate: AtomicU32::new(PCM_SAMPLE_RATE),
        }
    }
}

impl PlaybackClock {
    /// Creates a clock at position zero with the nominal rate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position in seconds.
    #[must_use]
    pub fn position_secs(&self) -> f64 {
        let rate = self.true_rate.load(Ordering::Relaxed).max(1);
        self.frames_rendered.load(Ordering::Relaxed) as f64 / f64::from(rate)
    }

    /// Total frames rendered since the last teardown.
    #[must_use]
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    /// Advances the clock by frames actually rendered to the device.
    pub fn record_rendered(&self, frames: u64) {
        self.frames_rendered.fetch_add(frames, Ordering::Relaxed);
    }

    /// Adopts the device's true output rate once it is known.
    ///
    /// A rate other than the nominal PCM rate means the stream plays
    /// pitch-shifted; that mismatch is logged where the rate is detected,
    /// not here.
    pub fn set_true_rate(&self, rate: u32) {
        self.true_rate.store(rate.max(1), Ordering::Relaxed);
    }

    /// The rate currently used to convert frames to seconds.
    #[must_use]
    pub fn true_rate(&self) -> u32 {
        self.true_rate.load(Ordering::Relaxed)
    }

    /// Zeroes the clock across an explicit teardown.
    pub fn reset(&self) {
        self.frames_rendered.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_derives_from_frames_and_rate() {
        let clock = PlaybackClock::new();
        clock.record_rendered(44_100);
        assert!((clock.position_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn true_rate_changes_the_conversion() {
        let clock = PlaybackClock::new();
        clock.set_true_rate(48_000);
        clock.record_rendered(48_000);
        assert!((clock.position_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn position_is_monotonic_until_reset() {
        let clock = PlaybackClock::new();
        let mut last = clock.position_secs();
        for _ in 0..10 {
            clock.record_rendered(512);
            let now = clock.position_secs();
            assert!(now >= last);
            last = now;
        }
        clock.reset();
        assert_eq!(clock.position_secs(), 0.0);
    }

    #[test]
    fn zero_rate_is_clamped() {
        let clock = PlaybackClock::new();
        clock.set_true_rate(0);
        clock.record_rendered(100);
        assert!(clock.position_secs().is_finite());
    }
}
