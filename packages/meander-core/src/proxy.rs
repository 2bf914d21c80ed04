//! Typed playback proxy.
//!
//! The presentation layer controls playback through this explicit surface
//! instead of poking at the pipeline: named methods, typed getters, no
//! reflection.

use crate::session::Session;

/// Playback control handle bound to one session.
#[derive(Clone)]
pub struct PlaybackHandle {
    session: Session,
}

impl PlaybackHandle {
    pub(crate) fn new(session: Session) -> Self {
        Self { session }
    }

    /// Current playback position in seconds, from the software clock.
    #[must_use]
    pub fn current_time(&self) -> f64 {
        self.session.position_secs()
    }

    /// Whether rendering is paused (a session without a pipeline counts
    /// as paused).
    #[must_use]
    pub fn paused(&self) -> bool {
        self.session.is_paused()
    }

    /// Resumes playback. Retried by the session controller; returns
    /// `false` when the retries were exhausted (which also records a dead
    /// instability event).
    pub async fn play(&self) -> bool {
        self.session.resume().await
    }

    /// Pauses playback, keeping buffered audio.
    pub fn pause(&self) {
        self.session.pause();
    }

    /// Current volume in [0, 1].
    #[must_use]
    pub fn volume(&self) -> f32 {
        self.session.volume()
    }

    /// Sets the volume, preserved across pipeline rebuilds.
    pub fn set_volume(&self, volume: f32) {
        self.session.set_volume(volume);
    }
}
