//! Sentinel classification and the one-per-tick event gate.

use serde::Serialize;

use crate::protocol::{
    CROSSFADE_END_PATTERN, CROSSFADE_START_PATTERN, SENTINEL_RUN_LEN, TRACK_BOUNDARY_PATTERN,
};

/// Inline PCM marker kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Sentinel {
    /// The audible boundary between two tracks.
    TrackBoundary,
    /// A crossfade between tracks has begun.
    CrossfadeStart,
    /// A crossfade between tracks has ended.
    CrossfadeEnd,
}

impl Sentinel {
    /// Classifies a complete 8-sample candidate run.
    ///
    /// Returns `None` when the run matches none of the three patterns, in
    /// which case the caller restores the held samples verbatim.
    #[must_use]
    pub fn classify(run: &[i16]) -> Option<Self> {
        if run.len() != SENTINEL_RUN_LEN {
            return None;
        }
        if run == TRACK_BOUNDARY_PATTERN {
            Some(Self::TrackBoundary)
        } else if run == CROSSFADE_START_PATTERN {
            Some(Self::CrossfadeStart)
        } else if run == CROSSFADE_END_PATTERN {
            Some(Self::CrossfadeEnd)
        } else {
            None
        }
    }
}

/// Holds at most one pending sentinel between scheduler ticks.
///
/// The decoder offers classified sentinels into the gate; the pump drains
/// it once per decode call and posts the event onto the session queue.
/// Offering while one is pending collapses the duplicate.
#[derive(Debug, Default)]
pub struct SentinelGate {
    pending: Option<Sentinel>,
}

impl SentinelGate {
    /// Creates an empty gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latches a sentinel unless one is already pending.
    pub fn offer(&mut self, sentinel: Sentinel) {
        if let Some(pending) = self.pending {
            log::debug!(
                "[Pcm] Collapsing duplicate sentinel {:?} (pending {:?})",
                sentinel,
                pending
            );
            return;
        }
        self.pending = Some(sentinel);
    }

    /// Drains the pending sentinel, if any.
    pub fn take(&mut self) -> Option<Sentinel> {
        self.pending.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{SENTINEL_NEG as N, SENTINEL_POS as P};

    #[test]
    fn classifies_track_boundary() {
        assert_eq!(
            Sentinel::classify(&[P, P, P, P, N, N, N, N]),
            Some(Sentinel::TrackBoundary)
        );
    }

    #[test]
    fn classifies_crossfade_edges() {
        assert_eq!(
            Sentinel::classify(&[P, N, P, N, P, N, P, N]),
            Some(Sentinel::CrossfadeStart)
        );
        assert_eq!(
            Sentinel::classify(&[N, P, N, P, N, P, N, P]),
            Some(Sentinel::CrossfadeEnd)
        );
    }

    #[test]
    fn rejects_non_pattern_runs() {
        assert_eq!(Sentinel::classify(&[P, P, P, P, P, P, P, P]), None);
        assert_eq!(Sentinel::classify(&[N, N, N, N, P, P, P, P]), None);
        assert_eq!(Sentinel::classify(&[P, P, P, P, N, N, N]), None);
    }

    #[test]
    fn gate_collapses_duplicates() {
        let mut gate = SentinelGate::new();
        gate.offer(Sentinel::TrackBoundary);
        gate.offer(Sentinel::CrossfadeStart);
        assert_eq!(gate.take(), Some(Sentinel::TrackBoundary));
        assert_eq!(gate.take(), None);
    }

    #[test]
    fn gate_accepts_again_after_drain() {
        let mut gate = SentinelGate::new();
        gate.offer(Sentinel::CrossfadeEnd);
        assert_eq!(gate.take(), Some(Sentinel::CrossfadeEnd));
        gate.offer(Sentinel::TrackBoundary);
        assert_eq!(gate.take(), Some(Sentinel::TrackBoundary));
    }
}
