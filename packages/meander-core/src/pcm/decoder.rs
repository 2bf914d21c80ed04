//! Int16 LE PCM decoder with inline sentinel detection.

use crate::protocol::{SENTINEL_NEG, SENTINEL_POS, SENTINEL_RUN_LEN};

use super::sentinel::{Sentinel, SentinelGate};

/// Normalization divisor: `sample = int16 / 32768`.
const SCALE: f32 = 1.0 / 32768.0;

/// Streaming PCM decoder.
///
/// Converts interleaved Int16 LE bytes to floats in [-1, 1] while watching
/// for sentinel runs. Extreme-valued samples are held back (zero-filled in
/// the output) until the run either completes as a sentinel, is interrupted,
/// or the input ends; interrupted and unfinished runs are restored verbatim
/// at the positions where they were written, so candidate runs never span
/// decode calls.
///
/// At most one sentinel is latched per call; the caller drains it with
/// [`PcmDecoder::take_sentinel`] after the call returns.
#[derive(Debug, Default)]
pub struct PcmDecoder {
    gate: SentinelGate,
}

impl PcmDecoder {
    /// Creates a decoder with an empty sentinel gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `bytes` (length must be even; the pump frames to 4-byte
    /// stereo alignment upstream) and appends one float per Int16 to `out`.
    pub fn decode_into(&mut self, bytes: &[u8], out: &mut Vec<f32>) {
        debug_assert!(bytes.len() % 2 == 0, "decoder input must be Int16-aligned");
        out.reserve(bytes.len() / 2);

        // Candidate run awaiting classification. Its samples occupy the
        // last `held.len()` slots of `out`, currently zero-filled.
        let mut held: Vec<i16> = Vec::with_capacity(SENTINEL_RUN_LEN);

        for pair in bytes.chunks_exact(2) {
            let value = i16::from_le_bytes([pair[0], pair[1]]);

            if value == SENTINEL_POS || value == SENTINEL_NEG {
                held.push(value);
                out.push(0.0);

                if held.len() == SENTINEL_RUN_LEN {
                    match Sentinel::classify(&held) {
                        Some(kind) => {
                            // The eight zero-filled samples stand; the
                            // listener hears silence instead of the marker.
                            self.gate.offer(kind);
                        }
                        None => restore(out, &held),
                    }
                    held.clear();
                }
            } else {
                if !held.is_empty() {
                    restore(out, &held);
                    held.clear();
                }
                out.push(f32::from(value) * SCALE);
            }
        }

        // A run still open at the end of the input is not a sentinel.
        if !held.is_empty() {
            restore(out, &held);
        }
    }

    /// Drains the sentinel latched by the most recent decode call, if any.
    pub fn take_sentinel(&mut self) -> Option<Sentinel> {
        self.gate.take()
    }
}

/// Writes the held Int16 values back over their zero-filled output slots.
fn restore(out: &mut [f32], held: &[i16]) {
    let start = out.len() - held.len();
    for (slot, &value) in out[start..].iter_mut().zip(held) {
        *slot = f32::from(value) * SCALE;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{SENTINEL_NEG as N, SENTINEL_POS as P};

    fn bytes_of(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn decode(samples: &[i16]) -> (Vec<f32>, Option<Sentinel>) {
        let mut decoder = PcmDecoder::new();
        let mut out = Vec::new();
        decoder.decode_into(&bytes_of(samples), &mut out);
        (out, decoder.take_sentinel())
    }

    const POS_F: f32 = 32767.0 / 32768.0;

    #[test]
    fn plain_samples_are_normalized() {
        let (out, sentinel) = decode(&[0, 16384, -16384, 170]);
        assert_eq!(out, vec![0.0, 0.5, -0.5, 170.0 / 32768.0]);
        assert_eq!(sentinel, None);
    }

    #[test]
    fn track_boundary_run_zero_fills_and_fires_once() {
        let (out, sentinel) = decode(&[P, P, P, P, N, N, N, N]);
        assert_eq!(out, vec![0.0; 8]);
        assert_eq!(sentinel, Some(Sentinel::TrackBoundary));
    }

    #[test]
    fn crossfade_start_run_is_classified() {
        let (out, sentinel) = decode(&[P, N, P, N, P, N, P, N]);
        assert_eq!(out, vec![0.0; 8]);
        assert_eq!(sentinel, Some(Sentinel::CrossfadeStart));
    }

    #[test]
    fn crossfade_end_run_is_classified() {
        let (out, sentinel) = decode(&[N, P, N, P, N, P, N, P]);
        assert_eq!(out, vec![0.0; 8]);
        assert_eq!(sentinel, Some(Sentinel::CrossfadeEnd));
    }

    #[test]
    fn interrupted_run_is_restored_verbatim() {
        // Three positive extremes, an ordinary sample, four negative
        // extremes: no sentinel, every value restored at its own slot.
        let (out, sentinel) = decode(&[P, P, P, 170, N, N, N, N]);
        assert_eq!(
            out,
            vec![POS_F, POS_F, POS_F, 170.0 / 32768.0, -1.0, -1.0, -1.0, -1.0]
        );
        assert_eq!(sentinel, None);
    }

    #[test]
    fn complete_non_pattern_run_is_restored() {
        let (out, sentinel) = decode(&[P, P, P, P, P, P, P, P]);
        assert_eq!(out, vec![POS_F; 8]);
        assert_eq!(sentinel, None);
    }

    #[test]
    fn run_open_at_end_of_input_is_restored() {
        let (out, sentinel) = decode(&[0, P, P, P]);
        assert_eq!(out, vec![0.0, POS_F, POS_F, POS_F]);
        assert_eq!(sentinel, None);
    }

    #[test]
    fn sentinel_mid_buffer_keeps_surrounding_audio() {
        let mut samples = vec![100, -100];
        samples.extend_from_slice(&[P, P, P, P, N, N, N, N]);
        samples.extend_from_slice(&[200, -200]);
        let (out, sentinel) = decode(&samples);

        assert_eq!(out.len(), 12);
        assert_eq!(out[0], 100.0 / 32768.0);
        assert_eq!(out[1], -100.0 / 32768.0);
        assert_eq!(&out[2..10], &[0.0; 8]);
        assert_eq!(out[10], 200.0 / 32768.0);
        assert_eq!(out[11], -200.0 / 32768.0);
        assert_eq!(sentinel, Some(Sentinel::TrackBoundary));
    }

    #[test]
    fn two_sentinels_in_one_call_collapse_to_one_event() {
        let mut samples = Vec::new();
        samples.extend_from_slice(&[P, P, P, P, N, N, N, N]);
        samples.extend_from_slice(&[P, N, P, N, P, N, P, N]);
        let (out, sentinel) = decode(&samples);

        assert_eq!(out, vec![0.0; 16]);
        assert_eq!(sentinel, Some(Sentinel::TrackBoundary));
    }

    #[test]
    fn sentinel_fires_again_on_next_call_after_drain() {
        let mut decoder = PcmDecoder::new();
        let mut out = Vec::new();

        decoder.decode_into(&bytes_of(&[P, P, P, P, N, N, N, N]), &mut out);
        assert_eq!(decoder.take_sentinel(), Some(Sentinel::TrackBoundary));

        decoder.decode_into(&bytes_of(&[N, P, N, P, N, P, N, P]), &mut out);
        assert_eq!(decoder.take_sentinel(), Some(Sentinel::CrossfadeEnd));
    }

    #[test]
    fn output_length_always_matches_input() {
        // One float per Int16, sentinel or not.
        for samples in [
            vec![0i16; 32],
            vec![P; 16],
            {
                let mut v = vec![1, 2, 3];
                v.extend_from_slice(&[P, P, P, P, N, N, N, N]);
                v.push(4);
                v
            },
        ] {
            let (out, _) = decode(&samples);
            assert_eq!(out.len(), samples.len());
        }
    }

    #[test]
    fn back_to_back_extremes_split_across_calls_are_restored() {
        // Four extremes at the end of one call and four at the start of
        // the next do not form a sentinel: candidate runs never span calls.
        let mut decoder = PcmDecoder::new();
        let mut out = Vec::new();

        decoder.decode_into(&bytes_of(&[P, P, P, P]), &mut out);
        assert_eq!(decoder.take_sentinel(), None);
        assert_eq!(out, vec![POS_F; 4]);

        decoder.decode_into(&bytes_of(&[N, N, N, N]), &mut out);
        assert_eq!(decoder.take_sentinel(), None);
        assert_eq!(&out[4..], &[-1.0; 4]);
    }
}
