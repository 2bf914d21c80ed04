//! Output stage: interchangeable audio sinks and the software clock.
//!
//! Two sinks share one contract: accept float segments, render
//! continuously, report position every half second, emit `ready` once
//! enough audio is buffered, and emit `underrun` on starvation after
//! ready. The device sink renders through the platform audio device on a
//! dedicated callback thread; the fallback sink keeps the pipeline
//! honest when no device is available.

pub mod clock;
pub mod device;
pub mod fallback;
pub mod ring;

pub use clock::PlaybackClock;
pub use device::DeviceSink;
pub use fallback::FallbackSink;
pub use ring::FloatRing;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::SinkResult;
use crate::state::OutputConfig;

/// Messages crossing into the render thread.
///
/// One-way and immutable: the render side owns its ring buffer exclusively
/// after construction; everything it learns arrives through this union.
#[derive(Debug)]
pub enum SinkMessage {
    /// A segment of interleaved stereo float samples.
    Segment(Vec<f32>),
    /// New gain in [0, 1].
    SetVolume(f32),
    /// Pause or resume rendering. Paused rendering outputs silence
    /// without consuming buffered audio.
    SetPaused(bool),
    /// Discard everything buffered.
    Clear,
}

/// Events reported back from a sink.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SinkEvent {
    /// The true output sample rate, reported once at startup.
    Rate {
        /// Frames per second the device actually renders.
        sample_rate: u32,
    },
    /// Enough audio is buffered to begin stable playback. Fired once per
    /// sink lifetime.
    Ready,
    /// Periodic render progress, at roughly 2 Hz.
    Position {
        /// Total frames rendered since the sink started.
        frames_rendered: u64,
        /// Frames currently buffered ahead of the render position.
        buffered_frames: u64,
        /// Enqueue overflows observed so far.
        overflows: u64,
    },
    /// A render pull found fewer frames than requested after `ready`.
    Underrun,
}

/// Common contract of the two output sinks.
pub trait OutputSink: Send + Sync {
    /// Accepts a segment of interleaved stereo floats for rendering.
    fn enqueue(&self, segment: Vec<f32>);

    /// Fraction of the buffer currently filled, in [0, 1].
    fn fill_fraction(&self) -> f64;

    /// Seconds of audio queued ahead of the software clock.
    fn buffer_delay_secs(&self) -> f64;

    /// Sets the playback gain in [0, 1].
    fn set_volume(&self, volume: f32);

    /// Pauses or resumes rendering without discarding buffered audio.
    fn set_paused(&self, paused: bool);

    /// Whether rendering is currently paused.
    fn is_paused(&self) -> bool;

    /// Checks that the sink is still able to render; used by the
    /// play-retry ladder when resuming after a pause.
    fn verify_running(&self) -> SinkResult<()>;

    /// Discards the queue and stops rendering. Idempotent.
    fn shutdown(&self);
}

/// Builds the preferred sink: the device sink when an output device is
/// available, otherwise the fallback sink.
///
/// `prefer_device = false` forces the fallback sink (headless operation).
pub fn build_sink(
    prefer_device: bool,
    config: &OutputConfig,
    clock: Arc<PlaybackClock>,
    events: mpsc::UnboundedSender<SinkEvent>,
) -> Arc<dyn OutputSink> {
    if prefer_device {
        match DeviceSink::start(config, Arc::clone(&clock), events.clone()) {
            Ok(sink) => return Arc::new(sink),
            Err(err) => {
                log::warn!("[Output] Device sink unavailable, using fallback: {err}");
            }
        }
    }
    Arc::new(FallbackSink::start(config, clock, events))
}
