//! Deviceless output sink.
//!
//! Keeps the pipeline contract alive when no audio device is available: a
//! timer-driven task pulls frames from the ring at nominal cadence,
//! advances the software clock, and reports the same events the device
//! sink would. The audio itself is discarded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::{SinkError, SinkResult};
use crate::protocol::{PCM_CHANNELS, PCM_SAMPLE_RATE};
use crate::state::OutputConfig;

use super::clock::PlaybackClock;
use super::ring::FloatRing;
use super::{OutputSink, SinkEvent};

/// Sink that renders into the void at real-time cadence.
pub struct FallbackSink {
    ring: Arc<Mutex<FloatRing>>,
    /// Stereo frames enqueued since startup.
    written_frames: AtomicU64,
    paused: Arc<AtomicBool>,
    shut_down: AtomicBool,
    cancel: CancellationToken,
    clock: Arc<PlaybackClock>,
    capacity_samples: usize,
}

impl FallbackSink {
    /// Starts the pull task. Must be called within a tokio runtime.
    pub fn start(
        config: &OutputConfig,
        clock: Arc<PlaybackClock>,
        events: mpsc::UnboundedSender<SinkEvent>,
    ) -> Self {
        let capacity_samples = (config.buffer_capacity_secs * f64::from(PCM_SAMPLE_RATE)) as usize
            * usize::from(PCM_CHANNELS);
        let ready_threshold_samples = (config.ready_threshold_secs * f64::from(PCM_SAMPLE_RATE))
            as usize
            * usize::from(PCM_CHANNELS);

        let ring = Arc::new(Mutex::new(FloatRing::new(capacity_samples)));
        let paused = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        // The fallback runs at the nominal PCM rate by definition.
        clock.set_true_rate(PCM_SAMPLE_RATE);
        let _ = events.send(SinkEvent::Rate {
            sample_rate: PCM_SAMPLE_RATE,
        });

        tokio::spawn(pull_loop(
            Arc::clone(&ring),
            Arc::clone(&paused),
            Arc::clone(&clock),
            events,
            cancel.clone(),
            config.fallback_tick_ms.max(1),
            config.position_report_interval_ms.max(1),
            ready_threshold_samples,
        ));

        Self {
            ring,
            written_frames: AtomicU64::new(0),
            paused,
            shut_down: AtomicBool::new(false),
            cancel,
            clock,
            capacity_samples,
        }
    }
}

impl OutputSink for FallbackSink {
    fn enqueue(&self, segment: Vec<f32>) {
        if self.shut_down.load(Ordering::Relaxed) {
            return;
        }
        self.written_frames
            .fetch_add((segment.len() / usize::from(PCM_CHANNELS)) as u64, Ordering::Relaxed);
        let dropped = self.ring.lock().push(&segment);
        if dropped > 0 {
            log::debug!("[Output] Fallback ring overflow dropped {dropped} samples");
        }
    }

    fn fill_fraction(&self) -> f64 {
        (self.ring.lock().len() as f64 / self.capacity_samples as f64).min(1.0)
    }

    fn buffer_delay_secs(&self) -> f64 {
        let written_secs =
            self.written_frames.load(Ordering::Relaxed) as f64 / f64::from(PCM_SAMPLE_RATE);
        (written_secs - self.clock.position_secs()).max(0.0)
    }

    fn set_volume(&self, _volume: f32) {
        // Nothing audible to attenuate.
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    fn verify_running(&self) -> SinkResult<()> {
        if self.shut_down.load(Ordering::Relaxed) {
            Err(SinkError::Start("sink is shut down".into()))
        } else {
            Ok(())
        }
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::Relaxed) {
            return;
        }
        self.cancel.cancel();
        self.ring.lock().clear();
    }
}

impl Drop for FallbackSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Timer-driven pull: consume one tick's worth of frames per tick.
#[allow(clippy::too_many_arguments)]
async fn pull_loop(
    ring: Arc<Mutex<FloatRing>>,
    paused: Arc<AtomicBool>,
    clock: Arc<PlaybackClock>,
    events: mpsc::UnboundedSender<SinkEvent>,
    cancel: CancellationToken,
    tick_ms: u64,
    report_interval_ms: u64,
    ready_threshold_samples: usize,
) {
    let want_samples = (u64::from(PCM_SAMPLE_RATE) * tick_ms / 1000) as usize
        * usize::from(PCM_CHANNELS);
    let mut scratch = vec![0.0f32; want_samples];

    let report_every_ticks = (report_interval_ms / tick_ms).max(1);
    let mut ticks: u64 = 0;
    let mut ready = false;
    let mut underrun_latched = false;

    let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let is_paused = paused.load(Ordering::Relaxed);
        let (popped, buffered, overflows) = {
            let mut ring = ring.lock();
            if !ready && ring.len() >= ready_threshold_samples {
                ready = true;
                let _ = events.send(SinkEvent::Ready);
            }
            if is_paused {
                (0, ring.len(), ring.overflows())
            } else {
                let popped = ring.pop_into(&mut scratch);
                (popped, ring.len(), ring.overflows())
            }
        };

        if !is_paused {
            clock.record_rendered((popped / usize::from(PCM_CHANNELS)) as u64);
            if popped < want_samples {
                if ready && !underrun_latched {
                    underrun_latched = true;
                    let _ = events.send(SinkEvent::Underrun);
                }
            } else {
                underrun_latched = false;
            }
        }

        ticks += 1;
        if ticks >= report_every_ticks {
            ticks = 0;
            let _ = events.send(SinkEvent::Position {
                frames_rendered: clock.frames_rendered(),
                buffered_frames: (buffered / usize::from(PCM_CHANNELS)) as u64,
                overflows,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> OutputConfig {
        OutputConfig::default()
    }

    fn seconds_of_audio(secs: f64) -> Vec<f32> {
        vec![0.1; (secs * f64::from(PCM_SAMPLE_RATE)) as usize * 2]
    }

    async fn drain(rx: &mut mpsc::UnboundedReceiver<SinkEvent>) -> Vec<SinkEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn reports_nominal_rate_at_startup() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let clock = Arc::new(PlaybackClock::new());
        let sink = FallbackSink::start(&test_config(), clock, tx);

        let events = drain(&mut rx).await;
        assert!(events.contains(&SinkEvent::Rate {
            sample_rate: PCM_SAMPLE_RATE
        }));
        sink.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn ready_fires_once_buffer_reaches_threshold() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let clock = Arc::new(PlaybackClock::new());
        let sink = FallbackSink::start(&test_config(), Arc::clone(&clock), tx);

        sink.enqueue(seconds_of_audio(3.5));
        tokio::time::sleep(Duration::from_millis(300)).await;

        let events = drain(&mut rx).await;
        assert_eq!(
            events.iter().filter(|e| matches!(e, SinkEvent::Ready)).count(),
            1
        );
        sink.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn clock_advances_as_frames_are_pulled() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let clock = Arc::new(PlaybackClock::new());
        let sink = FallbackSink::start(&test_config(), Arc::clone(&clock), tx);

        sink.enqueue(seconds_of_audio(2.0));
        tokio::time::sleep(Duration::from_secs(1)).await;

        // Roughly one second of virtual time has been rendered.
        let position = clock.position_secs();
        assert!(position > 0.5 && position <= 2.0, "position = {position}");
        sink.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn underrun_fires_after_ready_when_starved() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let clock = Arc::new(PlaybackClock::new());
        let sink = FallbackSink::start(&test_config(), clock, tx);

        sink.enqueue(seconds_of_audio(3.5));
        tokio::time::sleep(Duration::from_secs(5)).await;

        let events = drain(&mut rx).await;
        assert!(events.contains(&SinkEvent::Ready));
        assert!(events.contains(&SinkEvent::Underrun));
        sink.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn no_underrun_before_ready() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let clock = Arc::new(PlaybackClock::new());
        let sink = FallbackSink::start(&test_config(), clock, tx);

        // Far less than the ready threshold.
        sink.enqueue(seconds_of_audio(0.5));
        tokio::time::sleep(Duration::from_secs(2)).await;

        let events = drain(&mut rx).await;
        assert!(!events.contains(&SinkEvent::Ready));
        assert!(!events.contains(&SinkEvent::Underrun));
        sink.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_the_clock_and_keeps_audio() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let clock = Arc::new(PlaybackClock::new());
        let sink = FallbackSink::start(&test_config(), Arc::clone(&clock), tx);

        sink.enqueue(seconds_of_audio(2.0));
        sink.set_paused(true);
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(clock.position_secs(), 0.0);
        assert!(sink.fill_fraction() > 0.2);

        sink.set_paused(false);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(clock.position_secs() > 0.0);
        sink.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn buffer_delay_tracks_written_minus_played() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let clock = Arc::new(PlaybackClock::new());
        let sink = FallbackSink::start(&test_config(), clock, tx);

        sink.enqueue(seconds_of_audio(4.0));
        let delay = sink.buffer_delay_secs();
        assert!((delay - 4.0).abs() < 0.05, "delay = {delay}");

        tokio::time::sleep(Duration::from_secs(1)).await;
        let delay = sink.buffer_delay_secs();
        assert!(delay < 3.2, "delay = {delay}");
        sink.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn position_reports_arrive_periodically() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let clock = Arc::new(PlaybackClock::new());
        let sink = FallbackSink::start(&test_config(), clock, tx);

        sink.enqueue(seconds_of_audio(4.0));
        tokio::time::sleep(Duration::from_secs(2)).await;

        let reports = drain(&mut rx)
            .await
            .into_iter()
            .filter(|e| matches!(e, SinkEvent::Position { .. }))
            .count();
        assert!(reports >= 3, "reports = {reports}");
        sink.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_discards_the_queue() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let clock = Arc::new(PlaybackClock::new());
        let sink = FallbackSink::start(&test_config(), clock, tx);

        sink.enqueue(seconds_of_audio(2.0));
        sink.shutdown();
        assert_eq!(sink.fill_fraction(), 0.0);
        assert!(sink.verify_running().is_err());

        // Idempotent.
        sink.shutdown();
    }
}
