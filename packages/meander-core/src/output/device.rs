//! Device-backed output sink.
//!
//! A dedicated audio callback thread owns the ring buffer; the pump posts
//! segments and control changes as immutable [`SinkMessage`]s over a
//! channel. The callback drains the queue, pulls frames, applies gain,
//! counts rendered frames into the shared clock, and posts sink events
//! back to the session.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{Receiver, Sender};
use tokio::sync::mpsc;

use crate::error::{SinkError, SinkResult};
use crate::protocol::{PCM_CHANNELS, PCM_SAMPLE_RATE};
use crate::state::OutputConfig;

use super::clock::PlaybackClock;
use super::ring::FloatRing;
use super::{OutputSink, SinkEvent, SinkMessage};

/// Sink rendering through the platform's default output device.
pub struct DeviceSink {
    cmd_tx: Sender<SinkMessage>,
    stop_tx: Sender<()>,
    clock: Arc<PlaybackClock>,
    /// Stereo frames handed to the render thread since startup.
    frames_sent: AtomicU64,
    /// Stereo frames buffered, as last reported by the render thread.
    buffered_frames: Arc<AtomicU64>,
    /// Set by the error callback when the platform stream dies.
    stream_failed: Arc<AtomicBool>,
    paused: AtomicBool,
    shut_down: AtomicBool,
    capacity_frames: u64,
}

/// Render-thread state captured by the audio callback closure.
struct Processor {
    ring: FloatRing,
    cmd_rx: Receiver<SinkMessage>,
    clock: Arc<PlaybackClock>,
    events: mpsc::UnboundedSender<SinkEvent>,
    buffered_frames: Arc<AtomicU64>,
    out_channels: usize,
    volume: f32,
    paused: bool,
    ready: bool,
    underrun_latched: bool,
    /// Ring samples needed before `ready` fires.
    ready_threshold_samples: usize,
    /// Device frames between position reports.
    report_every_frames: u64,
    frames_since_report: u64,
}

impl DeviceSink {
    /// Builds the platform output stream on a dedicated thread and starts
    /// rendering.
    ///
    /// Blocks briefly until the render thread reports startup success or
    /// failure. On success the device's true sample rate has been adopted
    /// by the clock and reported through a [`SinkEvent::Rate`].
    pub fn start(
        config: &OutputConfig,
        clock: Arc<PlaybackClock>,
        events: mpsc::UnboundedSender<SinkEvent>,
    ) -> SinkResult<Self> {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let (init_tx, init_rx) = crossbeam_channel::bounded::<SinkResult<u32>>(1);

        let buffered_frames = Arc::new(AtomicU64::new(0));
        let stream_failed = Arc::new(AtomicBool::new(false));

        let capacity_samples = (config.buffer_capacity_secs * f64::from(PCM_SAMPLE_RATE)) as usize
            * usize::from(PCM_CHANNELS);
        let ready_threshold_samples = (config.ready_threshold_secs * f64::from(PCM_SAMPLE_RATE))
            as usize
            * usize::from(PCM_CHANNELS);
        let report_interval_ms = config.position_report_interval_ms.max(1);

        let thread_clock = Arc::clone(&clock);
        let thread_buffered = Arc::clone(&buffered_frames);
        let thread_failed = Arc::clone(&stream_failed);

        std::thread::Builder::new()
            .name("meander-audio".to_string())
            .spawn(move || {
                let outcome = build_and_run(
                    cmd_rx,
                    stop_rx,
                    init_tx,
                    thread_clock,
                    events,
                    thread_buffered,
                    Arc::clone(&thread_failed),
                    capacity_samples,
                    ready_threshold_samples,
                    report_interval_ms,
                );
                if let Err(err) = outcome {
                    thread_failed.store(true, Ordering::Relaxed);
                    log::error!("[Output] Render thread exited with error: {err}");
                }
            })
            .map_err(|e| SinkError::Build(e.to_string()))?;

        // The render thread reports exactly once, either the adopted rate
        // or the startup failure.
        match init_rx.recv() {
            Ok(Ok(_rate)) => Ok(Self {
                cmd_tx,
                stop_tx,
                clock,
                frames_sent: AtomicU64::new(0),
                buffered_frames,
                stream_failed,
                paused: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                capacity_frames: (capacity_samples / usize::from(PCM_CHANNELS)) as u64,
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(SinkError::Build("render thread died during startup".into())),
        }
    }
}

impl OutputSink for DeviceSink {
    fn enqueue(&self, segment: Vec<f32>) {
        if self.shut_down.load(Ordering::Relaxed) {
            return;
        }
        self.frames_sent
            .fetch_add((segment.len() / usize::from(PCM_CHANNELS)) as u64, Ordering::Relaxed);
        let _ = self.cmd_tx.send(SinkMessage::Segment(segment));
    }

    fn fill_fraction(&self) -> f64 {
        let buffered = self.buffered_frames.load(Ordering::Relaxed) as f64;
        (buffered / self.capacity_frames as f64).min(1.0)
    }

    fn buffer_delay_secs(&self) -> f64 {
        let sent_secs =
            self.frames_sent.load(Ordering::Relaxed) as f64 / f64::from(PCM_SAMPLE_RATE);
        (sent_secs - self.clock.position_secs()).max(0.0)
    }

    fn set_volume(&self, volume: f32) {
        let _ = self.cmd_tx.send(SinkMessage::SetVolume(volume.clamp(0.0, 1.0)));
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
        let _ = self.cmd_tx.send(SinkMessage::SetPaused(paused));
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    fn verify_running(&self) -> SinkResult<()> {
        if self.stream_failed.load(Ordering::Relaxed) {
            Err(SinkError::Start("output stream reported failure".into()))
        } else {
            Ok(())
        }
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::Relaxed) {
            return;
        }
        let _ = self.cmd_tx.send(SinkMessage::Clear);
        let _ = self.stop_tx.send(());
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Opens the default output device, runs the stream until stopped.
///
/// Runs on the dedicated render thread. Reports startup outcome exactly
/// once through `init_tx`.
#[allow(clippy::too_many_arguments)]
fn build_and_run(
    cmd_rx: Receiver<SinkMessage>,
    stop_rx: Receiver<()>,
    init_tx: Sender<SinkResult<u32>>,
    clock: Arc<PlaybackClock>,
    events: mpsc::UnboundedSender<SinkEvent>,
    buffered_frames: Arc<AtomicU64>,
    stream_failed: Arc<AtomicBool>,
    capacity_samples: usize,
    ready_threshold_samples: usize,
    report_interval_ms: u64,
) -> SinkResult<()> {
    let host = cpal::default_host();
    let device = match host.default_output_device() {
        Some(device) => device,
        None => {
            let _ = init_tx.send(Err(SinkError::NoDevice));
            return Ok(());
        }
    };

    let supported = match device.default_output_config() {
        Ok(supported) => supported,
        Err(err) => {
            let _ = init_tx.send(Err(SinkError::Config(err.to_string())));
            return Ok(());
        }
    };

    let sample_format = supported.sample_format();
    let stream_config: StreamConfig = supported.into();
    let rate = stream_config.sample_rate;

    if rate != PCM_SAMPLE_RATE {
        // No resampling in this pipeline: PCM is consumed at nominal rate,
        // so output on this device is pitch-shifted.
        log::warn!(
            "[Output] Device rate {} Hz differs from nominal {} Hz",
            rate,
            PCM_SAMPLE_RATE
        );
    }

    let processor = Processor {
        ring: FloatRing::new(capacity_samples),
        cmd_rx,
        clock: Arc::clone(&clock),
        events: events.clone(),
        buffered_frames,
        out_channels: usize::from(stream_config.channels),
        volume: 1.0,
        paused: false,
        ready: false,
        underrun_latched: false,
        ready_threshold_samples,
        report_every_frames: u64::from(rate) * report_interval_ms / 1000,
        frames_since_report: 0,
    };

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, processor, stream_failed),
        SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, processor, stream_failed),
        SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, processor, stream_failed),
        other => Err(SinkError::Config(format!("unsupported sample format: {other:?}"))),
    };
    let stream = match stream {
        Ok(stream) => stream,
        Err(err) => {
            let _ = init_tx.send(Err(err));
            return Ok(());
        }
    };

    if let Err(err) = stream.play() {
        let _ = init_tx.send(Err(SinkError::Start(err.to_string())));
        return Ok(());
    }

    clock.set_true_rate(rate);
    let _ = events.send(SinkEvent::Rate { sample_rate: rate });
    let _ = init_tx.send(Ok(rate));

    log::info!(
        "[Output] Device sink running: rate={} Hz, channels={}",
        rate,
        stream_config.channels
    );

    // Park until told to stop (or the sink is dropped). The stream must
    // stay alive on this thread for rendering to continue.
    let _ = stop_rx.recv();
    drop(stream);
    log::info!("[Output] Device sink stopped");
    Ok(())
}

fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut processor: Processor,
    stream_failed: Arc<AtomicBool>,
) -> SinkResult<cpal::Stream> {
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                render(data, &mut processor);
            },
            move |err| {
                stream_failed.store(true, Ordering::Relaxed);
                log::error!("[Output] Stream error: {err}");
            },
            None,
        )
        .map_err(|e| SinkError::Build(e.to_string()))
}

/// One audio callback: drain messages, pull frames, report.
fn render<T: cpal::SizedSample + cpal::FromSample<f32>>(data: &mut [T], p: &mut Processor) {
    let silence = T::from_sample(0.0f32);

    while let Ok(msg) = p.cmd_rx.try_recv() {
        match msg {
            SinkMessage::Segment(segment) => {
                let dropped = p.ring.push(&segment);
                if dropped > 0 {
                    log::debug!("[Output] Ring overflow dropped {dropped} samples");
                }
            }
            SinkMessage::SetVolume(volume) => p.volume = volume,
            SinkMessage::SetPaused(paused) => p.paused = paused,
            SinkMessage::Clear => p.ring.clear(),
        }
    }

    if !p.ready && p.ring.len() >= p.ready_threshold_samples {
        p.ready = true;
        let _ = p.events.send(SinkEvent::Ready);
    }

    let frames = data.len() / p.out_channels.max(1);

    if p.paused {
        // Pause means pause: silence out, nothing consumed.
        for slot in data.iter_mut() {
            *slot = silence;
        }
    } else {
        let mut src = [0.0f32; 2];
        let mut rendered: u64 = 0;
        let mut starved = false;

        for frame in data.chunks_mut(p.out_channels.max(1)) {
            if p.ring.pop_into(&mut src) < 2 {
                starved = true;
                for slot in frame.iter_mut() {
                    *slot = silence;
                }
                continue;
            }
            rendered += 1;
            for (ch, slot) in frame.iter_mut().enumerate() {
                *slot = T::from_sample(src[ch % 2] * p.volume);
            }
        }

        p.clock.record_rendered(rendered);

        if starved {
            if p.ready && !p.underrun_latched {
                p.underrun_latched = true;
                let _ = p.events.send(SinkEvent::Underrun);
            }
        } else {
            p.underrun_latched = false;
        }
    }

    p.buffered_frames
        .store((p.ring.len() / 2) as u64, Ordering::Relaxed);

    p.frames_since_report += frames as u64;
    if p.frames_since_report >= p.report_every_frames {
        p.frames_since_report = 0;
        let _ = p.events.send(SinkEvent::Position {
            frames_rendered: p.clock.frames_rendered(),
            buffered_frames: (p.ring.len() / 2) as u64,
            overflows: p.ring.overflows(),
        });
    }
}
