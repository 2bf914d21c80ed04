//! The stream pump: fetch, frame-align, decode, backpressure.
//!
//! Fetches the endless WAV stream, strips the 44-byte header, keeps reads
//! aligned to 4-byte stereo frames, feeds the decoder, and yields decoded
//! float segments to the output stage under backpressure. Sentinels latched
//! by the decoder are posted to the session queue together with the sink's
//! buffer-delay at the moment of observation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{StreamError, StreamResult};
use crate::output::OutputSink;
use crate::pcm::{PcmDecoder, Sentinel};
use crate::protocol::{BYTES_PER_FRAME, SAMPLES_PER_SECOND, WAV_HEADER_LEN};
use crate::state::PumpConfig;

/// Events posted from the pump to the session's event queue.
#[derive(Debug)]
pub enum PumpEvent {
    /// A sentinel was observed in the PCM.
    Sentinel {
        /// The classified marker.
        kind: Sentinel,
        /// Seconds of audio queued ahead of the clock when the marker was
        /// observed; the reconciler aligns the visual transition with it.
        buffer_delay_secs: f64,
    },
    /// The stream failed; the session controller decides what happens next.
    StreamError(StreamError),
}

/// Handle to a running pump.
pub struct PumpHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PumpHandle {
    /// Aborts the inflight fetch. The pump exits silently.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancels and waits for the pump task to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

/// Spawns the pump task for one stream connection.
pub fn spawn_pump(
    client: reqwest::Client,
    url: String,
    sink: Arc<dyn OutputSink>,
    config: PumpConfig,
    events: mpsc::UnboundedSender<PumpEvent>,
) -> PumpHandle {
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let handle = tokio::spawn(async move {
        match pump_stream(client, url, sink, config, &events, task_cancel).await {
            Ok(()) => {} // cancelled: exit silently
            Err(err) => {
                let _ = events.send(PumpEvent::StreamError(err));
            }
        }
    });
    PumpHandle { cancel, handle }
}

/// Strips the stream header and keeps bytes aligned to stereo frames.
///
/// Feeding a chunk returns the longest frame-aligned prefix of the
/// accumulated bytes; the unaligned tail is carried into the next chunk.
#[derive(Debug)]
pub struct ChunkFramer {
    header_remaining: usize,
    remainder: Vec<u8>,
}

impl Default for ChunkFramer {
    fn default() -> Self {
        Self {
            header_remaining: WAV_HEADER_LEN,
            remainder: Vec::new(),
        }
    }
}

impl ChunkFramer {
    /// Creates a framer that still has the full header to skip.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorbs one received chunk and returns the frame-aligned bytes
    /// ready for decoding (possibly empty).
    pub fn absorb(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut data = chunk;
        if self.header_remaining > 0 {
            let skip = self.header_remaining.min(data.len());
            data = &data[skip..];
            self.header_remaining -= skip;
        }
        if data.is_empty() {
            return Vec::new();
        }

        self.remainder.extend_from_slice(data);
        let aligned_len = self.remainder.len() - self.remainder.len() % BYTES_PER_FRAME;
        if aligned_len == 0 {
            return Vec::new();
        }
        let aligned: Vec<u8> = self.remainder[..aligned_len].to_vec();
        self.remainder.drain(..aligned_len);
        aligned
    }
}

/// Lifecycle summary, logged when the pump exits for any reason.
struct PumpLog {
    started: Instant,
    bytes: u64,
    segments: u64,
    slow_reads: u64,
}

impl PumpLog {
    fn new() -> Self {
        log::info!("[Pump] Stream started");
        Self {
            started: Instant::now(),
            bytes: 0,
            segments: 0,
            slow_reads: 0,
        }
    }
}

impl Drop for PumpLog {
    fn drop(&mut self) {
        log::info!(
            "[Pump] Stream ended: bytes={}, segments={}, duration={}s, slow_reads={}",
            self.bytes,
            self.segments,
            self.started.elapsed().as_secs(),
            self.slow_reads
        );
    }
}

async fn pump_stream(
    client: reqwest::Client,
    url: String,
    sink: Arc<dyn OutputSink>,
    config: PumpConfig,
    events: &mpsc::UnboundedSender<PumpEvent>,
    cancel: CancellationToken,
) -> StreamResult<()> {
    let response = tokio::select! {
        () = cancel.cancelled() => return Ok(()),
        response = client.get(&url).send() => response?,
    };
    let status = response.status();
    if !status.is_success() {
        return Err(StreamError::Status(status.as_u16()));
    }

    let mut body = response.bytes_stream();
    let mut framer = ChunkFramer::new();
    let mut decoder = PcmDecoder::new();
    let mut floats: Vec<f32> = Vec::new();
    let mut stats = PumpLog::new();
    let mut segments_since_yield = 0usize;
    let slow_read = Duration::from_secs(config.slow_read_warn_secs.max(1));

    loop {
        // Read the next chunk, warning when the server keeps us waiting.
        let chunk = loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                chunk = body.next() => break chunk,
                () = tokio::time::sleep(slow_read) => {
                    stats.slow_reads += 1;
                    log::warn!(
                        "[Pump] No stream data for {}s - possible server stall",
                        config.slow_read_warn_secs
                    );
                }
            }
        };
        let bytes = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(err)) => return Err(StreamError::Http(err)),
            None => return Err(StreamError::Closed),
        };
        stats.bytes += bytes.len() as u64;

        let aligned = framer.absorb(&bytes);
        if aligned.is_empty() {
            continue;
        }

        floats.clear();
        decoder.decode_into(&aligned, &mut floats);

        for segment in floats.chunks(SAMPLES_PER_SECOND) {
            if !wait_for_capacity(sink.as_ref(), &config, &cancel).await {
                return Ok(());
            }
            sink.enqueue(segment.to_vec());
            stats.segments += 1;
            segments_since_yield += 1;
            if segments_since_yield >= config.yield_every_segments {
                segments_since_yield = 0;
                tokio::task::yield_now().await;
            }
        }

        // Explicit event-loop post: the sentinel latched during this decode
        // call is delivered on the session queue's next drain.
        if let Some(kind) = decoder.take_sentinel() {
            let _ = events.send(PumpEvent::Sentinel {
                kind,
                buffer_delay_secs: sink.buffer_delay_secs(),
            });
        }
    }
}

/// Backpressure: above the high-water mark, wait until the sink drains to
/// the low-water mark. Returns `false` when cancelled mid-wait.
async fn wait_for_capacity(
    sink: &dyn OutputSink,
    config: &PumpConfig,
    cancel: &CancellationToken,
) -> bool {
    if sink.fill_fraction() <= config.backpressure_high {
        return true;
    }
    let poll = Duration::from_millis(config.backpressure_poll_ms.max(1));
    loop {
        tokio::select! {
            () = cancel.cancelled() => return false,
            () = tokio::time::sleep(poll) => {}
        }
        if sink.fill_fraction() <= config.backpressure_low {
            return true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkResult;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    // ─────────────────────────────────────────────────────────────────────
    // ChunkFramer
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn header_skipped_in_one_chunk() {
        let mut framer = ChunkFramer::new();
        let mut chunk = vec![0u8; WAV_HEADER_LEN];
        chunk.extend_from_slice(&[1, 0, 2, 0, 3, 0, 4, 0]);
        assert_eq!(framer.absorb(&chunk), vec![1, 0, 2, 0, 3, 0, 4, 0]);
    }

    #[test]
    fn header_split_across_chunks() {
        // First chunk shorter than the header: consumed entirely, then the
        // remaining header bytes come out of the second chunk.
        let mut framer = ChunkFramer::new();
        assert!(framer.absorb(&[0u8; 40]).is_empty());

        let mut second = vec![0u8; 4];
        second.extend_from_slice(&[1, 0, 2, 0, 3, 0, 4, 0]);
        // 4 header bytes finish the skip; 8 payload bytes decode to 4 samples.
        assert_eq!(framer.absorb(&second), vec![1, 0, 2, 0, 3, 0, 4, 0]);
    }

    #[test]
    fn forty_byte_payload_survives_header_split() {
        // Server sends a 40-byte first chunk, then a 44-byte second chunk:
        // 40 bytes of payload remain, which is 20 Int16 samples.
        let mut framer = ChunkFramer::new();
        assert!(framer.absorb(&[0u8; 40]).is_empty());
        let out = framer.absorb(&[0u8; 44]);
        assert_eq!(out.len(), 40);
    }

    #[test]
    fn unaligned_tail_carries_into_next_chunk() {
        let mut framer = ChunkFramer::new();
        framer.absorb(&[0u8; WAV_HEADER_LEN]);

        // 6 bytes: one full frame plus 2 spare.
        assert_eq!(framer.absorb(&[1, 0, 2, 0, 3, 0]), vec![1, 0, 2, 0]);
        // 2 more bytes complete the held frame.
        assert_eq!(framer.absorb(&[4, 0]), vec![3, 0, 4, 0]);
    }

    #[test]
    fn empty_chunks_are_harmless() {
        let mut framer = ChunkFramer::new();
        framer.absorb(&[0u8; WAV_HEADER_LEN]);
        assert!(framer.absorb(&[]).is_empty());
        assert_eq!(framer.absorb(&[1, 0, 2, 0]), vec![1, 0, 2, 0]);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Backpressure
    // ─────────────────────────────────────────────────────────────────────

    /// Sink stub with a scripted fill fraction.
    struct FillSink {
        fill: Mutex<Vec<f64>>,
        paused: AtomicBool,
    }

    impl FillSink {
        fn new(mut fills: Vec<f64>) -> Self {
            fills.reverse();
            Self {
                fill: Mutex::new(fills),
                paused: AtomicBool::new(false),
            }
        }
    }

    impl OutputSink for FillSink {
        fn enqueue(&self, _segment: Vec<f32>) {}
        fn fill_fraction(&self) -> f64 {
            let mut fills = self.fill.lock();
            if fills.len() > 1 {
                fills.pop().unwrap()
            } else {
                *fills.last().unwrap()
            }
        }
        fn buffer_delay_secs(&self) -> f64 {
            0.0
        }
        fn set_volume(&self, _volume: f32) {}
        fn set_paused(&self, paused: bool) {
            self.paused.store(paused, Ordering::Relaxed);
        }
        fn is_paused(&self) -> bool {
            self.paused.load(Ordering::Relaxed)
        }
        fn verify_running(&self) -> SinkResult<()> {
            Ok(())
        }
        fn shutdown(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn low_fill_passes_immediately() {
        let sink = FillSink::new(vec![0.3]);
        let cancel = CancellationToken::new();
        assert!(wait_for_capacity(&sink, &PumpConfig::default(), &cancel).await);
    }

    #[tokio::test(start_paused = true)]
    async fn high_fill_waits_for_low_water_mark() {
        // Above high water, then draining: 0.9 -> 0.6 -> 0.55 -> 0.45.
        // The pump must keep waiting until <= 0.50, not just <= 0.75.
        let sink = FillSink::new(vec![0.9, 0.6, 0.55, 0.45]);
        let cancel = CancellationToken::new();
        assert!(wait_for_capacity(&sink, &PumpConfig::default(), &cancel).await);
        // All scripted fills consumed: three sleep polls happened.
        assert_eq!(sink.fill.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_wait() {
        let sink = FillSink::new(vec![0.9]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!wait_for_capacity(&sink, &PumpConfig::default(), &cancel).await);
    }
}
