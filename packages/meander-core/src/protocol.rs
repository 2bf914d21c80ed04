//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the server's wire format (raw PCM framing,
//! sentinel patterns, endpoint paths) and changing them would break
//! compatibility with the stream.

// ─────────────────────────────────────────────────────────────────────────────
// PCM Wire Format
// ─────────────────────────────────────────────────────────────────────────────

/// Nominal PCM sample rate of the stream (Hz).
///
/// The server always encodes at CD rate. The output device may run at a
/// different rate; see the software clock for how that is handled.
pub const PCM_SAMPLE_RATE: u32 = 44_100;

/// Number of interleaved channels in the stream (stereo).
pub const PCM_CHANNELS: u16 = 2;

/// Bytes per interleaved stereo frame (2 channels x 2 bytes).
pub const BYTES_PER_FRAME: usize = 4;

/// Length of the WAV header prefixed to the stream (bytes).
///
/// The header is discarded on connect; everything after it is endless
/// Int16 LE interleaved PCM.
pub const WAV_HEADER_LEN: usize = 44;

/// Interleaved float samples in one second of stereo PCM at nominal rate.
pub const SAMPLES_PER_SECOND: usize = (PCM_SAMPLE_RATE as usize) * (PCM_CHANNELS as usize);

// ─────────────────────────────────────────────────────────────────────────────
// Sentinel Patterns
// ─────────────────────────────────────────────────────────────────────────────

/// Positive extreme used in sentinel runs (+32767).
pub const SENTINEL_POS: i16 = i16::MAX;

/// Negative extreme used in sentinel runs (-32768).
pub const SENTINEL_NEG: i16 = i16::MIN;

/// Length of every sentinel run, in samples.
pub const SENTINEL_RUN_LEN: usize = 8;

/// Track boundary: four positive extremes followed by four negative.
pub const TRACK_BOUNDARY_PATTERN: [i16; SENTINEL_RUN_LEN] = [
    SENTINEL_POS,
    SENTINEL_POS,
    SENTINEL_POS,
    SENTINEL_POS,
    SENTINEL_NEG,
    SENTINEL_NEG,
    SENTINEL_NEG,
    SENTINEL_NEG,
];

/// Crossfade start: alternating extremes beginning positive.
pub const CROSSFADE_START_PATTERN: [i16; SENTINEL_RUN_LEN] = [
    SENTINEL_POS,
    SENTINEL_NEG,
    SENTINEL_POS,
    SENTINEL_NEG,
    SENTINEL_POS,
    SENTINEL_NEG,
    SENTINEL_POS,
    SENTINEL_NEG,
];

/// Crossfade end: alternating extremes beginning negative.
pub const CROSSFADE_END_PATTERN: [i16; SENTINEL_RUN_LEN] = [
    SENTINEL_NEG,
    SENTINEL_POS,
    SENTINEL_NEG,
    SENTINEL_POS,
    SENTINEL_NEG,
    SENTINEL_POS,
    SENTINEL_NEG,
    SENTINEL_POS,
];

// ─────────────────────────────────────────────────────────────────────────────
// Endpoint Paths
// ─────────────────────────────────────────────────────────────────────────────

/// Default path of the audio stream endpoint (HTTP GET, streaming WAV).
pub const DEFAULT_STREAM_PATH: &str = "/stream";

/// Default path of the server-push event endpoint (NDJSON over HTTP GET).
pub const DEFAULT_EVENTS_PATH: &str = "/events";

/// Default path of the explorer snapshot endpoint (HTTP POST).
pub const DEFAULT_SNAPSHOT_PATH: &str = "/explorer-snapshot";

/// Path of the session refresh endpoint used by the recovery ladder.
pub const REFRESH_PATH: &str = "/refresh-sse";

/// Path of the manual next-track selection endpoint.
pub const NEXT_TRACK_PATH: &str = "/next-track";

// ─────────────────────────────────────────────────────────────────────────────
// Query Parameters
// ─────────────────────────────────────────────────────────────────────────────

/// Query parameter binding the audio stream to the event channel.
pub const FINGERPRINT_PARAM: &str = "fingerprint";

/// Cache-busting query parameter appended to stream URLs.
pub const CACHE_BUST_PARAM: &str = "t";
