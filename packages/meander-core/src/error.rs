//! Centralized error types for the Meander core library.
//!
//! Each failure domain (stream pump, event channel, control-plane API,
//! output sink) has its own `thiserror` enum. The [`ErrorCode`] trait maps
//! errors to the machine-readable codes surfaced through the health
//! indicator.

use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent codes across the health
/// indicator surface and diagnostics output.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream Pump
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by the audio stream pump.
///
/// Cancellation is not an error: a cancelled pump exits silently.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The HTTP request or a body read failed.
    #[error("stream request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-OK status.
    #[error("stream endpoint returned status {0}")]
    Status(u16),

    /// The endless stream ended. The server never closes a healthy stream,
    /// so an early close is treated as a failure.
    #[error("stream closed by server")]
    Closed,
}

impl ErrorCode for StreamError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "stream_request_failed",
            Self::Status(_) => "stream_error_status",
            Self::Closed => "stream_closed",
        }
    }
}

/// Convenient Result alias for pump operations.
pub type StreamResult<T> = Result<T, StreamError>;

// ─────────────────────────────────────────────────────────────────────────────
// Event Channel
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by the server-push event subscription.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The HTTP request or a body read failed.
    #[error("event subscription failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-OK status.
    #[error("event endpoint returned status {0}")]
    Status(u16),

    /// The subscription body ended; the channel must reconnect.
    #[error("event subscription closed")]
    Closed,
}

impl ErrorCode for ChannelError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "channel_request_failed",
            Self::Status(_) => "channel_error_status",
            Self::Closed => "channel_closed",
        }
    }
}

/// Convenient Result alias for event channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

// ─────────────────────────────────────────────────────────────────────────────
// Control-plane API
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by the snapshot / refresh / next-track endpoints.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The HTTP request failed or the response body could not be decoded.
    #[error("api request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-OK status.
    #[error("api endpoint returned status {0}")]
    Status(u16),

    /// The server answered OK but rejected the request.
    #[error("api request rejected: {0}")]
    Rejected(String),
}

impl ErrorCode for ApiError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "api_request_failed",
            Self::Status(_) => "api_error_status",
            Self::Rejected(_) => "api_rejected",
        }
    }
}

/// Convenient Result alias for control-plane operations.
pub type ApiResult<T> = Result<T, ApiError>;

// ─────────────────────────────────────────────────────────────────────────────
// Output Sink
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised while constructing or starting an output sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// No output audio device is available on this host.
    #[error("no output audio device found")]
    NoDevice,

    /// The device exposes no usable output configuration.
    #[error("no supported output config: {0}")]
    Config(String),

    /// Building the platform output stream failed.
    #[error("failed to build output stream: {0}")]
    Build(String),

    /// Starting the platform output stream failed.
    ///
    /// Distinct from [`SinkError::Build`] because a start failure is the
    /// retryable case of the play-retry ladder.
    #[error("failed to start output stream: {0}")]
    Start(String),
}

impl ErrorCode for SinkError {
    fn code(&self) -> &'static str {
        match self {
            Self::NoDevice => "no_output_device",
            Self::Config(_) => "output_config_unsupported",
            Self::Build(_) => "output_build_failed",
            Self::Start(_) => "output_start_failed",
        }
    }
}

/// Convenient Result alias for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;
