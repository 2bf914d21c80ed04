//! Meander Core - client runtime for a server-driven music exploration
//! player.
//!
//! The server streams one endless stereo PCM feed and, in parallel, a
//! channel of presentation events. This crate implements the client side:
//! the streaming and timing pipeline, the presentation synchronisation
//! engine, and the session lifecycle / recovery controller. Its central
//! property: what the user sees matches what the user hears, across
//! network stalls, restarts, clock drift, and partial session loss.
//!
//! # Architecture
//!
//! - [`pcm`]: Int16 LE decoding and inline sentinel detection
//! - [`stream`]: the pump fetching and framing the audio stream
//! - [`output`]: interchangeable audio sinks and the software clock
//! - [`health`]: stall detection and instability windows
//! - [`events`]: the server-push event subscription
//! - [`reconcile`]: heartbeat/sentinel/snapshot reconciliation
//! - [`session`]: fingerprint lifecycle and the recovery ladder
//! - [`api`]: snapshot / refresh / next-track control plane
//! - [`hooks`]: the callback surface rendering lives behind
//!
//! # Abstraction traits
//!
//! [`PresentationHooks`](hooks::PresentationHooks) decouples the core from
//! any UI; [`ControlPlane`](api::ControlPlane) decouples it from HTTP;
//! [`OutputSink`](output::OutputSink) decouples it from the audio device.

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod context;
pub mod error;
pub mod events;
pub mod health;
pub mod hooks;
pub mod output;
pub mod pcm;
pub mod protocol;
pub mod proxy;
pub mod reconcile;
pub mod session;
pub mod state;
pub mod stream;
pub mod track;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types at the crate root
pub use api::{ControlPlane, HttpControlPlane, NextTrackRequest, RefreshRequest, RefreshResponse};
pub use context::EndpointContext;
pub use error::{ApiError, ChannelError, ErrorCode, SinkError, StreamError};
pub use hooks::{CrossfadePhase, LoggingHooks, NoopHooks, PresentationHooks};
pub use output::{OutputSink, PlaybackClock, SinkEvent};
pub use pcm::{PcmDecoder, Sentinel};
pub use proxy::PlaybackHandle;
pub use session::Session;
pub use state::{Config, HealthIndicator, PlayerState};
pub use track::{DirectionInfo, ExplorerSnapshot, NextTrackProposal, Track};
