//! Server-push event subscription.
//!
//! The server feeds presentation state over a long-lived NDJSON
//! subscription: heartbeats, selection acknowledgements, and error
//! payloads. Messages are advisory; track-change timing always comes from
//! the PCM sentinels.

pub mod channel;
pub mod messages;

pub use channel::{ChannelEvent, EventChannel};
pub use messages::{
    ConnectedMessage, ErrorMessage, Heartbeat, HeartbeatTiming, SelectionMessage, ServerMessage,
};
