//! Audio stream fetching and framing.

pub mod pump;

pub use pump::{spawn_pump, ChunkFramer, PumpEvent, PumpHandle};
