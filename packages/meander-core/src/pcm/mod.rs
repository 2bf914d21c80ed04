//! PCM decoding and inline sentinel detection.
//!
//! The server embeds 8-sample marker runs in the PCM to signal track
//! boundaries and crossfade edges. The decoder converts Int16 LE bytes to
//! normalized floats while watching for those runs inline.

pub mod decoder;
pub mod sentinel;

pub use decoder::PcmDecoder;
pub use sentinel::{Sentinel, SentinelGate};
