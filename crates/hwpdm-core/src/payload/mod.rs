//! Payload handling module.
//!
//! Turns configuration text into fixed-size CONFIG_DATA chunks.

pub mod chunker;

pub use chunker::{Chunk, ChunkSequence, PayloadError};
