//! Protocol module - Hardwire PDM message definitions.

pub mod constants;
pub mod message;

pub use constants::*;
pub use message::{DecodeError, Message, MessageType};
