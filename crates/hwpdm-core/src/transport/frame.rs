//! Raw CAN frame as seen by the protocol layer.

use std::fmt;

use crate::protocol::constants::{CAN_EXT_ID_MASK, FRAME_PAYLOAD_LEN};

/// An extended-ID CAN frame with up to 8 payload bytes.
///
/// Frames produced by this crate always carry 8 bytes. Frames read from a
/// bus may be shorter, so the DLC is kept alongside the buffer.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: u32,
    data: [u8; FRAME_PAYLOAD_LEN],
    len: u8,
    error: bool,
}

impl CanFrame {
    /// Full 8-byte data frame. The id is truncated to 29 bits.
    pub fn new(id: u32, data: [u8; FRAME_PAYLOAD_LEN]) -> Self {
        Self {
            id: id & CAN_EXT_ID_MASK,
            data,
            len: FRAME_PAYLOAD_LEN as u8,
            error: false,
        }
    }

    /// Data frame from a slice of at most 8 bytes; extra bytes are dropped.
    pub fn from_slice(id: u32, payload: &[u8]) -> Self {
        let len = payload.len().min(FRAME_PAYLOAD_LEN);
        let mut data = [0u8; FRAME_PAYLOAD_LEN];
        data[..len].copy_from_slice(&payload[..len]);
        Self {
            id: id & CAN_EXT_ID_MASK,
            data,
            len: len as u8,
            error: false,
        }
    }

    /// Mark this frame as an error frame reported by the controller.
    pub fn into_error(mut self) -> Self {
        self.error = true;
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_error(&self) -> bool {
        self.error
    }
}

impl fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CanFrame(0x{:08X}", self.id)?;
        for b in self.data() {
            write!(f, " {b:02X}")?;
        }
        if self.error {
            write!(f, " ERR")?;
        }
        write!(f, ")")
    }
}
