//! CAN transport layer abstraction.
//!
//! Defines the `CanTransport` trait for frame I/O,
//! allowing different implementations (SocketCAN, mock, etc.).

use std::time::{Duration, Instant};

use thiserror::Error;

use super::frame::CanFrame;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("CAN channel {channel} not available")]
    ChannelNotFound { channel: u32 },

    #[error("Failed to open channel: {0}")]
    OpenFailed(String),

    #[error("Bus control failed: {0}")]
    BusControl(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Channel is closed")]
    Closed,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn timeout(timeout: Duration) -> Self {
        TransportError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

/// Abstract CAN channel interface.
///
/// Every call blocks; receives block at most for the given timeout.
pub trait CanTransport: Send + Sync {
    /// Queue one frame for transmission and wait for it to leave.
    fn send(&self, frame: &CanFrame, timeout: Duration) -> Result<(), TransportError>;

    /// Receive the next frame of any id.
    fn receive(&self, timeout: Duration) -> Result<CanFrame, TransportError>;

    /// Receive the next frame with `id`, skipping others until the deadline.
    ///
    /// Error frames are skipped too unless they carry `id`. SocketCAN reports
    /// bus errors with `CAN_ERR_FLAG` ids, so on real hardware a bus error
    /// during an exchange shows up as a timeout rather than a flagged reply.
    fn receive_matching(&self, id: u32, timeout: Duration) -> Result<CanFrame, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::timeout(timeout));
            }
            let frame = self.receive(remaining)?;
            if frame.id() == id {
                return Ok(frame);
            }
            tracing::trace!(id = %format!("0x{:08X}", frame.id()), "Skipping frame");
        }
    }

    /// Drop everything already sitting in the receive queue.
    fn flush_inbound(&self) -> Result<(), TransportError>;

    /// Accept only frames whose id matches `id` under `mask`.
    fn set_filter(&self, id: u32, mask: u32, extended: bool) -> Result<(), TransportError>;

    /// Go bus-on.
    fn bus_on(&self) -> Result<(), TransportError>;

    /// Go bus-off.
    fn bus_off(&self) -> Result<(), TransportError>;

    /// Release the channel. Further I/O fails with `TransportError::Closed`.
    fn close(&self) -> Result<(), TransportError>;
}
