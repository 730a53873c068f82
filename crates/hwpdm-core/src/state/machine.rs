//! State machine types for the configuration transfer.

use std::fmt;

use crate::discovery::DeviceHandle;

/// Transfer protocol state.
///
/// `Idle → Handshaking → Streaming → Completed | Aborted`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    /// Session created, nothing sent.
    #[default]
    Idle,
    /// CONFIG_SEND_START sent, waiting for the echo.
    Handshaking,
    /// Sending CONFIG_DATA chunks.
    Streaming,
    /// Every chunk delivered.
    Completed,
    /// Terminated by an error or cancellation.
    Aborted,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferState::Idle => write!(f, "IDLE"),
            TransferState::Handshaking => write!(f, "HANDSHAKING"),
            TransferState::Streaming => write!(f, "STREAMING"),
            TransferState::Completed => write!(f, "COMPLETED"),
            TransferState::Aborted => write!(f, "ABORTED"),
        }
    }
}

impl TransferState {
    /// Check if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Aborted)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: TransferState) -> bool {
        use TransferState::*;
        matches!(
            (self, next),
            (Idle, Handshaking)
                | (Handshaking, Streaming)
                | (Streaming, Streaming)
                | (Streaming, Completed)
                | (Idle | Handshaking | Streaming, Aborted)
        )
    }
}

/// Mutable state of one transfer, owned by the transfer protocol.
#[derive(Debug)]
pub struct TransferSession {
    /// Target device.
    pub device: DeviceHandle,
    /// Current state.
    pub state: TransferState,
    /// Index of the next chunk to send (0..=total_chunks).
    pub chunk_index: usize,
    /// Total chunks to send.
    pub total_chunks: usize,
    /// Mismatched acknowledgments seen so far.
    pub error_counter: u32,
    /// Consecutive mismatches on the current chunk.
    pub chunk_attempts: u32,
}

impl TransferSession {
    pub fn new(device: DeviceHandle, total_chunks: usize) -> Self {
        Self {
            device,
            state: TransferState::Idle,
            chunk_index: 0,
            total_chunks,
            error_counter: 0,
            chunk_attempts: 0,
        }
    }

    /// Transition to a new state, returning the previous one.
    pub fn goto_state(&mut self, new_state: TransferState) -> TransferState {
        debug_assert!(
            self.state.can_transition_to(new_state),
            "illegal transition {} -> {}",
            self.state,
            new_state
        );
        tracing::debug!(from = %self.state, to = %new_state, "State transition");
        std::mem::replace(&mut self.state, new_state)
    }

    /// Sequence byte for the current chunk.
    pub fn sequence(&self) -> u8 {
        (self.chunk_index % 256) as u8
    }

    /// Current chunk was acknowledged.
    pub fn advance(&mut self) {
        self.chunk_index += 1;
        self.chunk_attempts = 0;
    }

    /// Current chunk was answered with a mismatched payload.
    pub fn record_mismatch(&mut self) {
        self.error_counter += 1;
        self.chunk_attempts += 1;
    }

    pub fn is_done(&self) -> bool {
        self.chunk_index >= self.total_chunks
    }
}
