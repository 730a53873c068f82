//! Configuration transfer: START handshake, then stop-and-wait chunk streaming.
//!
//! Every host frame must be echoed back byte-for-byte on the receive id. An
//! echo that differs is a NACK and the same chunk is sent again. An error
//! frame aborts. Silence after the final chunk means the device finished.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::discovery::DeviceHandle;
use crate::events::{LogLevel, PdmEvent, PdmObserver, PdmPhase};
use crate::payload::ChunkSequence;
use crate::protocol::Message;
use crate::protocol::constants::{CAN_RECEIVE_ID, EXCHANGE_TIMEOUT, SEND_TIMEOUT};
use crate::state::{TransferSession, TransferState};
use crate::transport::{CanFrame, CanTransport, TransportError};

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Lost communication with device{}. Update cancelled", at_chunk(.chunk))]
    LostCommunication { chunk: Option<usize> },
    #[error("CAN receive error{}. Update cancelled", at_chunk(.chunk))]
    ReceiveMismatch { chunk: Option<usize> },
    #[error("Chunk {chunk} rejected {attempts} times. Update cancelled")]
    RetriesExhausted { chunk: usize, attempts: u32 },
    #[error("Update cancelled by operator at chunk {chunk}")]
    Cancelled { chunk: usize },
    #[error("CAN error during transfer: {0}")]
    Transport(#[from] TransportError),
}

fn at_chunk(chunk: &Option<usize>) -> String {
    match chunk {
        Some(i) => format!(" at chunk {i}"),
        None => " during handshake".to_string(),
    }
}

impl TransferError {
    /// Stable short name for observers.
    pub fn kind(&self) -> &'static str {
        match self {
            TransferError::LostCommunication { .. } => "LostCommunication",
            TransferError::ReceiveMismatch { .. } => "ReceiveMismatch",
            TransferError::RetriesExhausted { .. } => "RetriesExhausted",
            TransferError::Cancelled { .. } => "Cancelled",
            TransferError::Transport(_) => "Transport",
        }
    }
}

/// Transfer tuning.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Reply window for the handshake and each chunk.
    pub exchange_timeout: Duration,
    /// NACKs tolerated per chunk before aborting. `None` retries forever.
    pub max_chunk_retries: Option<u32>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            exchange_timeout: EXCHANGE_TIMEOUT,
            max_chunk_retries: None,
        }
    }
}

/// Cooperative cancellation, checked once per chunk.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a completed transfer.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub device: DeviceHandle,
    /// Chunks delivered (always the full sequence).
    pub chunks_sent: usize,
    /// Configuration bytes before padding.
    pub payload_bytes: usize,
    /// NACKed exchanges that were retried.
    pub errors: u32,
    pub elapsed: Duration,
}

/// Drives one transfer over a borrowed transport.
pub struct TransferProtocol<'a, T: CanTransport + ?Sized> {
    transport: &'a T,
    observer: &'a dyn PdmObserver,
    options: TransferOptions,
    cancel: CancelToken,
}

impl<'a, T: CanTransport + ?Sized> TransferProtocol<'a, T> {
    pub fn new(transport: &'a T, observer: &'a dyn PdmObserver, options: TransferOptions) -> Self {
        Self {
            transport,
            observer,
            options,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Send `chunks` to `device`.
    #[instrument(skip_all, fields(device = device.device_id, chunks = chunks.len()))]
    pub fn run(
        &self,
        device: DeviceHandle,
        chunks: &ChunkSequence,
    ) -> Result<TransferReport, TransferError> {
        let start = Instant::now();
        let mut session = TransferSession::new(device, chunks.len());
        self.transition(&mut session, TransferState::Handshaking);

        loop {
            let step = match session.state {
                TransferState::Handshaking => self.handshake(&session),
                TransferState::Streaming => self.stream_chunk(&mut session, chunks),
                TransferState::Idle | TransferState::Completed | TransferState::Aborted => break,
            };
            match step {
                Ok(next) => self.transition(&mut session, next),
                Err(e) => {
                    self.transition(&mut session, TransferState::Aborted);
                    warn!(error = %e, errors = session.error_counter, "Transfer aborted");
                    self.observer.on_event(&PdmEvent::Error {
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }

        let report = TransferReport {
            device,
            chunks_sent: session.chunk_index,
            payload_bytes: chunks.payload_len(),
            errors: session.error_counter,
            elapsed: start.elapsed(),
        };
        info!(
            chunks = report.chunks_sent,
            errors = report.errors,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Transfer complete"
        );
        Ok(report)
    }

    fn transition(&self, session: &mut TransferSession, next: TransferState) {
        if session.state == next {
            return;
        }
        let from = session.goto_state(next);
        self.observer
            .on_event(&PdmEvent::StateChanged { from, to: next });
    }

    /// Send a frame on a freshly flushed queue and wait for the echo.
    fn exchange(&self, frame: &CanFrame) -> Result<Option<CanFrame>, TransferError> {
        self.transport.flush_inbound()?;
        self.transport.send(frame, SEND_TIMEOUT)?;
        match self
            .transport
            .receive_matching(CAN_RECEIVE_ID, self.options.exchange_timeout)
        {
            Ok(reply) => Ok(Some(reply)),
            Err(e) if e.is_timeout() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn handshake(&self, session: &TransferSession) -> Result<TransferState, TransferError> {
        let start = Message::ConfigSendStart {
            device_id: session.device.device_id,
        }
        .encode();
        debug!(device = session.device.device_id, "Sending CONFIG_SEND_START");

        let Some(reply) = self.exchange(&start)? else {
            return Err(TransferError::LostCommunication { chunk: None });
        };
        if reply.is_error() || reply.data() != start.data() {
            debug!(sent = ?start, received = ?reply, "Handshake reply mismatch");
            return Err(TransferError::ReceiveMismatch { chunk: None });
        }

        self.observer.on_event(&PdmEvent::Log {
            level: LogLevel::Info,
            message: "Communication established, starting config update".into(),
        });
        Ok(TransferState::Streaming)
    }

    fn stream_chunk(
        &self,
        session: &mut TransferSession,
        chunks: &ChunkSequence,
    ) -> Result<TransferState, TransferError> {
        let index = session.chunk_index;
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled { chunk: index });
        }

        let frame = Message::ConfigData {
            sequence: session.sequence(),
            bytes: chunks[index],
        }
        .encode();
        self.emit_progress(session);

        let Some(reply) = self.exchange(&frame)? else {
            if chunks.is_last(index) {
                // The device stops echoing once it has the whole file.
                debug!(chunk = index, "No reply after final chunk");
                session.advance();
                self.emit_progress(session);
                return Ok(TransferState::Completed);
            }
            return Err(TransferError::LostCommunication { chunk: Some(index) });
        };

        if reply.is_error() {
            return Err(TransferError::ReceiveMismatch { chunk: Some(index) });
        }

        if reply.data() != frame.data() {
            session.record_mismatch();
            debug!(
                chunk = index,
                attempts = session.chunk_attempts,
                sent = ?frame,
                received = ?reply,
                "Chunk NACK, resending"
            );
            if self
                .options
                .max_chunk_retries
                .is_some_and(|max| session.chunk_attempts > max)
            {
                return Err(TransferError::RetriesExhausted {
                    chunk: index,
                    attempts: session.chunk_attempts,
                });
            }
            return Ok(TransferState::Streaming);
        }

        session.advance();
        if session.is_done() {
            self.emit_progress(session);
            return Ok(TransferState::Completed);
        }
        Ok(TransferState::Streaming)
    }

    fn emit_progress(&self, session: &TransferSession) {
        self.observer.on_event(&PdmEvent::Progress {
            phase: PdmPhase::Transfer,
            current: session.chunk_index as u64,
            total: session.total_chunks as u64,
            errors: session.error_counter,
        });
    }
}
