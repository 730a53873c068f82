//! Event system for UI decoupling.
//!
//! The protocol layer never prints. CLI (or any other front end) subscribes
//! to these events to render progress and failures.

use std::fmt;

use crate::discovery::DeviceHandle;
use crate::state::TransferState;
use crate::transport::CanFrame;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Session phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdmPhase {
    /// Channel opened, nothing sent yet.
    Idle,
    /// Splitting the configuration into chunks.
    BuildingChunks,
    /// Broadcasting INFO and collecting responses.
    Discovery,
    /// Picking and validating a device.
    Selection,
    /// Waiting for the operator to approve the upload.
    Confirmation,
    /// Handshake and chunk streaming.
    Transfer,
    /// Upload finished.
    Complete,
    /// Session aborted.
    Error,
}

impl fmt::Display for PdmPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PdmPhase::Idle => write!(f, "Idle"),
            PdmPhase::BuildingChunks => write!(f, "Building Send Data"),
            PdmPhase::Discovery => write!(f, "Discovery"),
            PdmPhase::Selection => write!(f, "Selection"),
            PdmPhase::Confirmation => write!(f, "Confirmation"),
            PdmPhase::Transfer => write!(f, "Transfer"),
            PdmPhase::Complete => write!(f, "Complete"),
            PdmPhase::Error => write!(f, "Error"),
        }
    }
}

/// Events emitted by a PDM session.
#[derive(Debug, Clone)]
pub enum PdmEvent {
    /// Session phase changed.
    PhaseChanged { from: PdmPhase, to: PdmPhase },
    /// Discovery broadcast sent.
    DiscoveryAttempt { attempt: u32, max_attempts: u32 },
    /// A device answered the INFO query (after dedup).
    DeviceFound { device: DeviceHandle },
    /// Device picked for the upload.
    DeviceSelected { device: DeviceHandle },
    /// Transfer state machine transition.
    StateChanged {
        from: TransferState,
        to: TransferState,
    },
    /// Progress update for the current phase.
    Progress {
        phase: PdmPhase,
        current: u64,
        total: u64,
        errors: u32,
    },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// Error occurred; `kind` is a stable short name.
    Error { kind: &'static str, message: String },
    /// CAN frame sent/received.
    Frame {
        direction: FrameDirection,
        frame: CanFrame,
    },
    /// Configuration upload completed.
    Complete,
}

/// CAN frame direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    Tx, // Host -> Device
    Rx, // Device -> Host
}

impl fmt::Display for FrameDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameDirection::Tx => write!(f, "TX"),
            FrameDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving PDM events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait PdmObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &PdmEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl PdmObserver for NullObserver {
    fn on_event(&self, _event: &PdmEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl PdmObserver for TracingObserver {
    fn on_event(&self, event: &PdmEvent) {
        match event {
            PdmEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            PdmEvent::DiscoveryAttempt {
                attempt,
                max_attempts,
            } => {
                tracing::debug!(attempt, max_attempts, "INFO query sent");
            }
            PdmEvent::DeviceFound { device } => {
                tracing::info!(
                    id = device.device_id,
                    model = device.model,
                    fw = device.firmware_version,
                    "Device found"
                );
            }
            PdmEvent::DeviceSelected { device } => {
                tracing::info!(id = device.device_id, "Device selected");
            }
            PdmEvent::StateChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "Transfer state changed");
            }
            PdmEvent::Progress {
                phase,
                current,
                total,
                errors,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(phase = %phase, progress = %format!("{}%", pct), errors, "Progress");
            }
            PdmEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            PdmEvent::Error { kind, message } => {
                tracing::error!(kind, "{}", message);
            }
            PdmEvent::Frame { direction, frame } => {
                tracing::trace!(dir = %direction, frame = ?frame, "CAN frame");
            }
            PdmEvent::Complete => {
                tracing::info!("Update completed");
            }
        }
    }
}

/// Observer that records every event, for tests.
#[derive(Default)]
pub struct RecordingObserver {
    events: std::sync::Mutex<Vec<PdmEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<PdmEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl PdmObserver for RecordingObserver {
    fn on_event(&self, event: &PdmEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
