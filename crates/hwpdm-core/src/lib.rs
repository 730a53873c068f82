//! HWPDM-Core: Hardwire PDM configuration upload over CAN.
//!
//! Sends a configuration produced by the Hardwire configurator to a power
//! distribution module on a CAN bus, using the device's stop-and-wait echo
//! protocol.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Identifiers, timeouts, 8-byte message codec
//! - **Transport**: CAN channel abstraction (SocketCAN, mock)
//! - **Payload**: Splitting the configuration into 6-byte chunks
//! - **Discovery / Selector**: Finding devices and checking compatibility
//! - **State / Transfer**: Handshake and chunk streaming state machine
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use hwpdm_core::config::ConfigurationFile;
//! use hwpdm_core::selector::AutoApprove;
//! use hwpdm_core::session::{PdmSession, SessionConfig};
//!
//! let settings = SessionConfig {
//!     assume_yes: true,
//!     ..Default::default()
//! };
//! let file = ConfigurationFile::load_from_file("outputs.HWPDM")?;
//! let transport = settings.open_transport()?;
//!
//! let session = PdmSession::new(settings);
//! let report = session.run(&transport, &file, &AutoApprove)?;
//! println!("{} chunks sent", report.chunks_sent);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod config;
pub mod discovery;
pub mod events;
pub mod payload;
pub mod protocol;
pub mod selector;
pub mod session;
pub mod state;
pub mod transfer;
pub mod transport;

// Re-exports for convenience
pub use config::{CompatibilityTarget, ConfigError, ConfigurationFile};
pub use discovery::{DeviceHandle, DiscoveryError, DiscoveryOptions};
pub use events::{LogLevel, PdmEvent, PdmObserver, PdmPhase, TracingObserver};
pub use payload::{ChunkSequence, PayloadError};
pub use protocol::{DecodeError, Message, MessageType};
pub use selector::{AutoApprove, Operator, SelectionError};
pub use session::{PdmSession, SessionConfig, SessionError};
pub use state::{TransferSession, TransferState};
pub use transfer::{CancelToken, TransferError, TransferOptions, TransferProtocol, TransferReport};
#[cfg(target_os = "linux")]
pub use transport::SocketCanTransport;
pub use transport::{Bitrate, CanFrame, CanTransport, MockTransport, TransportError};
