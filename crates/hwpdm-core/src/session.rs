//! PDM Session - High-level orchestrator for a configuration upload.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{instrument, warn};

use crate::config::{ConfigError, ConfigurationFile};
use crate::discovery::{DiscoveryError, DiscoveryOptions, discover};
use crate::events::{FrameDirection, LogLevel, PdmEvent, PdmObserver, PdmPhase, TracingObserver};
use crate::payload::{ChunkSequence, PayloadError};
use crate::protocol::constants::{
    CAN_EXT_ID_MASK, CAN_RECEIVE_ID, DISCOVERY_ATTEMPTS, DISCOVERY_TIMEOUT, EXCHANGE_TIMEOUT,
};
use crate::selector::{Operator, SelectionError, select};
use crate::transfer::{CancelToken, TransferError, TransferOptions, TransferProtocol, TransferReport};
use crate::transport::{Bitrate, CanFrame, CanTransport, TransportError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Update declined by operator")]
    Declined,
}

/// Tool settings for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Channel index, opened as `canN`.
    pub channel: u32,
    /// Bus bitrate.
    pub bitrate: Bitrate,
    /// Interface name overriding the channel index (e.g. `vcan0`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    /// Set bitrate and link state through netlink (needs CAP_NET_ADMIN).
    pub manage_interface: bool,
    /// INFO broadcasts before giving up.
    pub discovery_attempts: u32,
    /// Listening window per broadcast, in milliseconds.
    pub discovery_timeout_ms: u64,
    /// Echo window for the handshake and each chunk, in milliseconds.
    pub exchange_timeout_ms: u64,
    /// NACKs tolerated per chunk; unbounded when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_chunk_retries: Option<u32>,
    /// Skip the confirmation prompt.
    pub assume_yes: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            bitrate: Bitrate::default(),
            interface: None,
            manage_interface: false,
            discovery_attempts: DISCOVERY_ATTEMPTS,
            discovery_timeout_ms: DISCOVERY_TIMEOUT.as_millis() as u64,
            exchange_timeout_ms: EXCHANGE_TIMEOUT.as_millis() as u64,
            max_chunk_retries: None,
            assume_yes: false,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings {}", path.display()))?;
        let config: SessionConfig = toml::from_str(&content)
            .with_context(|| format!("Invalid settings file {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Interface to open: the override if set, else `canN`.
    pub fn interface_name(&self) -> String {
        self.interface
            .clone()
            .unwrap_or_else(|| format!("can{}", self.channel))
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            attempts: self.discovery_attempts,
            per_attempt_timeout: Duration::from_millis(self.discovery_timeout_ms),
        }
    }

    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            exchange_timeout: Duration::from_millis(self.exchange_timeout_ms),
            max_chunk_retries: self.max_chunk_retries,
        }
    }

    /// Open the SocketCAN channel these settings describe.
    #[cfg(target_os = "linux")]
    pub fn open_transport(&self) -> Result<crate::transport::SocketCanTransport, TransportError> {
        use crate::transport::SocketCanTransport;
        match &self.interface {
            Some(name) => SocketCanTransport::open_interface(name, self.bitrate, self.manage_interface),
            None => SocketCanTransport::open(self.channel, self.bitrate, self.manage_interface),
        }
    }
}

/// PDM Session - drives one upload from chunking to completion.
pub struct PdmSession<O: PdmObserver> {
    config: SessionConfig,
    observer: Arc<O>,
    cancel: CancelToken,
}

impl PdmSession<TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: PdmObserver + 'static> PdmSession<O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(config: SessionConfig, observer: Arc<O>) -> Self {
        Self {
            config,
            observer,
            cancel: CancelToken::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Token that aborts the transfer at the next chunk boundary.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the complete upload over an opened channel.
    ///
    /// The channel is taken bus-off and closed before returning, whatever the outcome.
    #[instrument(skip_all, fields(lines = file.raw_lines.len()))]
    pub fn run<T: CanTransport + ?Sized>(
        &self,
        transport: &T,
        file: &ConfigurationFile,
        operator: &dyn Operator,
    ) -> Result<TransferReport> {
        let mut phase = PdmPhase::Idle;
        let result = self.run_phases(transport, file, operator, &mut phase);
        self.teardown(transport);

        match result {
            Ok(report) => {
                self.enter(&mut phase, PdmPhase::Complete);
                self.observer.on_event(&PdmEvent::Complete);
                Ok(report)
            }
            Err(e) => {
                // Transfer failures were already reported by the protocol.
                if e.downcast_ref::<TransferError>().is_none() {
                    self.observer.on_event(&PdmEvent::Error {
                        kind: error_kind(&e),
                        message: format!("{e:#}"),
                    });
                }
                self.enter(&mut phase, PdmPhase::Error);
                Err(e)
            }
        }
    }

    fn run_phases<T: CanTransport + ?Sized>(
        &self,
        transport: &T,
        file: &ConfigurationFile,
        operator: &dyn Operator,
        phase: &mut PdmPhase,
    ) -> Result<TransferReport> {
        let observer = self.observer.as_ref();

        self.enter(phase, PdmPhase::BuildingChunks);
        let target = file.compatibility()?;
        let chunks = ChunkSequence::build(&file.raw_lines)?;
        observer.on_event(&PdmEvent::Progress {
            phase: PdmPhase::BuildingChunks,
            current: chunks.len() as u64,
            total: chunks.len() as u64,
            errors: 0,
        });
        self.log(
            LogLevel::Info,
            format!(
                "Send data built: {} chunks, {} bytes, {} padding",
                chunks.len(),
                chunks.payload_len(),
                chunks.padding_len()
            ),
        );

        let transport = ObservableTransport {
            inner: transport,
            observer,
        };
        transport
            .set_filter(CAN_RECEIVE_ID, CAN_EXT_ID_MASK, true)
            .context("Failed to set acceptance filter")?;
        transport.bus_on().context("Failed to go bus-on")?;

        self.enter(phase, PdmPhase::Discovery);
        let devices = discover(&transport, &self.config.discovery_options(), observer)?;

        self.enter(phase, PdmPhase::Selection);
        let device = select(&devices, target, operator)?;
        observer.on_event(&PdmEvent::DeviceSelected { device });

        self.enter(phase, PdmPhase::Confirmation);
        if !self.config.assume_yes && !operator.confirm_transfer(&device) {
            self.log(LogLevel::Warn, format!("Upload to {device} declined"));
            return Err(SessionError::Declined.into());
        }

        self.enter(phase, PdmPhase::Transfer);
        let report = TransferProtocol::new(&transport, observer, self.config.transfer_options())
            .with_cancel_token(self.cancel.clone())
            .run(device, &chunks)?;
        Ok(report)
    }

    fn log(&self, level: LogLevel, message: String) {
        self.observer.on_event(&PdmEvent::Log { level, message });
    }

    fn enter(&self, phase: &mut PdmPhase, next: PdmPhase) {
        let from = std::mem::replace(phase, next);
        self.observer
            .on_event(&PdmEvent::PhaseChanged { from, to: next });
    }

    fn teardown<T: CanTransport + ?Sized>(&self, transport: &T) {
        if let Err(e) = transport.bus_off() {
            warn!(error = %e, "Bus-off failed");
        }
        if let Err(e) = transport.close() {
            warn!(error = %e, "Close failed");
        }
    }
}

fn error_kind(e: &anyhow::Error) -> &'static str {
    if e.downcast_ref::<ConfigError>().is_some() {
        "Config"
    } else if e.downcast_ref::<PayloadError>().is_some() {
        "Payload"
    } else if e.downcast_ref::<DiscoveryError>().is_some() {
        "Discovery"
    } else if e.downcast_ref::<SelectionError>().is_some() {
        "Selection"
    } else if e.downcast_ref::<SessionError>().is_some() {
        "Declined"
    } else if e.downcast_ref::<TransportError>().is_some() {
        "Transport"
    } else {
        "Session"
    }
}

/// Transport wrapper that emits frame events.
struct ObservableTransport<'a, T: CanTransport + ?Sized> {
    inner: &'a T,
    observer: &'a dyn PdmObserver,
}

impl<T: CanTransport + ?Sized> CanTransport for ObservableTransport<'_, T> {
    fn send(&self, frame: &CanFrame, timeout: Duration) -> Result<(), TransportError> {
        self.inner.send(frame, timeout)?;
        self.observer.on_event(&PdmEvent::Frame {
            direction: FrameDirection::Tx,
            frame: *frame,
        });
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<CanFrame, TransportError> {
        let frame = self.inner.receive(timeout)?;
        self.observer.on_event(&PdmEvent::Frame {
            direction: FrameDirection::Rx,
            frame,
        });
        Ok(frame)
    }

    fn flush_inbound(&self) -> Result<(), TransportError> {
        self.inner.flush_inbound()
    }

    fn set_filter(&self, id: u32, mask: u32, extended: bool) -> Result<(), TransportError> {
        self.inner.set_filter(id, mask, extended)
    }

    fn bus_on(&self) -> Result<(), TransportError> {
        self.inner.bus_on()
    }

    fn bus_off(&self) -> Result<(), TransportError> {
        self.inner.bus_off()
    }

    fn close(&self) -> Result<(), TransportError> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DeviceHandle;
    use crate::events::RecordingObserver;
    use crate::protocol::{Message, MessageType};
    use crate::selector::AutoApprove;
    use crate::transport::{MockReply, MockTransport};

    struct Decline;

    impl Operator for Decline {
        fn choose_device(&self, _devices: &[DeviceHandle]) -> Option<usize> {
            Some(0)
        }

        fn confirm_transfer(&self, _device: &DeviceHandle) -> bool {
            false
        }
    }

    fn file(lines: &[&str]) -> ConfigurationFile {
        ConfigurationFile {
            configurator_version: "12".into(),
            device_model_version: "4".into(),
            raw_lines: lines.iter().map(|l| l.to_string()).collect(),
        }
    }

    fn info(id: u32, model: u8, fw: u8) -> [u8; 8] {
        Message::Info {
            device_id: id,
            device_model: model,
            firmware_version: fw,
        }
        .to_bytes()
    }

    fn fast_config() -> SessionConfig {
        SessionConfig {
            discovery_attempts: 3,
            discovery_timeout_ms: 20,
            ..Default::default()
        }
    }

    fn session() -> PdmSession<RecordingObserver> {
        PdmSession::with_observer(fast_config(), Arc::new(RecordingObserver::default()))
    }

    fn sent_types(mock: &MockTransport) -> Vec<u8> {
        mock.sent_frames().iter().map(|f| f.data()[0]).collect()
    }

    #[test]
    fn test_full_upload() {
        let mock = MockTransport::new();
        mock.queue_frame(info(42, 4, 12));
        mock.queue(MockReply::Timeout);
        // START + 2 chunks
        mock.queue_n(MockReply::Echo, 3);

        let session = session();
        let report = session
            .run(&mock, &file(&["{\"a\":1}\n"]), &AutoApprove)
            .unwrap();
        assert_eq!(report.device.device_id, 42);
        assert_eq!(report.chunks_sent, 2);
        assert_eq!(report.payload_bytes, 8);
        assert!(session.observer.events().iter().any(|e| matches!(
            e,
            PdmEvent::Log { message, .. } if message == "Send data built: 2 chunks, 8 bytes, 4 padding"
        )));

        assert_eq!(sent_types(&mock), vec![1, 2, 3, 3]);
        let calls = mock.calls();
        assert_eq!(&calls[..3], &["set_filter", "bus_on", "flush"]);
        assert_eq!(&calls[calls.len() - 2..], &["bus_off", "close"]);

        let events = session.observer.events();
        assert!(matches!(events.last(), Some(PdmEvent::Complete)));
        assert!(events.iter().any(|e| matches!(
            e,
            PdmEvent::Frame {
                direction: FrameDirection::Rx,
                ..
            }
        )));
    }

    #[test]
    fn test_incompatible_model_sends_only_discovery() {
        let mock = MockTransport::new();
        mock.queue_frame(info(42, 3, 12));
        mock.queue(MockReply::Timeout);
        mock.queue_n(MockReply::Echo, 3);

        let err = session()
            .run(&mock, &file(&["abc\n"]), &AutoApprove)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SelectionError>(),
            Some(SelectionError::Incompatible {
                expected_model: 4,
                actual_model: 3,
                ..
            })
        ));
        assert!(
            sent_types(&mock)
                .iter()
                .all(|&t| t == MessageType::Info.as_u8())
        );
        assert!(mock.calls().ends_with(&["bus_off", "close"]));
    }

    #[test]
    fn test_declined_sends_no_transfer_frames() {
        let mock = MockTransport::new();
        mock.queue_frame(info(42, 4, 12));
        mock.queue(MockReply::Timeout);

        let session = session();
        let err = session.run(&mock, &file(&["abc\n"]), &Decline).unwrap_err();
        assert_eq!(err.downcast_ref::<SessionError>(), Some(&SessionError::Declined));
        assert!(session.observer.events().iter().any(|e| matches!(
            e,
            PdmEvent::Log {
                level: LogLevel::Warn,
                ..
            }
        )));
        assert_eq!(sent_types(&mock), vec![1]);
        assert!(mock.calls().ends_with(&["bus_off", "close"]));
    }

    #[test]
    fn test_assume_yes_skips_confirmation() {
        let mock = MockTransport::new();
        mock.queue_frame(info(42, 4, 12));
        mock.queue(MockReply::Timeout);
        mock.queue_n(MockReply::Echo, 2);

        let config = SessionConfig {
            assume_yes: true,
            ..fast_config()
        };
        let session = PdmSession::with_observer(config, Arc::new(RecordingObserver::default()));
        session.run(&mock, &file(&["abc\n"]), &Decline).unwrap();
        assert_eq!(sent_types(&mock), vec![1, 2, 3]);
    }

    #[test]
    fn test_empty_payload_fails_before_bus_work() {
        let mock = MockTransport::new();
        let err = session().run(&mock, &file(&["", ""]), &AutoApprove).unwrap_err();
        assert!(err.downcast_ref::<PayloadError>().is_some());
        assert!(mock.sent_frames().is_empty());
        assert_eq!(mock.calls(), vec!["bus_off", "close"]);
    }

    #[test]
    fn test_transfer_failure_reported_once() {
        let mock = MockTransport::new();
        mock.queue_frame(info(42, 4, 12));
        mock.queue(MockReply::Timeout);
        mock.queue(MockReply::EchoCorrupted { byte: 1 });

        let session = session();
        let err = session
            .run(&mock, &file(&["abc\n"]), &AutoApprove)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TransferError>(),
            Some(TransferError::ReceiveMismatch { chunk: None })
        ));
        let errors = session
            .observer
            .events()
            .into_iter()
            .filter(|e| matches!(e, PdmEvent::Error { .. }))
            .count();
        assert_eq!(errors, 1);
        assert!(mock.calls().ends_with(&["bus_off", "close"]));
    }

    #[test]
    fn test_no_device_found() {
        let mock = MockTransport::new();
        let err = session().run(&mock, &file(&["abc\n"]), &AutoApprove).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DiscoveryError>(),
            Some(DiscoveryError::NoDeviceFound { attempts: 3 })
        ));
        assert_eq!(sent_types(&mock), vec![1, 1, 1]);
    }

    #[test]
    fn test_settings_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hwpdm.toml");

        let config = SessionConfig {
            channel: 1,
            bitrate: Bitrate::K500,
            max_chunk_retries: Some(5),
            ..Default::default()
        };
        config.save_to_file(&path).unwrap();
        assert_eq!(SessionConfig::load_from_file(&path).unwrap(), config);

        std::fs::write(&path, "bitrate = \"125k\"\n").unwrap();
        let partial = SessionConfig::load_from_file(&path).unwrap();
        assert_eq!(partial.bitrate, Bitrate::K125);
        assert_eq!(partial.exchange_timeout_ms, 100);
        assert_eq!(partial.interface_name(), "can0");
    }
}
