//! Device discovery.
//!
//! Broadcasts a zeroed INFO query and gathers every INFO answer that arrives
//! inside the listening window. Empty windows are retried up to a fixed number
//! of broadcasts. Responses are deduplicated by device id.

use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::events::{PdmEvent, PdmObserver};
use crate::protocol::constants::{CAN_RECEIVE_ID, DISCOVERY_ATTEMPTS, DISCOVERY_TIMEOUT, SEND_TIMEOUT};
use crate::protocol::Message;
use crate::transport::{CanFrame, CanTransport, TransportError};

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("No Hardwire device detected after {attempts} attempts")]
    NoDeviceFound { attempts: u32 },
    #[error("CAN error during discovery: {0}")]
    Transport(#[from] TransportError),
}

/// Identity of a device that answered discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceHandle {
    pub device_id: u32,
    pub model: u8,
    pub firmware_version: u8,
}

impl DeviceHandle {
    /// Build a handle from an INFO message; other messages yield `None`.
    pub fn from_message(message: &Message) -> Option<Self> {
        match *message {
            Message::Info {
                device_id,
                device_model,
                firmware_version,
            } => Some(Self {
                device_id,
                model: device_model,
                firmware_version,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Model: {},  ID: {},  FW Ver: {}",
            self.model, self.device_id, self.firmware_version
        )
    }
}

/// Discovery tuning.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Broadcasts before giving up.
    pub attempts: u32,
    /// Listening window after each broadcast.
    pub per_attempt_timeout: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            attempts: DISCOVERY_ATTEMPTS,
            per_attempt_timeout: DISCOVERY_TIMEOUT,
        }
    }
}

/// Find devices on the bus.
///
/// Returns the deduplicated devices in the order they first answered.
#[instrument(skip_all, fields(attempts = options.attempts))]
pub fn discover<T: CanTransport + ?Sized>(
    transport: &T,
    options: &DiscoveryOptions,
    observer: &dyn PdmObserver,
) -> Result<Vec<DeviceHandle>, DiscoveryError> {
    transport.flush_inbound()?;

    let query = Message::info_query().encode();
    let mut responses = Vec::new();

    for attempt in 1..=options.attempts {
        transport.send(&query, SEND_TIMEOUT)?;
        observer.on_event(&PdmEvent::DiscoveryAttempt {
            attempt,
            max_attempts: options.attempts,
        });

        collect_responses(transport, options.per_attempt_timeout, &mut responses)?;
        if !responses.is_empty() {
            break;
        }
        debug!(attempt, "No response to INFO query");
    }

    if responses.is_empty() {
        warn!(attempts = options.attempts, "No Hardwire device detected");
        return Err(DiscoveryError::NoDeviceFound {
            attempts: options.attempts,
        });
    }

    let received = responses.len();
    let devices = dedup_devices(responses);
    info!(received, unique = devices.len(), "Discovery complete");
    for device in &devices {
        observer.on_event(&PdmEvent::DeviceFound { device: *device });
    }
    Ok(devices)
}

/// Drain frames until the window closes, keeping valid INFO responses.
fn collect_responses<T: CanTransport + ?Sized>(
    transport: &T,
    window: Duration,
    out: &mut Vec<DeviceHandle>,
) -> Result<(), TransportError> {
    let deadline = Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(());
        }
        match transport.receive(remaining) {
            Ok(frame) => {
                if let Some(device) = parse_response(&frame) {
                    debug!(device = %device, "INFO response");
                    out.push(device);
                }
            }
            Err(e) if e.is_timeout() => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

fn parse_response(frame: &CanFrame) -> Option<DeviceHandle> {
    if frame.is_error() {
        debug!(frame = ?frame, "Discarding error frame");
        return None;
    }
    if frame.id() != CAN_RECEIVE_ID {
        debug!(frame = ?frame, "Discarding frame with foreign id");
        return None;
    }
    match Message::decode(frame) {
        Ok(message) => {
            let device = DeviceHandle::from_message(&message);
            if device.is_none() {
                debug!(message = %message, "Discarding non-INFO message");
            }
            device
        }
        Err(e) => {
            debug!(frame = ?frame, error = %e, "Discarding malformed frame");
            None
        }
    }
}

/// Keep the first response per device id, preserving arrival order.
pub fn dedup_devices(responses: Vec<DeviceHandle>) -> Vec<DeviceHandle> {
    let mut seen = HashSet::new();
    responses
        .into_iter()
        .filter(|d| seen.insert(d.device_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;
    use crate::transport::{MockReply, MockTransport};

    fn info(id: u32, model: u8, fw: u8) -> [u8; 8] {
        Message::Info {
            device_id: id,
            device_model: model,
            firmware_version: fw,
        }
        .to_bytes()
    }

    fn fast() -> DiscoveryOptions {
        DiscoveryOptions {
            attempts: 10,
            per_attempt_timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_dedup_duplicate_responses() {
        let mock = MockTransport::new();
        for _ in 0..5 {
            mock.queue_frame(info(42, 4, 12));
        }
        mock.queue_frame(info(7, 4, 12));
        mock.queue(MockReply::Timeout);

        let devices = discover(&mock, &fast(), &NullObserver).unwrap();
        let ids: Vec<u32> = devices.iter().map(|d| d.device_id).collect();
        assert_eq!(ids, vec![42, 7]);
        assert_eq!(mock.sent_frames().len(), 1);
    }

    #[test]
    fn test_dedup_keeps_first_seen() {
        let a = DeviceHandle {
            device_id: 1,
            model: 1,
            firmware_version: 1,
        };
        let b = DeviceHandle {
            firmware_version: 2,
            ..a
        };
        assert_eq!(dedup_devices(vec![a, b, a]), vec![a]);
    }

    #[test]
    fn test_retries_after_empty_window() {
        let mock = MockTransport::new();
        mock.queue_n(MockReply::Timeout, 3);
        mock.queue_frame(info(9, 2, 5));
        mock.queue(MockReply::Timeout);

        let devices = discover(&mock, &fast(), &NullObserver).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].model, 2);
        assert_eq!(mock.sent_frames().len(), 4);
        assert!(
            mock.sent_frames()
                .iter()
                .all(|f| f.data() == Message::info_query().to_bytes())
        );
    }

    #[test]
    fn test_no_device_found() {
        let mock = MockTransport::new();
        let err = discover(&mock, &fast(), &NullObserver).unwrap_err();
        assert!(matches!(err, DiscoveryError::NoDeviceFound { attempts: 10 }));
        assert_eq!(mock.sent_frames().len(), 10);
    }

    #[test]
    fn test_error_and_malformed_frames_ignored() {
        let mock = MockTransport::new();
        mock.queue(MockReply::Frame(
            CanFrame::new(CAN_RECEIVE_ID, info(1, 1, 1)).into_error(),
        ));
        mock.queue_frame([0x55, 0, 0, 0, 0, 0, 0, 0]);
        mock.queue(MockReply::Frame(CanFrame::from_slice(CAN_RECEIVE_ID, &[1, 0])));
        mock.queue(MockReply::Timeout);
        mock.queue_frame(info(3, 4, 12));
        mock.queue(MockReply::Timeout);

        let devices = discover(&mock, &fast(), &NullObserver).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_id, 3);
        assert_eq!(mock.sent_frames().len(), 2);
    }

    #[test]
    fn test_stale_frames_flushed() {
        let mock = MockTransport::new();
        mock.push_stale(CanFrame::new(CAN_RECEIVE_ID, info(99, 1, 1)));
        mock.queue_frame(info(5, 1, 1));
        mock.queue(MockReply::Timeout);

        let devices = discover(&mock, &fast(), &NullObserver).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_id, 5);
    }

    #[test]
    fn test_transport_failure_propagates() {
        let mock = MockTransport::new();
        mock.close().unwrap();
        assert!(matches!(
            discover(&mock, &fast(), &NullObserver),
            Err(DiscoveryError::Transport(TransportError::Closed))
        ));
    }
}
