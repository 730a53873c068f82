//! Typed application messages and their 8-byte wire encoding.
//!
//! Layout (byte 0 is always the message type):
//!
//! | Byte | INFO             | CONFIG_SEND_START | CONFIG_DATA      |
//! |------|------------------|-------------------|------------------|
//! | 1-4  | device id (BE)   | device id (BE)    | sequence, data 0-2 |
//! | 5    | device model     | 0                 | data 3           |
//! | 6    | firmware version | 0                 | data 4           |
//! | 7    | 0                | 0                 | data 5           |

use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use super::constants::{
    CAN_SEND_ID, CHUNK_SIZE, FRAME_PAYLOAD_LEN, MSG_TYPE_CONFIG_DATA, MSG_TYPE_CONFIG_SEND_START,
    MSG_TYPE_INFO,
};
use crate::transport::CanFrame;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unknown message type: 0x{0:02X}")]
    UnknownType(u8),
    #[error("Frame too short: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Message discriminant carried in payload byte 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Info,
    ConfigSendStart,
    ConfigData,
}

impl MessageType {
    pub const fn as_u8(self) -> u8 {
        match self {
            MessageType::Info => MSG_TYPE_INFO,
            MessageType::ConfigSendStart => MSG_TYPE_CONFIG_SEND_START,
            MessageType::ConfigData => MSG_TYPE_CONFIG_DATA,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            MSG_TYPE_INFO => Ok(MessageType::Info),
            MSG_TYPE_CONFIG_SEND_START => Ok(MessageType::ConfigSendStart),
            MSG_TYPE_CONFIG_DATA => Ok(MessageType::ConfigData),
            other => Err(DecodeError::UnknownType(other)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Info => write!(f, "INFO"),
            MessageType::ConfigSendStart => write!(f, "CONFIG_SEND_START"),
            MessageType::ConfigData => write!(f, "CONFIG_DATA"),
        }
    }
}

/// A protocol message. Exactly one message per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// Device identity announcement (also sent zeroed by the host as a query).
    Info {
        device_id: u32,
        device_model: u8,
        firmware_version: u8,
    },
    /// Host asks a specific device to accept a configuration.
    ConfigSendStart { device_id: u32 },
    /// One chunk of configuration. `sequence` wraps modulo 256.
    ConfigData {
        sequence: u8,
        bytes: [u8; CHUNK_SIZE],
    },
}

impl Message {
    /// The zeroed INFO query broadcast during discovery.
    pub const fn info_query() -> Self {
        Message::Info {
            device_id: 0,
            device_model: 0,
            firmware_version: 0,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Info { .. } => MessageType::Info,
            Message::ConfigSendStart { .. } => MessageType::ConfigSendStart,
            Message::ConfigData { .. } => MessageType::ConfigData,
        }
    }

    /// Encode into the raw 8-byte payload.
    pub fn to_bytes(&self) -> [u8; FRAME_PAYLOAD_LEN] {
        let mut data = [0u8; FRAME_PAYLOAD_LEN];
        data[0] = self.message_type().as_u8();
        match *self {
            Message::Info {
                device_id,
                device_model,
                firmware_version,
            } => {
                BigEndian::write_u32(&mut data[1..5], device_id);
                data[5] = device_model;
                data[6] = firmware_version;
            }
            Message::ConfigSendStart { device_id } => {
                BigEndian::write_u32(&mut data[1..5], device_id);
            }
            Message::ConfigData { sequence, bytes } => {
                data[1] = sequence;
                data[2..].copy_from_slice(&bytes);
            }
        }
        data
    }

    /// Decode a raw payload. Anything past byte 7 is ignored.
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let Some(&type_byte) = data.first() else {
            return Err(DecodeError::Truncated {
                expected: FRAME_PAYLOAD_LEN,
                actual: 0,
            });
        };
        let message_type = MessageType::try_from(type_byte)?;

        if data.len() < FRAME_PAYLOAD_LEN {
            return Err(DecodeError::Truncated {
                expected: FRAME_PAYLOAD_LEN,
                actual: data.len(),
            });
        }

        Ok(match message_type {
            MessageType::Info => Message::Info {
                device_id: BigEndian::read_u32(&data[1..5]),
                device_model: data[5],
                firmware_version: data[6],
            },
            MessageType::ConfigSendStart => Message::ConfigSendStart {
                device_id: BigEndian::read_u32(&data[1..5]),
            },
            MessageType::ConfigData => {
                let mut bytes = [0u8; CHUNK_SIZE];
                bytes.copy_from_slice(&data[2..2 + CHUNK_SIZE]);
                Message::ConfigData {
                    sequence: data[1],
                    bytes,
                }
            }
        })
    }

    /// Encode into a host -> device frame.
    pub fn encode(&self) -> CanFrame {
        CanFrame::new(CAN_SEND_ID, self.to_bytes())
    }

    /// Decode a received frame's payload.
    pub fn decode(frame: &CanFrame) -> Result<Self, DecodeError> {
        Self::from_bytes(frame.data())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Info {
                device_id,
                device_model,
                firmware_version,
            } => write!(
                f,
                "INFO(id={device_id}, model={device_model}, fw={firmware_version})"
            ),
            Message::ConfigSendStart { device_id } => {
                write!(f, "CONFIG_SEND_START(id={device_id})")
            }
            Message::ConfigData { sequence, .. } => write!(f, "CONFIG_DATA(seq={sequence})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::CAN_RECEIVE_ID;

    #[test]
    fn test_info_layout() {
        let frame = CanFrame::new(CAN_RECEIVE_ID, [1, 0x12, 0x34, 0x56, 0x78, 4, 12, 0]);
        let msg = Message::decode(&frame).unwrap();
        assert_eq!(
            msg,
            Message::Info {
                device_id: 0x1234_5678,
                device_model: 4,
                firmware_version: 12,
            }
        );
    }

    #[test]
    fn test_info_ignores_reserved_byte() {
        let frame = CanFrame::new(CAN_RECEIVE_ID, [1, 0, 0, 0, 42, 3, 7, 0xFF]);
        let Message::Info { device_id, .. } = Message::decode(&frame).unwrap() else {
            panic!("expected INFO");
        };
        assert_eq!(device_id, 42);
    }

    #[test]
    fn test_start_layout() {
        let frame = Message::ConfigSendStart {
            device_id: 0xA1B2_C3D4,
        }
        .encode();
        assert_eq!(frame.id(), CAN_SEND_ID);
        assert!(!frame.is_error());
        assert_eq!(frame.data(), &[2, 0xA1, 0xB2, 0xC3, 0xD4, 0, 0, 0]);
    }

    #[test]
    fn test_data_layout() {
        let msg = Message::ConfigData {
            sequence: 0xFF,
            bytes: *b"abc\ndf",
        };
        assert_eq!(msg.to_bytes(), [3, 0xFF, b'a', b'b', b'c', b'\n', b'd', b'f']);
        assert_eq!(Message::from_bytes(&msg.to_bytes()).unwrap(), msg);
    }

    #[test]
    fn test_info_query_is_zeroed() {
        assert_eq!(Message::info_query().to_bytes(), [1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_unknown_type() {
        assert_eq!(
            Message::from_bytes(&[9, 0, 0, 0, 0, 0, 0, 0]),
            Err(DecodeError::UnknownType(9))
        );
    }

    #[test]
    fn test_truncated() {
        assert_eq!(
            Message::from_bytes(&[1, 0, 0]),
            Err(DecodeError::Truncated {
                expected: 8,
                actual: 3
            })
        );
        assert!(matches!(
            Message::from_bytes(&[]),
            Err(DecodeError::Truncated { actual: 0, .. })
        ));
    }
}
