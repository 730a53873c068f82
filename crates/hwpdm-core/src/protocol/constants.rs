//! Protocol constants for the Hardwire PDM configuration protocol.

use std::time::Duration;

// ============================================================================
// CAN Identifiers
// ============================================================================

/// Host -> device identifier (29-bit extended).
pub const CAN_SEND_ID: u32 = 0x12E7_B682;

/// Device -> host identifier (29-bit extended).
pub const CAN_RECEIVE_ID: u32 = 0x12E7_B681;

/// Mask covering every bit of an extended identifier.
pub const CAN_EXT_ID_MASK: u32 = 0x1FFF_FFFF;

// ============================================================================
// Message Types (payload byte 0)
// ============================================================================

pub const MSG_TYPE_INFO: u8 = 1;
pub const MSG_TYPE_CONFIG_SEND_START: u8 = 2;
pub const MSG_TYPE_CONFIG_DATA: u8 = 3;

// ============================================================================
// Size Constants
// ============================================================================

/// Fixed payload length of every protocol frame.
pub const FRAME_PAYLOAD_LEN: usize = 8;

/// Configuration bytes carried by one CONFIG_DATA frame.
pub const CHUNK_SIZE: usize = 6;

/// Filler for the final, short chunk.
pub const CHUNK_PAD_BYTE: u8 = b'\n';

// ============================================================================
// Timing
// ============================================================================

/// Reply window for the START handshake and for each chunk.
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_millis(100);

/// Listening window after each discovery broadcast.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Discovery broadcasts before giving up.
pub const DISCOVERY_ATTEMPTS: u32 = 10;

/// Timeout handed to the transport for a single frame send.
pub const SEND_TIMEOUT: Duration = Duration::from_millis(100);
