//! Transport layer module.

pub mod bitrate;
#[cfg(target_os = "linux")]
pub mod can_socket;
pub mod frame;
pub mod mock;
pub mod traits;

pub use bitrate::{Bitrate, UnknownBitrate};
#[cfg(target_os = "linux")]
pub use can_socket::{ChannelInfo, SocketCanTransport, channel_interface_name, list_channels};
pub use frame::CanFrame;
pub use mock::{MockReply, MockTransport};
pub use traits::{CanTransport, TransportError};
