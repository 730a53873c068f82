//! SocketCAN-based transport implementation (Linux).
//!
//! Channel index N maps to interface `canN`. Bitrate and link state are only
//! touched when interface management is requested, since that needs
//! CAP_NET_ADMIN; otherwise the interface is expected to be configured with
//! `ip link set canN up type can bitrate ...` beforehand.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use socketcan::nl::CanInterface;
use socketcan::{
    CanFilter, CanFrame as SocketFrame, CanSocket, EmbeddedFrame, ExtendedId, Id, Socket,
    SocketOptions,
};
use tracing::{debug, info, instrument, warn};

use super::bitrate::Bitrate;
use super::frame::CanFrame;
use super::traits::{CanTransport, TransportError};

/// Extended frame format flag in a raw SocketCAN id.
const CAN_EFF_FLAG: u32 = 0x8000_0000;

/// ARPHRD_CAN from `/sys/class/net/<if>/type`.
const ARPHRD_CAN: &str = "280";

const SYSFS_NET: &str = "/sys/class/net";

/// Interface name for a channel index.
pub fn channel_interface_name(channel: u32) -> String {
    format!("can{channel}")
}

/// A CAN network interface present on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub name: String,
    /// Channel index when the name has the `canN` form.
    pub index: Option<u32>,
    /// Operational state as reported by the kernel (`up`, `down`, ...).
    pub state: String,
}

/// List CAN interfaces (including virtual ones) sorted by name.
pub fn list_channels() -> Result<Vec<ChannelInfo>, TransportError> {
    let mut channels = Vec::new();
    for entry in std::fs::read_dir(SYSFS_NET)? {
        let entry = entry?;
        let path = entry.path();
        let is_can = read_sysfs(&path.join("type")).is_some_and(|t| t == ARPHRD_CAN);
        if !is_can {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let index = name.strip_prefix("can").and_then(|n| n.parse().ok());
        let state = read_sysfs(&path.join("operstate")).unwrap_or_else(|| "unknown".into());
        channels.push(ChannelInfo { name, index, state });
    }
    channels.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(channels)
}

fn read_sysfs(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
}

/// SocketCAN transport.
pub struct SocketCanTransport {
    socket: CanSocket,
    interface: String,
    bitrate: Bitrate,
    manage_interface: bool,
    closed: AtomicBool,
}

impl SocketCanTransport {
    /// Open channel `canN`.
    pub fn open(channel: u32, bitrate: Bitrate, manage_interface: bool) -> Result<Self, TransportError> {
        let interface = channel_interface_name(channel);
        Self::open_interface(&interface, bitrate, manage_interface).map_err(|e| match e {
            TransportError::Io(io) if io.kind() == ErrorKind::NotFound => {
                TransportError::ChannelNotFound { channel }
            }
            other => other,
        })
    }

    /// Open a CAN interface by name (e.g. `vcan0`).
    #[instrument(level = "info", skip(manage_interface), fields(bitrate = %bitrate))]
    pub fn open_interface(
        interface: &str,
        bitrate: Bitrate,
        manage_interface: bool,
    ) -> Result<Self, TransportError> {
        if !Path::new(SYSFS_NET).join(interface).exists() {
            return Err(TransportError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("no such interface: {interface}"),
            )));
        }

        if manage_interface {
            let link = netlink(interface)?;
            link.bring_down()
                .map_err(|e| TransportError::BusControl(format!("{interface} down: {e:?}")))?;
            link.set_bitrate(bitrate.bits_per_second(), None::<u32>)
                .map_err(|e| TransportError::BusControl(format!("{interface} bitrate: {e:?}")))?;
            info!(interface, bitrate = bitrate.bits_per_second(), "Bitrate configured");
        }

        let socket = CanSocket::open(interface)
            .map_err(|e| TransportError::OpenFailed(format!("{interface}: {e}")))?;
        socket.set_error_filter_accept_all()?;

        info!(interface, "Channel opened");

        Ok(Self {
            socket,
            interface: interface.to_string(),
            bitrate,
            manage_interface,
            closed: AtomicBool::new(false),
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn bitrate(&self) -> Bitrate {
        self.bitrate
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

fn netlink(interface: &str) -> Result<CanInterface, TransportError> {
    CanInterface::open(interface)
        .map_err(|e| TransportError::BusControl(format!("{interface}: {e:?}")))
}

fn to_socket_frame(frame: &CanFrame) -> Result<SocketFrame, TransportError> {
    let id = ExtendedId::new(frame.id())
        .ok_or_else(|| TransportError::WriteFailed(format!("invalid id 0x{:08X}", frame.id())))?;
    SocketFrame::new(id, frame.data())
        .ok_or_else(|| TransportError::WriteFailed(format!("invalid payload {:?}", frame.data())))
}

fn from_socket_frame(frame: &SocketFrame) -> CanFrame {
    let id = match frame.id() {
        Id::Extended(id) => id.as_raw(),
        Id::Standard(id) => u32::from(id.as_raw()),
    };
    let converted = CanFrame::from_slice(id, frame.data());
    if matches!(frame, SocketFrame::Error(_)) {
        converted.into_error()
    } else {
        converted
    }
}

impl CanTransport for SocketCanTransport {
    #[instrument(skip(self, frame, timeout), fields(id = %format!("0x{:08X}", frame.id())))]
    fn send(&self, frame: &CanFrame, timeout: Duration) -> Result<(), TransportError> {
        self.ensure_open()?;
        let raw = to_socket_frame(frame)?;
        self.socket.set_write_timeout(timeout)?;
        self.socket.write_frame(&raw).map_err(|e| match e.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => TransportError::timeout(timeout),
            _ => TransportError::WriteFailed(e.to_string()),
        })?;
        debug!(frame = ?frame, "Write complete");
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<CanFrame, TransportError> {
        self.ensure_open()?;
        self.socket.set_read_timeout(timeout)?;
        match self.socket.read_frame() {
            Ok(raw) => {
                let frame = from_socket_frame(&raw);
                debug!(frame = ?frame, "Read complete");
                Ok(frame)
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Err(TransportError::timeout(timeout))
            }
            Err(e) => Err(TransportError::ReadFailed(e.to_string())),
        }
    }

    fn flush_inbound(&self) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.socket.set_nonblocking(true)?;
        let mut dropped = 0usize;
        let result = loop {
            match self.socket.read_frame() {
                Ok(_) => dropped += 1,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(TransportError::ReadFailed(e.to_string())),
            }
        };
        self.socket.set_nonblocking(false)?;
        if dropped > 0 {
            debug!(dropped, "Flushed stale frames");
        }
        result
    }

    fn set_filter(&self, id: u32, mask: u32, extended: bool) -> Result<(), TransportError> {
        self.ensure_open()?;
        let (id, mask) = if extended {
            (id | CAN_EFF_FLAG, mask | CAN_EFF_FLAG)
        } else {
            (id, mask)
        };
        self.socket.set_filters(&[CanFilter::new(id, mask)])?;
        debug!(id = %format!("0x{id:08X}"), mask = %format!("0x{mask:08X}"), "Acceptance filter set");
        Ok(())
    }

    fn bus_on(&self) -> Result<(), TransportError> {
        self.ensure_open()?;
        if self.manage_interface {
            netlink(&self.interface)?
                .bring_up()
                .map_err(|e| TransportError::BusControl(format!("{} up: {e:?}", self.interface)))?;
            info!(interface = %self.interface, "Bus on");
        } else {
            debug!(interface = %self.interface, "Bus state managed externally");
        }
        Ok(())
    }

    fn bus_off(&self) -> Result<(), TransportError> {
        self.ensure_open()?;
        if self.manage_interface {
            netlink(&self.interface)?
                .bring_down()
                .map_err(|e| TransportError::BusControl(format!("{} down: {e:?}", self.interface)))?;
            info!(interface = %self.interface, "Bus off");
        }
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            warn!(interface = %self.interface, "Channel already closed");
        }
        Ok(())
    }
}
