//! Serial Protocol Communication
//!
//! Implements the framed binary protocol spoken by linear radar range finders.
//!
//! Layers, bottom up:
//! - [`Transport`]: non-blocking byte pipe (serial port, TCP bridge, simulator)
//! - [`FramingEngine`]: byte-stream synchronization, header and CRC8 validation
//! - [`CommandChannel`]: request/response correlation, timeouts, unsolicited reports
//! - [`DeviceSession`]: open/close lifecycle with bounded retry

mod channel;
pub mod checksum;
pub mod clock;
pub mod commands;
mod connection;
mod error;
pub(crate) mod framing;
mod packet;
pub mod serial;
pub mod stream;

pub use channel::{ChannelEvent, CommandChannel, DepthFrame, DeviceInfo, MAX_LASER_POWER};
pub use clock::{Clock, Deadline, ManualClock, SystemClock};
pub use commands::{Command, RadarMode};
pub use connection::{ConnectionState, Connector, DeviceSession, SerialConnector, SessionConfig};
pub use error::{FrameError, RadarError};
pub use framing::{FramingEngine, FramingStats, PUMP_READ_BUDGET};
pub use packet::{Header, Message, PayloadBuilder};
pub use serial::{list_ports, open_port, PortInfo};
pub use stream::{SerialChannel, TcpChannel, Transport};

/// Default baud rate for radar communication
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default timeout for command responses in milliseconds
pub const DEFAULT_TIMEOUT_MS: u32 = 1000;

/// Timeout for capturing a debug image; the device exposes the sensor for a while
pub const DEBUG_IMAGE_TIMEOUT_MS: u32 = 10000;

/// Number of attempts made when opening or closing a session
pub const MAX_IO_ATTEMPTS: u32 = 3;

/// Sleep between polls while waiting for a response
pub const DEFAULT_POLL_INTERVAL_MS: u32 = 1;

/// First byte of every message
pub const SYNC_BYTE: u8 = 0xA5;

/// Protocol version carried in every header
pub const PROTOCOL_VERSION: u8 = 0x04;

/// Bit 7 of the command byte: set on requests and device reports, clear on responses
pub const REQUEST_BIT: u8 = 0x80;

/// Header size: SYNC, VERSION, ID, CMD, LENGTH(2)
pub const HEADER_LEN: usize = 6;

/// Trailing CRC8 size
pub const CRC_LEN: usize = 1;

/// Maximum payload size accepted in either direction
pub const MAX_PAYLOAD_LEN: usize = 2100;

/// Maximum encoded message size
pub const MAX_MESSAGE_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN + CRC_LEN;
