//! # radarlink Core Library
//!
//! Host-side protocol stack for linear radar range finders on a serial link.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Framing with resynchronization and CRC8 validation over any byte transport
//! - Synchronous command/response with timeouts and unsolicited depth/fault reports
//! - Session lifecycle with bounded open/close retry
//! - Debug image capture
//! - An in-memory simulated device for testing without hardware
//!
//! The library logs through `tracing` and never installs a subscriber.
//!
//! ## Example
//!
//! ```rust,no_run
//! use radarlink_core::protocol::{DeviceSession, RadarMode};
//!
//! # fn main() -> Result<(), radarlink_core::protocol::RadarError> {
//! let mut radar = DeviceSession::open("/dev/ttyUSB0")?;
//! println!("{:?}", radar.get_info()?);
//!
//! radar.set_mode(RadarMode::Continuous)?;
//! radar.start_depth()?;
//! let frame = radar.continuous_depth(1000)?;
//! println!("{} samples at t={} ms", frame.samples.len(), frame.timestamp_ms);
//!
//! radar.close()?;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod demo;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::capture::DebugImage;
    pub use crate::demo::{SimulatedRadar, SimulatorHandle};
    pub use crate::protocol::{
        ChannelEvent, CommandChannel, ConnectionState, DepthFrame, DeviceInfo, DeviceSession,
        RadarError, RadarMode, SessionConfig, Transport,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
