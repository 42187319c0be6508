//! Protocol errors

use thiserror::Error;

use super::Command;

/// Errors returned by radar operations
///
/// Checksum failures and header resynchronization never show up here: the
/// framing engine absorbs them, so wire corruption surfaces only as
/// [`RadarError::AccessTimeout`].
#[derive(Error, Debug)]
pub enum RadarError {
    /// The transport could not be acquired, or open/close ran out of attempts
    #[error("Port failed: {0}")]
    PortFailed(String),

    /// The device reported a fault; sticky until the session is reopened
    #[error("Device reported a fault")]
    DeviceFailed,

    /// No matching response arrived before the deadline
    #[error("Timed out waiting for device response")]
    AccessTimeout,

    /// Invalid argument, or the device echoed a different value than requested
    #[error("Wrong parameter: {0}")]
    WrongParam(String),

    /// No fresh depth frame was available in time
    #[error("Depth frame unavailable")]
    DepthUnavailable,

    /// Local framing failure, e.g. a send while the previous one is still draining
    #[error("Implementation error: {0}")]
    Implementation(String),

    /// The response payload is too short to decode
    #[error("Invalid response to {command:?}: {len} bytes")]
    InvalidResponse {
        /// Command whose response was short
        command: Command,
        /// Payload length received
        len: usize,
    },

    /// File I/O failed, e.g. while saving a debug image
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Session configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RadarError {
    /// Stable numeric code for this error
    ///
    /// The first six values match the return codes of the vendor SDK.
    pub fn code(&self) -> i32 {
        match self {
            RadarError::PortFailed(_) => -1,
            RadarError::DeviceFailed => -2,
            RadarError::AccessTimeout => -3,
            RadarError::WrongParam(_) => -4,
            RadarError::DepthUnavailable => -5,
            RadarError::Implementation(_) => -6,
            RadarError::InvalidResponse { .. } => -7,
            RadarError::Io(_) => -8,
            RadarError::Config(_) => -9,
        }
    }
}

/// Codec errors for a single, complete message buffer
///
/// Only [`Message::from_bytes`](super::Message::from_bytes) reports these; the
/// streaming receiver discards bad input silently.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("bad sync byte: {0:#04x}")]
    BadSync(u8),

    #[error("unsupported protocol version: {0:#04x}")]
    BadVersion(u8),

    #[error("payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("truncated message: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("CRC mismatch: expected {expected:#04x}, got {actual:#04x}")]
    CrcMismatch { expected: u8, actual: u8 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_match_sdk() {
        assert_eq!(RadarError::PortFailed("x".into()).code(), -1);
        assert_eq!(RadarError::DeviceFailed.code(), -2);
        assert_eq!(RadarError::AccessTimeout.code(), -3);
        assert_eq!(RadarError::WrongParam("x".into()).code(), -4);
        assert_eq!(RadarError::DepthUnavailable.code(), -5);
        assert_eq!(RadarError::Implementation("x".into()).code(), -6);
    }

    #[test]
    fn test_error_display() {
        let err = RadarError::InvalidResponse {
            command: Command::GetInfo,
            len: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("GetInfo"));
        assert!(msg.contains('3'));

        let err = FrameError::CrcMismatch {
            expected: 0xAB,
            actual: 0x01,
        };
        assert!(err.to_string().contains("0xab"));
    }
}
