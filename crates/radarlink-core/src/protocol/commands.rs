//! Protocol commands
//!
//! Defines the command set understood by the radar firmware.

use serde::{Deserialize, Serialize};

use super::SessionConfig;

/// Protocol commands for radar communication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Initialize the device (0x00)
    Init,

    /// Get firmware version, serial number and name (0x01)
    GetInfo,

    /// Set laser diode power in percent (0x02)
    SetLaserPower,

    /// Set operating mode (0x03)
    SetMode,

    /// Set depth resolution (0x04)
    SetResolution,

    /// Get field of view (0x05)
    GetFov,

    /// Get maximum supported resolution (0x06)
    GetMaxResolution,

    /// Request a single depth frame in trigger mode (0x20)
    TriggerDepth,

    /// Start depth streaming (0x30)
    StartDepth,

    /// Stop depth streaming (0x31)
    StopDepth,

    /// Capture a debug image into device memory (0x60)
    TakeDebugImage,

    /// Read a chunk of the captured debug image (0x61)
    ReadDebugImage,

    /// Unsolicited depth frame pushed while streaming (0x7E)
    ReportDepth,

    /// Unsolicited fault report (0x7F)
    ReportError,
}

impl Command {
    /// Every command, in opcode order
    pub const ALL: [Command; 14] = [
        Command::Init,
        Command::GetInfo,
        Command::SetLaserPower,
        Command::SetMode,
        Command::SetResolution,
        Command::GetFov,
        Command::GetMaxResolution,
        Command::TriggerDepth,
        Command::StartDepth,
        Command::StopDepth,
        Command::TakeDebugImage,
        Command::ReadDebugImage,
        Command::ReportDepth,
        Command::ReportError,
    ];

    /// 7-bit opcode, without the request bit
    pub fn opcode(&self) -> u8 {
        match self {
            Command::Init => 0x00,
            Command::GetInfo => 0x01,
            Command::SetLaserPower => 0x02,
            Command::SetMode => 0x03,
            Command::SetResolution => 0x04,
            Command::GetFov => 0x05,
            Command::GetMaxResolution => 0x06,
            Command::TriggerDepth => 0x20,
            Command::StartDepth => 0x30,
            Command::StopDepth => 0x31,
            Command::TakeDebugImage => 0x60,
            Command::ReadDebugImage => 0x61,
            Command::ReportDepth => 0x7E,
            Command::ReportError => 0x7F,
        }
    }

    /// Look up a command by opcode; the request bit must already be stripped
    pub fn from_opcode(opcode: u8) -> Option<Command> {
        Self::ALL.iter().copied().find(|c| c.opcode() == opcode)
    }

    /// Whether the device sends this without being asked
    pub fn is_unsolicited(&self) -> bool {
        matches!(self, Command::ReportDepth | Command::ReportError)
    }

    /// Response timeout in milliseconds under `config`
    pub fn timeout_ms(&self, config: &SessionConfig) -> u32 {
        match self {
            // Sensor exposure takes a while
            Command::TakeDebugImage => config.debug_image_timeout_ms,
            _ => config.io_timeout_ms,
        }
    }
}

/// Radar operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RadarMode {
    /// Laser off, no measurements
    #[default]
    Idle = 0,
    /// One frame per trigger request
    Trigger = 1,
    /// Frames are pushed continuously once streaming starts
    Continuous = 2,
}

impl RadarMode {
    /// Wire value
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Decode a wire value
    pub fn from_byte(b: u8) -> Option<RadarMode> {
        match b {
            0 => Some(RadarMode::Idle),
            1 => Some(RadarMode::Trigger),
            2 => Some(RadarMode::Continuous),
            _ => None,
        }
    }
}

impl std::str::FromStr for RadarMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "idle" => Ok(RadarMode::Idle),
            "trigger" | "trig" => Ok(RadarMode::Trigger),
            "continuous" | "cont" => Ok(RadarMode::Continuous),
            other => Err(format!("unknown radar mode '{}'", other)),
        }
    }
}
