//! Serial port handling
//!
//! Provides port discovery and opening for radar communication.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;
use tracing::{debug, warn};

use super::{RadarError, DEFAULT_BAUD_RATE};

/// Port read/write timeout; reads are gated on `bytes_to_read()` so this
/// only bounds a write into a full driver buffer
const PORT_TIMEOUT_MS: u64 = 1;

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Ordering key: ttyACM*, then ttyUSB*, then COM*, each numerically; then the rest by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    let numbered = [("ttyACM", 0u8), ("ttyUSB", 1), ("COM", 2)];
    for (prefix, rank) in numbered {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank, num, basename.to_string());
        }
    }
    (3, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // USB CDC adapters that enumeration missed
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Open and configure a serial port for radar communication
pub fn open_port(name: &str, baud_rate: Option<u32>) -> Result<Box<dyn SerialPort>, RadarError> {
    let baud = baud_rate.unwrap_or(DEFAULT_BAUD_RATE);
    let mut port = serialport::new(name, baud)
        .timeout(Duration::from_millis(PORT_TIMEOUT_MS))
        .open()
        .map_err(|e| RadarError::PortFailed(format!("{}: {}", name, e)))?;
    configure_port(port.as_mut())?;
    port.clear(serialport::ClearBuffer::All)
        .map_err(|e| RadarError::PortFailed(e.to_string()))?;
    debug!(port = name, baud, "serial port opened");
    Ok(port)
}

/// Configure 8N1 without flow control
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), RadarError> {
    let failed = |e: serialport::Error| RadarError::PortFailed(e.to_string());
    port.set_data_bits(serialport::DataBits::Eight)
        .map_err(failed)?;
    port.set_parity(serialport::Parity::None).map_err(failed)?;
    port.set_stop_bits(serialport::StopBits::One)
        .map_err(failed)?;
    port.set_flow_control(serialport::FlowControl::None)
        .map_err(failed)?;

    // Some USB bridges hold the device in reset while DTR is low
    if let Err(e) = port.write_data_terminal_ready(true) {
        warn!("failed to set DTR high: {} (continuing)", e);
    }

    Ok(())
}
