//! Connection management
//!
//! Handles the session lifecycle: acquiring a transport, bringing the device
//! up with INIT, and powering it down again on close.

use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::clock::{Clock, SystemClock};
use super::serial::open_port;
use super::stream::{SerialChannel, Transport};
use super::{
    CommandChannel, RadarError, DEBUG_IMAGE_TIMEOUT_MS, DEFAULT_BAUD_RATE,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_TIMEOUT_MS, MAX_IO_ATTEMPTS,
};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Connecting (INIT in progress)
    Connecting,
    /// Connected and ready
    Connected,
    /// Last open attempt failed
    Error,
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Serial port name (or whatever the connector understands)
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Response timeout for ordinary commands in milliseconds
    pub io_timeout_ms: u32,
    /// Response timeout for debug image capture in milliseconds
    pub debug_image_timeout_ms: u32,
    /// Attempts made by open and close before giving up
    pub open_attempts: u32,
    /// Sleep between polls while waiting
    pub poll_interval_ms: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            io_timeout_ms: DEFAULT_TIMEOUT_MS,
            debug_image_timeout_ms: DEBUG_IMAGE_TIMEOUT_MS,
            open_attempts: MAX_IO_ATTEMPTS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl SessionConfig {
    /// Default configuration for `port_name`
    pub fn for_port(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, RadarError> {
        serde_json::from_str(json).map_err(|e| RadarError::Config(e.to_string()))
    }

    /// Load a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RadarError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| RadarError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }
}

/// Acquires the transport for a port name
pub trait Connector: Send {
    /// Open `port`
    fn connect(&mut self, port: &str) -> Result<Box<dyn Transport>, RadarError>;
}

impl<F> Connector for F
where
    F: FnMut(&str) -> Result<Box<dyn Transport>, RadarError> + Send,
{
    fn connect(&mut self, port: &str) -> Result<Box<dyn Transport>, RadarError> {
        self(port)
    }
}

/// Opens serial ports at a fixed baud rate
#[derive(Debug, Clone, Copy)]
pub struct SerialConnector {
    /// Baud rate
    pub baud_rate: u32,
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl Connector for SerialConnector {
    fn connect(&mut self, port: &str) -> Result<Box<dyn Transport>, RadarError> {
        let port = open_port(port, Some(self.baud_rate))?;
        Ok(Box::new(SerialChannel::new(port)))
    }
}

/// An open radar session
///
/// Dereferences to [`CommandChannel`] for device operations. Dropping the
/// session powers the device down like [`DeviceSession::close`] does.
pub struct DeviceSession {
    channel: CommandChannel,
    connector: Box<dyn Connector>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    state: ConnectionState,
    closed: bool,
}

impl DeviceSession {
    /// Open a serial port with default settings
    pub fn open(port: &str) -> Result<Self, RadarError> {
        Self::open_with_config(SessionConfig::for_port(port))
    }

    /// Open the serial port named in `config`
    pub fn open_with_config(config: SessionConfig) -> Result<Self, RadarError> {
        let connector = SerialConnector {
            baud_rate: config.baud_rate,
        };
        Self::open_with(config, connector, Arc::new(SystemClock::new()))
    }

    /// Open through an arbitrary connector and clock
    pub fn open_with(
        config: SessionConfig,
        connector: impl Connector + 'static,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RadarError> {
        let mut connector: Box<dyn Connector> = Box::new(connector);
        let channel = connect_and_init(connector.as_mut(), &clock, &config)?;
        info!("session open on {}", config.port_name);
        Ok(Self {
            channel,
            connector,
            clock,
            config,
            state: ConnectionState::Connected,
            closed: false,
        })
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Port this session talks to
    pub fn port_name(&self) -> &str {
        &self.config.port_name
    }

    /// Configuration the session was opened with
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Power down, release the transport and open again
    ///
    /// This is the only way to clear a latched device fault. On failure the
    /// session is left in [`ConnectionState::Error`] with no live transport.
    pub fn reopen(&mut self) -> Result<(), RadarError> {
        if !self.closed {
            if let Err(e) = self.shutdown() {
                warn!("power-down before reopen failed: {}", e);
            }
        }

        self.state = ConnectionState::Connecting;
        match connect_and_init(self.connector.as_mut(), &self.clock, &self.config) {
            Ok(channel) => {
                self.channel = channel;
                self.state = ConnectionState::Connected;
                self.closed = false;
                info!("session reopened on {}", self.config.port_name);
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Error;
                Err(e)
            }
        }
    }

    /// Stop streaming, switch the laser off and release the transport
    ///
    /// The transport is released even when the device never acknowledges the
    /// power-down, in which case `PortFailed` is returned.
    pub fn close(mut self) -> Result<(), RadarError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), RadarError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let outcome = self.power_down();
        if let Err(e) = self.channel.close_transport() {
            warn!("failed to release transport: {}", e);
        }
        self.state = ConnectionState::Disconnected;
        info!("session closed on {}", self.config.port_name);
        outcome
    }

    fn power_down(&mut self) -> Result<(), RadarError> {
        let attempts = self.config.open_attempts.max(1);
        let mut last = String::new();
        for attempt in 1..=attempts {
            let result = self
                .channel
                .stop_depth()
                .and_then(|_| self.channel.set_laser_power(0));
            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("power-down attempt {}/{} failed: {}", attempt, attempts, e);
                    last = e.to_string();
                }
            }
        }
        Err(RadarError::PortFailed(format!(
            "power-down failed after {} attempts: {}",
            attempts, last
        )))
    }
}

fn connect_and_init(
    connector: &mut dyn Connector,
    clock: &Arc<dyn Clock>,
    config: &SessionConfig,
) -> Result<CommandChannel, RadarError> {
    let attempts = config.open_attempts.max(1);
    let mut last = String::new();

    for attempt in 1..=attempts {
        let transport = match connector.connect(&config.port_name) {
            Ok(t) => t,
            Err(e) => {
                warn!("open attempt {}/{} failed: {}", attempt, attempts, e);
                last = e.to_string();
                continue;
            }
        };

        let mut channel = CommandChannel::with_config(transport, clock.clone(), config);
        match channel.init() {
            Ok(()) => return Ok(channel),
            Err(e) => {
                warn!("INIT attempt {}/{} failed: {}", attempt, attempts, e);
                last = e.to_string();
                if let Err(e) = channel.close_transport() {
                    warn!("failed to release transport: {}", e);
                }
            }
        }
    }

    Err(RadarError::PortFailed(format!(
        "{}: no response after {} attempts: {}",
        config.port_name, attempts, last
    )))
}

impl Deref for DeviceSession {
    type Target = CommandChannel;

    fn deref(&self) -> &CommandChannel {
        &self.channel
    }
}

impl DerefMut for DeviceSession {
    fn deref_mut(&mut self) -> &mut CommandChannel {
        &mut self.channel
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("close on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ManualClock;
    use pretty_assertions::assert_eq;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Transport that swallows everything and never answers
    struct Silent {
        closed: Arc<AtomicBool>,
    }

    impl Transport for Silent {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn close(&mut self) -> io::Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn quick_config() -> SessionConfig {
        SessionConfig {
            port_name: "test0".into(),
            io_timeout_ms: 20,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.io_timeout_ms, 1000);
        assert_eq!(config.debug_image_timeout_ms, 10000);
        assert_eq!(config.open_attempts, 3);
        assert_eq!(config.poll_interval_ms, 1);
        assert!(config.port_name.is_empty());
    }

    #[test]
    fn test_config_json() {
        let config =
            SessionConfig::from_json_str(r#"{"port_name": "/dev/ttyUSB0", "io_timeout_ms": 250}"#)
                .unwrap();
        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.io_timeout_ms, 250);
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);

        let err = SessionConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, RadarError::Config(_)));
        assert_eq!(err.code(), -9);
    }

    #[test]
    fn test_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("radar.json");
        let config = SessionConfig::for_port("COM4");
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
        assert_eq!(SessionConfig::from_json_file(&path).unwrap(), config);

        assert!(matches!(
            SessionConfig::from_json_file(dir.path().join("missing.json")),
            Err(RadarError::Config(_))
        ));
    }

    #[test]
    fn test_open_gives_up_after_three_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let connector = move |port: &str| -> Result<Box<dyn Transport>, RadarError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(RadarError::PortFailed(format!("{} busy", port)))
        };

        let result = DeviceSession::open_with(
            quick_config(),
            connector,
            Arc::new(ManualClock::default()),
        );
        match result {
            Err(RadarError::PortFailed(msg)) => assert!(msg.contains("test0 busy")),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("open should fail"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_open_releases_transport_of_silent_device() {
        let closed = Arc::new(AtomicBool::new(false));
        let flag = closed.clone();
        let connector = move |_: &str| -> Result<Box<dyn Transport>, RadarError> {
            Ok(Box::new(Silent {
                closed: flag.clone(),
            }))
        };
        let clock = Arc::new(ManualClock::default());

        let result = DeviceSession::open_with(quick_config(), connector, clock.clone());
        assert!(matches!(result, Err(RadarError::PortFailed(_))));
        assert!(closed.load(Ordering::SeqCst));
        // Three INIT timeouts of 20 ms each
        assert!(clock.now_ms() >= 60);
    }
}
