//! Command channel
//!
//! Synchronous request/response on top of the non-blocking [`FramingEngine`].
//! One request is outstanding at a time; responses are paired with it by
//! (id, opcode). Device-initiated reports (depth pushes, fault reports) are
//! folded into channel state as they arrive, whichever call is pumping.

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::clock::{Clock, Deadline};
use super::framing::{FramingEngine, FramingStats};
use super::stream::Transport;
use super::{Command, Message, PayloadBuilder, RadarError, RadarMode, SessionConfig, REQUEST_BIT};
use crate::capture::{DebugImage, DEBUG_IMAGE_CHUNK_LEN, MAX_DEBUG_IMAGE_LEN};

/// Highest laser power the firmware accepts, in percent
pub const MAX_LASER_POWER: u8 = 100;

const SERIAL_NUMBER_LEN: usize = 32;
const DEVICE_NAME_LEN: usize = 64;
const DEVICE_INFO_LEN: usize = 2 + SERIAL_NUMBER_LEN + DEVICE_NAME_LEN;

/// What a single [`CommandChannel::pump`] produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The response to the outstanding request arrived
    ResponseMatched,
    /// A depth frame was pushed and is now the latest
    UnsolicitedDepth,
    /// The device reported a fault; the latch is set
    UnsolicitedFault,
    /// Nothing relevant happened
    NoEvent,
}

/// One depth measurement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepthFrame {
    /// Device timestamp in milliseconds
    pub timestamp_ms: u32,
    /// Depth samples
    pub samples: Vec<u16>,
}

impl DepthFrame {
    /// Decode `timestamp(u32 LE) + samples(u16 LE[])`; `None` below 4 bytes
    ///
    /// A trailing odd byte is ignored.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        if payload.len() < 4 {
            return None;
        }
        let timestamp_ms = LittleEndian::read_u32(&payload[..4]);
        let samples = payload[4..]
            .chunks_exact(2)
            .map(LittleEndian::read_u16)
            .collect();
        Some(Self {
            timestamp_ms,
            samples,
        })
    }

    /// Encode in wire layout
    pub fn encode(&self) -> Vec<u8> {
        let mut builder = PayloadBuilder::new().u32_le(self.timestamp_ms);
        for &s in &self.samples {
            builder = builder.u16_le(s);
        }
        builder.build()
    }
}

/// Device identification returned by GET_INFO
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Firmware major version
    pub major: u8,
    /// Firmware minor version
    pub minor: u8,
    /// Serial number
    pub serial_number: String,
    /// Product name
    pub name: String,
}

impl DeviceInfo {
    fn decode(payload: &[u8]) -> Result<Self, RadarError> {
        if payload.len() < DEVICE_INFO_LEN {
            return Err(RadarError::InvalidResponse {
                command: Command::GetInfo,
                len: payload.len(),
            });
        }
        let serial_end = 2 + SERIAL_NUMBER_LEN;
        Ok(Self {
            major: payload[0],
            minor: payload[1],
            serial_number: fixed_str(&payload[2..serial_end]),
            name: fixed_str(&payload[serial_end..DEVICE_INFO_LEN]),
        })
    }

    /// Firmware version as "major.minor"
    pub fn version(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }
}

/// NUL-padded fixed-width field to a trimmed string
fn fixed_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).trim().to_string()
}

fn decode_u16(command: Command, payload: &[u8]) -> Result<u16, RadarError> {
    if payload.len() < 2 {
        return Err(RadarError::InvalidResponse {
            command,
            len: payload.len(),
        });
    }
    Ok(LittleEndian::read_u16(payload))
}

/// The echoed value must start with exactly what was sent
fn check_echo(command: Command, sent: &[u8], echo: &[u8]) -> Result<(), RadarError> {
    if echo.len() < sent.len() || echo[..sent.len()] != *sent {
        return Err(RadarError::WrongParam(format!(
            "{:?}: sent {:02X?}, device echoed {:02X?}",
            command, sent, echo
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    id: u8,
    opcode: u8,
}

/// Request/response engine and typed device operations
pub struct CommandChannel {
    engine: FramingEngine,
    clock: Arc<dyn Clock>,
    next_id: u8,
    pending: Option<PendingRequest>,
    response: Option<Vec<u8>>,
    latest_depth: Option<DepthFrame>,
    depth_fresh: bool,
    fault: bool,
    config: SessionConfig,
}

impl CommandChannel {
    /// Channel with default timeouts
    pub fn new(transport: Box<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        Self::with_config(transport, clock, &SessionConfig::default())
    }

    /// Channel using the timeouts from `config`
    pub fn with_config(
        transport: Box<dyn Transport>,
        clock: Arc<dyn Clock>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            engine: FramingEngine::new(transport),
            clock,
            next_id: 0,
            pending: None,
            response: None,
            latest_depth: None,
            depth_fresh: false,
            fault: false,
            config: config.clone(),
        }
    }

    /// Whether the device has reported a fault since the session opened
    pub fn fault_latched(&self) -> bool {
        self.fault
    }

    /// Id the next exchange will use
    pub fn next_request_id(&self) -> u8 {
        self.next_id
    }

    /// Most recent depth frame pushed by the device, consumed or not
    pub fn latest_depth(&self) -> Option<&DepthFrame> {
        self.latest_depth.as_ref()
    }

    /// Link counters of the underlying framing engine
    pub fn stats(&self) -> FramingStats {
        self.engine.stats()
    }

    /// Response timeout for ordinary commands
    pub fn io_timeout_ms(&self) -> u32 {
        self.config.io_timeout_ms
    }

    pub(crate) fn close_transport(&mut self) -> std::io::Result<()> {
        self.engine.close_transport()
    }

    /// Advance the link by one step and fold any decoded message into state
    pub fn pump(&mut self) -> ChannelEvent {
        match self.engine.pump() {
            Some(msg) => self.dispatch(msg),
            None => ChannelEvent::NoEvent,
        }
    }

    fn dispatch(&mut self, msg: Message) -> ChannelEvent {
        let opcode = msg.opcode();

        if !msg.is_request() {
            return match self.pending {
                Some(p) if p.id == msg.id && p.opcode == opcode && self.response.is_none() => {
                    self.response = Some(msg.payload);
                    ChannelEvent::ResponseMatched
                }
                _ => {
                    debug!(
                        "dropping unmatched response id={} opcode={:#04x} (pending {:?})",
                        msg.id, opcode, self.pending
                    );
                    ChannelEvent::NoEvent
                }
            };
        }

        match Command::from_opcode(opcode).filter(Command::is_unsolicited) {
            Some(Command::ReportDepth) => match DepthFrame::decode(&msg.payload) {
                Some(frame) => {
                    self.latest_depth = Some(frame);
                    self.depth_fresh = true;
                    ChannelEvent::UnsolicitedDepth
                }
                None => {
                    debug!("ignoring depth report of {} bytes", msg.payload.len());
                    ChannelEvent::NoEvent
                }
            },
            Some(Command::ReportError) => {
                if !self.fault {
                    warn!("device reported a fault");
                }
                self.fault = true;
                ChannelEvent::UnsolicitedFault
            }
            _ => {
                debug!("ignoring device request opcode={:#04x}", opcode);
                ChannelEvent::NoEvent
            }
        }
    }

    /// Send `command` and wait up to `timeout_ms` for its response payload
    pub fn exchange(
        &mut self,
        command: Command,
        payload: &[u8],
        timeout_ms: u32,
    ) -> Result<Vec<u8>, RadarError> {
        if self.fault {
            return Err(RadarError::DeviceFailed);
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let opcode = command.opcode();
        self.engine.send(id, opcode | REQUEST_BIT, payload)?;

        self.response = None;
        self.pending = Some(PendingRequest { id, opcode });
        let deadline = Deadline::after(self.clock.as_ref(), timeout_ms);
        let outcome = self.await_response(deadline);
        self.pending = None;
        self.response = None;

        match &outcome {
            Ok(_) => debug!(
                "{:?} (id={}) answered with {} ms to spare",
                command,
                id,
                deadline.remaining_at(self.clock.now_ms())
            ),
            Err(e) => debug!("{:?} (id={}) failed: {}", command, id, e),
        }
        outcome
    }

    fn await_response(&mut self, deadline: Deadline) -> Result<Vec<u8>, RadarError> {
        loop {
            self.pump();
            if self.fault {
                return Err(RadarError::DeviceFailed);
            }
            if let Some(payload) = self.response.take() {
                return Ok(payload);
            }
            if deadline.expired(self.clock.as_ref()) {
                return Err(RadarError::AccessTimeout);
            }
            self.clock.sleep_ms(self.config.poll_interval_ms);
        }
    }

    /// Exchange with the timeout the session configures for `command`
    fn request(&mut self, command: Command, payload: &[u8]) -> Result<Vec<u8>, RadarError> {
        let timeout = command.timeout_ms(&self.config);
        self.exchange(command, payload, timeout)
    }

    fn set_and_verify(&mut self, command: Command, value: &[u8]) -> Result<(), RadarError> {
        let echo = self.request(command, value)?;
        check_echo(command, value, &echo)
    }

    /// Initialize the device
    pub fn init(&mut self) -> Result<(), RadarError> {
        self.request(Command::Init, &[]).map(|_| ())
    }

    /// Read firmware version, serial number and product name
    pub fn get_info(&mut self) -> Result<DeviceInfo, RadarError> {
        let payload = self.request(Command::GetInfo, &[])?;
        DeviceInfo::decode(&payload)
    }

    /// Set laser diode power, 0 to 100 percent
    pub fn set_laser_power(&mut self, power: u8) -> Result<(), RadarError> {
        if power > MAX_LASER_POWER {
            return Err(RadarError::WrongParam(format!(
                "laser power {} exceeds {}",
                power, MAX_LASER_POWER
            )));
        }
        self.set_and_verify(Command::SetLaserPower, &[power])
    }

    /// Switch operating mode
    pub fn set_mode(&mut self, mode: RadarMode) -> Result<(), RadarError> {
        self.set_and_verify(Command::SetMode, &[mode.as_byte()])
    }

    /// Set the number of samples per depth frame
    pub fn set_resolution(&mut self, size: u16) -> Result<(), RadarError> {
        let value = PayloadBuilder::new().u16_le(size).build();
        self.set_and_verify(Command::SetResolution, &value)
    }

    /// Field of view in 0.1 degree units
    pub fn get_fov(&mut self) -> Result<u16, RadarError> {
        let payload = self.request(Command::GetFov, &[])?;
        decode_u16(Command::GetFov, &payload)
    }

    /// Largest resolution [`CommandChannel::set_resolution`] accepts
    pub fn get_max_resolution(&mut self) -> Result<u16, RadarError> {
        let payload = self.request(Command::GetMaxResolution, &[])?;
        decode_u16(Command::GetMaxResolution, &payload)
    }

    /// Request one depth frame (trigger mode)
    pub fn trigger_depth(&mut self) -> Result<DepthFrame, RadarError> {
        let payload = self.request(Command::TriggerDepth, &[])?;
        if payload.is_empty() {
            return Err(RadarError::DepthUnavailable);
        }
        DepthFrame::decode(&payload).ok_or(RadarError::InvalidResponse {
            command: Command::TriggerDepth,
            len: payload.len(),
        })
    }

    /// Start pushing depth frames (continuous mode)
    pub fn start_depth(&mut self) -> Result<(), RadarError> {
        self.request(Command::StartDepth, &[]).map(|_| ())
    }

    /// Stop pushing depth frames
    pub fn stop_depth(&mut self) -> Result<(), RadarError> {
        self.request(Command::StopDepth, &[]).map(|_| ())
    }

    /// Wait up to `timeout_ms` for a depth frame not yet returned
    ///
    /// Only the newest pushed frame is kept; older unread ones are lost.
    pub fn continuous_depth(&mut self, timeout_ms: u32) -> Result<DepthFrame, RadarError> {
        if self.fault {
            return Err(RadarError::DeviceFailed);
        }
        let deadline = Deadline::after(self.clock.as_ref(), timeout_ms);
        loop {
            let event = self.pump();
            if self.fault {
                return Err(RadarError::DeviceFailed);
            }
            if self.depth_fresh {
                if let Some(frame) = &self.latest_depth {
                    self.depth_fresh = false;
                    return Ok(frame.clone());
                }
            }
            if deadline.expired(self.clock.as_ref()) {
                return Err(RadarError::DepthUnavailable);
            }
            if event == ChannelEvent::NoEvent {
                self.clock.sleep_ms(self.config.poll_interval_ms);
            }
        }
    }

    /// Capture a debug image into device memory, returning (width, height)
    pub fn take_debug_image(&mut self) -> Result<(u16, u16), RadarError> {
        let payload = self.request(Command::TakeDebugImage, &[])?;
        if payload.len() < 4 {
            return Err(RadarError::InvalidResponse {
                command: Command::TakeDebugImage,
                len: payload.len(),
            });
        }
        Ok((
            LittleEndian::read_u16(&payload[0..2]),
            LittleEndian::read_u16(&payload[2..4]),
        ))
    }

    /// Read up to `max_len` bytes of the captured image starting at `offset`
    pub fn read_debug_image_chunk(
        &mut self,
        offset: u32,
        max_len: u16,
    ) -> Result<Vec<u8>, RadarError> {
        if max_len == 0 {
            return Err(RadarError::WrongParam("chunk length must be non-zero".into()));
        }
        let request = PayloadBuilder::new().u32_le(offset).u16_le(max_len).build();
        let mut data = self.request(Command::ReadDebugImage, &request)?;
        data.truncate(max_len as usize);
        Ok(data)
    }

    /// Capture and download a whole debug image
    pub fn fetch_debug_image(&mut self) -> Result<DebugImage, RadarError> {
        let (width, height) = self.take_debug_image()?;
        let expected = width as usize * height as usize;
        if expected > MAX_DEBUG_IMAGE_LEN {
            return Err(RadarError::InvalidResponse {
                command: Command::TakeDebugImage,
                len: expected,
            });
        }
        debug!("debug image captured: {}x{}", width, height);

        let mut data = Vec::with_capacity(expected);
        loop {
            let chunk = self.read_debug_image_chunk(data.len() as u32, DEBUG_IMAGE_CHUNK_LEN)?;
            if data.len() + chunk.len() > MAX_DEBUG_IMAGE_LEN {
                return Err(RadarError::InvalidResponse {
                    command: Command::ReadDebugImage,
                    len: data.len() + chunk.len(),
                });
            }
            data.extend_from_slice(&chunk);
            if chunk.len() < DEBUG_IMAGE_CHUNK_LEN as usize {
                break;
            }
        }
        debug!("debug image transferred: {} bytes", data.len());

        Ok(DebugImage {
            width,
            height,
            data,
        })
    }
}
