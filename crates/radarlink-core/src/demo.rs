//! Demo Mode - Simulated radar device
//!
//! [`SimulatedRadar`] is a [`Transport`] that plays the device side of the
//! link entirely in memory: it decodes requests with the same receive state
//! machine the host uses, answers them like the firmware would, and pushes
//! depth frames on a timer while streaming. A [`SimulatorHandle`] shares the
//! device state so tests can misbehave the link on purpose.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::protocol::clock::{elapsed_ms, Clock};
use crate::protocol::framing::RxMachine;
use crate::protocol::{
    Command, Connector, DepthFrame, FramingStats, Message, PayloadBuilder, RadarError, RadarMode,
    Transport, REQUEST_BIT,
};

/// Field of view reported by the simulated device (60.0 degrees)
pub const SIM_FOV: u16 = 600;

/// Largest resolution the simulated device accepts
pub const SIM_MAX_RESOLUTION: u16 = 1024;

const DEFAULT_RESOLUTION: u16 = 320;
const DEFAULT_FRAME_INTERVAL_MS: u32 = 33;
const DEFAULT_IMAGE_SIZE: (u16, u16) = (320, 240);

struct SimState {
    clock: Arc<dyn Clock>,
    rng: StdRng,
    rx: RxMachine,
    rx_stats: FramingStats,
    outbox: VecDeque<u8>,
    report_id: u8,

    // Device state
    laser_power: u8,
    mode: RadarMode,
    resolution: u16,
    streaming: bool,
    last_push_ms: u32,
    frame_interval_ms: u32,
    image_size: (u16, u16),
    captured_image: Vec<u8>,

    // Misbehaviour knobs
    max_read: Option<usize>,
    max_write: Option<usize>,
    mute: bool,
    wrong_echo: bool,
    stale_responses: bool,
    failing_connects: u32,

    // Observation
    requests: Vec<Message>,
    read_calls: u64,
    write_calls: u64,
    bytes_written: u64,
    connects: u64,
    closed: bool,
}

impl SimState {
    fn new(clock: Arc<dyn Clock>, seed: u64) -> Self {
        Self {
            clock,
            rng: StdRng::seed_from_u64(seed),
            rx: RxMachine::new(),
            rx_stats: FramingStats::default(),
            outbox: VecDeque::new(),
            report_id: 0,
            laser_power: 0,
            mode: RadarMode::Idle,
            resolution: DEFAULT_RESOLUTION,
            streaming: false,
            last_push_ms: 0,
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
            image_size: DEFAULT_IMAGE_SIZE,
            captured_image: Vec::new(),
            max_read: None,
            max_write: None,
            mute: false,
            wrong_echo: false,
            stale_responses: false,
            failing_connects: 0,
            requests: Vec::new(),
            read_calls: 0,
            write_calls: 0,
            bytes_written: 0,
            connects: 0,
            closed: false,
        }
    }

    fn queue(&mut self, msg: Message) {
        // Payloads are built here and always fit
        if let Ok(bytes) = msg.encode() {
            self.outbox.extend(bytes);
        }
    }

    fn queue_report(&mut self, command: Command, payload: Vec<u8>) {
        let id = self.report_id;
        self.report_id = self.report_id.wrapping_add(1);
        self.queue(Message::new(id, command.opcode() | REQUEST_BIT, payload));
    }

    /// A gently curved wall about 1.5 m away, with measurement noise
    fn depth_frame(&mut self) -> DepthFrame {
        let n = self.resolution as usize;
        let center = n as f64 / 2.0;
        let samples = (0..n)
            .map(|i| {
                let x = (i as f64 - center) / center.max(1.0);
                let base = 1500.0 + 200.0 * x * x;
                let noise: f64 = self.rng.gen_range(-4.0..4.0);
                (base + noise) as u16
            })
            .collect();
        DepthFrame {
            timestamp_ms: self.clock.now_ms(),
            samples,
        }
    }

    fn tick(&mut self) {
        if !self.streaming || self.closed {
            return;
        }
        let now = self.clock.now_ms();
        if elapsed_ms(now, self.last_push_ms) >= self.frame_interval_ms {
            self.last_push_ms = now;
            let frame = self.depth_frame().encode();
            self.queue_report(Command::ReportDepth, frame);
        }
    }

    fn echo(&self, value: &[u8]) -> Vec<u8> {
        let mut echo = value.to_vec();
        if self.wrong_echo {
            if let Some(first) = echo.first_mut() {
                *first = first.wrapping_add(1);
            }
        }
        echo
    }

    fn handle(&mut self, req: Message) {
        self.requests.push(req.clone());
        if !req.is_request() || self.mute {
            return;
        }
        let Some(command) = Command::from_opcode(req.opcode()) else {
            return;
        };

        let payload = match command {
            Command::Init => {
                self.mode = RadarMode::Idle;
                self.streaming = false;
                Vec::new()
            }
            Command::GetInfo => {
                let mut serial = b"SIM-000001".to_vec();
                serial.resize(32, 0);
                let mut name = b"radarlink simulated line radar".to_vec();
                name.resize(64, 0);
                PayloadBuilder::new()
                    .byte(1)
                    .byte(4)
                    .bytes(&serial)
                    .bytes(&name)
                    .build()
            }
            Command::SetLaserPower => {
                let Some(&power) = req.payload.first() else {
                    return;
                };
                if power <= 100 {
                    self.laser_power = power;
                }
                self.echo(&[self.laser_power])
            }
            Command::SetMode => {
                let Some(&raw) = req.payload.first() else {
                    return;
                };
                if let Some(mode) = RadarMode::from_byte(raw) {
                    self.mode = mode;
                }
                self.echo(&[self.mode.as_byte()])
            }
            Command::SetResolution => {
                if req.payload.len() < 2 {
                    return;
                }
                let size = u16::from_le_bytes([req.payload[0], req.payload[1]]);
                if size > 0 && size <= SIM_MAX_RESOLUTION {
                    self.resolution = size;
                }
                self.echo(&self.resolution.to_le_bytes())
            }
            Command::GetFov => SIM_FOV.to_le_bytes().to_vec(),
            Command::GetMaxResolution => SIM_MAX_RESOLUTION.to_le_bytes().to_vec(),
            Command::TriggerDepth => {
                if self.mode == RadarMode::Trigger {
                    self.depth_frame().encode()
                } else {
                    Vec::new()
                }
            }
            Command::StartDepth => {
                self.streaming = true;
                self.last_push_ms = self.clock.now_ms();
                Vec::new()
            }
            Command::StopDepth => {
                self.streaming = false;
                Vec::new()
            }
            Command::TakeDebugImage => {
                let (w, h) = self.image_size;
                self.captured_image = (0..h as usize)
                    .flat_map(|y| (0..w as usize).map(move |x| ((x + y) & 0xFF) as u8))
                    .collect();
                PayloadBuilder::new().u16_le(w).u16_le(h).build()
            }
            Command::ReadDebugImage => {
                if req.payload.len() < 6 {
                    return;
                }
                let offset = u32::from_le_bytes([
                    req.payload[0],
                    req.payload[1],
                    req.payload[2],
                    req.payload[3],
                ]) as usize;
                let len = u16::from_le_bytes([req.payload[4], req.payload[5]]) as usize;
                let start = offset.min(self.captured_image.len());
                let end = (start + len).min(self.captured_image.len());
                self.captured_image[start..end].to_vec()
            }
            Command::ReportDepth | Command::ReportError => return,
        };

        let opcode = req.opcode();
        if self.stale_responses {
            // Leftovers from an earlier request: wrong id, then wrong opcode
            self.queue(Message::new(req.id.wrapping_sub(1), opcode, payload.clone()));
            self.queue(Message::new(req.id, opcode ^ 0x01, payload.clone()));
        }
        self.queue(Message::new(req.id, opcode, payload));
    }
}

/// In-memory radar device
pub struct SimulatedRadar {
    shared: Arc<Mutex<SimState>>,
}

impl SimulatedRadar {
    /// Simulated device with a fixed noise seed
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_seed(clock, 0x5EED)
    }

    /// Simulated device with a chosen noise seed
    pub fn with_seed(clock: Arc<dyn Clock>, seed: u64) -> Self {
        Self {
            shared: Arc::new(Mutex::new(SimState::new(clock, seed))),
        }
    }

    /// Handle for steering and observing this device
    pub fn handle(&self) -> SimulatorHandle {
        SimulatorHandle {
            shared: self.shared.clone(),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        lock(&self.shared)
    }
}

fn lock(shared: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    // A panic elsewhere leaves the state usable
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Transport for SimulatedRadar {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut s = self.state();
        s.read_calls += 1;
        if s.closed {
            return Ok(0);
        }
        s.tick();

        let n = buf
            .len()
            .min(s.outbox.len())
            .min(s.max_read.unwrap_or(usize::MAX));
        for (slot, b) in buf.iter_mut().zip(s.outbox.drain(..n)) {
            *slot = b;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.state();
        let s = &mut *guard;
        s.write_calls += 1;
        if s.closed {
            return Ok(0);
        }

        let n = buf.len().min(s.max_write.unwrap_or(usize::MAX));
        s.bytes_written += n as u64;
        for req in s.rx.push(&buf[..n], &mut s.rx_stats) {
            s.handle(req);
        }
        Ok(n)
    }

    fn close(&mut self) -> io::Result<()> {
        let mut s = self.state();
        s.closed = true;
        s.streaming = false;
        Ok(())
    }
}

/// Shared control over a [`SimulatedRadar`]
#[derive(Clone)]
pub struct SimulatorHandle {
    shared: Arc<Mutex<SimState>>,
}

impl SimulatorHandle {
    fn state(&self) -> MutexGuard<'_, SimState> {
        lock(&self.shared)
    }

    /// Connector that attaches a fresh link to this same device
    ///
    /// Each connect drops whatever was in flight on the previous link.
    pub fn connector(&self) -> impl Connector + 'static {
        let shared = self.shared.clone();
        move |port: &str| -> Result<Box<dyn Transport>, RadarError> {
            let mut s = lock(&shared);
            s.connects += 1;
            if s.failing_connects > 0 {
                s.failing_connects -= 1;
                return Err(RadarError::PortFailed(format!("{}: device not present", port)));
            }
            s.closed = false;
            s.rx = RxMachine::new();
            s.outbox.clear();
            drop(s);
            Ok(Box::new(SimulatedRadar {
                shared: shared.clone(),
            }))
        }
    }

    /// Make the next `n` connects fail
    pub fn fail_next_connects(&self, n: u32) {
        self.state().failing_connects = n;
    }

    /// Limit bytes returned per read (`None` for unlimited)
    pub fn set_max_read(&self, max: Option<usize>) {
        self.state().max_read = max;
    }

    /// Limit bytes accepted per write (`None` for unlimited)
    pub fn set_max_write(&self, max: Option<usize>) {
        self.state().max_write = max;
    }

    /// Stop answering requests
    pub fn set_mute(&self, mute: bool) {
        self.state().mute = mute;
    }

    /// Echo a different value than requested on set commands
    pub fn set_wrong_echo(&self, wrong: bool) {
        self.state().wrong_echo = wrong;
    }

    /// Precede every response with two responses that must not match
    pub fn set_stale_responses(&self, stale: bool) {
        self.state().stale_responses = stale;
    }

    /// Period of depth pushes while streaming
    pub fn set_frame_interval_ms(&self, ms: u32) {
        self.state().frame_interval_ms = ms;
    }

    /// Dimensions of the next captured debug image
    pub fn set_debug_image_size(&self, width: u16, height: u16) {
        self.state().image_size = (width, height);
    }

    /// Put raw bytes on the line towards the host
    pub fn inject_noise(&self, bytes: &[u8]) {
        self.state().outbox.extend(bytes.iter().copied());
    }

    /// Queue a random noise burst of `len` bytes, none of them a sync byte
    pub fn inject_random_noise(&self, len: usize) {
        let mut s = self.state();
        for _ in 0..len {
            let b: u8 = s.rng.gen_range(0..0xA5);
            s.outbox.push_back(b);
        }
    }

    /// Queue an unsolicited fault report
    pub fn inject_fault(&self) {
        self.state().queue_report(Command::ReportError, Vec::new());
    }

    /// Queue a depth report right away, streaming or not
    pub fn push_depth_frame(&self) -> DepthFrame {
        let mut s = self.state();
        let frame = s.depth_frame();
        s.queue_report(Command::ReportDepth, frame.encode());
        frame
    }

    /// Every message the device has decoded, in order
    pub fn requests(&self) -> Vec<Message> {
        self.state().requests.clone()
    }

    /// Number of write calls the host made
    pub fn write_calls(&self) -> u64 {
        self.state().write_calls
    }

    /// Number of read calls the host made
    pub fn read_calls(&self) -> u64 {
        self.state().read_calls
    }

    /// Bytes accepted from the host
    pub fn bytes_written(&self) -> u64 {
        self.state().bytes_written
    }

    /// Number of connect attempts seen
    pub fn connects(&self) -> u64 {
        self.state().connects
    }

    /// Whether the host has released the link
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Current laser power
    pub fn laser_power(&self) -> u8 {
        self.state().laser_power
    }

    /// Current operating mode
    pub fn mode(&self) -> RadarMode {
        self.state().mode
    }

    /// Current resolution
    pub fn resolution(&self) -> u16 {
        self.state().resolution
    }

    /// Whether depth frames are being pushed
    pub fn is_streaming(&self) -> bool {
        self.state().streaming
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CommandChannel, ManualClock};

    fn setup() -> (CommandChannel, SimulatorHandle, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let sim = SimulatedRadar::new(clock.clone());
        let handle = sim.handle();
        let channel = CommandChannel::new(Box::new(sim), clock.clone());
        (channel, handle, clock)
    }

    #[test]
    fn test_answers_basic_queries() {
        let (mut ch, sim, _) = setup();
        ch.init().unwrap();
        assert_eq!(ch.get_fov().unwrap(), SIM_FOV);
        assert_eq!(ch.get_max_resolution().unwrap(), SIM_MAX_RESOLUTION);
        let info = ch.get_info().unwrap();
        assert_eq!(info.serial_number, "SIM-000001");
        assert_eq!(info.version(), "1.4");
        assert_eq!(sim.requests().len(), 4);
    }

    #[test]
    fn test_set_commands_change_state() {
        let (mut ch, sim, _) = setup();
        ch.set_laser_power(80).unwrap();
        ch.set_mode(RadarMode::Trigger).unwrap();
        ch.set_resolution(64).unwrap();
        assert_eq!(sim.laser_power(), 80);
        assert_eq!(sim.mode(), RadarMode::Trigger);
        assert_eq!(sim.resolution(), 64);

        // Out of range: the device keeps its value and echoes it back
        assert!(matches!(
            ch.set_resolution(SIM_MAX_RESOLUTION + 1),
            Err(RadarError::WrongParam(_))
        ));
        assert_eq!(sim.resolution(), 64);
    }

    #[test]
    fn test_trigger_depth_needs_trigger_mode() {
        let (mut ch, _sim, _) = setup();
        assert!(matches!(
            ch.trigger_depth(),
            Err(RadarError::DepthUnavailable)
        ));
        ch.set_mode(RadarMode::Trigger).unwrap();
        ch.set_resolution(16).unwrap();
        let frame = ch.trigger_depth().unwrap();
        assert_eq!(frame.samples.len(), 16);
        assert!(frame.samples.iter().all(|&d| (1490..=1710).contains(&d)));
    }

    #[test]
    fn test_streaming_on_a_timer() {
        let (mut ch, sim, clock) = setup();
        sim.set_frame_interval_ms(10);
        ch.set_mode(RadarMode::Continuous).unwrap();
        ch.start_depth().unwrap();
        assert!(sim.is_streaming());

        let first = ch.continuous_depth(100).unwrap();
        let second = ch.continuous_depth(100).unwrap();
        assert!(second.timestamp_ms.wrapping_sub(first.timestamp_ms) >= 10);
        assert!(clock.now_ms() >= 20);

        ch.stop_depth().unwrap();
        assert!(!sim.is_streaming());
    }

    #[test]
    fn test_same_seed_same_samples() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let a = SimulatedRadar::with_seed(clock.clone(), 7).handle();
        let b = SimulatedRadar::with_seed(clock, 7).handle();
        assert_eq!(a.push_depth_frame(), b.push_depth_frame());
    }

    #[test]
    fn test_closed_link_is_dead() {
        let clock = Arc::new(ManualClock::default());
        let mut sim = SimulatedRadar::new(clock);
        let handle = sim.handle();
        sim.close().unwrap();
        assert!(handle.is_closed());
        assert_eq!(sim.write(&[0xA5]).unwrap(), 0);
        assert_eq!(handle.bytes_written(), 0);
    }
}
