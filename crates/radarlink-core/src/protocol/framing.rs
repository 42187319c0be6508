//! Framing engine
//!
//! Turns the raw byte stream of a [`Transport`] into validated [`Message`]s
//! and back. The receiver is a two-state machine (header sync, payload wait)
//! that only ever asks the transport for the bytes its current state still
//! needs, so it never reads past a message boundary. Bad headers cost one
//! discarded byte each; bad checksums drop the whole message. Neither is
//! reported as an error: corruption shows up upstream as a timeout.

use std::fmt;
use std::io;

use serde::Serialize;
use tracing::{debug, trace, warn};

use super::checksum::crc8;
use super::packet::{encode_into, Header};
use super::stream::Transport;
use super::{Message, RadarError, CRC_LEN, HEADER_LEN, MAX_MESSAGE_LEN, MAX_PAYLOAD_LEN};

/// Most bytes a single [`FramingEngine::pump`] will read
pub const PUMP_READ_BUDGET: usize = 2 * MAX_MESSAGE_LEN;

/// Cumulative link counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FramingStats {
    /// Bytes accepted by the transport
    pub tx_bytes: u64,
    /// Bytes read from the transport
    pub rx_bytes: u64,
    /// Messages fully written
    pub tx_frames: u64,
    /// Messages received with a valid checksum
    pub rx_frames: u64,
    /// Bytes dropped while hunting for a valid header
    pub resync_discards: u64,
    /// Complete messages dropped for a checksum mismatch
    pub crc_failures: u64,
}

/// Hex rendering for trace output
pub(crate) struct HexDump<'a>(pub &'a [u8]);

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    HeaderSync,
    PayloadWait(Header),
}

/// Receive half of the framing engine
///
/// Callers fill [`RxMachine::spare`] and report the count through
/// [`RxMachine::advance`].
pub(crate) struct RxMachine {
    buf: Box<[u8]>,
    filled: usize,
    state: RxState,
}

impl RxMachine {
    pub(crate) fn new() -> Self {
        Self {
            buf: vec![0u8; MAX_MESSAGE_LEN].into_boxed_slice(),
            filled: 0,
            state: RxState::HeaderSync,
        }
    }

    /// Bytes still missing before the current state can make a decision
    pub(crate) fn wanted(&self) -> usize {
        match self.state {
            RxState::HeaderSync => HEADER_LEN - self.filled,
            RxState::PayloadWait(header) => header.message_len() - self.filled,
        }
    }

    /// Exactly the free space the current state may fill
    pub(crate) fn spare(&mut self) -> &mut [u8] {
        let end = self.filled + self.wanted();
        &mut self.buf[self.filled..end]
    }

    /// Account for `n` bytes just written into [`RxMachine::spare`]
    pub(crate) fn advance(&mut self, n: usize, stats: &mut FramingStats) -> Option<Message> {
        debug_assert!(n <= self.wanted());
        self.filled += n;
        if self.wanted() > 0 {
            return None;
        }

        match self.state {
            RxState::HeaderSync => {
                match Header::parse(&self.buf[..HEADER_LEN]) {
                    Ok(header) => self.state = RxState::PayloadWait(header),
                    Err(e) => {
                        debug!("resync: dropping {:#04x} ({})", self.buf[0], e);
                        self.buf.copy_within(1..HEADER_LEN, 0);
                        self.filled = HEADER_LEN - 1;
                        stats.resync_discards = stats.resync_discards.saturating_add(1);
                    }
                }
                None
            }
            RxState::PayloadWait(header) => {
                let total = header.message_len();
                let expected = crc8(&self.buf[..total - CRC_LEN]);
                let actual = self.buf[total - CRC_LEN];
                self.reset();

                if expected != actual {
                    debug!(
                        id = header.id,
                        cmd = header.cmd,
                        "dropping message: CRC {:#04x} != {:#04x}",
                        actual,
                        expected
                    );
                    stats.crc_failures = stats.crc_failures.saturating_add(1);
                    return None;
                }

                stats.rx_frames = stats.rx_frames.saturating_add(1);
                Some(Message::new(
                    header.id,
                    header.cmd,
                    self.buf[HEADER_LEN..total - CRC_LEN].to_vec(),
                ))
            }
        }
    }

    /// Feed a whole slice, collecting every message it completes
    pub(crate) fn push(&mut self, mut data: &[u8], stats: &mut FramingStats) -> Vec<Message> {
        let mut out = Vec::new();
        while !data.is_empty() {
            let n = self.wanted().min(data.len());
            self.spare()[..n].copy_from_slice(&data[..n]);
            data = &data[n..];
            if let Some(msg) = self.advance(n, stats) {
                out.push(msg);
            }
        }
        out
    }

    fn reset(&mut self) {
        self.filled = 0;
        self.state = RxState::HeaderSync;
    }
}

/// Byte-stream framing over one transport
///
/// Holds one outbound message (draining across pumps) and one inbound
/// message (accumulating across pumps).
pub struct FramingEngine {
    transport: Box<dyn Transport>,
    tx_buf: Box<[u8]>,
    tx_len: usize,
    tx_written: usize,
    rx: RxMachine,
    stats: FramingStats,
}

impl FramingEngine {
    /// Create an engine that owns `transport`
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            tx_buf: vec![0u8; MAX_MESSAGE_LEN].into_boxed_slice(),
            tx_len: 0,
            tx_written: 0,
            rx: RxMachine::new(),
            stats: FramingStats::default(),
        }
    }

    /// Whether a previously sent message is still draining
    pub fn is_busy(&self) -> bool {
        self.tx_written < self.tx_len
    }

    /// Snapshot of the link counters
    pub fn stats(&self) -> FramingStats {
        self.stats
    }

    /// Queue one message for transmission
    ///
    /// Nothing is written here; bytes go out on the following pumps.
    pub fn send(&mut self, id: u8, cmd: u8, payload: &[u8]) -> Result<(), RadarError> {
        if self.is_busy() {
            return Err(RadarError::Implementation(format!(
                "transmit busy: {} of {} bytes still pending",
                self.tx_len - self.tx_written,
                self.tx_len
            )));
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(RadarError::Implementation(format!(
                "payload of {} bytes exceeds maximum {}",
                payload.len(),
                MAX_PAYLOAD_LEN
            )));
        }

        let len = encode_into(&mut self.tx_buf, id, cmd, payload)
            .map_err(|e| RadarError::Implementation(e.to_string()))?;
        self.tx_len = len;
        self.tx_written = 0;
        debug!("send id={} cmd={:#04x} len={}", id, cmd, payload.len());
        Ok(())
    }

    /// One non-blocking step: drain TX, then read until a message completes
    pub fn pump(&mut self) -> Option<Message> {
        self.pump_tx();
        self.pump_rx()
    }

    /// Release the transport; the engine makes no further progress
    pub fn close_transport(&mut self) -> io::Result<()> {
        self.tx_len = 0;
        self.tx_written = 0;
        self.rx.reset();
        self.transport.close()
    }

    fn pump_tx(&mut self) {
        while self.is_busy() {
            let pending = &self.tx_buf[self.tx_written..self.tx_len];
            match self.transport.write(pending) {
                Ok(0) => break,
                Ok(n) => {
                    let n = n.min(pending.len());
                    trace!("TX {}", HexDump(&pending[..n]));
                    self.tx_written += n;
                    self.stats.tx_bytes = self.stats.tx_bytes.saturating_add(n as u64);
                    if !self.is_busy() {
                        self.stats.tx_frames = self.stats.tx_frames.saturating_add(1);
                    }
                }
                Err(e) => {
                    warn!("transport write failed: {}", e);
                    break;
                }
            }
        }
    }

    fn pump_rx(&mut self) -> Option<Message> {
        let mut budget = PUMP_READ_BUDGET;
        while budget > 0 {
            let want = self.rx.wanted().min(budget);
            let spare = &mut self.rx.spare()[..want];
            let n = match self.transport.read(spare) {
                Ok(0) => break,
                Ok(n) => n.min(want),
                Err(e) => {
                    warn!("transport read failed: {}", e);
                    break;
                }
            };
            trace!("RX {}", HexDump(&spare[..n]));
            budget -= n;
            self.stats.rx_bytes = self.stats.rx_bytes.saturating_add(n as u64);

            if let Some(msg) = self.rx.advance(n, &mut self.stats) {
                debug!(
                    "recv id={} cmd={:#04x} len={}",
                    msg.id,
                    msg.cmd,
                    msg.payload.len()
                );
                return Some(msg);
            }
        }
        None
    }
}
