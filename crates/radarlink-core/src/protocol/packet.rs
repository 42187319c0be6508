//! Message encoding/decoding
//!
//! Message format:
//! - 1 byte: SYNC (0xA5)
//! - 1 byte: VERSION (0x04)
//! - 1 byte: ID
//! - 1 byte: CMD (bit 7 = request/report, bits 0-6 = opcode)
//! - 2 bytes: Payload length (little-endian)
//! - N bytes: Payload
//! - 1 byte: CRC8 over everything before it

use byteorder::{ByteOrder, LittleEndian};

use super::checksum::crc8;
use super::{
    FrameError, CRC_LEN, HEADER_LEN, MAX_PAYLOAD_LEN, PROTOCOL_VERSION, REQUEST_BIT, SYNC_BYTE,
};

/// A validated message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Message id
    pub id: u8,
    /// Raw command byte, request bit included
    pub cmd: u8,
    /// Payload length
    pub len: u16,
}

impl Header {
    /// Validate and decode the first [`HEADER_LEN`] bytes of `buf`
    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < HEADER_LEN {
            return Err(FrameError::Truncated {
                needed: HEADER_LEN,
                actual: buf.len(),
            });
        }
        if buf[0] != SYNC_BYTE {
            return Err(FrameError::BadSync(buf[0]));
        }
        if buf[1] != PROTOCOL_VERSION {
            return Err(FrameError::BadVersion(buf[1]));
        }
        let len = LittleEndian::read_u16(&buf[4..6]);
        if len as usize > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge {
                len: len as usize,
                max: MAX_PAYLOAD_LEN,
            });
        }
        Ok(Self {
            id: buf[2],
            cmd: buf[3],
            len,
        })
    }

    /// Size of the whole message this header announces
    pub fn message_len(&self) -> usize {
        HEADER_LEN + self.len as usize + CRC_LEN
    }
}

/// One protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message id, used to pair responses with requests
    pub id: u8,
    /// Raw command byte, request bit included
    pub cmd: u8,
    /// Message payload
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a new message
    pub fn new(id: u8, cmd: u8, payload: Vec<u8>) -> Self {
        Self { id, cmd, payload }
    }

    /// Opcode with the request bit stripped
    pub fn opcode(&self) -> u8 {
        self.cmd & !REQUEST_BIT
    }

    /// Whether bit 7 is set (host request or device-initiated report)
    pub fn is_request(&self) -> bool {
        self.cmd & REQUEST_BIT != 0
    }

    /// Decode a message from a buffer holding exactly one message
    pub fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
        let header = Header::parse(data)?;
        let total = header.message_len();
        if data.len() < total {
            return Err(FrameError::Truncated {
                needed: total,
                actual: data.len(),
            });
        }

        let expected = crc8(&data[..total - CRC_LEN]);
        let actual = data[total - CRC_LEN];
        if expected != actual {
            return Err(FrameError::CrcMismatch { expected, actual });
        }

        Ok(Self {
            id: header.id,
            cmd: header.cmd,
            payload: data[HEADER_LEN..total - CRC_LEN].to_vec(),
        })
    }

    /// Encode the message to raw bytes
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut bytes = vec![0u8; self.encoded_size()];
        encode_into(&mut bytes, self.id, self.cmd, &self.payload)?;
        Ok(bytes)
    }

    /// Get the total encoded size
    pub fn encoded_size(&self) -> usize {
        HEADER_LEN + self.payload.len() + CRC_LEN
    }
}

/// Encode a message into `out`, returning the number of bytes written
///
/// `out` must hold at least `HEADER_LEN + payload.len() + CRC_LEN` bytes.
pub(crate) fn encode_into(
    out: &mut [u8],
    id: u8,
    cmd: u8,
    payload: &[u8],
) -> Result<usize, FrameError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }
    let total = HEADER_LEN + payload.len() + CRC_LEN;
    if out.len() < total {
        return Err(FrameError::Truncated {
            needed: total,
            actual: out.len(),
        });
    }

    out[0] = SYNC_BYTE;
    out[1] = PROTOCOL_VERSION;
    out[2] = id;
    out[3] = cmd;
    LittleEndian::write_u16(&mut out[4..6], payload.len() as u16);
    out[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(payload);
    out[total - CRC_LEN] = crc8(&out[..total - CRC_LEN]);

    Ok(total)
}

/// Builder for request payloads
pub struct PayloadBuilder {
    payload: Vec<u8>,
}

impl PayloadBuilder {
    /// Create a new payload builder
    pub fn new() -> Self {
        Self {
            payload: Vec::new(),
        }
    }

    /// Add a single byte
    pub fn byte(mut self, b: u8) -> Self {
        self.payload.push(b);
        self
    }

    /// Add a 16-bit value (little-endian)
    pub fn u16_le(mut self, value: u16) -> Self {
        let mut bytes = [0u8; 2];
        LittleEndian::write_u16(&mut bytes, value);
        self.payload.extend_from_slice(&bytes);
        self
    }

    /// Add a 32-bit value (little-endian)
    pub fn u32_le(mut self, value: u32) -> Self {
        let mut bytes = [0u8; 4];
        LittleEndian::write_u32(&mut bytes, value);
        self.payload.extend_from_slice(&bytes);
        self
    }

    /// Add raw bytes
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.payload.extend_from_slice(data);
        self
    }

    /// Finish and return the payload bytes
    pub fn build(self) -> Vec<u8> {
        self.payload
    }
}

impl Default for PayloadBuilder {
    fn default() -> Self {
        Self::new()
    }
}
