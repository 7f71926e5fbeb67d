//! WebSocket frame codec (RFC 6455 §5)
//!
//! Stateless helpers to parse frame headers out of a byte buffer and to
//! serialize client frames. Client-to-server frames are always masked.
//! No extensions are negotiated, so any RSV bit set is a malformed header.

use thiserror::Error;

use crate::adapters::errors::ExchangeError;

/// Maximum payload of a control frame (close, ping, pong)
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Largest payload that fits the 7-bit literal length
const LEN_LITERAL_MAX: u64 = 125;
/// Marker for a 16-bit extended length
const LEN_MARKER_16: u8 = 126;
/// Marker for a 64-bit extended length
const LEN_MARKER_64: u8 = 127;

/// Frame opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    /// Reserved or unknown value, carried through so the reader can skip it
    Reserved(u8),
}

impl Opcode {
    pub fn from_u8(value: u8) -> Self {
        match value & 0x0F {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            other => Opcode::Reserved(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
            Opcode::Reserved(v) => v & 0x0F,
        }
    }

    /// Close, ping and pong; these may never be fragmented
    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Opcode::Continuation => write!(f, "continuation"),
            Opcode::Text => write!(f, "text"),
            Opcode::Binary => write!(f, "binary"),
            Opcode::Close => write!(f, "close"),
            Opcode::Ping => write!(f, "ping"),
            Opcode::Pong => write!(f, "pong"),
            Opcode::Reserved(v) => write!(f, "reserved(0x{:X})", v),
        }
    }
}

/// Decoded frame header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: Opcode,
    pub masked: bool,
    pub payload_length: u64,
    /// 2 bytes + extended length (0, 2 or 8) + mask key (0 or 4)
    pub header_byte_size: usize,
    pub mask_key: Option<[u8; 4]>,
}

impl FrameHeader {
    /// Total size of the frame on the wire
    pub fn frame_len(&self) -> u64 {
        self.header_byte_size as u64 + self.payload_length
    }
}

/// A complete frame with its payload already unmasked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// Header parse failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Buffer is shorter than the header it starts
    #[error("incomplete header: need {needed} bytes, have {available}")]
    Incomplete { needed: usize, available: usize },

    /// Header bytes violate the framing rules
    #[error("{0}")]
    Invalid(String),
}

impl From<FrameError> for ExchangeError {
    fn from(err: FrameError) -> Self {
        ExchangeError::InvalidFrame(err.to_string())
    }
}

/// Parse one frame header from the start of `bytes`.
///
/// Returns [`FrameError::Incomplete`] when more bytes are needed and
/// [`FrameError::Invalid`] when the header itself is malformed.
pub fn parse_header(bytes: &[u8]) -> Result<FrameHeader, FrameError> {
    if bytes.len() < 2 {
        return Err(FrameError::Incomplete {
            needed: 2,
            available: bytes.len(),
        });
    }

    let b0 = bytes[0];
    let b1 = bytes[1];

    if b0 & 0x70 != 0 {
        return Err(FrameError::Invalid(format!(
            "reserved bits set in first byte 0x{:02X}",
            b0
        )));
    }

    let fin = b0 & 0x80 != 0;
    let opcode = Opcode::from_u8(b0);
    let masked = b1 & 0x80 != 0;

    let (payload_length, length_end) = match b1 & 0x7F {
        LEN_MARKER_16 => {
            require(bytes, 4)?;
            (u16::from_be_bytes([bytes[2], bytes[3]]) as u64, 4)
        }
        LEN_MARKER_64 => {
            require(bytes, 10)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[2..10]);
            let len = u64::from_be_bytes(raw);
            if len >> 63 != 0 {
                return Err(FrameError::Invalid(
                    "64-bit payload length has its most significant bit set".into(),
                ));
            }
            (len, 10)
        }
        literal => (literal as u64, 2),
    };

    if opcode.is_control() && (!fin || payload_length > LEN_LITERAL_MAX) {
        return Err(FrameError::Invalid(format!(
            "control frame {} must be final with at most {} payload bytes (fin={}, len={})",
            opcode, MAX_CONTROL_PAYLOAD, fin, payload_length
        )));
    }

    let header_byte_size = length_end + if masked { 4 } else { 0 };
    require(bytes, header_byte_size)?;

    let mask_key = if masked {
        let mut key = [0u8; 4];
        key.copy_from_slice(&bytes[length_end..length_end + 4]);
        Some(key)
    } else {
        None
    };

    Ok(FrameHeader {
        fin,
        opcode,
        masked,
        payload_length,
        header_byte_size,
        mask_key,
    })
}

fn require(bytes: &[u8], needed: usize) -> Result<(), FrameError> {
    if bytes.len() < needed {
        Err(FrameError::Incomplete {
            needed,
            available: bytes.len(),
        })
    } else {
        Ok(())
    }
}

/// XOR `payload` in place with the repeating 4-byte key
pub fn apply_mask(payload: &mut [u8], mask_key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask_key[i & 3];
    }
}

/// Return a masked (or unmasked, the operation is its own inverse) copy
pub fn unmask(payload: &[u8], mask_key: [u8; 4]) -> Vec<u8> {
    let mut out = payload.to_vec();
    apply_mask(&mut out, mask_key);
    out
}

/// Fresh random mask key; one per outbound frame
pub fn random_mask_key() -> [u8; 4] {
    rand::random::<[u8; 4]>()
}

/// Serialize a frame. With `mask_key` set, the MASK bit is raised and the
/// payload is masked on the way out.
pub fn encode_frame(fin: bool, opcode: Opcode, payload: &[u8], mask_key: Option<[u8; 4]>) -> Vec<u8> {
    let len = payload.len() as u64;
    let mut out = Vec::with_capacity(14 + payload.len());

    out.push(if fin { 0x80 } else { 0x00 } | opcode.as_u8());

    let mask_bit = if mask_key.is_some() { 0x80 } else { 0x00 };
    if len <= LEN_LITERAL_MAX {
        out.push(mask_bit | len as u8);
    } else if len <= u16::MAX as u64 {
        out.push(mask_bit | LEN_MARKER_16);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(mask_bit | LEN_MARKER_64);
        out.extend_from_slice(&len.to_be_bytes());
    }

    match mask_key {
        Some(key) => {
            out.extend_from_slice(&key);
            let start = out.len();
            out.extend_from_slice(payload);
            apply_mask(&mut out[start..], key);
        }
        None => out.extend_from_slice(payload),
    }

    out
}

/// Masked, final text frame (client → server)
pub fn encode_text_frame(payload: &[u8]) -> Vec<u8> {
    encode_frame(true, Opcode::Text, payload, Some(random_mask_key()))
}

/// Masked control frame; payload beyond 125 bytes is truncated
pub fn encode_control_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let end = payload.len().min(MAX_CONTROL_PAYLOAD);
    encode_frame(true, opcode, &payload[..end], Some(random_mask_key()))
}

/// Masked close frame: big-endian status code then a UTF-8 reason,
/// truncated on a character boundary to stay within 125 bytes
pub fn encode_close(status_code: u16, reason: &str) -> Vec<u8> {
    let max_reason = MAX_CONTROL_PAYLOAD - 2;
    let mut cut = reason.len().min(max_reason);
    while !reason.is_char_boundary(cut) {
        cut -= 1;
    }

    let mut body = Vec::with_capacity(2 + cut);
    body.extend_from_slice(&status_code.to_be_bytes());
    body.extend_from_slice(&reason.as_bytes()[..cut]);
    encode_control_frame(Opcode::Close, &body)
}

/// Split a close payload into status code and reason, if present
pub fn parse_close_payload(payload: &[u8]) -> (Option<u16>, String) {
    if payload.len() < 2 {
        return (None, String::new());
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    (Some(code), String::from_utf8_lossy(&payload[2..]).into_owned())
}
