//! Inbound byte accumulation and frame extraction
//!
//! Holds the unconsumed remainder between reads, cuts complete frames out of
//! it, resynchronizes past malformed headers one byte at a time, and skips
//! the payload of frames larger than the configured maximum.

use super::frame::{apply_mask, parse_header, Frame, FrameError, Opcode};

/// Outcome of one extraction step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A complete, unmasked frame
    Frame(Frame),
    /// A malformed header; one byte was discarded
    Resync(String),
    /// A frame above the payload limit; its payload is being skipped
    Oversized {
        opcode: Opcode,
        fin: bool,
        len: u64,
        max: u64,
    },
}

#[derive(Debug)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    skip_remaining: u64,
    max_payload: u64,
}

impl FrameBuffer {
    pub fn new(max_payload: u64) -> Self {
        Self {
            buf: Vec::with_capacity(16 * 1024),
            skip_remaining: 0,
            max_payload,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.skip_remaining = 0;
    }

    /// Next event, or `None` when more bytes are needed
    pub fn next_event(&mut self) -> Option<FrameEvent> {
        if !self.consume_skip() {
            return None;
        }

        let header = match parse_header(&self.buf) {
            Ok(header) => header,
            Err(FrameError::Incomplete { .. }) => return None,
            Err(FrameError::Invalid(reason)) => {
                self.buf.drain(..1);
                return Some(FrameEvent::Resync(reason));
            }
        };

        if header.payload_length > self.max_payload {
            self.buf.drain(..header.header_byte_size);
            self.skip_remaining = header.payload_length;
            self.consume_skip();
            return Some(FrameEvent::Oversized {
                opcode: header.opcode,
                fin: header.fin,
                len: header.payload_length,
                max: self.max_payload,
            });
        }

        let total = header.frame_len() as usize;
        if self.buf.len() < total {
            return None;
        }

        let mut payload = self.buf[header.header_byte_size..total].to_vec();
        self.buf.drain(..total);
        if let Some(key) = header.mask_key {
            apply_mask(&mut payload, key);
        }

        Some(FrameEvent::Frame(Frame {
            fin: header.fin,
            opcode: header.opcode,
            payload,
        }))
    }

    /// Drop pending skip bytes; true once nothing is left to skip
    fn consume_skip(&mut self) -> bool {
        if self.skip_remaining == 0 {
            return true;
        }
        let n = (self.skip_remaining.min(self.buf.len() as u64)) as usize;
        self.buf.drain(..n);
        self.skip_remaining -= n as u64;
        self.skip_remaining == 0
    }
}
