//! Fragment reassembly
//!
//! Joins an initial text/binary frame and its continuation frames into one
//! logical message. Only one message may be in progress per connection.
//! Control frames never reach this engine; the supervisor handles them
//! regardless of fragmentation state.

use super::frame::{Frame, Opcode};

/// A fully reassembled message and the opcode of its initial frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteMessage {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl CompleteMessage {
    /// Payload as UTF-8 text, if it is valid
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Continuation-tracking state for one connection
#[derive(Debug)]
pub struct ReassemblyEngine {
    expecting_continuation: bool,
    current_opcode: Opcode,
    buffer: Vec<u8>,
    max_message_bytes: usize,
    /// Set once an oversized message is dropped; swallows its remaining fragments
    discarding: bool,
}

impl ReassemblyEngine {
    pub fn new(max_message_bytes: usize) -> Self {
        Self {
            expecting_continuation: false,
            current_opcode: Opcode::Text,
            buffer: Vec::new(),
            max_message_bytes,
            discarding: false,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.expecting_continuation
    }

    /// Forget any partial message (used when a connection is replaced)
    pub fn reset(&mut self) {
        self.expecting_continuation = false;
        self.discarding = false;
        self.buffer.clear();
    }

    /// Feed one data frame; returns the messages it completes (zero, one or two)
    pub fn push(&mut self, frame: Frame) -> Vec<CompleteMessage> {
        let mut completed = Vec::new();

        match frame.opcode {
            Opcode::Text | Opcode::Binary => {
                if self.expecting_continuation {
                    tracing::warn!(
                        buffered = self.buffer.len(),
                        opcode = %self.current_opcode,
                        "New message started before previous one finished, flushing partial message"
                    );
                    if let Some(msg) = self.take() {
                        completed.push(msg);
                    }
                }
                self.discarding = false;

                if frame.fin {
                    completed.push(CompleteMessage {
                        opcode: frame.opcode,
                        payload: frame.payload,
                    });
                } else {
                    self.expecting_continuation = true;
                    self.current_opcode = frame.opcode;
                    self.buffer = frame.payload;
                    self.enforce_limit();
                }
            }
            Opcode::Continuation => {
                if !self.expecting_continuation {
                    tracing::debug!(
                        len = frame.payload.len(),
                        "Continuation frame without a message in progress, ignoring"
                    );
                    return completed;
                }

                if !self.discarding {
                    self.buffer.extend_from_slice(&frame.payload);
                    self.enforce_limit();
                }

                if frame.fin {
                    if let Some(msg) = self.take() {
                        completed.push(msg);
                    }
                }
            }
            other => {
                tracing::trace!(opcode = %other, "Non-data frame passed to reassembly, ignoring");
            }
        }

        completed
    }

    /// Account for a data frame whose payload was skipped as oversized.
    /// The message it belongs to is dropped as a whole; any fragments that
    /// follow it are swallowed until the final one. Returns a partial message
    /// flushed by an oversized initial frame, as `push` would.
    pub fn discard_frame(&mut self, opcode: Opcode, fin: bool) -> Vec<CompleteMessage> {
        let mut completed = Vec::new();

        match opcode {
            Opcode::Text | Opcode::Binary => {
                if self.expecting_continuation {
                    if let Some(msg) = self.take() {
                        completed.push(msg);
                    }
                }
                if !fin {
                    self.expecting_continuation = true;
                    self.current_opcode = opcode;
                    self.buffer = Vec::new();
                    self.discarding = true;
                }
            }
            Opcode::Continuation => {
                if !self.expecting_continuation {
                    return completed;
                }
                tracing::warn!(
                    buffered = self.buffer.len(),
                    opcode = %self.current_opcode,
                    "Fragment of message in progress was oversized, discarding message"
                );
                self.buffer = Vec::new();
                self.discarding = true;
                if fin {
                    self.take();
                }
            }
            _ => {}
        }

        completed
    }

    fn enforce_limit(&mut self) {
        if self.buffer.len() > self.max_message_bytes {
            tracing::error!(
                buffered = self.buffer.len(),
                max = self.max_message_bytes,
                "Fragmented message exceeds maximum size, discarding it"
            );
            self.buffer = Vec::new();
            self.discarding = true;
        }
    }

    fn take(&mut self) -> Option<CompleteMessage> {
        let discarded = self.discarding;
        self.expecting_continuation = false;
        self.discarding = false;
        let payload = std::mem::take(&mut self.buffer);
        if discarded {
            None
        } else {
            Some(CompleteMessage {
                opcode: self.current_opcode,
                payload,
            })
        }
    }
}
