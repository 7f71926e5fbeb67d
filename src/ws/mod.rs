//! Client-side WebSocket protocol over a raw byte stream
//!
//! - `frame`: header parsing, masking, frame serialization
//! - `buffer`: partial-read accumulation and frame extraction
//! - `handshake`: HTTP Upgrade request/response
//! - `reassembly`: fragmented message reassembly
//! - `keepalive`: ping scheduling and staleness detection

pub mod buffer;
pub mod frame;
pub mod handshake;
pub mod keepalive;
pub mod reassembly;

pub use buffer::{FrameBuffer, FrameEvent};
pub use frame::{
    apply_mask, encode_close, encode_control_frame, encode_frame, encode_text_frame,
    parse_close_payload, parse_header, unmask, Frame, FrameError, FrameHeader, Opcode,
};
pub use handshake::perform_handshake;
pub use keepalive::{should_ping, KeepAlive, Staleness};
pub use reassembly::{CompleteMessage, ReassemblyEngine};
