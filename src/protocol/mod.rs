//! Protocol module - wire format, framing, and buffer reuse.
//!
//! This module implements the byte-level protocol shared by all services:
//! - 4-byte big-endian length header and the RPC flag byte
//! - Frame buffer for accumulating partial reads
//! - Shared pool for outbound buffers

mod buffer_pool;
mod frame_buffer;
mod wire_format;

pub use buffer_pool::{BufferPool, MAX_POOLED_CAPACITY};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    decode_length, encode_flagged_frame, encode_frame, encode_header, flags, split_frame,
    validate_length, FrameStatus, DEFAULT_MAX_MSG_SIZE, HEADER_SIZE,
};
