//! Wire format for frames.
//!
//! ```text
//! ┌──────────────────┬─────────────────────────────┐
//! │ Length (4 bytes) │ Payload (Length - 4 bytes)  │
//! │ u32 BE           │                             │
//! └──────────────────┴─────────────────────────────┘
//! ```
//!
//! The length counts the whole frame, header included, so the smallest
//! valid frame is 4 bytes. RPC payloads start with a flag byte, see [`flags`].

use crate::error::{NetError, Result};

/// Size of the length header in bytes.
pub const HEADER_SIZE: usize = 4;

pub use crate::config::DEFAULT_MAX_MSG_SIZE;

/// Flag byte at the start of RPC payloads.
pub mod flags {
    /// Bit 0: frame is a response (0 = request).
    pub const RESPONSE: u8 = 0b0000_0001;

    /// Bit 1: frame belongs to the RPC engine (0 = plain request/response).
    pub const RPC: u8 = 0b0000_0010;

    /// Plain request.
    pub const REQUEST: u8 = 0;

    /// RPC request.
    pub const RPC_REQUEST: u8 = RPC;

    /// RPC response.
    pub const RPC_RESPONSE: u8 = RPC | RESPONSE;

    /// Check if a flag is set.
    #[inline]
    pub const fn has_flag(flags: u8, flag: u8) -> bool {
        (flags & flag) != 0
    }
}

/// Result of looking for one frame at the front of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus<'a> {
    /// Fewer bytes than the header or the announced length.
    Incomplete,
    /// A whole frame is available.
    Complete {
        /// Bytes the frame occupies, header included.
        frame_len: usize,
        /// The payload after the header.
        payload: &'a [u8],
    },
    /// The announced length is outside `HEADER_SIZE..=max`.
    Invalid {
        /// The announced length.
        length: usize,
    },
}

/// Encode the length header of a frame.
#[inline]
pub fn encode_header(frame_len: u32) -> [u8; HEADER_SIZE] {
    frame_len.to_be_bytes()
}

/// Read the announced frame length, if the header is complete.
#[inline]
pub fn decode_length(buf: &[u8]) -> Option<usize> {
    let header: [u8; HEADER_SIZE] = buf.get(..HEADER_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(header) as usize)
}

/// Check that a frame length is acceptable.
pub fn validate_length(frame_len: usize, max_msg_size: usize) -> Result<()> {
    if frame_len < HEADER_SIZE || frame_len > max_msg_size {
        return Err(NetError::Protocol(format!(
            "frame length {} outside {}..={}",
            frame_len, HEADER_SIZE, max_msg_size
        )));
    }
    Ok(())
}

/// Look for one complete frame at the front of `buf`.
pub fn split_frame(buf: &[u8], max_msg_size: usize) -> FrameStatus<'_> {
    let Some(length) = decode_length(buf) else {
        return FrameStatus::Incomplete;
    };
    if validate_length(length, max_msg_size).is_err() {
        return FrameStatus::Invalid { length };
    }
    if buf.len() < length {
        return FrameStatus::Incomplete;
    }
    FrameStatus::Complete {
        frame_len: length,
        payload: &buf[HEADER_SIZE..length],
    }
}

/// Build a complete frame around `payload`.
///
/// # Example
///
/// ```
/// use stnet::protocol::{encode_frame, DEFAULT_MAX_MSG_SIZE};
///
/// let frame = encode_frame(b"hello", DEFAULT_MAX_MSG_SIZE).unwrap();
/// assert_eq!(&frame[..4], &[0, 0, 0, 9]);
/// assert_eq!(&frame[4..], b"hello");
/// ```
pub fn encode_frame(payload: &[u8], max_msg_size: usize) -> Result<Vec<u8>> {
    build_frame(&[payload], max_msg_size)
}

/// Build a frame whose payload is a flag byte followed by `body`.
pub fn encode_flagged_frame(flag: u8, body: &[u8], max_msg_size: usize) -> Result<Vec<u8>> {
    build_frame(&[std::slice::from_ref(&flag), body], max_msg_size)
}

fn build_frame(parts: &[&[u8]], max_msg_size: usize) -> Result<Vec<u8>> {
    let frame_len = HEADER_SIZE + parts.iter().map(|p| p.len()).sum::<usize>();
    validate_length(frame_len, max_msg_size)?;
    let header = u32::try_from(frame_len)
        .map_err(|_| NetError::Protocol(format!("frame length {} overflows u32", frame_len)))?;

    let mut buf = Vec::with_capacity(frame_len);
    buf.extend_from_slice(&encode_header(header));
    for part in parts {
        buf.extend_from_slice(part);
    }
    Ok(buf)
}
