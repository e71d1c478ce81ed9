//! Carry-over buffer for partial reads.
//!
//! A session appends every read with [`extend`](FrameBuffer::extend), hands
//! [`as_slice`](FrameBuffer::as_slice) to its service's parser and drops
//! whatever the parser consumed with [`advance`](FrameBuffer::advance).
//! Bytes of an unfinished message stay buffered for the next read.
//!
//! # Example
//!
//! ```
//! use stnet::protocol::{encode_frame, split_frame, FrameBuffer, FrameStatus, DEFAULT_MAX_MSG_SIZE};
//!
//! let frame = encode_frame(b"hello", DEFAULT_MAX_MSG_SIZE).unwrap();
//! let mut carry = FrameBuffer::new();
//!
//! carry.extend(&frame[..3]);
//! assert_eq!(split_frame(carry.as_slice(), DEFAULT_MAX_MSG_SIZE), FrameStatus::Incomplete);
//!
//! carry.extend(&frame[3..]);
//! let FrameStatus::Complete { frame_len, payload } = split_frame(carry.as_slice(), DEFAULT_MAX_MSG_SIZE) else {
//!     panic!("frame should be complete");
//! };
//! assert_eq!(payload, b"hello");
//! carry.advance(frame_len);
//! assert!(carry.is_empty());
//! ```

use bytes::{Buf, BytesMut};

use super::wire_format::DEFAULT_MAX_MSG_SIZE;

/// Initial buffer capacity.
const INITIAL_CAPACITY: usize = 4 * 1024;

/// Bytes received but not yet consumed by a parser.
pub struct FrameBuffer {
    buffer: BytesMut,
    /// Largest message, header included, the buffer may hold unfinished.
    max_msg_size: usize,
}

impl FrameBuffer {
    /// Create a buffer with the default 2 MiB message limit.
    pub fn new() -> Self {
        Self::with_max_msg_size(DEFAULT_MAX_MSG_SIZE)
    }

    pub fn with_max_msg_size(max_msg_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            max_msg_size,
        }
    }

    /// Append data without parsing.
    #[inline]
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// The buffered, unconsumed bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop `n` bytes from the front.
    pub fn advance(&mut self, n: usize) {
        let n = n.min(self.buffer.len());
        self.buffer.advance(n);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// True when more bytes are buffered than one message may hold.
    #[inline]
    pub fn exceeds_limit(&self) -> bool {
        self.buffer.len() > self.max_msg_size
    }

    #[inline]
    pub fn max_msg_size(&self) -> usize {
        self.max_msg_size
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
