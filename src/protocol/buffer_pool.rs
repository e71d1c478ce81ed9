//! Shared pool of outbound buffers.
//!
//! `Session::send` copies the caller's bytes into a pooled `BytesMut`; the
//! send loop hands the buffer back once it has been written. The sender never
//! keeps a reference after the handoff, so a buffer can be reused as soon as
//! it is released.
//!
//! # Usage
//!
//! ```ignore
//! let pool = BufferPool::new(1024);
//! let buf = pool.copy_from(b"frame bytes");
//! // ... write buf to the socket ...
//! pool.release(buf);
//! ```

use bytes::BytesMut;
use parking_lot::Mutex;

/// Buffers that grew beyond this are dropped instead of pooled.
pub const MAX_POOLED_CAPACITY: usize = 64 * 1024;

/// A bounded free list of reusable buffers.
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<BytesMut>>,
    max_pooled: usize,
}

impl BufferPool {
    /// Create a pool keeping at most `max_pooled` idle buffers.
    pub fn new(max_pooled: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_pooled,
        }
    }

    /// Take an empty buffer with at least `len` bytes of capacity.
    pub fn acquire(&self, len: usize) -> BytesMut {
        let mut buf = self.free.lock().pop().unwrap_or_default();
        buf.clear();
        buf.reserve(len);
        buf
    }

    /// Take a buffer holding a copy of `data`.
    pub fn copy_from(&self, data: &[u8]) -> BytesMut {
        let mut buf = self.acquire(data.len());
        buf.extend_from_slice(data);
        buf
    }

    /// Return a buffer to the pool.
    pub fn release(&self, mut buf: BytesMut) {
        if buf.capacity() > MAX_POOLED_CAPACITY {
            return;
        }
        buf.clear();
        let mut free = self.free.lock();
        if free.len() < self.max_pooled {
            free.push(buf);
        }
    }

    /// Number of idle buffers.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_BUFFER_POOL_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_starts_empty() {
        let pool = BufferPool::new(4);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_copy_from() {
        let pool = BufferPool::new(4);
        let buf = pool.copy_from(b"hello");
        assert_eq!(&buf[..], b"hello");
    }

    #[test]
    fn test_release_and_reuse() {
        let pool = BufferPool::new(4);
        let buf = pool.copy_from(&[1u8; 100]);
        let ptr = buf.as_ptr();
        pool.release(buf);
        assert_eq!(pool.idle(), 1);

        let reused = pool.acquire(10);
        assert!(reused.is_empty());
        assert_eq!(reused.as_ptr(), ptr);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_pool_is_bounded() {
        let pool = BufferPool::new(2);
        for _ in 0..5 {
            pool.release(BytesMut::with_capacity(16));
        }
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn test_oversized_buffers_are_dropped() {
        let pool = BufferPool::new(2);
        pool.release(BytesMut::with_capacity(MAX_POOLED_CAPACITY + 1));
        assert_eq!(pool.idle(), 0);
    }
}
