//! Bounded drop-on-full queues.
//!
//! Every service owns one [`BoundedQueue`] per processor thread. Producers are
//! session I/O tasks and application threads; the single consumer is the
//! processor thread with the matching index. A full queue never blocks the
//! producer: [`try_push`](BoundedQueue::try_push) hands the item back and the
//! caller logs and drops it.
//!
//! Session events (close, heartbeat) are the exception: they may wait a short
//! while with [`push_timeout`](BoundedQueue::push_timeout) on the I/O runtime.
//!
//! # Invariants
//!
//! - `len() <= capacity()` at all times
//! - items pushed by one producer are popped in push order

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// A bounded multi-producer, single-consumer queue.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    tx: mpsc::Sender<T>,
    rx: Mutex<mpsc::Receiver<T>>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items (at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
        }
    }

    /// Push without waiting. A full queue returns the item.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        self.tx.try_send(item).map_err(|e| e.into_inner())
    }

    /// Push, waiting up to `timeout` for space. Must run on a tokio runtime.
    pub async fn push_timeout(&self, item: T, timeout: Duration) -> Result<(), T> {
        self.tx
            .send_timeout(item, timeout)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(item) => item,
                mpsc::error::SendTimeoutError::Closed(item) => item,
            })
    }

    /// Pop one item if available.
    pub fn try_pop(&self) -> Option<T> {
        self.rx.lock().try_recv().ok()
    }

    /// Pop up to `max` items, passing each to `f`. Returns how many were popped.
    ///
    /// The receiver lock is released before each call to `f`, so `f` may push
    /// back into this queue.
    pub fn drain(&self, max: usize, mut f: impl FnMut(T)) -> usize {
        let mut count = 0;
        while count < max {
            let Some(item) = self.try_pop() else {
                break;
            };
            f(item);
            count += 1;
        }
        count
    }

    /// Number of queued items.
    #[inline]
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.tx.capacity() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_queue() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(4);
        assert_eq!(queue.capacity(), 4);
        assert_eq!(queue.len(), 0);
        assert!(queue.is_empty());
        assert!(!queue.is_full());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(0);
        assert_eq!(queue.capacity(), 1);
    }

    #[test]
    fn test_push_beyond_capacity_is_rejected() {
        let queue = BoundedQueue::new(3);
        for i in 0..3 {
            queue.try_push(i).unwrap();
        }
        assert!(queue.is_full());
        assert_eq!(queue.try_push(99), Err(99));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::new(8);
        for i in 0..5 {
            queue.try_push(i).unwrap();
        }
        let mut seen = Vec::new();
        assert_eq!(queue.drain(usize::MAX, |i| seen.push(i)), 5);
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_respects_max() {
        let queue = BoundedQueue::new(8);
        for i in 0..6 {
            queue.try_push(i).unwrap();
        }
        assert_eq!(queue.drain(4, |_| {}), 4);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_pop(), Some(4));
    }

    #[test]
    fn test_drain_callback_can_push() {
        let queue = BoundedQueue::new(8);
        queue.try_push(1).unwrap();
        let popped = queue.drain(1, |i| {
            queue.try_push(i + 1).unwrap();
        });
        assert_eq!(popped, 1);
        assert_eq!(queue.try_pop(), Some(2));
    }

    #[test]
    fn test_concurrent_producers_never_exceed_capacity() {
        let queue = std::sync::Arc::new(BoundedQueue::new(16));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    let mut rejected = 0;
                    for i in 0..100 {
                        if queue.try_push(t * 1000 + i).is_err() {
                            rejected += 1;
                        }
                        assert!(queue.len() <= queue.capacity());
                    }
                    rejected
                })
            })
            .collect();
        let rejected: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(queue.len(), 16);
        assert_eq!(rejected, 400 - 16);
    }

    #[tokio::test]
    async fn test_push_timeout_waits_for_space() {
        let queue = std::sync::Arc::new(BoundedQueue::new(1));
        queue.try_push(1).unwrap();

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                queue.try_pop()
            })
        };
        queue.push_timeout(2, Duration::from_secs(2)).await.unwrap();
        assert_eq!(consumer.await.unwrap(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
    }

    #[tokio::test]
    async fn test_push_timeout_expires() {
        let queue = BoundedQueue::new(1);
        queue.try_push(1).unwrap();
        let result = queue.push_timeout(2, Duration::from_millis(10)).await;
        assert_eq!(result, Err(2));
    }
}
