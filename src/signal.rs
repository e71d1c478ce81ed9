//! One-slot blocking signals.
//!
//! Processor threads park on a [`WakeSignal`] between scheduling passes, and
//! synchronous RPC callers park on a `Signal<RspProto>` until the response or
//! the deadline arrives. A set that nobody is waiting for stays in the slot,
//! so a wake-up sent just before the receiver parks is never lost.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A single value handed from one thread to another.
#[derive(Debug)]
pub struct Signal<T> {
    slot: Mutex<Option<T>>,
    cond: Condvar,
}

/// Wake-up permit for a processor thread.
pub type WakeSignal = Signal<()>;

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    /// Store `value`, replacing an unconsumed one, and wake a waiter.
    pub fn set(&self, value: T) {
        *self.slot.lock() = Some(value);
        self.cond.notify_one();
    }

    /// Store `value` only if the slot is empty.
    ///
    /// Returns `false` (dropping `value`) when the slot was occupied.
    pub fn try_set(&self, value: T) -> bool {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        drop(slot);
        self.cond.notify_one();
        true
    }

    /// Take the value without waiting.
    pub fn take(&self) -> Option<T> {
        self.slot.lock().take()
    }

    /// Block until a value is available.
    pub fn wait(&self) -> T {
        let mut slot = self.slot.lock();
        loop {
            if let Some(value) = slot.take() {
                return value;
            }
            self.cond.wait(&mut slot);
        }
    }

    /// Block until a value is available or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        while slot.is_none() {
            if self.cond.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.take()
    }
}

impl WakeSignal {
    /// Non-blocking wake-up. Repeated notifications collapse into one.
    #[inline]
    pub fn notify(&self) {
        self.set(());
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}
