//! Panic containment for user callbacks.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Run `f`, turning a panic into `None` after logging it with a backtrace.
///
/// `scope` names the callback in the log line.
pub(crate) fn catch<R>(scope: &str, f: impl FnOnce() -> R) -> Option<R> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            let backtrace = Backtrace::force_capture();
            tracing::error!(
                scope,
                panic = %panic_message(payload.as_ref()),
                "recovered panic\n{backtrace}"
            );
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}
