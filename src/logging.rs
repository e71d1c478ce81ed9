//! Logging setup.
//!
//! The library itself only emits `tracing` events. Applications are free to
//! install any subscriber; [`init`] is a convenience that installs a fmt
//! subscriber filtered by `RUST_LOG`, falling back to `default_directive`.
//!
//! ```ignore
//! stnet::logging::init("info,stnet=debug")?;
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// Fails if a global subscriber is already set.
pub fn init(default_directive: &str) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter(default_directive))
        .with(fmt::layer())
        .try_init()
}

/// Install a subscriber writing through the test harness.
///
/// Safe to call from every test; only the first call takes effect.
pub fn init_for_tests() {
    let _ = tracing_subscriber::registry()
        .with(env_filter("warn"))
        .with(fmt::layer().with_test_writer())
        .try_init();
}

fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_for_tests_is_idempotent() {
        init_for_tests();
        init_for_tests();
        tracing::debug!("logging initialized twice without panicking");
    }
}
