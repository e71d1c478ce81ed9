//! Connectors - supervised outbound sessions.
//!
//! A [`Connector`] owns one outbound [`Session`] and keeps it connected. After
//! a failed or dropped connection it waits `min(failures², 900) × interval`
//! before the next attempt; the failure counter resets from 31 back to 10, so
//! a dead peer is retried every 100 × interval at worst (with the 100 ms
//! default: 0, 0.1 s, 0.4 s, 0.9 s, … 90 s, then 10 s, 12.1 s, …).
//!
//! Sends made while disconnected are queued on the session and flushed once
//! the connection is back. A send also cuts a pending backoff wait short.
//!
//! ```text
//! Idle ─► Connecting ─► Connected ─► Connecting ─► … ─► Closed
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::context::NetContext;
use crate::error::{NetError, Result};
use crate::session::{stopped, CloseHook, Session, SessionEvent, SessionHandler};
use crate::transport::{connect, Endpoint};

/// Largest backoff multiplier.
const MAX_BACKOFF_FACTOR: u32 = 900;

/// Failure count after which the counter wraps.
const MAX_FAILURES: u32 = 30;

/// Value the counter wraps to.
const FAILURES_AFTER_WRAP: u32 = 10;

/// Delay before the next attempt after `failures` consecutive failures.
pub fn backoff_delay(failures: u32, interval: Duration) -> Duration {
    let factor = failures.saturating_mul(failures).min(MAX_BACKOFF_FACTOR);
    interval.saturating_mul(factor)
}

/// Failure counter after one more attempt.
pub fn next_failure_count(failures: u32) -> u32 {
    let next = failures + 1;
    if next > MAX_FAILURES {
        FAILURES_AFTER_WRAP
    } else {
        next
    }
}

/// Connection state of a [`Connector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectorState {
    Idle = 0,
    Connecting = 1,
    Connected = 2,
    Closed = 3,
}

impl ConnectorState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectorState::Connecting,
            2 => ConnectorState::Connected,
            3 => ConnectorState::Closed,
            _ => ConnectorState::Idle,
        }
    }
}

struct Shared {
    session: Session,
    endpoint: Mutex<Endpoint>,
    interval: Duration,
    failures: AtomicU32,
    state: AtomicU8,
    closed: AtomicBool,
    /// Serializes session restarts against `close`.
    close_lock: Mutex<()>,
    stop: watch::Sender<bool>,
    /// Cuts a backoff wait short.
    wake: Notify,
    /// Notified by the session's close hook.
    session_closed: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn set_state(&self, state: ConnectorState) {
        // Closed is terminal.
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != ConnectorState::Closed as u8).then_some(state as u8)
            });
    }
}

/// A supervised outbound connection. Clones share the same connection.
#[derive(Clone)]
pub struct Connector {
    shared: Arc<Shared>,
}

impl Connector {
    /// Start connecting to `address` (`"udp:"` prefix for UDP).
    ///
    /// A zero `reconnect_interval` makes a single attempt and never
    /// reconnects.
    pub fn new(
        ctx: Arc<NetContext>,
        address: &str,
        handler: Arc<dyn SessionHandler>,
        reconnect_interval: Duration,
    ) -> Result<Self> {
        let endpoint = Endpoint::parse(address);
        if endpoint.is_empty() {
            return Err(NetError::InvalidAddress(address.to_string()));
        }

        let session_closed = Arc::new(Notify::new());
        let hook: CloseHook = {
            let session_closed = session_closed.clone();
            Box::new(move |_: &Session| session_closed.notify_one())
        };
        let session = Session::new(
            ctx.clone(),
            endpoint.network,
            handler,
            Duration::ZERO,
            true,
            Some(hook),
        );

        let (stop, stop_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            session,
            endpoint: Mutex::new(endpoint),
            interval: reconnect_interval,
            failures: AtomicU32::new(0),
            state: AtomicU8::new(ConnectorState::Idle as u8),
            closed: AtomicBool::new(false),
            close_lock: Mutex::new(()),
            stop,
            wake: Notify::new(),
            session_closed,
            task: Mutex::new(None),
        });

        let task = ctx.runtime().spawn(supervise(shared.clone(), stop_rx));
        *shared.task.lock() = Some(task);
        Ok(Self { shared })
    }

    /// Queue `data` on the session, waking a pending reconnect first.
    pub fn send(&self, data: &[u8]) -> Result<()> {
        self.shared.wake.notify_one();
        self.shared.session.send(data, None)
    }

    /// Like [`send`](Self::send), adding the length header.
    pub fn send_frame(&self, payload: &[u8]) -> Result<()> {
        self.shared.wake.notify_one();
        self.shared.session.send_frame(payload, None)
    }

    /// Point the connector at a new address and reconnect right away.
    ///
    /// The protocol stays the one the connector was created with.
    pub fn change_addr(&self, address: &str) {
        let parsed = Endpoint::parse(address);
        {
            let mut endpoint = self.shared.endpoint.lock();
            if parsed.network != endpoint.network {
                tracing::warn!(
                    current = %endpoint,
                    requested = %parsed,
                    "connector cannot switch protocol, keeping {}",
                    endpoint.network
                );
            }
            endpoint.addr = parsed.addr;
        }
        self.shared.session.close();
        self.shared.wake.notify_one();
    }

    /// Stop reconnecting and close the session. Waits until both are done.
    pub async fn close(&self) {
        let shared = &self.shared;
        {
            let _guard = shared.close_lock.lock();
            if shared.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            shared.state.store(ConnectorState::Closed as u8, Ordering::Release);
            shared.stop.send_replace(true);
            shared.session.terminate();
        }

        let task = shared.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(session_id = shared.session.id(), error = %e, "connector task aborted");
            }
        }
        shared.session.closed().await;
        tracing::info!(address = %self.address(), "connection closed");
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn is_connected(&self) -> bool {
        !self.shared.is_closed() && !self.shared.session.is_closed()
    }

    /// Current consecutive-failure counter.
    pub fn reconnect_count(&self) -> u32 {
        self.shared.failures.load(Ordering::Acquire)
    }

    /// Target address, with the `udp:` prefix for UDP.
    pub fn address(&self) -> String {
        self.shared.endpoint.lock().to_string()
    }

    pub fn state(&self) -> ConnectorState {
        ConnectorState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Id of the owned session.
    #[inline]
    pub fn id(&self) -> u64 {
        self.shared.session.id()
    }

    #[inline]
    pub fn session(&self) -> &Session {
        &self.shared.session
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("id", &self.id())
            .field("address", &self.address())
            .field("state", &self.state())
            .finish()
    }
}

async fn supervise(shared: Arc<Shared>, mut stop: watch::Receiver<bool>) {
    let session = &shared.session;

    while !shared.is_closed() {
        let failures = shared.failures.load(Ordering::Acquire);
        if failures > 0 {
            tokio::select! {
                _ = stopped(&mut stop) => break,
                _ = shared.wake.notified() => {}
                _ = tokio::time::sleep(backoff_delay(failures, shared.interval)) => {}
            }
        }
        shared
            .failures
            .store(next_failure_count(failures), Ordering::Release);
        shared.set_state(ConnectorState::Connecting);

        let endpoint = shared.endpoint.lock().clone();
        let connected = tokio::select! {
            _ = stopped(&mut stop) => break,
            connected = connect(&endpoint) => connected,
        };

        let stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(address = %endpoint, error = %e, "connect failed");
                session.dispatch(SessionEvent::Close);
                if shared.interval.is_zero() {
                    break;
                }
                continue;
            }
        };

        {
            let _guard = shared.close_lock.lock();
            if shared.is_closed() {
                break;
            }
            if let Err(e) = session.start(stream) {
                tracing::error!(session_id = session.id(), error = %e, "session restart failed");
                continue;
            }
        }

        shared.failures.store(0, Ordering::Release);
        shared.set_state(ConnectorState::Connected);

        shared.session_closed.notified().await;
        shared.set_state(ConnectorState::Connecting);
        if shared.interval.is_zero() {
            break;
        }
    }

    if !shared.is_closed() {
        shared.set_state(ConnectorState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetConfig;
    use crate::session::Parsed;
    use crate::transport::bind_tcp;
    use tokio::io::AsyncReadExt;

    #[derive(Default)]
    struct Events {
        closes: Mutex<usize>,
        opens: Mutex<usize>,
    }

    impl SessionHandler for Events {
        fn parse(&self, _session: &Session, data: &[u8]) -> Parsed {
            Parsed::Consumed(data.len())
        }

        fn on_event(&self, _session: &Session, event: SessionEvent) {
            match event {
                SessionEvent::Open => *self.opens.lock() += 1,
                SessionEvent::Close => *self.closes.lock() += 1,
                SessionEvent::HeartBeat => {}
            }
        }
    }

    #[test]
    fn test_backoff_is_quadratic() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(0, base), Duration::ZERO);
        assert_eq!(backoff_delay(1, base), Duration::from_millis(100));
        assert_eq!(backoff_delay(3, base), Duration::from_millis(900));
        assert_eq!(backoff_delay(30, base), Duration::from_secs(90));
        assert_eq!(backoff_delay(1000, base), Duration::from_secs(90));
    }

    #[test]
    fn test_failure_counter_wraps_to_ten() {
        assert_eq!(next_failure_count(0), 1);
        assert_eq!(next_failure_count(29), 30);
        assert_eq!(next_failure_count(30), 10);

        let mut failures = 0;
        for _ in 0..31 {
            failures = next_failure_count(failures);
        }
        assert_eq!(failures, 10);
    }

    #[tokio::test]
    async fn test_connects_and_sends() {
        let ctx = NetContext::current(NetConfig::default()).unwrap();
        let listener = bind_tcp("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let events = Arc::new(Events::default());
        let connector = Connector::new(
            ctx,
            &addr.to_string(),
            events.clone(),
            Duration::from_millis(10),
        )
        .unwrap();
        // Queued before the connection exists.
        connector.send(b"early").unwrap();

        let (mut peer, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"early");

        for _ in 0..200 {
            if connector.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(connector.state(), ConnectorState::Connected);
        assert_eq!(connector.reconnect_count(), 0);

        connector.close().await;
        assert_eq!(connector.state(), ConnectorState::Closed);
        assert!(!connector.is_connected());
        assert!(matches!(connector.send(b"late"), Err(NetError::SessionClosed)));
    }

    #[tokio::test]
    async fn test_reconnects_after_drop() {
        let ctx = NetContext::current(NetConfig::default()).unwrap();
        let listener = bind_tcp("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let events = Arc::new(Events::default());
        let connector = Connector::new(
            ctx,
            &addr.to_string(),
            events.clone(),
            Duration::from_millis(5),
        )
        .unwrap();

        let (first, _) = listener.accept().await.unwrap();
        let id = connector.id();
        drop(first);

        let (_second, _) = listener.accept().await.unwrap();
        for _ in 0..200 {
            if *events.opens.lock() == 2 && connector.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*events.opens.lock(), 2);
        assert_eq!(connector.id(), id);
        connector.close().await;
    }

    #[tokio::test]
    async fn test_failed_connect_reports_close() {
        let ctx = NetContext::current(NetConfig::default()).unwrap();
        let listener = bind_tcp("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let events = Arc::new(Events::default());
        let connector =
            Connector::new(ctx, &addr.to_string(), events.clone(), Duration::ZERO).unwrap();

        for _ in 0..200 {
            if connector.state() == ConnectorState::Idle && *events.closes.lock() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*events.closes.lock(), 1);
        assert_eq!(connector.reconnect_count(), 1);
        assert!(!connector.is_connected());
        connector.close().await;
    }

    #[tokio::test]
    async fn test_change_addr() {
        let ctx = NetContext::current(NetConfig::default()).unwrap();
        let first = bind_tcp("127.0.0.1:0").unwrap();
        let second = bind_tcp("127.0.0.1:0").unwrap();
        let second_addr = second.local_addr().unwrap();

        let connector = Connector::new(
            ctx,
            &first.local_addr().unwrap().to_string(),
            Arc::new(Events::default()),
            Duration::from_millis(5),
        )
        .unwrap();
        let _a = first.accept().await.unwrap();

        connector.change_addr(&second_addr.to_string());
        assert_eq!(connector.address(), second_addr.to_string());
        let _b = second.accept().await.unwrap();
        connector.close().await;
    }

    #[tokio::test]
    async fn test_invalid_address() {
        let ctx = NetContext::current(NetConfig::default()).unwrap();
        let result = Connector::new(ctx, "", Arc::new(Events::default()), Duration::ZERO);
        assert!(matches!(result, Err(NetError::InvalidAddress(_))));
    }
}
