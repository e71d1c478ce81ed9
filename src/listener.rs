//! Listeners - accept inbound sessions.
//!
//! A TCP listener turns every accepted connection into a [`Session`] and
//! keeps it in a registry until it closes. A UDP listener has exactly one
//! pseudo-session per bound socket; if that session closes while the
//! listener is still open, the listener binds the same local address again
//! after `udp_rebind_delay` and starts a fresh session on it.
//!
//! # Example
//!
//! ```ignore
//! let listener = Listener::bind(ctx, "udp:0.0.0.0:5300", handler, Duration::ZERO)?;
//! println!("bound to {}", listener.local_addr());
//! listener.close().await;
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::context::NetContext;
use crate::error::{NetError, Result};
use crate::session::{stopped, CloseHook, Session, SessionHandler};
use crate::transport::{bind_tcp, bind_udp, Endpoint, Network, Stream};

/// Pause after a failed accept.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

struct Shared {
    network: Network,
    local_addr: SocketAddr,
    ctx: Arc<NetContext>,
    handler: Arc<dyn SessionHandler>,
    heartbeat: Duration,
    closed: AtomicBool,
    sessions: RwLock<HashMap<u64, Session>>,
    /// Notified when the registry becomes empty.
    drained: Notify,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// A bound TCP or UDP listener. Clones share the same socket.
#[derive(Clone)]
pub struct Listener {
    shared: Arc<Shared>,
}

impl Listener {
    /// Bind `address` (`"udp:"` prefix for UDP) and start accepting.
    ///
    /// Binding happens before this returns, so address errors are reported
    /// here. The accept loop runs on the context's runtime.
    pub fn bind(
        ctx: Arc<NetContext>,
        address: &str,
        handler: Arc<dyn SessionHandler>,
        heartbeat: Duration,
    ) -> Result<Self> {
        let endpoint = Endpoint::parse(address);
        if endpoint.is_empty() {
            return Err(NetError::InvalidAddress(address.to_string()));
        }

        let runtime = ctx.runtime().clone();
        let _enter = runtime.enter();
        let (stop, stop_rx) = watch::channel(false);

        let make_shared = |local_addr| {
            Arc::new(Shared {
                network: endpoint.network,
                local_addr,
                ctx: ctx.clone(),
                handler: handler.clone(),
                heartbeat,
                closed: AtomicBool::new(false),
                sessions: RwLock::new(HashMap::new()),
                drained: Notify::new(),
                stop,
                task: Mutex::new(None),
            })
        };

        let shared = match endpoint.network {
            Network::Tcp => {
                let listener = bind_tcp(&endpoint.addr)?;
                let shared = make_shared(listener.local_addr()?);
                let task = runtime.spawn(accept_loop(shared.clone(), listener, stop_rx));
                *shared.task.lock() = Some(task);
                shared
            }
            Network::Udp => {
                let socket = bind_udp(&endpoint.addr)?;
                let shared = make_shared(socket.local_addr()?);
                let task = runtime.spawn(udp_loop(shared.clone(), socket, stop_rx));
                *shared.task.lock() = Some(task);
                shared
            }
        };

        tracing::info!(address = %endpoint, local = %shared.local_addr, "listening");
        Ok(Self { shared })
    }

    /// Stop accepting, close every session and wait until all have finished.
    ///
    /// Calling it again returns immediately.
    pub async fn close(&self) {
        let shared = &self.shared;
        if shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        shared.stop.send_replace(true);

        let task = shared.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(local = %shared.local_addr, error = %e, "listener task aborted");
            }
        }

        for session in self.sessions() {
            session.close();
        }

        loop {
            let drained = shared.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();
            if shared.sessions.read().is_empty() {
                break;
            }
            drained.await;
        }
        tracing::info!(local = %shared.local_addr, "listener closed");
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// The bound address (with the real port when bound to port 0).
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    #[inline]
    pub fn network(&self) -> Network {
        self.shared.network
    }

    pub fn get_session(&self, id: u64) -> Option<Session> {
        self.shared.sessions.read().get(&id).cloned()
    }

    /// Visit live sessions until `f` returns `false`.
    ///
    /// Works on a snapshot, so `f` may close sessions or look others up.
    pub fn iterate(&self, mut f: impl FnMut(&Session) -> bool) {
        for session in self.sessions() {
            if !f(&session) {
                break;
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.shared.sessions.read().len()
    }

    fn sessions(&self) -> Vec<Session> {
        self.shared.sessions.read().values().cloned().collect()
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("network", &self.shared.network)
            .field("local_addr", &self.shared.local_addr)
            .field("sessions", &self.session_count())
            .finish()
    }
}

impl Shared {
    /// Create, register and start a session on `stream`.
    fn register(self: &Arc<Self>, stream: Stream) -> Option<Session> {
        let weak = Arc::downgrade(self);
        let hook: CloseHook = Box::new(move |session: &Session| {
            if let Some(shared) = weak.upgrade() {
                shared.deregister(session.id());
            }
        });
        let session = Session::new(
            self.ctx.clone(),
            self.network,
            self.handler.clone(),
            self.heartbeat,
            false,
            Some(hook),
        );

        self.sessions.write().insert(session.id(), session.clone());
        match session.start(stream) {
            Ok(()) => Some(session),
            Err(e) => {
                tracing::error!(session_id = session.id(), error = %e, "session start failed");
                self.deregister(session.id());
                None
            }
        }
    }

    fn deregister(&self, id: u64) {
        let mut sessions = self.sessions.write();
        sessions.remove(&id);
        if sessions.is_empty() {
            self.drained.notify_waiters();
        }
    }
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener, mut stop: watch::Receiver<bool>) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(remote = %addr, error = %e, "set_nodelay failed");
                }
                shared.register(Stream::Tcp(stream));
            }
            Err(e) => {
                tracing::warn!(local = %shared.local_addr, error = %e, "accept failed");
                tokio::select! {
                    _ = stopped(&mut stop) => break,
                    _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                }
            }
        }
    }
}

async fn udp_loop(shared: Arc<Shared>, socket: UdpSocket, mut stop: watch::Receiver<bool>) {
    let delay = shared.ctx.config().udp_rebind_delay();
    let mut socket = Some(socket);

    loop {
        if let Some(socket) = socket.take() {
            if let Some(session) = shared.register(Stream::udp_listening(socket)) {
                tokio::select! {
                    _ = session.closed() => {}
                    _ = stopped(&mut stop) => {
                        session.close();
                        session.closed().await;
                        return;
                    }
                }
            }
        }

        tokio::select! {
            _ = stopped(&mut stop) => return,
            _ = tokio::time::sleep(delay) => {}
        }

        match bind_udp(&shared.local_addr.to_string()) {
            Ok(rebound) => {
                tracing::info!(local = %shared.local_addr, "udp listener rebound");
                socket = Some(rebound);
            }
            Err(e) => {
                tracing::error!(local = %shared.local_addr, error = %e, "udp rebind failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetConfig;
    use crate::session::{Parsed, SessionEvent};
    use tokio::net::TcpStream;

    /// Consumes everything; counts opens.
    #[derive(Default)]
    struct Sink {
        opened: Mutex<usize>,
    }

    impl SessionHandler for Sink {
        fn parse(&self, _session: &Session, data: &[u8]) -> Parsed {
            Parsed::Consumed(data.len())
        }

        fn on_event(&self, _session: &Session, event: SessionEvent) {
            if event == SessionEvent::Open {
                *self.opened.lock() += 1;
            }
        }
    }

    fn context(config: NetConfig) -> Arc<NetContext> {
        NetContext::current(config).unwrap()
    }

    async fn wait_for_count(listener: &Listener, count: usize) {
        for _ in 0..200 {
            if listener.session_count() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} sessions, have {}", count, listener.session_count());
    }

    #[tokio::test]
    async fn test_registry_tracks_sessions() {
        let sink = Arc::new(Sink::default());
        let listener =
            Listener::bind(context(NetConfig::default()), "127.0.0.1:0", sink.clone(), Duration::ZERO)
                .unwrap();
        let addr = listener.local_addr();

        let a = TcpStream::connect(addr).await.unwrap();
        let _b = TcpStream::connect(addr).await.unwrap();
        wait_for_count(&listener, 2).await;

        let mut ids = Vec::new();
        listener.iterate(|s| {
            ids.push(s.id());
            true
        });
        assert_eq!(ids.len(), 2);
        assert!(listener.get_session(ids[0]).is_some());

        drop(a);
        wait_for_count(&listener, 1).await;
        listener.close().await;
        assert_eq!(listener.session_count(), 0);
        assert_eq!(*sink.opened.lock(), 2);
    }

    #[tokio::test]
    async fn test_close_stops_accepting() {
        let listener = Listener::bind(
            context(NetConfig::default()),
            "127.0.0.1:0",
            Arc::new(Sink::default()),
            Duration::ZERO,
        )
        .unwrap();
        let addr = listener.local_addr();
        let _client = TcpStream::connect(addr).await.unwrap();
        wait_for_count(&listener, 1).await;

        listener.close().await;
        assert!(listener.is_closed());
        assert_eq!(listener.session_count(), 0);
        assert!(TcpStream::connect(addr).await.is_err());

        // Second close is a no-op.
        listener.close().await;
    }

    #[tokio::test]
    async fn test_invalid_address() {
        let result = Listener::bind(
            context(NetConfig::default()),
            "  ",
            Arc::new(Sink::default()),
            Duration::ZERO,
        );
        assert!(matches!(result, Err(NetError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_udp_listener_rebinds_after_session_close() {
        let config = NetConfig {
            udp_rebind_delay_ms: 10,
            ..NetConfig::default()
        };
        let sink = Arc::new(Sink::default());
        let listener = Listener::bind(context(config), "udp:127.0.0.1:0", sink.clone(), Duration::ZERO)
            .unwrap();
        assert_eq!(listener.network(), Network::Udp);
        wait_for_count(&listener, 1).await;

        let mut first = None;
        listener.iterate(|s| {
            first = Some(s.clone());
            false
        });
        let first = first.unwrap();
        first.close();
        first.closed().await;

        for _ in 0..200 {
            if *sink.opened.lock() == 2 && listener.session_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*sink.opened.lock(), 2);
        let mut second = 0;
        listener.iterate(|s| {
            second = s.id();
            true
        });
        assert_ne!(second, first.id());

        listener.close().await;
        assert_eq!(listener.session_count(), 0);
    }
}
