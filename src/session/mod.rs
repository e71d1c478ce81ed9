//! Sessions - one logical connection each.
//!
//! A [`Session`] wraps a TCP stream or a UDP socket. While open it runs three
//! tasks on the context's runtime:
//!
//! - the receive loop reads raw units with an adaptively sized buffer,
//! - the framing loop reassembles messages and calls [`SessionHandler::parse`],
//! - the send loop writes queued buffers with vectored writes.
//!
//! Events reach the handler in a fixed order: [`SessionEvent::Open`] before
//! the first read, [`SessionEvent::HeartBeat`] whenever the framing loop sat
//! idle for the heartbeat interval, and [`SessionEvent::Close`] once every
//! loop has exited and the session is marked closed. The owner's close hook
//! runs after that.
//!
//! Sessions owned by a connector are restarted in place on reconnect: the id
//! and the outbound queue survive, the carry-over buffer does not.

mod reader;
mod writer;

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::context::NetContext;
use crate::error::{NetError, Result};
use crate::guard;
use crate::protocol::encode_frame;
use crate::transport::{Network, Stream};

pub(crate) use writer::Outbound;

/// Outcome of one parse attempt on the carry-over buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parsed {
    /// `n` bytes form one message (or garbage the handler chose to skip).
    Consumed(usize),
    /// The buffer holds only part of a message.
    Incomplete,
    /// The buffer can never become a valid message; the session closes.
    Invalid,
}

/// Lifecycle events delivered to a [`SessionHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    Open,
    Close,
    HeartBeat,
}

/// Message parsing and event handling for sessions.
///
/// Both methods run on the session's I/O tasks and must not block.
pub trait SessionHandler: Send + Sync + 'static {
    /// Parse at most one message from the front of `data`.
    fn parse(&self, session: &Session, data: &[u8]) -> Parsed;

    fn on_event(&self, session: &Session, event: SessionEvent);
}

/// Hook the session's owner runs after the `Close` event.
pub(crate) type CloseHook = Box<dyn Fn(&Session) + Send + Sync>;

#[derive(Debug, Default, Clone, Copy)]
struct Addrs {
    local: Option<SocketAddr>,
    remote: Option<SocketAddr>,
    peer: Option<SocketAddr>,
}

struct Shared {
    id: u64,
    network: Network,
    /// Owned by a connector: sends are queued while reconnecting.
    outbound: bool,
    heartbeat: Option<Duration>,
    ctx: Arc<NetContext>,
    handler: Arc<dyn SessionHandler>,
    on_close: Option<CloseHook>,
    tx: mpsc::Sender<Outbound>,
    /// Parked here while no send loop runs.
    rx: Mutex<Option<mpsc::Receiver<Outbound>>>,
    /// `true` while closed. Starts closed.
    state: watch::Sender<bool>,
    /// No restart possible anymore.
    terminated: AtomicBool,
    /// Shutdown trigger of the current epoch.
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    addrs: Mutex<Addrs>,
    user_data: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
}

/// Handle to a session. Clones share the same connection.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    pub(crate) fn new(
        ctx: Arc<NetContext>,
        network: Network,
        handler: Arc<dyn SessionHandler>,
        heartbeat: Duration,
        outbound: bool,
        on_close: Option<CloseHook>,
    ) -> Self {
        let queue_len = match network {
            Network::Tcp => ctx.config().tcp_queue_len,
            Network::Udp => ctx.config().udp_queue_len,
        };
        let (tx, rx) = mpsc::channel(queue_len.max(1));
        let (state, _) = watch::channel(true);

        Self {
            shared: Arc::new(Shared {
                id: ctx.next_session_id(),
                network,
                outbound,
                heartbeat: (!heartbeat.is_zero()).then_some(heartbeat),
                ctx,
                handler,
                on_close,
                tx,
                rx: Mutex::new(Some(rx)),
                state,
                terminated: AtomicBool::new(false),
                shutdown: Mutex::new(None),
                addrs: Mutex::new(Addrs::default()),
                user_data: Mutex::new(None),
            }),
        }
    }

    /// Start (or restart) the session's loops on `stream`.
    ///
    /// Fails with [`NetError::SessionOpen`] if the session is still open and
    /// with [`NetError::SessionClosed`] once it was terminated.
    pub(crate) fn start(&self, stream: Stream) -> Result<()> {
        let shared = &self.shared;
        if shared.terminated.load(Ordering::Acquire) {
            return Err(NetError::SessionClosed);
        }
        let opened = shared.state.send_if_modified(|closed| {
            let was_closed = *closed;
            *closed = false;
            was_closed
        });
        if !opened {
            return Err(NetError::SessionOpen);
        }
        let Some(rx) = shared.rx.lock().take() else {
            shared.state.send_replace(true);
            return Err(NetError::SessionOpen);
        };

        let local = stream.local_addr().ok();
        let remote = stream.peer_addr();
        *shared.addrs.lock() = Addrs {
            local,
            remote,
            peer: remote,
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        *shared.shutdown.lock() = Some(stop_tx);

        tracing::info!(
            session_id = shared.id,
            network = %shared.network,
            local = ?local,
            remote = ?remote,
            "session start"
        );

        shared.ctx.runtime().spawn(self.clone().run(stream, rx, stop_rx));
        Ok(())
    }

    async fn run(
        self,
        stream: Stream,
        rx: mpsc::Receiver<Outbound>,
        stop: watch::Receiver<bool>,
    ) {
        let queue_len = match self.shared.network {
            Network::Tcp => self.shared.ctx.config().tcp_queue_len,
            Network::Udp => self.shared.ctx.config().udp_queue_len,
        };
        let (read_half, write_half) = stream.split();
        let (unit_tx, unit_rx) = mpsc::channel(queue_len.max(1));

        let sender = tokio::spawn(writer::send_loop(self.clone(), write_half, rx, stop.clone()));
        let framer = tokio::spawn(reader::frame_loop(self.clone(), unit_rx, stop.clone()));

        self.dispatch(SessionEvent::Open);
        reader::recv_loop(&self, read_half, unit_tx, stop).await;

        self.trigger_shutdown();
        match sender.await {
            Ok(rx) => *self.shared.rx.lock() = Some(rx),
            Err(e) => {
                tracing::error!(session_id = self.id(), error = %e, "send loop aborted");
                self.shared.terminated.store(true, Ordering::Release);
            }
        }
        if let Err(e) = framer.await {
            tracing::error!(session_id = self.id(), error = %e, "framing loop aborted");
        }

        self.shared.state.send_replace(true);
        tracing::info!(
            session_id = self.id(),
            network = %self.shared.network,
            remote = ?self.remote_addr(),
            "session close"
        );
        self.dispatch(SessionEvent::Close);
        if let Some(hook) = &self.shared.on_close {
            guard::catch("session close hook", || hook(&self));
        }
    }

    /// Queue `data` for sending. Never blocks.
    ///
    /// `peer` picks the destination of datagrams on listening UDP sessions;
    /// it is ignored otherwise.
    pub fn send(&self, data: &[u8], peer: Option<SocketAddr>) -> Result<()> {
        let shared = &self.shared;
        if shared.terminated.load(Ordering::Acquire) {
            return Err(NetError::SessionClosed);
        }
        if !shared.outbound && (self.is_closed() || self.shutdown_requested()) {
            return Err(NetError::SessionClosed);
        }

        let pool = shared.ctx.pool();
        let item = Outbound {
            buf: pool.copy_from(data),
            peer,
        };
        match shared.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(item)) => {
                pool.release(item.buf);
                tracing::error!(
                    session_id = shared.id,
                    len = data.len(),
                    "send queue is full, message dropped"
                );
                Err(NetError::SendQueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(item)) => {
                pool.release(item.buf);
                Err(NetError::SessionClosed)
            }
        }
    }

    /// Wrap `payload` in a length header and queue it.
    pub fn send_frame(&self, payload: &[u8], peer: Option<SocketAddr>) -> Result<()> {
        let frame = encode_frame(payload, self.shared.ctx.config().max_msg_size)?;
        self.send(&frame, peer)
    }

    /// Close the connection. Idempotent; returns before the loops finish.
    pub fn close(&self) {
        self.trigger_shutdown();
    }

    /// Close for good: a connector will not restart it.
    pub(crate) fn terminate(&self) {
        self.shared.terminated.store(true, Ordering::Release);
        self.close();
    }

    /// Wait until the session is closed and its `Close` event was delivered.
    pub async fn closed(&self) {
        let mut state = self.shared.state.subscribe();
        let _ = state.wait_for(|closed| *closed).await;
    }

    fn trigger_shutdown(&self) {
        if let Some(stop) = self.shared.shutdown.lock().as_ref() {
            stop.send_replace(true);
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shared
            .shutdown
            .lock()
            .as_ref()
            .map_or(false, |stop| *stop.borrow())
    }

    pub(crate) fn dispatch(&self, event: SessionEvent) {
        guard::catch("session event", || self.shared.handler.on_event(self, event));
    }

    #[inline]
    pub(crate) fn handler(&self) -> &dyn SessionHandler {
        self.shared.handler.as_ref()
    }

    #[inline]
    pub(crate) fn heartbeat(&self) -> Option<Duration> {
        self.shared.heartbeat
    }

    pub(crate) fn set_peer(&self, peer: Option<SocketAddr>) {
        if peer.is_some() {
            self.shared.addrs.lock().peer = peer;
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    #[inline]
    pub fn network(&self) -> Network {
        self.shared.network
    }

    #[inline]
    pub fn is_udp(&self) -> bool {
        self.shared.network.is_udp()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        *self.shared.state.borrow()
    }

    /// Whether a connector owns this session.
    #[inline]
    pub fn is_outbound(&self) -> bool {
        self.shared.outbound
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.addrs.lock().local
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.shared.addrs.lock().remote
    }

    /// Source of the most recent unit. For TCP this is the remote address.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.shared.addrs.lock().peer
    }

    pub fn user_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.shared.user_data.lock().clone()
    }

    pub fn set_user_data(&self, data: Option<Arc<dyn Any + Send + Sync>>) {
        *self.shared.user_data.lock() = data;
    }

    #[inline]
    pub fn context(&self) -> &Arc<NetContext> {
        &self.shared.ctx
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("network", &self.shared.network)
            .field("closed", &self.is_closed())
            .field("remote", &self.remote_addr())
            .finish()
    }
}

/// Resolves once the epoch's shutdown was triggered or its trigger dropped.
pub(crate) async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}
