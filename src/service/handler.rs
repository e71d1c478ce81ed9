//! Service logic traits.

use crate::error::NetError;
use crate::session::Session;

use super::CurrentContext;

/// Result of decoding the front of a session's carry-over buffer.
#[derive(Debug)]
pub enum Decoded<M> {
    /// Not enough bytes for one message yet.
    Incomplete,
    /// `n` bytes were consumed without producing a message to dispatch.
    Handled(usize),
    /// One message, dispatched to the thread picked by [`ServiceHandler::route`].
    Message { consumed: usize, id: u64, msg: M },
    /// `consumed` bytes were malformed; `error` goes to
    /// [`ServiceHandler::handle_error`] on the routed thread.
    Error {
        consumed: usize,
        id: u64,
        error: NetError,
    },
    /// The stream can never be decoded; the session closes.
    Reject,
}

/// Message handling logic of a service.
///
/// `decode` and `session_open` run on the session's I/O task. Everything
/// else runs on a processor thread: `tick` on the service's home thread,
/// `session_close` and `heartbeat_timeout` on the home thread too, and
/// `handle_message` / `handle_error` on the thread [`route`](Self::route)
/// picked.
pub trait ServiceHandler: Send + Sync + 'static {
    /// Decoded message type.
    type Message: Send + 'static;

    /// Called once by `Server::start`. Returning `false` aborts the start.
    fn init(&self) -> bool {
        true
    }

    /// Periodic work, every loop interval.
    fn tick(&self) {}

    /// Called once by `Server::stop` after all threads have exited.
    fn destroy(&self) {}

    /// Decode at most one message. The default discards all input.
    fn decode(&self, _session: &Session, data: &[u8]) -> Decoded<Self::Message> {
        Decoded::Handled(data.len())
    }

    /// Pick the processor thread for a message.
    ///
    /// Positive values select `value % threads`, zero the home thread, and
    /// negative values `session_id % threads` (the home thread when there is
    /// no session). The default keeps each session on one thread.
    fn route(&self, _session: Option<&Session>, _id: u64, _msg: Option<&Self::Message>) -> i64 {
        -1
    }

    fn handle_message(&self, _ctx: &CurrentContext, _id: u64, _msg: Self::Message) {}

    /// Decode errors. The default logs and closes the session.
    fn handle_error(&self, ctx: &CurrentContext, error: NetError) {
        tracing::error!(
            session_id = ctx.session().map(Session::id),
            error = %error,
            "message error"
        );
        if let Some(session) = ctx.session() {
            session.close();
        }
    }

    fn session_open(&self, _session: &Session) {}

    fn session_close(&self, _session: &Session) {}

    /// The session was idle for its heartbeat interval. The default closes it.
    fn heartbeat_timeout(&self, session: &Session) {
        session.close();
    }
}

/// A service without sockets: periodic work on its home thread.
pub trait LoopHandler: Send + Sync + 'static {
    fn init(&self) -> bool {
        true
    }

    fn tick(&self);

    fn destroy(&self) {}
}

/// Adapter running a [`LoopHandler`] as a service.
pub struct LoopService<L> {
    inner: L,
}

impl<L: LoopHandler> LoopService<L> {
    pub fn new(inner: L) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }
}

impl<L: LoopHandler> ServiceHandler for LoopService<L> {
    type Message = ();

    fn init(&self) -> bool {
        self.inner.init()
    }

    fn tick(&self) {
        self.inner.tick()
    }

    fn destroy(&self) {
        self.inner.destroy()
    }
}
