//! Services - named units of message handling.
//!
//! A [`Service`] couples a [`ServiceHandler`] with its sockets (an optional
//! listener and any number of outbound connectors) and with one bounded
//! queue per processor thread. Sessions decode on their I/O tasks; decoded
//! messages are routed to a thread, queued on that thread's slot and the
//! thread is woken. Full slots drop the message.
//!
//! ```text
//!  session I/O ─► decode ─► route ─► queue[t] ─► wake[t] ─► thread t ─► handle_message
//! ```

mod command;
mod context;
mod handler;

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::connector::Connector;
use crate::context::NetContext;
use crate::error::{NetError, Result};
use crate::guard;
use crate::listener::Listener;
use crate::queue::BoundedQueue;
use crate::session::{Parsed, Session, SessionEvent, SessionHandler};
use crate::signal::WakeSignal;

pub use command::{
    send_command, send_json_command, send_spb_command, Command, CommandHandler, CommandService,
};
pub use context::CurrentContext;
pub use handler::{Decoded, LoopHandler, LoopService, ServiceHandler};

/// Boxed future for object-safe async hooks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Pick the processor thread for a routing value.
pub(crate) fn resolve_thread(route: i64, home: usize, session_id: Option<u64>, threads: usize) -> usize {
    let threads = threads.max(1) as u64;
    if route > 0 {
        (route as u64 % threads) as usize
    } else if route == 0 {
        home
    } else if let Some(id) = session_id {
        (id % threads) as usize
    } else {
        home
    }
}

/// Work item on a service queue.
pub(crate) enum Envelope<M> {
    Message {
        session: Option<Session>,
        peer: Option<SocketAddr>,
        id: u64,
        msg: M,
    },
    Error {
        session: Option<Session>,
        peer: Option<SocketAddr>,
        error: NetError,
    },
    Close(Session),
    HeartBeat(Session),
}

/// Routing core shared by the service and its sessions.
pub(crate) struct ServiceCore<H: ServiceHandler> {
    name: String,
    handler: Arc<H>,
    queues: Arc<[BoundedQueue<Envelope<H::Message>>]>,
    wakers: Arc<[WakeSignal]>,
    home: usize,
    ctx: Arc<NetContext>,
}

impl<H: ServiceHandler> ServiceCore<H> {
    fn threads(&self) -> usize {
        self.queues.len()
    }

    fn route(&self, session: Option<&Session>, id: u64, msg: Option<&H::Message>) -> usize {
        let route = self.handler.route(session, id, msg);
        resolve_thread(route, self.home, session.map(Session::id), self.threads())
    }

    fn push(
        &self,
        thread: usize,
        envelope: Envelope<H::Message>,
    ) -> std::result::Result<(), Envelope<H::Message>> {
        self.queues[thread].try_push(envelope)?;
        self.wakers[thread].notify();
        Ok(())
    }

    /// Queue a session event on the home thread, waiting briefly if full.
    fn push_event(&self, envelope: Envelope<H::Message>) {
        let home = self.home;
        let Err(envelope) = self.push(home, envelope) else {
            return;
        };

        let queues = self.queues.clone();
        let wakers = self.wakers.clone();
        let name = self.name.clone();
        let timeout = self.ctx.config().event_push_timeout();
        self.ctx.runtime().spawn(async move {
            match queues[home].push_timeout(envelope, timeout).await {
                Ok(()) => wakers[home].notify(),
                Err(_) => tracing::error!(service = %name, "service queue is full, session event dropped"),
            }
        });
    }

    fn dispatch(&self, thread: usize, envelope: Envelope<H::Message>) {
        match envelope {
            Envelope::Message {
                session,
                peer,
                id,
                msg,
            } => {
                let ctx = CurrentContext::new(thread, session, peer);
                self.handler.handle_message(&ctx, id, msg);
            }
            Envelope::Error {
                session,
                peer,
                error,
            } => {
                let ctx = CurrentContext::new(thread, session, peer);
                self.handler.handle_error(&ctx, error);
            }
            Envelope::Close(session) => self.handler.session_close(&session),
            Envelope::HeartBeat(session) => self.handler.heartbeat_timeout(&session),
        }
    }
}

impl<H: ServiceHandler> SessionHandler for ServiceCore<H> {
    fn parse(&self, session: &Session, data: &[u8]) -> Parsed {
        let (consumed, envelope, id) = match self.handler.decode(session, data) {
            Decoded::Incomplete => return Parsed::Incomplete,
            Decoded::Reject => return Parsed::Invalid,
            Decoded::Handled(n) => return Parsed::Consumed(n),
            Decoded::Message { consumed: 0, .. } | Decoded::Error { consumed: 0, .. } => {
                return Parsed::Incomplete
            }
            Decoded::Message { consumed, id, msg } => {
                let thread = self.route(Some(session), id, Some(&msg));
                let envelope = Envelope::Message {
                    session: Some(session.clone()),
                    peer: session.peer(),
                    id,
                    msg,
                };
                (consumed, (thread, envelope), id)
            }
            Decoded::Error {
                consumed,
                id,
                error,
            } => {
                let thread = self.route(Some(session), id, None);
                let envelope = Envelope::Error {
                    session: Some(session.clone()),
                    peer: session.peer(),
                    error,
                };
                (consumed, (thread, envelope), id)
            }
        };

        let (thread, envelope) = envelope;
        if self.push(thread, envelope).is_err() {
            tracing::error!(
                service = %self.name,
                session_id = session.id(),
                msg_id = id,
                thread,
                "service queue is full, message dropped"
            );
        }
        Parsed::Consumed(consumed)
    }

    fn on_event(&self, session: &Session, event: SessionEvent) {
        match event {
            SessionEvent::Open => self.handler.session_open(session),
            SessionEvent::Close => self.push_event(Envelope::Close(session.clone())),
            SessionEvent::HeartBeat => self.push_event(Envelope::HeartBeat(session.clone())),
        }
    }
}

/// Object-safe view of a service used by the server's threads.
pub(crate) trait ServiceDriver: Send + Sync {
    fn name(&self) -> &str;

    fn home_thread(&self) -> usize;

    fn init(&self) -> bool;

    fn tick(&self);

    /// Handle up to `max` queued items of `thread`'s slot.
    fn drain(&self, thread: usize, max: usize) -> usize;

    /// Close the listener and every connector.
    fn shutdown_network(&self) -> BoxFuture<'_, ()>;

    fn destroy(&self);

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A service: handler, sockets and per-thread queues.
pub struct Service<H: ServiceHandler> {
    core: Arc<ServiceCore<H>>,
    listener: Option<Listener>,
    connects: RwLock<HashMap<u64, Connector>>,
}

impl<H: ServiceHandler> Service<H> {
    pub(crate) fn new(
        name: &str,
        address: &str,
        heartbeat: Duration,
        handler: Arc<H>,
        home: usize,
        wakers: Arc<[WakeSignal]>,
        ctx: Arc<NetContext>,
    ) -> Result<Self> {
        let queue_len = ctx.config().service_queue_len;
        let queues: Arc<[BoundedQueue<Envelope<H::Message>>]> =
            (0..wakers.len()).map(|_| BoundedQueue::new(queue_len)).collect();

        let core = Arc::new(ServiceCore {
            name: name.to_string(),
            handler,
            queues,
            wakers,
            home,
            ctx: ctx.clone(),
        });

        let listener = if address.trim().is_empty() {
            None
        } else {
            Some(Listener::bind(ctx, address, core.clone(), heartbeat)?)
        };

        Ok(Self {
            core,
            listener,
            connects: RwLock::new(HashMap::new()),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.core.name
    }

    #[inline]
    pub fn handler(&self) -> &Arc<H> {
        &self.core.handler
    }

    #[inline]
    pub fn home_thread(&self) -> usize {
        self.core.home
    }

    #[inline]
    pub fn listener(&self) -> Option<&Listener> {
        self.listener.as_ref()
    }

    #[inline]
    pub fn context(&self) -> &Arc<NetContext> {
        &self.core.ctx
    }

    /// Queue a message as if a session had decoded it.
    ///
    /// Returns [`NetError::QueueFull`] when the routed slot is full.
    pub fn push_request(&self, session: Option<&Session>, id: u64, msg: H::Message) -> Result<()> {
        let core = &self.core;
        let thread = core.route(session, id, Some(&msg));
        let envelope = Envelope::Message {
            session: session.cloned(),
            peer: session.and_then(Session::peer),
            id,
            msg,
        };
        core.push(thread, envelope).map_err(|_| {
            tracing::error!(service = %core.name, msg_id = id, thread, "service queue is full, message dropped");
            NetError::QueueFull {
                service: core.name.clone(),
                msg_id: id,
            }
        })
    }

    /// Open a supervised outbound connection handled by this service.
    pub fn new_connect(
        &self,
        address: &str,
        user_data: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Result<Connector> {
        let ctx = &self.core.ctx;
        let connector = Connector::new(
            ctx.clone(),
            address,
            self.core.clone(),
            ctx.config().reconnect_interval(),
        )?;
        connector.session().set_user_data(user_data);
        self.connects.write().insert(connector.id(), connector.clone());
        Ok(connector)
    }

    pub fn get_connect(&self, id: u64) -> Option<Connector> {
        self.connects.read().get(&id).cloned()
    }

    /// Visit connectors until `f` returns `false`.
    pub fn iterate_connects(&self, mut f: impl FnMut(&Connector) -> bool) {
        let connects: Vec<Connector> = self.connects.read().values().cloned().collect();
        for connector in &connects {
            if !f(connector) {
                break;
            }
        }
    }

    /// Forget a connector and close it in the background.
    pub fn close_connect(&self, id: u64) -> bool {
        let Some(connector) = self.connects.write().remove(&id) else {
            return false;
        };
        self.core.ctx.runtime().spawn(async move {
            connector.close().await;
        });
        true
    }

    pub fn connect_count(&self) -> usize {
        self.connects.read().len()
    }

    /// Items waiting on `thread`'s slot.
    pub fn queue_len(&self, thread: usize) -> usize {
        self.core.queues.get(thread).map_or(0, BoundedQueue::len)
    }
}

impl<H: ServiceHandler> ServiceDriver for Service<H> {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn home_thread(&self) -> usize {
        self.core.home
    }

    fn init(&self) -> bool {
        guard::catch("service init", || self.core.handler.init()).unwrap_or(false)
    }

    fn tick(&self) {
        guard::catch("service tick", || self.core.handler.tick());
    }

    fn drain(&self, thread: usize, max: usize) -> usize {
        let core = &self.core;
        let Some(queue) = core.queues.get(thread) else {
            return 0;
        };
        queue.drain(max, |envelope| {
            guard::catch("service handler", || core.dispatch(thread, envelope));
        })
    }

    fn shutdown_network(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(listener) = &self.listener {
                listener.close().await;
            }
            let connects: Vec<Connector> = self.connects.write().drain().map(|(_, c)| c).collect();
            for connector in connects {
                connector.close().await;
            }
        })
    }

    fn destroy(&self) {
        guard::catch("service destroy", || self.core.handler.destroy());
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<H: ServiceHandler> std::fmt::Debug for Service<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.core.name)
            .field("home", &self.core.home)
            .field("listener", &self.listener)
            .field("connects", &self.connect_count())
            .finish()
    }
}
