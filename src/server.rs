//! Server: processor threads and the services they drive.
//!
//! The [`Server`] owns a tokio runtime for socket I/O and a fixed pool of
//! processor threads. Every service has a home thread, which runs its
//! `tick`; any thread may run its message handlers, depending on routing.
//! Each processor thread loops:
//!
//! 1. tick the services homed to it once per loop interval,
//! 2. drain up to `drain_batch` items from every service's slot for its index,
//! 3. when nothing was drained, park until woken or the next tick is due.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use stnet::rpc::{RpcHandler, RpcService};
//! use stnet::ServerBuilder;
//!
//! struct Hooks;
//! impl RpcHandler for Hooks {}
//!
//! let server = ServerBuilder::new().processor_threads(2).build()?;
//! let rpc = RpcService::builder(Hooks)
//!     .function("Echo", |_ctx, (s,): (String,)| (s,))
//!     .build();
//! let service = server.add_service("echo", "127.0.0.1:0", Duration::ZERO, rpc, 0)?;
//! server.start()?;
//! // ...
//! server.stop();
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::runtime::{Handle, Runtime};

use crate::config::{NetConfig, ServerConfig};
use crate::context::NetContext;
use crate::error::{NetError, Result};
use crate::service::{LoopHandler, LoopService, Service, ServiceDriver, ServiceHandler};
use crate::session::Session;
use crate::signal::WakeSignal;

/// Builder for [`Server`].
#[derive(Debug, Clone, Default)]
pub struct ServerBuilder {
    config: ServerConfig,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a complete configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Number of processor threads.
    ///
    /// Default: 1
    pub fn processor_threads(mut self, threads: usize) -> Self {
        self.config.processor_threads = threads;
        self
    }

    /// Minimum period between two ticks of a service.
    ///
    /// Default: 10 ms
    pub fn loop_interval(mut self, interval: Duration) -> Self {
        self.config.loop_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Tokio worker threads for socket I/O.
    ///
    /// Default: 2
    pub fn io_threads(mut self, threads: usize) -> Self {
        self.config.io_threads = threads;
        self
    }

    pub fn net(mut self, net: NetConfig) -> Self {
        self.config.net = net;
        self
    }

    pub fn build(self) -> Result<Server> {
        Server::new(self.config)
    }
}

enum State {
    Idle,
    Running(Vec<JoinHandle<()>>),
    Stopped,
}

/// A pool of processor threads driving a set of services.
pub struct Server {
    config: ServerConfig,
    runtime: Option<Runtime>,
    ctx: Arc<NetContext>,
    wakers: Arc<[WakeSignal]>,
    services: RwLock<Vec<Arc<dyn ServiceDriver>>>,
    by_name: RwLock<HashMap<String, Arc<dyn ServiceDriver>>>,
    closing: Arc<AtomicBool>,
    state: Mutex<State>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let config = config.normalized();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.io_threads)
            .thread_name("stnet-io")
            .enable_all()
            .build()?;

        let ctx = NetContext::new(config.net.clone(), runtime.handle().clone());
        let wakers: Arc<[WakeSignal]> = (0..config.processor_threads)
            .map(|_| WakeSignal::new())
            .collect();

        Ok(Self {
            config,
            runtime: Some(runtime),
            ctx,
            wakers,
            services: RwLock::new(Vec::new()),
            by_name: RwLock::new(HashMap::new()),
            closing: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(State::Idle),
        })
    }

    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Register a service homed to thread `thread`.
    ///
    /// A non-empty `address` (`host:port`, optionally `udp:`-prefixed) binds
    /// a listener right away; an empty one makes a socket-less service. A
    /// non-zero `heartbeat` is the idle interval after which the service's
    /// `heartbeat_timeout` hook runs for a session. `thread` may equal the
    /// thread count, which wraps to 0.
    pub fn add_service<H: ServiceHandler>(
        &self,
        name: &str,
        address: &str,
        heartbeat: Duration,
        handler: H,
        thread: usize,
    ) -> Result<Arc<Service<H>>> {
        let threads = self.wakers.len();
        if thread > threads {
            return Err(NetError::InvalidThread {
                index: thread,
                max: threads,
            });
        }
        if !matches!(*self.state.lock(), State::Idle) {
            return Err(NetError::AlreadyStarted);
        }

        let _enter = self.handle().enter();
        let service = Arc::new(Service::new(
            name,
            address,
            heartbeat,
            Arc::new(handler),
            thread % threads,
            self.wakers.clone(),
            self.ctx.clone(),
        )?);

        let driver: Arc<dyn ServiceDriver> = service.clone();
        self.services.write().push(driver.clone());
        if self.by_name.write().insert(name.to_string(), driver).is_some() {
            tracing::warn!(service = name, "service name registered twice, lookups see the newest");
        }
        tracing::info!(
            service = name,
            address,
            thread = thread % threads,
            "service added"
        );
        Ok(service)
    }

    /// Register a socket-less service that only ticks on its home thread.
    pub fn add_loop_service<L: LoopHandler>(
        &self,
        name: &str,
        handler: L,
        thread: usize,
    ) -> Result<Arc<Service<LoopService<L>>>> {
        self.add_service(name, "", Duration::ZERO, LoopService::new(handler), thread)
    }

    /// The service registered as `name`, if it has handler type `H`.
    pub fn service<H: ServiceHandler>(&self, name: &str) -> Option<Arc<Service<H>>> {
        let driver = self.by_name.read().get(name).cloned()?;
        driver.as_any().downcast::<Service<H>>().ok()
    }

    /// Queue a message on the service registered as `name`.
    pub fn push_request<H: ServiceHandler>(
        &self,
        name: &str,
        session: Option<&Session>,
        id: u64,
        msg: H::Message,
    ) -> Result<()> {
        self.service::<H>(name)
            .ok_or_else(|| NetError::ServiceNotFound(name.to_string()))?
            .push_request(session, id, msg)
    }

    /// Run every service's `init`, then start the processor threads.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !matches!(*state, State::Idle) {
            return Err(NetError::AlreadyStarted);
        }

        let services: Vec<Arc<dyn ServiceDriver>> = self.services.read().clone();
        for service in &services {
            if !service.init() {
                tracing::error!(service = service.name(), "service init failed");
                return Err(NetError::InitFailed(service.name().to_string()));
            }
        }

        let all: Arc<[Arc<dyn ServiceDriver>]> = services.iter().cloned().collect();
        let mut handles = Vec::with_capacity(self.wakers.len());
        for index in 0..self.wakers.len() {
            let worker = Worker {
                index,
                homed: services
                    .iter()
                    .filter(|s| s.home_thread() == index)
                    .cloned()
                    .collect(),
                all: all.clone(),
                wakers: self.wakers.clone(),
                closing: self.closing.clone(),
                interval: self.config.loop_interval(),
                batch: self.config.net.drain_batch,
            };
            let spawned = thread::Builder::new()
                .name(format!("stnet-worker-{}", index))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    self.closing.store(true, Ordering::Release);
                    self.wake_all();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(e.into());
                }
            }
        }

        tracing::info!(
            threads = self.wakers.len(),
            services = services.len(),
            "server started"
        );
        *state = State::Running(handles);
        Ok(())
    }

    /// Close the network layer, join the processor threads, then run every
    /// service's `destroy`.
    ///
    /// Safe to call from async code on another runtime. Must not be called
    /// from a processor thread or from a task on the server's own runtime.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), State::Stopped);
        let handles = match previous {
            State::Stopped => return,
            State::Idle => None,
            State::Running(handles) => Some(handles),
        };

        let services: Vec<Arc<dyn ServiceDriver>> = self.services.read().clone();
        if let Some(runtime) = &self.runtime {
            shutdown_network(runtime, &services);
        }

        let Some(handles) = handles else {
            tracing::info!("server stopped before start");
            return;
        };

        self.closing.store(true, Ordering::Release);
        self.wake_all();
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("processor thread panicked");
            }
        }

        for service in &services {
            service.destroy();
        }
        tracing::info!("server stopped");
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), State::Running(_))
    }

    #[inline]
    pub fn thread_count(&self) -> usize {
        self.wakers.len()
    }

    #[inline]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[inline]
    pub fn context(&self) -> &Arc<NetContext> {
        &self.ctx
    }

    /// Handle of the I/O runtime.
    #[inline]
    pub fn handle(&self) -> &Handle {
        self.ctx.runtime()
    }

    fn wake_all(&self) {
        for waker in self.wakers.iter() {
            waker.notify();
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("threads", &self.wakers.len())
            .field("services", &self.services.read().len())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Close every service's listener and connectors on `runtime`.
///
/// `block_on` panics on a thread already driving a runtime, so from there
/// the shutdown runs on a short-lived helper thread.
fn shutdown_network(runtime: &Runtime, services: &[Arc<dyn ServiceDriver>]) {
    let run = || {
        runtime.block_on(async {
            for service in services {
                service.shutdown_network().await;
            }
        })
    };

    if Handle::try_current().is_err() {
        run();
        return;
    }
    thread::scope(|scope| {
        let spawned = thread::Builder::new()
            .name("stnet-shutdown".into())
            .spawn_scoped(scope, run);
        match spawned {
            Ok(handle) => {
                if handle.join().is_err() {
                    tracing::error!("network shutdown panicked");
                }
            }
            Err(e) => tracing::error!(error = %e, "cannot spawn shutdown thread, skipping network shutdown"),
        }
    });
}

/// One processor thread.
struct Worker {
    index: usize,
    homed: Vec<Arc<dyn ServiceDriver>>,
    all: Arc<[Arc<dyn ServiceDriver>]>,
    wakers: Arc<[WakeSignal]>,
    closing: Arc<AtomicBool>,
    interval: Duration,
    batch: usize,
}

impl Worker {
    fn run(self) {
        tracing::debug!(thread = self.index, homed = self.homed.len(), "processor thread started");
        let waker = &self.wakers[self.index];
        let mut next_tick = Instant::now();

        while !self.closing.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= next_tick {
                for service in &self.homed {
                    service.tick();
                }
                next_tick = now + self.interval;
            }

            let drained: usize = self
                .all
                .iter()
                .map(|service| service.drain(self.index, self.batch))
                .sum();
            if drained > 0 {
                continue;
            }

            if self.homed.is_empty() {
                waker.wait();
            } else {
                waker.wait_timeout(next_tick.saturating_duration_since(Instant::now()));
            }
        }
        tracing::debug!(thread = self.index, "processor thread exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::CurrentContext;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Ticks {
        ticks: AtomicUsize,
        inits: AtomicUsize,
        destroyed: AtomicBool,
    }

    impl LoopHandler for Arc<Ticks> {
        fn init(&self) -> bool {
            self.inits.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn tick(&self) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }

        fn destroy(&self) {
            self.destroyed.store(true, Ordering::SeqCst);
        }
    }

    struct Refuse;
    impl LoopHandler for Refuse {
        fn init(&self) -> bool {
            false
        }
        fn tick(&self) {}
    }

    #[derive(Default)]
    struct Threads {
        seen: parking_lot::Mutex<Vec<(u64, usize)>>,
    }

    impl ServiceHandler for Threads {
        type Message = u64;

        fn route(&self, _session: Option<&Session>, id: u64, _msg: Option<&u64>) -> i64 {
            id as i64
        }

        fn handle_message(&self, ctx: &CurrentContext, id: u64, _msg: u64) {
            self.seen.lock().push((id, ctx.thread_id()));
        }
    }

    fn wait_until(mut f: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_loop_service_lifecycle() {
        let server = ServerBuilder::new()
            .processor_threads(2)
            .loop_interval(Duration::from_millis(5))
            .build()
            .unwrap();
        let ticks = Arc::new(Ticks::default());
        server.add_loop_service("ticker", ticks.clone(), 1).unwrap();

        server.start().unwrap();
        assert!(server.is_running());
        assert!(wait_until(|| ticks.ticks.load(Ordering::SeqCst) >= 3));

        server.stop();
        assert!(!server.is_running());
        assert_eq!(ticks.inits.load(Ordering::SeqCst), 1);
        assert!(ticks.destroyed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_thread_index_validation() {
        let server = ServerBuilder::new().processor_threads(2).build().unwrap();
        let ticks = Arc::new(Ticks::default());

        let err = server.add_loop_service("far", ticks.clone(), 3).unwrap_err();
        assert!(matches!(err, NetError::InvalidThread { index: 3, max: 2 }));

        // an index equal to the thread count wraps
        let service = server.add_loop_service("wrap", ticks, 2).unwrap();
        assert_eq!(service.home_thread(), 0);
    }

    #[test]
    fn test_init_failure_aborts_start() {
        let server = Server::new(ServerConfig::default()).unwrap();
        server.add_loop_service("refuse", Refuse, 0).unwrap();
        assert!(matches!(server.start(), Err(NetError::InitFailed(name)) if name == "refuse"));
        assert!(!server.is_running());
    }

    #[test]
    fn test_double_start() {
        let server = Server::new(ServerConfig::default()).unwrap();
        server.start().unwrap();
        assert!(matches!(server.start(), Err(NetError::AlreadyStarted)));
        server.stop();
        assert!(matches!(server.start(), Err(NetError::AlreadyStarted)));
    }

    #[test]
    fn test_lookup_and_push_by_name() {
        let server = ServerBuilder::new().processor_threads(3).build().unwrap();
        server.add_service("threads", "", Duration::ZERO, Threads::default(), 0).unwrap();

        assert!(server.service::<Threads>("threads").is_some());
        assert!(server.service::<LoopService<Refuse>>("threads").is_none());
        assert!(matches!(
            server.push_request::<Threads>("missing", None, 1, 1),
            Err(NetError::ServiceNotFound(_))
        ));

        server.start().unwrap();
        for id in 1..=3 {
            server.push_request::<Threads>("threads", None, id, id).unwrap();
        }

        let service = server.service::<Threads>("threads").unwrap();
        assert!(wait_until(|| service.handler().seen.lock().len() == 3));
        server.stop();

        let mut seen = service.handler().seen.lock().clone();
        seen.sort();
        assert_eq!(seen, vec![(1, 1), (2, 2), (3, 0)]);
    }

    #[test]
    fn test_stop_without_start_closes_listener() {
        let server = Server::new(ServerConfig::default()).unwrap();
        let service = server
            .add_service("tcp", "127.0.0.1:0", Duration::ZERO, Threads::default(), 0)
            .unwrap();
        let listener = service.listener().unwrap().clone();
        assert!(!listener.is_closed());

        server.stop();
        assert!(listener.is_closed());
    }

    #[tokio::test]
    async fn test_drop_inside_async_code() {
        let server = ServerBuilder::new().processor_threads(1).build().unwrap();
        drop(server);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_inside_async_code_closes_listener() {
        let server = ServerBuilder::new().processor_threads(1).build().unwrap();
        let service = server
            .add_service("tcp", "127.0.0.1:0", Duration::ZERO, Threads::default(), 0)
            .unwrap();
        let listener = service.listener().unwrap().clone();
        server.start().unwrap();

        server.stop();
        assert!(listener.is_closed());
        assert!(!server.is_running());
    }
}
