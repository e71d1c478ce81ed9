//! Shared network context.
//!
//! Sessions, listeners, connectors and services all take an `Arc<NetContext>`.
//! It owns the session id counter, the configuration, the outbound buffer
//! pool and the tokio runtime handle the I/O tasks are spawned on. Two
//! contexts never share ids or buffers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::config::NetConfig;
use crate::error::{NetError, Result};
use crate::protocol::BufferPool;

pub struct NetContext {
    config: NetConfig,
    session_ids: AtomicU64,
    pool: BufferPool,
    runtime: Handle,
}

impl NetContext {
    /// Create a context spawning I/O tasks on `runtime`.
    pub fn new(config: NetConfig, runtime: Handle) -> Arc<Self> {
        let pool = BufferPool::new(config.buffer_pool_size);
        Arc::new(Self {
            config,
            session_ids: AtomicU64::new(0),
            pool,
            runtime,
        })
    }

    /// Create a context bound to the runtime the caller is running on.
    pub fn current(config: NetConfig) -> Result<Arc<Self>> {
        let runtime = Handle::try_current()
            .map_err(|e| NetError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        Ok(Self::new(config, runtime))
    }

    /// Next session id. Ids start at 1 and are never reused.
    pub(crate) fn next_session_id(&self) -> u64 {
        self.session_ids.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    #[inline]
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    #[inline]
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }
}

impl std::fmt::Debug for NetContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetContext")
            .field("config", &self.config)
            .field("session_ids", &self.session_ids.load(Ordering::Relaxed))
            .finish()
    }
}
