//! Runtime configuration.
//!
//! Every knob has a default, so `ServerConfig::default()` is a working setup.
//! Both structs deserialize from JSON with missing fields falling back to the
//! defaults:
//!
//! ```
//! use stnet::ServerConfig;
//!
//! let config = ServerConfig::from_json(r#"{ "processor_threads": 4, "net": { "rpc_timeout_ms": 250 } }"#).unwrap();
//! assert_eq!(config.processor_threads, 4);
//! assert_eq!(config.net.rpc_timeout_ms, 250);
//! assert_eq!(config.net.max_msg_size, stnet::config::DEFAULT_MAX_MSG_SIZE);
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

/// Initial receive buffer size for TCP sessions.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 1024;

/// The adaptive receive buffer never shrinks below this.
pub const DEFAULT_MIN_RECV_BUFFER_SIZE: usize = 64;

/// Receive buffer for UDP sessions (one datagram per read).
pub const DEFAULT_UDP_RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Largest frame (header included) a session will buffer.
pub const DEFAULT_MAX_MSG_SIZE: usize = 2 * 1024 * 1024;

/// Outbound queue length for TCP sessions.
pub const DEFAULT_TCP_QUEUE_LEN: usize = 256;

/// Outbound queue length for UDP sessions.
pub const DEFAULT_UDP_QUEUE_LEN: usize = 10240;

/// Capacity of each per-thread service queue slot.
pub const DEFAULT_SERVICE_QUEUE_LEN: usize = 10240;

/// Messages drained from one slot per scheduling pass.
pub const DEFAULT_DRAIN_BATCH: usize = 1024;

/// Connector base reconnect interval.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 100;

/// RPC call timeout.
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 5000;

/// How long a close/heartbeat event may wait for queue space.
pub const DEFAULT_EVENT_PUSH_TIMEOUT_MS: u64 = 100;

/// Delay before a UDP listener rebinds after its socket failed.
pub const DEFAULT_UDP_REBIND_DELAY_MS: u64 = 3000;

/// Outbound buffers kept in the shared pool.
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 1024;

/// Processor thread period.
pub const DEFAULT_LOOP_INTERVAL_MS: u64 = 10;

/// Tokio worker threads for socket I/O.
pub const DEFAULT_IO_THREADS: usize = 2;

/// Network layer settings shared by sessions, listeners, connectors,
/// services and the RPC engine through [`NetContext`](crate::NetContext).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub recv_buffer_size: usize,
    pub min_recv_buffer_size: usize,
    pub udp_recv_buffer_size: usize,
    pub max_msg_size: usize,
    pub tcp_queue_len: usize,
    pub udp_queue_len: usize,
    pub service_queue_len: usize,
    pub drain_batch: usize,
    pub reconnect_interval_ms: u64,
    pub rpc_timeout_ms: u64,
    pub event_push_timeout_ms: u64,
    pub udp_rebind_delay_ms: u64,
    pub buffer_pool_size: usize,
}

impl NetConfig {
    /// Connector base reconnect interval. Zero disables reconnecting.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Default deadline for RPC calls.
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn event_push_timeout(&self) -> Duration {
        Duration::from_millis(self.event_push_timeout_ms)
    }

    pub fn udp_rebind_delay(&self) -> Duration {
        Duration::from_millis(self.udp_rebind_delay_ms)
    }
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            min_recv_buffer_size: DEFAULT_MIN_RECV_BUFFER_SIZE,
            udp_recv_buffer_size: DEFAULT_UDP_RECV_BUFFER_SIZE,
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
            tcp_queue_len: DEFAULT_TCP_QUEUE_LEN,
            udp_queue_len: DEFAULT_UDP_QUEUE_LEN,
            service_queue_len: DEFAULT_SERVICE_QUEUE_LEN,
            drain_batch: DEFAULT_DRAIN_BATCH,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
            event_push_timeout_ms: DEFAULT_EVENT_PUSH_TIMEOUT_MS,
            udp_rebind_delay_ms: DEFAULT_UDP_REBIND_DELAY_MS,
            buffer_pool_size: DEFAULT_BUFFER_POOL_SIZE,
        }
    }
}

/// Server settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Number of processor threads (at least 1).
    pub processor_threads: usize,
    /// Minimum period between ticks of homed services, in milliseconds.
    pub loop_interval_ms: u64,
    /// Tokio worker threads driving socket I/O.
    pub io_threads: usize,
    pub net: NetConfig,
}

impl ServerConfig {
    /// Load a config from a JSON document. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_millis(self.loop_interval_ms)
    }

    /// Clamp counts and periods to their usable minimum.
    pub(crate) fn normalized(mut self) -> Self {
        self.processor_threads = self.processor_threads.max(1);
        self.loop_interval_ms = self.loop_interval_ms.max(1);
        self.io_threads = self.io_threads.max(1);
        self.net.service_queue_len = self.net.service_queue_len.max(1);
        self.net.drain_batch = self.net.drain_batch.max(1);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            processor_threads: 1,
            loop_interval_ms: DEFAULT_LOOP_INTERVAL_MS,
            io_threads: DEFAULT_IO_THREADS,
            net: NetConfig::default(),
        }
    }
}
