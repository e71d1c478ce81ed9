//! # stnet
//!
//! Socket server framework: a fixed pool of processor threads driving named
//! services, framed TCP/UDP sessions, supervised outbound connections, RPC
//! with request/response correlation, and the Spb binary codec.
//!
//! ## Architecture
//!
//! - **I/O** (tokio runtime owned by the [`Server`]): listeners accept,
//!   connectors dial, and every session runs a receive loop, a framing loop
//!   and a send loop.
//! - **Logic** (processor threads): decoded messages are routed to a thread
//!   and queued on that thread's bounded slot of the service; a full slot
//!   drops the message. Handlers run only on processor threads.
//!
//! ## Wire format
//!
//! `[u32 BE length of the whole frame][payload]`. RPC payloads begin with a
//! flag byte (see [`protocol::flags`]) followed by an Spb record.
//!
//! ## Example
//!
//! ```ignore
//! use std::time::Duration;
//! use stnet::rpc::{RpcHandler, RpcService};
//! use stnet::Server;
//!
//! struct Hooks;
//! impl RpcHandler for Hooks {}
//!
//! let server = Server::builder().processor_threads(2).build()?;
//! let rpc = RpcService::builder(Hooks)
//!     .function("Echo", |_ctx, (s,): (String,)| (s,))
//!     .build();
//! server.add_service("echo", "127.0.0.1:9000", Duration::ZERO, rpc, 0)?;
//! server.start()?;
//! ```

pub mod codec;
pub mod config;
pub mod connector;
pub mod context;
pub mod error;
pub mod listener;
pub mod logging;
pub mod protocol;
pub mod queue;
pub mod rpc;
pub mod server;
pub mod service;
pub mod session;
pub mod signal;
pub mod transport;

mod guard;

pub use config::{NetConfig, ServerConfig};
pub use context::NetContext;
pub use error::{NetError, Result};
pub use server::{Server, ServerBuilder};
