//! Error types for stnet.

use thiserror::Error;

use crate::codec::SpbError;

/// Main error type for all stnet operations.
#[derive(Debug, Error)]
pub enum NetError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Spb encode/decode error.
    #[error("Spb error: {0}")]
    Spb(#[from] SpbError),

    /// Protocol error (invalid length, malformed payload, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The session is closed and accepts no more data.
    #[error("session closed")]
    SessionClosed,

    /// A restart was requested while the session is still open.
    #[error("session is still open")]
    SessionOpen,

    /// The session's outbound queue is full; the message was dropped.
    #[error("send queue is full")]
    SendQueueFull,

    /// A service queue slot is full; the message was dropped.
    #[error("service {service} queue is full, message {msg_id} dropped")]
    QueueFull {
        /// Service name (may be empty).
        service: String,
        /// Id of the dropped message.
        msg_id: u64,
    },

    /// No service registered under the given name (or with another type).
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    /// Home thread index outside `0..=threads`.
    #[error("thread index {index} out of range 0..={max}")]
    InvalidThread {
        /// Requested index.
        index: usize,
        /// Largest accepted index.
        max: usize,
    },

    /// A service's init hook refused to start.
    #[error("service {0} init failed")]
    InitFailed(String),

    /// Address could not be parsed or resolved.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The server was already started (or stopped).
    #[error("server already started")]
    AlreadyStarted,
}

/// Result type alias using NetError.
pub type Result<T> = std::result::Result<T, NetError>;
