//! Context passed to message handlers.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::{NetError, Result};
use crate::session::Session;

/// Where a message came from and which thread is handling it.
///
/// `reply` sends back to the originating session; for listening UDP
/// sessions the datagram goes to the source address of the request.
#[derive(Debug, Clone)]
pub struct CurrentContext {
    thread: usize,
    session: Option<Session>,
    peer: Option<SocketAddr>,
}

impl CurrentContext {
    pub fn new(thread: usize, session: Option<Session>, peer: Option<SocketAddr>) -> Self {
        Self {
            thread,
            session,
            peer,
        }
    }

    /// Index of the processor thread running the handler.
    #[inline]
    pub fn thread_id(&self) -> usize {
        self.thread
    }

    #[inline]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Source address of the message.
    #[inline]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// The session's user data slot.
    pub fn user_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.session.as_ref().and_then(Session::user_data)
    }

    /// Send raw bytes back to the origin.
    pub fn reply(&self, data: &[u8]) -> Result<()> {
        match &self.session {
            Some(session) => session.send(data, self.peer),
            None => Err(NetError::SessionClosed),
        }
    }

    /// Send a length-prefixed frame back to the origin.
    pub fn reply_frame(&self, payload: &[u8]) -> Result<()> {
        match &self.session {
            Some(session) => session.send_frame(payload, self.peer),
            None => Err(NetError::SessionClosed),
        }
    }
}
