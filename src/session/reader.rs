//! Receive and framing loops of a session.
//!
//! The receive loop reads raw units from the socket and forwards them over a
//! bounded channel. The framing loop appends each unit to a carry-over buffer
//! and asks the handler to parse messages off its front. Heartbeats fire from
//! the framing loop when no unit arrived for the heartbeat interval.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use super::{stopped, Parsed, Session, SessionEvent};
use crate::guard;
use crate::protocol::FrameBuffer;
use crate::transport::ReadHalf;

/// One read from the socket.
#[derive(Debug)]
pub(super) struct Unit {
    pub(super) data: Bytes,
    pub(super) peer: Option<SocketAddr>,
}

/// Next receive buffer size for TCP.
///
/// Shrinks by half when a read used less than half of a buffer above the
/// minimum, doubles when a read filled the buffer. Never exceeds `max`.
pub(super) fn next_buffer_len(len: usize, n: usize, min: usize, max: usize) -> usize {
    let next = if min < len && n * 2 < len {
        len / 2
    } else if n == len {
        len * 2
    } else {
        len
    };
    next.clamp(1, max.max(1))
}

/// Read from the socket until EOF, an error or shutdown.
pub(super) async fn recv_loop(
    session: &Session,
    mut half: ReadHalf,
    units: mpsc::Sender<Unit>,
    mut stop: watch::Receiver<bool>,
) {
    let config = session.context().config();
    let udp = session.is_udp();
    let max = config.max_msg_size.max(1);
    let min = config.min_recv_buffer_size;
    let mut len = if udp {
        config.udp_recv_buffer_size.max(1)
    } else {
        config.recv_buffer_size.clamp(1, max)
    };
    let mut buf = vec![0u8; len];

    loop {
        let read = tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            read = half.read(&mut buf[..len]) => read,
        };

        match read {
            Ok((0, _)) if !udp => {
                tracing::debug!(session_id = session.id(), "peer closed connection");
                break;
            }
            Ok((n, from)) => {
                let unit = Unit {
                    data: Bytes::copy_from_slice(&buf[..n]),
                    peer: from,
                };
                if units.send(unit).await.is_err() {
                    break;
                }
                if !udp {
                    len = next_buffer_len(len, n, min, max);
                    if buf.len() < len {
                        buf.resize(len, 0);
                    }
                }
            }
            Err(e) => {
                tracing::error!(session_id = session.id(), error = %e, "session recv failed");
                break;
            }
        }
    }
}

/// Reassemble and dispatch messages until shutdown.
pub(super) async fn frame_loop(
    session: Session,
    mut units: mpsc::Receiver<Unit>,
    mut stop: watch::Receiver<bool>,
) {
    let mut carry = FrameBuffer::with_max_msg_size(session.context().config().max_msg_size);
    let heartbeat = session.heartbeat();

    loop {
        let idle = async {
            match heartbeat {
                Some(interval) => tokio::time::sleep(interval).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = stopped(&mut stop) => {
                // Last chance for what already arrived.
                if let Ok(unit) = units.try_recv() {
                    session.set_peer(unit.peer);
                    carry.extend(&unit.data);
                }
                if !carry.is_empty() {
                    drain_frames(&session, &mut carry);
                }
                return;
            }
            unit = units.recv() => {
                let Some(unit) = unit else {
                    return;
                };
                session.set_peer(unit.peer);
                carry.extend(&unit.data);
                if !drain_frames(&session, &mut carry) {
                    session.close();
                }
            }
            _ = idle => session.dispatch(SessionEvent::HeartBeat),
        }
    }
}

/// Parse as many messages as possible off the front of `carry`.
///
/// Returns `false` when the session must close.
fn drain_frames(session: &Session, carry: &mut FrameBuffer) -> bool {
    let udp = session.is_udp();
    loop {
        let parsed = guard::catch("session parse", || {
            session.handler().parse(session, carry.as_slice())
        })
        .unwrap_or(Parsed::Invalid);

        match parsed {
            Parsed::Consumed(n) if n >= carry.len() => {
                carry.clear();
                return true;
            }
            Parsed::Consumed(n) if n > 0 => carry.advance(n),
            Parsed::Consumed(_) | Parsed::Incomplete => {
                if udp {
                    tracing::warn!(
                        session_id = session.id(),
                        len = carry.len(),
                        peer = ?session.peer(),
                        "udp datagram must carry whole messages, dropped"
                    );
                    carry.clear();
                    return true;
                }
                if carry.exceeds_limit() {
                    tracing::error!(
                        session_id = session.id(),
                        len = carry.len(),
                        max = carry.max_msg_size(),
                        "incomplete message exceeds max size"
                    );
                    carry.clear();
                    return false;
                }
                return true;
            }
            Parsed::Invalid => {
                tracing::error!(
                    session_id = session.id(),
                    len = carry.len(),
                    "invalid message, closing session"
                );
                carry.clear();
                return false;
            }
        }
    }
}
