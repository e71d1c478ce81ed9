//! Send loop of a session.
//!
//! `Session::send` copies the caller's bytes into a pooled buffer and queues
//! it on the session's outbound channel. One task per session epoch drains
//! the channel, batching whatever is ready into a single vectored write.
//!
//! ```text
//! Session::send ─┐
//! Session::send ─┼─► mpsc::Sender<Outbound> ─► send loop ─► socket
//! Session::send ─┘
//! ```
//!
//! The channel outlives the loop: when the loop exits it hands the receiver
//! back so a reconnected session keeps whatever was queued.

use std::io::IoSlice;
use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

use super::{stopped, Session};
use crate::transport::WriteHalf;

/// Maximum items to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// One queued send.
#[derive(Debug)]
pub(crate) struct Outbound {
    pub(crate) buf: BytesMut,
    /// Destination for unconnected UDP sockets.
    pub(crate) peer: Option<SocketAddr>,
}

/// Drain the outbound queue until shutdown or a write error.
///
/// Returns the receiver so the queue survives a restart.
pub(super) async fn send_loop(
    session: Session,
    mut half: WriteHalf,
    mut rx: mpsc::Receiver<Outbound>,
    mut stop: watch::Receiver<bool>,
) -> mpsc::Receiver<Outbound> {
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    loop {
        let first = tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(item) => batch.push(item),
                Err(_) => break,
            }
        }

        let result = tokio::select! {
            biased;
            _ = stopped(&mut stop) => None,
            result = write_items(&mut half, &batch, session.id()) => Some(result),
        };

        let pool = session.context().pool();
        for item in batch.drain(..) {
            pool.release(item.buf);
        }

        match result {
            None => break,
            Some(Ok(())) => {}
            Some(Err(e)) => {
                tracing::error!(session_id = session.id(), error = %e, "session send failed");
                session.close();
                break;
            }
        }
    }

    if let WriteHalf::Tcp(w) = &mut half {
        let _ = w.shutdown().await;
    }
    rx
}

async fn write_items(
    half: &mut WriteHalf,
    batch: &[Outbound],
    session_id: u64,
) -> std::io::Result<()> {
    match half {
        WriteHalf::Tcp(w) => write_batch(w, batch).await,
        WriteHalf::Udp { socket, connected } => {
            send_datagrams(socket, *connected, batch, session_id).await;
            Ok(())
        }
    }
}

/// Send each item as its own datagram. Failures are logged and skipped.
async fn send_datagrams(socket: &UdpSocket, connected: bool, batch: &[Outbound], session_id: u64) {
    for item in batch {
        let result = match item.peer {
            Some(peer) if !connected => socket.send_to(&item.buf, peer).await,
            _ => socket.send(&item.buf).await,
        };
        if let Err(e) = result {
            tracing::warn!(session_id, peer = ?item.peer, error = %e, "udp send failed");
        }
    }
}

/// Write a batch of buffers using scatter/gather I/O (write_vectored).
///
/// Loops on partial writes until every byte is written, then flushes.
async fn write_batch<W>(writer: &mut W, batch: &[Outbound]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(|item| item.buf.len()).sum();
    if total_size == 0 {
        return Ok(());
    }

    let slices: Vec<IoSlice<'_>> = batch
        .iter()
        .filter(|item| !item.buf.is_empty())
        .map(|item| IoSlice::new(&item.buf))
        .collect();

    // Fast path: the kernel buffer usually takes the whole batch at once.
    let mut total_written = writer.write_vectored(&slices).await?;

    while total_written < total_size {
        if total_written == 0 {
            return Err(write_zero());
        }
        let remaining = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&remaining).await?;
        if written == 0 {
            return Err(write_zero());
        }
        total_written += written;
    }

    writer.flush().await
}

fn write_zero() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::WriteZero, "write_vectored returned 0")
}

/// Build IoSlice array for remaining data after partial write.
fn build_remaining_slices(batch: &[Outbound], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut skipped = 0;

    for item in batch {
        let start = skipped;
        let end = skipped + item.buf.len();
        if skip_bytes < end {
            let offset = skip_bytes.saturating_sub(start);
            slices.push(IoSlice::new(&item.buf[offset..]));
        }
        skipped = end;
    }

    slices
}
