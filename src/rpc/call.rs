//! Outgoing calls and the pending-call table.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::proto::{ReqProto, RpcErrorCode, RspProto};
use super::send_flagged;
use crate::codec::{SpbArgs, SpbError};
use crate::error::Result;
use crate::protocol::flags;
use crate::session::Session;
use crate::signal::Signal;

type ReplyFn = Box<dyn FnOnce(&[u8]) -> std::result::Result<(), SpbError> + Send>;
type ErrorFn = Box<dyn FnOnce(RpcErrorCode) + Send>;

/// Bookkeeping for one outstanding call.
struct PendingCall {
    func: String,
    deadline: Instant,
    on_reply: Option<ReplyFn>,
    on_error: Option<ErrorFn>,
    signal: Option<Arc<Signal<RspProto>>>,
}

impl PendingCall {
    fn finish(self, rsp: RspProto) {
        if rsp.code != 0 {
            self.fail(RpcErrorCode::from_code(rsp.code));
            return;
        }
        let Some(on_reply) = self.on_reply else {
            return;
        };
        if let Err(e) = on_reply(&rsp.data) {
            tracing::error!(function = %self.func, error = %e, "rpc response unpack failed");
            if let Some(on_error) = self.on_error {
                on_error(RpcErrorCode::FunctionParameterError);
            }
        }
    }

    fn fail(self, code: RpcErrorCode) {
        if let Some(on_error) = self.on_error {
            on_error(code);
        }
    }
}

#[derive(Default)]
struct Table {
    calls: HashMap<u32, PendingCall>,
    seq: u32,
}

/// Outstanding calls of one RPC service, keyed by sequence number.
#[derive(Default)]
pub(crate) struct PendingTable {
    inner: Mutex<Table>,
}

impl PendingTable {
    /// Next sequence number for a call that keeps no record.
    fn next_seq(&self) -> u32 {
        let mut table = self.inner.lock();
        table.seq = table.seq.wrapping_add(1);
        table.seq
    }

    /// Store `call` under a fresh sequence number.
    fn insert(&self, call: PendingCall) -> u32 {
        let mut table = self.inner.lock();
        loop {
            table.seq = table.seq.wrapping_add(1);
            let seq = table.seq;
            if seq != 0 && !table.calls.contains_key(&seq) {
                table.calls.insert(seq, call);
                return seq;
            }
        }
    }

    fn remove(&self, seq: u32) -> Option<PendingCall> {
        self.inner.lock().calls.remove(&seq)
    }

    /// Hand a response to a blocked synchronous caller.
    ///
    /// Returns the response back when no synchronous call is waiting for it.
    pub(crate) fn intercept(&self, rsp: RspProto) -> Option<RspProto> {
        let table = self.inner.lock();
        match table.calls.get(&rsp.seq).and_then(|c| c.signal.as_ref()) {
            Some(signal) => {
                if !signal.try_set(rsp) {
                    tracing::warn!("duplicate rpc response dropped");
                }
                None
            }
            None => Some(rsp),
        }
    }

    /// Complete the call `rsp` answers.
    pub(crate) fn complete(&self, rsp: RspProto) {
        match self.remove(rsp.seq) {
            Some(call) => call.finish(rsp),
            None => tracing::error!(
                function = %rsp.func_name,
                seq = rsp.seq,
                "rpc response without pending call"
            ),
        }
    }

    /// Fail every call whose deadline has passed. Returns how many expired.
    pub(crate) fn sweep(&self, now: Instant) -> usize {
        let expired: Vec<PendingCall> = {
            let mut table = self.inner.lock();
            let seqs: Vec<u32> = table
                .calls
                .iter()
                .filter(|(_, call)| call.deadline <= now)
                .map(|(seq, _)| *seq)
                .collect();
            seqs.iter().filter_map(|seq| table.calls.remove(seq)).collect()
        };

        let count = expired.len();
        for call in expired {
            tracing::warn!(function = %call.func, "rpc call timed out");
            call.fail(RpcErrorCode::CallTimeout);
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().calls.len()
    }
}

/// A call being prepared. Created by [`RpcService::call`](super::RpcService::call).
///
/// Without any callback the call is one-way: no record is kept and the
/// remote side sends no response.
///
/// ```ignore
/// rpc.call(&session, "Echo", &("ping".to_string(),))
///     .on_reply(|(echo,): (String,)| println!("{}", echo))
///     .on_error(|code| eprintln!("echo failed: {}", code))
///     .send_sync()?;
/// ```
#[must_use = "a call does nothing until sent"]
pub struct RpcCall<'a> {
    pending: &'a PendingTable,
    session: &'a Session,
    peer: Option<SocketAddr>,
    func: String,
    args: Vec<u8>,
    timeout: Duration,
    on_reply: Option<ReplyFn>,
    on_error: Option<ErrorFn>,
}

impl<'a> RpcCall<'a> {
    pub(crate) fn new(
        pending: &'a PendingTable,
        session: &'a Session,
        func: &str,
        args: Vec<u8>,
        timeout: Duration,
    ) -> Self {
        Self {
            pending,
            session,
            peer: None,
            func: func.to_string(),
            args,
            timeout,
            on_reply: None,
            on_error: None,
        }
    }

    /// Destination of the datagram, for listening UDP sessions.
    pub fn peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Called with the unpacked return values.
    pub fn on_reply<R, F>(mut self, f: F) -> Self
    where
        R: SpbArgs,
        F: FnOnce(R) + Send + 'static,
    {
        self.on_reply = Some(Box::new(move |data: &[u8]| {
            f(R::from_spb_args(data)?);
            Ok(())
        }));
        self
    }

    /// Called with the reason the call failed.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: FnOnce(RpcErrorCode) + Send + 'static,
    {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Send without waiting. The callbacks run on a processor thread when
    /// the response arrives, or from the timeout sweep.
    pub fn send(self) -> Result<()> {
        self.issue(false)
    }

    /// Send and block until the response or the deadline. The callbacks run
    /// on the calling thread.
    pub fn send_sync(self) -> Result<()> {
        self.issue(true)
    }

    fn issue(self, sync: bool) -> Result<()> {
        let Self {
            pending,
            session,
            peer,
            func,
            args,
            timeout,
            on_reply,
            on_error,
        } = self;

        let one_way = on_reply.is_none() && on_error.is_none();
        let mut req = ReqProto {
            data: args.into(),
            one_way,
            func_name: func.clone(),
            ..ReqProto::default()
        };

        if one_way {
            req.seq = pending.next_seq();
            return send_flagged(session, peer, flags::RPC_REQUEST, &req);
        }

        let signal = sync.then(|| Arc::new(Signal::new()));
        req.seq = pending.insert(PendingCall {
            func,
            deadline: Instant::now() + timeout,
            on_reply,
            on_error,
            signal: signal.clone(),
        });

        if let Err(e) = send_flagged(session, peer, flags::RPC_REQUEST, &req) {
            pending.remove(req.seq);
            return Err(e);
        }

        let Some(signal) = signal else {
            return Ok(());
        };
        match signal.wait_timeout(timeout) {
            Some(rsp) => pending.complete(rsp),
            // The sweep may have failed the call already.
            None => {
                if let Some(call) = pending.remove(req.seq) {
                    tracing::warn!(function = %call.func, "rpc call timed out");
                    call.fail(RpcErrorCode::CallTimeout);
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for RpcCall<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcCall")
            .field("session", &self.session.id())
            .field("func", &self.func)
            .field("timeout", &self.timeout)
            .finish()
    }
}
