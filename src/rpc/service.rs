//! The RPC-capable service handler.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::call::{PendingTable, RpcCall};
use super::proto::{ReqProto, RpcErrorCode, RspProto};
use super::registry::RpcRegistry;
use super::send_flagged;
use crate::codec::{SpbArgs, SpbCodec};
use crate::error::{NetError, Result};
use crate::protocol::{flags, split_frame, FrameStatus};
use crate::service::{CurrentContext, Decoded, ServiceHandler};
use crate::session::Session;

/// A decoded RPC-service frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcMessage {
    /// Plain request (message id 0).
    Request(ReqProto),
    /// Plain response (message id 1).
    Response(RspProto),
    /// Call of a registered function (message id 2).
    RpcRequest(ReqProto),
    /// Response to an asynchronous call (message id 3).
    RpcResponse(RspProto),
}

impl RpcMessage {
    pub const REQUEST: u64 = 0;
    pub const RESPONSE: u64 = 1;
    pub const RPC_REQUEST: u64 = 2;
    pub const RPC_RESPONSE: u64 = 3;

    pub fn id(&self) -> u64 {
        match self {
            Self::Request(_) => Self::REQUEST,
            Self::Response(_) => Self::RESPONSE,
            Self::RpcRequest(_) => Self::RPC_REQUEST,
            Self::RpcResponse(_) => Self::RPC_RESPONSE,
        }
    }
}

/// Application hooks of an [`RpcService`].
pub trait RpcHandler: Send + Sync + 'static {
    fn init(&self) -> bool {
        true
    }

    /// Periodic work; runs after the timeout sweep.
    fn tick(&self) {}

    fn destroy(&self) {}

    /// Thread selection, see [`ServiceHandler::route`].
    fn route(&self, _session: Option<&Session>, _msg: Option<&RpcMessage>) -> i64 {
        -1
    }

    /// A plain request.
    fn handle_request(&self, _ctx: &CurrentContext, req: ReqProto) {
        tracing::warn!(function = %req.func_name, "unhandled request");
    }

    /// A plain response.
    fn handle_response(&self, _ctx: &CurrentContext, rsp: RspProto) {
        tracing::warn!(function = %rsp.func_name, "unhandled response");
    }

    /// Malformed frames. The default logs and closes the session.
    fn handle_error(&self, ctx: &CurrentContext, error: NetError) {
        tracing::error!(
            session_id = ctx.session().map(Session::id),
            error = %error,
            "rpc message error"
        );
        if let Some(session) = ctx.session() {
            session.close();
        }
    }

    fn session_open(&self, _session: &Session) {}

    fn session_close(&self, _session: &Session) {}

    fn heartbeat_timeout(&self, session: &Session) {
        session.close();
    }
}

/// Builder for [`RpcService`].
pub struct RpcServiceBuilder<R> {
    handler: R,
    registry: RpcRegistry,
    timeout: Option<Duration>,
}

impl<R: RpcHandler> RpcServiceBuilder<R> {
    /// Register a function callable by name from the remote side.
    ///
    /// Arguments and return values are tuples of Spb values.
    pub fn function<F, A, T>(mut self, name: &str, func: F) -> Self
    where
        F: Fn(&CurrentContext, A) -> T + Send + Sync + 'static,
        A: SpbArgs + 'static,
        T: SpbArgs + 'static,
    {
        self.registry.register(name, func);
        self
    }

    /// Deadline for outgoing calls.
    ///
    /// Default: the session context's `rpc_timeout_ms`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> RpcService<R> {
        RpcService {
            handler: self.handler,
            registry: self.registry,
            pending: PendingTable::default(),
            timeout: self.timeout,
        }
    }
}

/// Service handler speaking the RPC frame protocol.
///
/// Frames are `[length][flag][ReqProto | RspProto]`. The flag's response bit
/// picks the record, its RPC bit separates calls of registered functions
/// from plain request/response traffic handed to the [`RpcHandler`].
///
/// ```ignore
/// let rpc = RpcService::builder(Hooks)
///     .function("Echo", |_ctx, (s,): (String,)| (s,))
///     .build();
/// let service = server.add_service("rpc", "127.0.0.1:0", Duration::ZERO, rpc, 0)?;
/// ```
pub struct RpcService<R> {
    handler: R,
    registry: RpcRegistry,
    pending: PendingTable,
    timeout: Option<Duration>,
}

impl<R: RpcHandler> RpcService<R> {
    pub fn builder(handler: R) -> RpcServiceBuilder<R> {
        RpcServiceBuilder {
            handler,
            registry: RpcRegistry::new(),
            timeout: None,
        }
    }

    #[inline]
    pub fn handler(&self) -> &R {
        &self.handler
    }

    #[inline]
    pub fn registry(&self) -> &RpcRegistry {
        &self.registry
    }

    /// Prepare a call of `func` on the service at the other end of `session`.
    pub fn call<'a, A: SpbArgs>(&'a self, session: &'a Session, func: &str, args: &A) -> RpcCall<'a> {
        let timeout = self
            .timeout
            .unwrap_or_else(|| session.context().config().rpc_timeout());
        RpcCall::new(&self.pending, session, func, args.to_spb_args(), timeout)
    }

    /// Outstanding calls.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Send a plain request.
    pub fn send_request(&self, session: &Session, peer: Option<SocketAddr>, req: &ReqProto) -> Result<()> {
        send_flagged(session, peer, flags::REQUEST, req)
    }

    /// Send a plain response.
    pub fn send_response(&self, session: &Session, peer: Option<SocketAddr>, rsp: &RspProto) -> Result<()> {
        send_flagged(session, peer, flags::RESPONSE, rsp)
    }

    /// Run a registered function and answer unless the call is one-way.
    fn serve(&self, ctx: &CurrentContext, req: ReqProto) {
        let mut rsp = RspProto {
            cmd_id: req.cmd_id,
            seq: req.seq,
            func_name: req.func_name,
            ..RspProto::default()
        };

        match self.registry.get(&rsp.func_name) {
            None => {
                tracing::error!(function = %rsp.func_name, "no rpc function");
                rsp.code = RpcErrorCode::NO_REMOTE_FUNCTION;
            }
            Some(func) => match func.call(ctx, &req.data) {
                Ok(data) => rsp.data = data.into(),
                Err(e) => {
                    tracing::error!(function = %rsp.func_name, error = %e, "rpc arguments unpack failed");
                    rsp.code = RpcErrorCode::FUNCTION_PARAMETER_ERROR;
                }
            },
        }

        if req.one_way {
            return;
        }
        let Some(session) = ctx.session() else {
            return;
        };
        if let Err(e) = send_flagged(session, ctx.peer(), flags::RPC_RESPONSE, &rsp) {
            tracing::error!(session_id = session.id(), function = %rsp.func_name, error = %e, "rpc response not sent");
        }
    }

    fn decode_body(&self, flag: u8, body: &[u8]) -> Result<Option<RpcMessage>> {
        let rpc = flags::has_flag(flag, flags::RPC);
        if !flags::has_flag(flag, flags::RESPONSE) {
            let req: ReqProto = SpbCodec::decode(body)?;
            return Ok(Some(if rpc {
                RpcMessage::RpcRequest(req)
            } else {
                RpcMessage::Request(req)
            }));
        }

        let rsp: RspProto = SpbCodec::decode(body)?;
        if !rpc {
            return Ok(Some(RpcMessage::Response(rsp)));
        }
        Ok(self.pending.intercept(rsp).map(RpcMessage::RpcResponse))
    }
}

impl<R: RpcHandler> ServiceHandler for RpcService<R> {
    type Message = RpcMessage;

    fn init(&self) -> bool {
        self.handler.init()
    }

    fn tick(&self) {
        self.pending.sweep(Instant::now());
        self.handler.tick();
    }

    fn destroy(&self) {
        self.handler.destroy()
    }

    fn decode(&self, session: &Session, data: &[u8]) -> Decoded<RpcMessage> {
        let max = session.context().config().max_msg_size;
        let (frame_len, payload) = match split_frame(data, max) {
            FrameStatus::Incomplete => return Decoded::Incomplete,
            FrameStatus::Invalid { length } => {
                return Decoded::Error {
                    consumed: data.len(),
                    id: 0,
                    error: NetError::Protocol(format!("invalid frame length {}", length)),
                }
            }
            FrameStatus::Complete { frame_len, payload } => (frame_len, payload),
        };

        let Some((&flag, body)) = payload.split_first() else {
            return Decoded::Error {
                consumed: frame_len,
                id: 0,
                error: NetError::Protocol("rpc frame without flag byte".into()),
            };
        };

        match self.decode_body(flag, body) {
            Ok(Some(msg)) => Decoded::Message {
                consumed: frame_len,
                id: msg.id(),
                msg,
            },
            Ok(None) => Decoded::Handled(frame_len),
            Err(error) => Decoded::Error {
                consumed: frame_len,
                id: 0,
                error,
            },
        }
    }

    fn route(&self, session: Option<&Session>, _id: u64, msg: Option<&RpcMessage>) -> i64 {
        self.handler.route(session, msg)
    }

    fn handle_message(&self, ctx: &CurrentContext, _id: u64, msg: RpcMessage) {
        match msg {
            RpcMessage::Request(req) => self.handler.handle_request(ctx, req),
            RpcMessage::Response(rsp) => self.handler.handle_response(ctx, rsp),
            RpcMessage::RpcRequest(req) => self.serve(ctx, req),
            RpcMessage::RpcResponse(rsp) => self.pending.complete(rsp),
        }
    }

    fn handle_error(&self, ctx: &CurrentContext, error: NetError) {
        self.handler.handle_error(ctx, error)
    }

    fn session_open(&self, session: &Session) {
        self.handler.session_open(session)
    }

    fn session_close(&self, session: &Session) {
        self.handler.session_close(session)
    }

    fn heartbeat_timeout(&self, session: &Session) {
        self.handler.heartbeat_timeout(session)
    }
}

impl<R> std::fmt::Debug for RpcService<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcService")
            .field("functions", &self.registry)
            .field("pending", &self.pending.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetConfig;
    use crate::context::NetContext;
    use crate::protocol::encode_flagged_frame;
    use crate::session::{Parsed, SessionEvent, SessionHandler};
    use crate::transport::Network;
    use std::sync::Arc;

    struct Hooks;
    impl RpcHandler for Hooks {}

    struct Ignore;
    impl SessionHandler for Ignore {
        fn parse(&self, _s: &Session, data: &[u8]) -> Parsed {
            Parsed::Consumed(data.len())
        }
        fn on_event(&self, _s: &Session, _e: SessionEvent) {}
    }

    fn rpc() -> RpcService<Hooks> {
        RpcService::builder(Hooks)
            .function("Echo", |_ctx, (s,): (String,)| (s,))
            .build()
    }

    fn session() -> Session {
        let ctx = NetContext::current(NetConfig::default()).unwrap();
        Session::new(ctx, Network::Tcp, Arc::new(Ignore), Duration::ZERO, false, None)
    }

    fn frame<T: crate::codec::SpbValue>(flag: u8, record: &T) -> Vec<u8> {
        encode_flagged_frame(flag, &SpbCodec::encode(record), 1024).unwrap()
    }

    #[tokio::test]
    async fn test_decode_kinds() {
        let rpc = rpc();
        let session = session();
        let req = ReqProto {
            seq: 1,
            func_name: "Echo".into(),
            ..ReqProto::default()
        };

        for (flag, id) in [(flags::REQUEST, 0), (flags::RPC_REQUEST, 2)] {
            let bytes = frame(flag, &req);
            match rpc.decode(&session, &bytes) {
                Decoded::Message { consumed, id: got, .. } => {
                    assert_eq!(consumed, bytes.len());
                    assert_eq!(got, id);
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        let rsp = RspProto {
            seq: 5,
            ..RspProto::default()
        };
        for (flag, id) in [(flags::RESPONSE, 1), (flags::RPC_RESPONSE, 3)] {
            assert!(matches!(
                rpc.decode(&session, &frame(flag, &rsp)),
                Decoded::Message { id: got, .. } if got == id
            ));
        }
    }

    #[tokio::test]
    async fn test_empty_payload_is_error() {
        let rpc = rpc();
        let session = session();
        assert!(matches!(
            rpc.decode(&session, &[0, 0, 0, 4]),
            Decoded::Error { consumed: 4, .. }
        ));
        assert!(matches!(
            rpc.decode(&session, &[0, 0, 0, 5]),
            Decoded::Incomplete
        ));
    }

    #[test]
    fn test_message_ids() {
        let req = ReqProto::default();
        let rsp = RspProto::default();
        assert_eq!(RpcMessage::Request(req.clone()).id(), 0);
        assert_eq!(RpcMessage::Response(rsp.clone()).id(), 1);
        assert_eq!(RpcMessage::RpcRequest(req).id(), 2);
        assert_eq!(RpcMessage::RpcResponse(rsp).id(), 3);
    }

    #[test]
    fn test_builder_registers_functions() {
        let rpc = rpc();
        assert!(rpc.registry().contains("Echo"));
        assert_eq!(rpc.pending_count(), 0);
    }
}
