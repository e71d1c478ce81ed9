//! Remote procedure calls over framed sessions.
//!
//! An [`RpcService`] is a [`ServiceHandler`](crate::service::ServiceHandler)
//! that serves registered functions and issues calls to the service at the
//! other end of a session. Calls carry a per-service sequence number; the
//! pending-call table correlates responses and fails calls whose deadline
//! passed:
//!
//! ```text
//!  caller                          remote
//!  call ─► record(seq) ─► [RPC_REQUEST seq f args] ─► registry[f](args)
//!  on_reply ◄─ complete(seq) ◄─ [RPC_RESPONSE seq code results] ◄─┘
//!  on_error(CallTimeout) ◄─ sweep (every tick)
//! ```
//!
//! Error codes never surface as `Err`: they reach only the call's error
//! callback. An `Err` from `send` means the request never left.

mod call;
mod proto;
mod registry;
mod service;

use std::net::SocketAddr;

pub use call::RpcCall;
pub use proto::{ReqProto, RpcErrorCode, RspProto};
pub use registry::{RpcFunction, RpcRegistry, TypedFunction};
pub use service::{RpcHandler, RpcMessage, RpcService, RpcServiceBuilder};

use crate::codec::{SpbCodec, SpbValue};
use crate::error::Result;
use crate::protocol::encode_flagged_frame;
use crate::session::Session;

/// Frame `record` behind `flag` and send it.
pub(crate) fn send_flagged<T: SpbValue>(
    session: &Session,
    peer: Option<SocketAddr>,
    flag: u8,
    record: &T,
) -> Result<()> {
    let body = SpbCodec::encode(record);
    let frame = encode_flagged_frame(flag, &body, session.context().config().max_msg_size)?;
    session.send(&frame, peer)
}
