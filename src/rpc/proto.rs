//! Request and response records carried by RPC-service frames.

use std::fmt;

use bytes::Bytes;

crate::spb_record! {
    /// A request. `data` holds the Spb-packed arguments.
    #[derive(Debug, Default, Clone, PartialEq, Eq)]
    pub struct ReqProto {
        [0] pub cmd_id: u32,
        [1] pub seq: u32,
        [2] pub data: Bytes,
        [3] pub one_way: bool,
        [4] pub func_name: String,
    }
}

crate::spb_record! {
    /// A response. `code` is zero on success; `data` holds the Spb-packed
    /// return values.
    #[derive(Debug, Default, Clone, PartialEq, Eq)]
    pub struct RspProto {
        [0] pub cmd_id: u32,
        [1] pub seq: u32,
        [2] pub push_seq: u32,
        [3] pub code: i32,
        [4] pub data: Bytes,
        [5] pub func_name: String,
    }
}

/// Why a call failed. Delivered to the call's error callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcErrorCode {
    /// The remote service has no function with that name.
    NoRemoteFunction,
    /// No response before the deadline.
    CallTimeout,
    /// Arguments or return values could not be decoded.
    FunctionParameterError,
    /// Any other non-zero code set by the remote side.
    Remote(i32),
}

impl RpcErrorCode {
    pub const NO_REMOTE_FUNCTION: i32 = -1;
    pub const CALL_TIMEOUT: i32 = -2;
    pub const FUNCTION_PARAMETER_ERROR: i32 = -3;

    /// Wire value of the code.
    pub const fn code(self) -> i32 {
        match self {
            Self::NoRemoteFunction => Self::NO_REMOTE_FUNCTION,
            Self::CallTimeout => Self::CALL_TIMEOUT,
            Self::FunctionParameterError => Self::FUNCTION_PARAMETER_ERROR,
            Self::Remote(code) => code,
        }
    }

    pub const fn from_code(code: i32) -> Self {
        match code {
            Self::NO_REMOTE_FUNCTION => Self::NoRemoteFunction,
            Self::CALL_TIMEOUT => Self::CallTimeout,
            Self::FUNCTION_PARAMETER_ERROR => Self::FunctionParameterError,
            other => Self::Remote(other),
        }
    }
}

impl fmt::Display for RpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRemoteFunction => write!(f, "no remote function"),
            Self::CallTimeout => write!(f, "call timeout"),
            Self::FunctionParameterError => write!(f, "function parameter error"),
            Self::Remote(code) => write!(f, "remote error {}", code),
        }
    }
}
