//! Command services: length-prefixed `Command { id, data }` frames.
//!
//! The frame payload is a [`Command`] encoded with Spb or JSON, chosen when
//! the service is built. The command id is the message id, so it drives
//! routing; `data` is opaque to the framework and usually holds another
//! encoded record.
//!
//! # Example
//!
//! ```ignore
//! struct Chat;
//!
//! impl CommandHandler for Chat {
//!     fn handle(&self, ctx: &CurrentContext, cmd: Result<Command>) {
//!         if let Ok(cmd) = cmd {
//!             let text: String = cmd.decode_spb().unwrap_or_default();
//!             let _ = send_spb_command(ctx.session().unwrap(), cmd.id, &text);
//!         }
//!     }
//! }
//!
//! server.add_service("chat", "127.0.0.1:7000", Duration::ZERO,
//!     CommandService::new(Chat, Encoding::Spb), 1)?;
//! ```

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{CurrentContext, Decoded, ServiceHandler};
use crate::codec::{Encoding, JsonCodec, SpbCodec, SpbValue};
use crate::error::{NetError, Result};
use crate::protocol::{encode_frame, split_frame, FrameStatus};
use crate::session::Session;

crate::spb_record! {
    /// One command frame.
    #[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Command {
        [0] pub id: u64,
        #[serde(rename = "cmd")]
        [1] pub data: Bytes,
    }
}

impl Command {
    pub fn new(id: u64, data: impl Into<Bytes>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }

    /// Encode as a frame payload.
    pub fn encode(&self, encoding: Encoding) -> Result<Vec<u8>> {
        match encoding {
            Encoding::Spb => Ok(SpbCodec::encode(self)),
            Encoding::Json => JsonCodec::encode(self),
        }
    }

    /// Decode a frame payload.
    pub fn decode(payload: &[u8], encoding: Encoding) -> Result<Self> {
        match encoding {
            Encoding::Spb => Ok(SpbCodec::decode(payload)?),
            Encoding::Json => JsonCodec::decode(payload),
        }
    }

    /// Decode `data` as an Spb value.
    pub fn decode_spb<T: SpbValue + Default>(&self) -> Result<T> {
        Ok(SpbCodec::decode(&self.data)?)
    }

    /// Decode `data` as JSON.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T> {
        JsonCodec::decode(&self.data)
    }
}

/// Logic of a [`CommandService`].
pub trait CommandHandler: Send + Sync + 'static {
    fn init(&self) -> bool {
        true
    }

    fn tick(&self) {}

    fn destroy(&self) {}

    /// Thread selection, see [`ServiceHandler::route`].
    fn route(&self, _session: Option<&Session>, _cmd_id: u64) -> i64 {
        -1
    }

    /// A command, or the reason a frame could not be decoded.
    fn handle(&self, ctx: &CurrentContext, cmd: Result<Command>);

    fn session_open(&self, _session: &Session) {}

    fn session_close(&self, _session: &Session) {}

    fn heartbeat_timeout(&self, session: &Session) {
        session.close();
    }
}

/// Service adapter decoding command frames for a [`CommandHandler`].
pub struct CommandService<C> {
    inner: C,
    encoding: Encoding,
}

impl<C: CommandHandler> CommandService<C> {
    pub fn new(inner: C, encoding: Encoding) -> Self {
        Self { inner, encoding }
    }

    pub fn spb(inner: C) -> Self {
        Self::new(inner, Encoding::Spb)
    }

    pub fn json(inner: C) -> Self {
        Self::new(inner, Encoding::Json)
    }

    #[inline]
    pub fn inner(&self) -> &C {
        &self.inner
    }

    #[inline]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }
}

impl<C: CommandHandler> ServiceHandler for CommandService<C> {
    type Message = Command;

    fn init(&self) -> bool {
        self.inner.init()
    }

    fn tick(&self) {
        self.inner.tick()
    }

    fn destroy(&self) {
        self.inner.destroy()
    }

    fn decode(&self, session: &Session, data: &[u8]) -> Decoded<Command> {
        let max = session.context().config().max_msg_size;
        match split_frame(data, max) {
            FrameStatus::Incomplete => Decoded::Incomplete,
            FrameStatus::Invalid { length } => Decoded::Error {
                consumed: data.len(),
                id: 0,
                error: NetError::Protocol(format!("invalid frame length {}", length)),
            },
            FrameStatus::Complete { frame_len, payload } => {
                match Command::decode(payload, self.encoding) {
                    Ok(cmd) => Decoded::Message {
                        consumed: frame_len,
                        id: cmd.id,
                        msg: cmd,
                    },
                    Err(error) => Decoded::Error {
                        consumed: frame_len,
                        id: 0,
                        error,
                    },
                }
            }
        }
    }

    fn route(&self, session: Option<&Session>, id: u64, _msg: Option<&Command>) -> i64 {
        self.inner.route(session, id)
    }

    fn handle_message(&self, ctx: &CurrentContext, _id: u64, msg: Command) {
        self.inner.handle(ctx, Ok(msg));
    }

    fn handle_error(&self, ctx: &CurrentContext, error: NetError) {
        self.inner.handle(ctx, Err(error));
    }

    fn session_open(&self, session: &Session) {
        self.inner.session_open(session)
    }

    fn session_close(&self, session: &Session) {
        self.inner.session_close(session)
    }

    fn heartbeat_timeout(&self, session: &Session) {
        self.inner.heartbeat_timeout(session)
    }
}

/// Frame and send a command.
pub fn send_command(session: &Session, encoding: Encoding, id: u64, data: &[u8]) -> Result<()> {
    let payload = Command::new(id, Bytes::copy_from_slice(data)).encode(encoding)?;
    let frame = encode_frame(&payload, session.context().config().max_msg_size)?;
    session.send(&frame, None)
}

/// Send `msg` Spb-encoded inside an Spb command.
pub fn send_spb_command<T: SpbValue>(session: &Session, id: u64, msg: &T) -> Result<()> {
    send_command(session, Encoding::Spb, id, &SpbCodec::encode(msg))
}

/// Send raw `data` inside a JSON command.
pub fn send_json_command(session: &Session, id: u64, data: &[u8]) -> Result<()> {
    send_command(session, Encoding::Json, id, data)
}
