//! Codec module - serialization/deserialization for payloads.
//!
//! - [`SpbCodec`] - the tagged Spb binary format (RPC payloads, Spb command services)
//! - [`JsonCodec`] - JSON using `serde_json` (JSON command services)
//!
//! # Design
//!
//! Codecs are implemented as marker structs with static methods rather than trait objects.
//! Which one a service speaks is picked with [`Encoding`].
//!
//! # Example
//!
//! ```
//! use stnet::codec::{JsonCodec, SpbCodec};
//!
//! let encoded = SpbCodec::encode(&"hello".to_string());
//! let decoded: String = SpbCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//!
//! let encoded = JsonCodec::encode(&"hello").unwrap();
//! let decoded: String = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod json;
pub mod spb;

pub use json::JsonCodec;
pub use spb::{SpbArgs, SpbCodec, SpbError, SpbReader, SpbValue, SpbWriter, WireType};

/// Payload encoding of a command service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    #[default]
    Spb,
    Json,
}
