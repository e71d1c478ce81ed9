//! Transport module - TCP/UDP socket handling.
//!
//! Provides:
//! - Address parsing (`udp:` prefix selects UDP)
//! - A [`Stream`] abstraction over TCP streams and UDP sockets
//! - Synchronous listener binding and async outbound connects

mod address;
mod socket;

pub use address::{Endpoint, Network};
pub use socket::{bind_tcp, bind_udp, connect, Stream};

pub(crate) use socket::{ReadHalf, WriteHalf};
