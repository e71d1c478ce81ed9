//! Address strings.
//!
//! Services, listeners and connectors take plain strings: `"127.0.0.1:6000"`
//! for TCP, `"udp:127.0.0.1:6000"` for UDP. A `tcp:` prefix is accepted too.
//! Whitespace anywhere in the string is ignored.

use std::fmt;

/// Transport protocol of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Network {
    #[default]
    Tcp,
    Udp,
}

impl Network {
    #[inline]
    pub fn is_udp(self) -> bool {
        self == Network::Udp
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Tcp => f.write_str("tcp"),
            Network::Udp => f.write_str("udp"),
        }
    }
}

/// A parsed address string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub network: Network,
    /// `host:port` without the protocol prefix.
    pub addr: String,
}

impl Endpoint {
    /// Parse an address string. Never fails; an empty `addr` means
    /// "no socket" (loop-only services).
    pub fn parse(address: &str) -> Self {
        let compact: String = address.chars().filter(|c| !c.is_whitespace()).collect();

        if let Some(rest) = strip_prefix_ignore_case(&compact, "udp:") {
            return Self {
                network: Network::Udp,
                addr: rest.to_string(),
            };
        }
        let addr = strip_prefix_ignore_case(&compact, "tcp:").unwrap_or(&compact);
        Self {
            network: Network::Tcp,
            addr: addr.to_string(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.addr.is_empty()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.network {
            Network::Tcp => f.write_str(&self.addr),
            Network::Udp => write!(f, "udp:{}", self.addr),
        }
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}
