//! TCP and UDP sockets behind one stream type.
//!
//! A [`Stream`] is whatever a session reads from and writes to: an accepted
//! or connected TCP stream, or a UDP socket. Listening UDP sockets are not
//! connected, so reads report the datagram's source and writes need a peer.
//!
//! Binding is synchronous so listeners can report bind errors to the caller
//! directly. The `from_std` conversions need a runtime context; callers enter
//! the context's runtime handle first.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

use super::{Endpoint, Network};

/// A connected (or listening, for UDP) socket.
#[derive(Debug)]
pub enum Stream {
    Tcp(TcpStream),
    Udp {
        socket: Arc<UdpSocket>,
        connected: bool,
    },
}

impl Stream {
    /// Wrap a bound, unconnected UDP socket.
    pub fn udp_listening(socket: UdpSocket) -> Self {
        Stream::Udp {
            socket: Arc::new(socket),
            connected: false,
        }
    }

    #[inline]
    pub fn network(&self) -> Network {
        match self {
            Stream::Tcp(_) => Network::Tcp,
            Stream::Udp { .. } => Network::Udp,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Stream::Tcp(s) => s.local_addr(),
            Stream::Udp { socket, .. } => socket.local_addr(),
        }
    }

    /// The remote address, if the socket has a fixed one.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match self {
            Stream::Tcp(s) => s.peer_addr().ok(),
            Stream::Udp {
                socket,
                connected: true,
            } => socket.peer_addr().ok(),
            Stream::Udp { .. } => None,
        }
    }

    pub(crate) fn split(self) -> (ReadHalf, WriteHalf) {
        match self {
            Stream::Tcp(s) => {
                let (r, w) = s.into_split();
                (ReadHalf::Tcp(r), WriteHalf::Tcp(w))
            }
            Stream::Udp { socket, connected } => (
                ReadHalf::Udp {
                    socket: Arc::clone(&socket),
                    connected,
                },
                WriteHalf::Udp { socket, connected },
            ),
        }
    }
}

/// Receiving side of a [`Stream`].
pub(crate) enum ReadHalf {
    Tcp(OwnedReadHalf),
    Udp {
        socket: Arc<UdpSocket>,
        connected: bool,
    },
}

impl ReadHalf {
    /// Read one unit. For TCP, `Ok((0, _))` means the peer closed. For a
    /// listening UDP socket the datagram's source is returned.
    pub(crate) async fn read(&mut self, buf: &mut [u8]) -> io::Result<(usize, Option<SocketAddr>)> {
        match self {
            ReadHalf::Tcp(r) => Ok((r.read(buf).await?, None)),
            ReadHalf::Udp {
                socket,
                connected: true,
            } => Ok((socket.recv(buf).await?, None)),
            ReadHalf::Udp { socket, .. } => {
                let (n, from) = socket.recv_from(buf).await?;
                Ok((n, Some(from)))
            }
        }
    }
}

/// Sending side of a [`Stream`].
pub(crate) enum WriteHalf {
    Tcp(OwnedWriteHalf),
    Udp {
        socket: Arc<UdpSocket>,
        connected: bool,
    },
}

/// Open an outbound connection.
///
/// UDP "connections" bind an ephemeral port of the target's address family
/// and connect the socket, so stray datagrams from other sources are
/// filtered by the kernel.
pub async fn connect(endpoint: &Endpoint) -> io::Result<Stream> {
    match endpoint.network {
        Network::Tcp => {
            let stream = TcpStream::connect(endpoint.addr.as_str()).await?;
            stream.set_nodelay(true)?;
            Ok(Stream::Tcp(stream))
        }
        Network::Udp => {
            let target = tokio::net::lookup_host(endpoint.addr.as_str())
                .await?
                .next()
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::AddrNotAvailable,
                        format!("no address for {}", endpoint.addr),
                    )
                })?;
            let local = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
            let socket = UdpSocket::bind(local).await?;
            socket.connect(target).await?;
            Ok(Stream::Udp {
                socket: Arc::new(socket),
                connected: true,
            })
        }
    }
}

/// Bind a TCP listener. Must run inside a tokio runtime context.
pub fn bind_tcp(addr: &str) -> io::Result<TcpListener> {
    let listener = std::net::TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    TcpListener::from_std(listener)
}

/// Bind a UDP socket. Must run inside a tokio runtime context.
pub fn bind_udp(addr: &str) -> io::Result<UdpSocket> {
    let socket = std::net::UdpSocket::bind(addr)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_tcp_connect_and_split() {
        let listener = bind_tcp("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let stream = connect(&Endpoint::parse(&addr.to_string())).await.unwrap();
        assert_eq!(stream.network(), Network::Tcp);
        assert_eq!(stream.peer_addr(), Some(addr));

        let mut server = accept.await.unwrap();
        server.write_all(b"hi").await.unwrap();

        let (mut read, _write) = stream.split();
        let mut buf = [0u8; 8];
        let (n, from) = read.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hi");
        assert!(from.is_none());
    }

    #[tokio::test]
    async fn test_udp_listening_reports_source() {
        let server = bind_udp("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();
        let stream = Stream::udp_listening(server);
        assert!(stream.peer_addr().is_none());

        let client = connect(&Endpoint::parse(&format!("udp:{}", server_addr)))
            .await
            .unwrap();
        let client_addr = client.local_addr().unwrap();
        let Stream::Udp { socket, connected } = &client else {
            panic!("expected udp stream");
        };
        assert!(*connected);
        socket.send(b"ping").await.unwrap();

        let (mut read, _write) = stream.split();
        let mut buf = [0u8; 16];
        let (n, from) = read.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from.map(|a| a.port()), Some(client_addr.port()));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = bind_tcp("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(connect(&Endpoint::parse(&addr.to_string())).await.is_err());
    }
}
