//! Network addresses, listeners and accepted connections.
//!
//! Servers listen either on a TCP socket (`host:port`) or on a unix domain
//! socket (a filesystem path). Accepted connections carry their [`PeerInfo`]
//! so the call layer can tell who is on the other end, whatever the socket
//! family.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::Deserialize;
use socket2::SockRef;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tonic::transport::server::Connected;
use tracing::{debug, warn};

use crate::{BifrostError, Result};

/// Socket family of a listening endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Tcp,
    Unix,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => f.write_str("tcp"),
            Transport::Unix => f.write_str("unix"),
        }
    }
}

/// A listening endpoint: `host:port` for TCP, a socket path for unix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NetAddr {
    pub endpoint: String,
    pub transport: Transport,
}

impl NetAddr {
    pub fn tcp(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            transport: Transport::Tcp,
        }
    }

    pub fn unix(path: impl Into<String>) -> Self {
        Self {
            endpoint: path.into(),
            transport: Transport::Unix,
        }
    }

    /// Bind the endpoint. Never retries.
    ///
    /// A TCP endpoint with an empty host (`:8080`) binds every IPv4
    /// interface. A unix endpoint fails if the socket path already exists.
    pub async fn listen(&self) -> Result<Listener> {
        let listener = match self.transport {
            Transport::Tcp => TcpListener::bind(tcp_bind_target(&self.endpoint))
                .await
                .map(Listener::Tcp),
            Transport::Unix => bind_unix(&self.endpoint),
        }
        .map_err(|source| BifrostError::ListenerBind {
            transport: self.transport,
            endpoint: self.endpoint.clone(),
            source,
        })?;

        debug!(
            transport = %self.transport,
            endpoint = %self.endpoint,
            local_addr = ?listener.local_addr().ok(),
            "listener bound"
        );
        Ok(listener)
    }
}

fn tcp_bind_target(endpoint: &str) -> String {
    match endpoint.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => endpoint.to_string(),
    }
}

#[cfg(unix)]
fn bind_unix(path: &str) -> io::Result<Listener> {
    UnixListener::bind(path).map(Listener::Unix)
}

#[cfg(not(unix))]
fn bind_unix(_path: &str) -> io::Result<Listener> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "unix sockets are not supported on this platform",
    ))
}

// ============================================================================
// Addresses
// ============================================================================

/// Address of one end of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    Inet(SocketAddr),
    /// Unix socket path; `None` for unnamed (client-side) sockets.
    Unix(Option<PathBuf>),
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::Inet(addr)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Inet(addr) => write!(f, "{addr}"),
            Address::Unix(Some(path)) => write!(f, "unix:{}", path.display()),
            Address::Unix(None) => f.write_str("unix:@"),
        }
    }
}

/// Both ends of an accepted connection, as seen by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub remote_addr: Address,
    pub local_addr: Option<Address>,
}

impl PeerInfo {
    pub fn new(remote_addr: impl Into<Address>, local_addr: Option<Address>) -> Self {
        Self {
            remote_addr: remote_addr.into(),
            local_addr,
        }
    }
}

#[cfg(unix)]
fn unix_address(addr: tokio::net::unix::SocketAddr) -> Address {
    Address::Unix(addr.as_pathname().map(PathBuf::from))
}

// ============================================================================
// Listener
// ============================================================================

/// A bound, listening socket.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Listener {
    /// The concrete bound address (the real port for `:0` endpoints).
    pub fn local_addr(&self) -> io::Result<Address> {
        match self {
            Listener::Tcp(l) => l.local_addr().map(Address::Inet),
            #[cfg(unix)]
            Listener::Unix(l) => l.local_addr().map(unix_address),
        }
    }

    /// Wait for the next inbound connection.
    pub async fn accept(&self) -> io::Result<Connection> {
        match self {
            Listener::Tcp(l) => {
                let (stream, remote) = l.accept().await?;
                let local = stream.local_addr().ok().map(Address::Inet);
                Ok(Connection {
                    peer: PeerInfo::new(remote, local),
                    stream: Stream::Tcp(stream),
                })
            }
            #[cfg(unix)]
            Listener::Unix(l) => {
                let (stream, remote) = l.accept().await?;
                let local = stream.local_addr().ok().map(unix_address);
                Ok(Connection {
                    peer: PeerInfo {
                        remote_addr: unix_address(remote),
                        local_addr: local,
                    },
                    stream: Stream::Unix(stream),
                })
            }
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

#[derive(Debug)]
enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

/// An accepted connection, ready to be served.
#[derive(Debug)]
pub struct Connection {
    stream: Stream,
    peer: PeerInfo,
}

impl Connection {
    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    /// Apply socket receive/send buffer sizes; zero leaves the OS default.
    pub(crate) fn set_buffer_sizes(&self, read: usize, write: usize) {
        match &self.stream {
            Stream::Tcp(s) => set_socket_buffers(SockRef::from(s), read, write),
            #[cfg(unix)]
            Stream::Unix(s) => set_socket_buffers(SockRef::from(s), read, write),
        }
    }
}

/// Set receive/send buffer sizes on a connected socket; zero leaves the OS
/// default. Failures are logged and the socket is kept.
pub(crate) fn set_socket_buffers(socket: SockRef<'_>, read: usize, write: usize) {
    if read == 0 && write == 0 {
        return;
    }
    if let Err(e) = apply_buffer_sizes(socket, read, write) {
        warn!(read, write, error = %e, "failed to set socket buffer sizes");
    }
}

fn apply_buffer_sizes(sock: SockRef<'_>, read: usize, write: usize) -> io::Result<()> {
    if read > 0 {
        sock.set_recv_buffer_size(read)?;
    }
    if write > 0 {
        sock.set_send_buffer_size(write)?;
    }
    Ok(())
}

impl Connected for Connection {
    type ConnectInfo = PeerInfo;

    fn connect_info(&self) -> Self::ConnectInfo {
        self.peer.clone()
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().stream {
            Stream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().stream {
            Stream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().stream {
            Stream::Tcp(s) => Pin::new(s).poll_write_vectored(cx, bufs),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match &self.stream {
            Stream::Tcp(s) => s.is_write_vectored(),
            #[cfg(unix)]
            Stream::Unix(s) => s.is_write_vectored(),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().stream {
            Stream::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().stream {
            Stream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
