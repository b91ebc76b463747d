//! Listener selection.
//!
//! Binds one listening socket (TCP or Unix domain) and decides whether
//! accepted connections are served in the clear or after a TLS server
//! handshake.

use crate::config::{Config, ListenAddr};
use crate::echo::{self, Summary};
use crate::tls::{self, TlsError};
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio_rustls::TlsAcceptor;

/// Source of incoming connections for the accept loop.
pub trait Accept {
    /// Accept the next connection with its local and peer endpoints.
    fn accept(&self) -> impl Future<Output = io::Result<(Incoming, Endpoint, Endpoint)>> + Send;

    fn local_addr(&self) -> io::Result<Endpoint>;

    fn is_tls(&self) -> bool;
}

/// One side of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Inet(SocketAddr),
    /// Unix socket path; unnamed client sockets have none.
    Unix(Option<PathBuf>),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Inet(addr) => write!(f, "{addr}"),
            Endpoint::Unix(Some(path)) => write!(f, "{}", path.display()),
            Endpoint::Unix(None) => write!(f, "(unnamed)"),
        }
    }
}

impl From<tokio::net::unix::SocketAddr> for Endpoint {
    fn from(addr: tokio::net::unix::SocketAddr) -> Self {
        Endpoint::Unix(addr.as_pathname().map(Path::to_path_buf))
    }
}

enum Socket {
    Tcp(TcpListener),
    Unix(UnixListener),
}

/// A bound listener, plain or TLS-terminating.
pub struct Listener {
    socket: Socket,
    acceptor: Option<TlsAcceptor>,
}

/// An accepted stream before any TLS handshake.
pub enum Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

/// An accepted connection whose transport is not yet established.
pub struct Incoming {
    stream: Stream,
    acceptor: Option<TlsAcceptor>,
}

impl Listener {
    /// Bind the listening socket described by `config`.
    ///
    /// In TLS mode the identity is loaded before binding, so a malformed
    /// certificate or key never leaves a socket behind.
    pub fn bind(config: &Config) -> Result<Self, ListenError> {
        let acceptor = match config.tls {
            Some(ref paths) => Some(tls::load_acceptor(paths).map_err(ListenError::Tls)?),
            None => None,
        };

        let socket = match config.listen {
            ListenAddr::Tcp(addr) => create_listener(addr, config.backlog).map(Socket::Tcp),
            ListenAddr::Unix(ref path) => {
                create_unix_listener(path, config.backlog).map(Socket::Unix)
            }
        }
        .map_err(|e| ListenError::Bind(config.listen.clone(), e))?;

        Ok(Listener { socket, acceptor })
    }
}

impl Accept for Listener {
    /// No handshake happens here.
    async fn accept(&self) -> io::Result<(Incoming, Endpoint, Endpoint)> {
        let (stream, local, peer) = match self.socket {
            Socket::Tcp(ref listener) => {
                let (stream, peer) = listener.accept().await?;
                let local = stream.local_addr()?;
                (Stream::Tcp(stream), Endpoint::Inet(local), Endpoint::Inet(peer))
            }
            Socket::Unix(ref listener) => {
                let (stream, peer) = listener.accept().await?;
                let local = stream.local_addr()?;
                (Stream::Unix(stream), local.into(), peer.into())
            }
        };
        let incoming = Incoming {
            stream,
            acceptor: self.acceptor.clone(),
        };
        Ok((incoming, local, peer))
    }

    fn local_addr(&self) -> io::Result<Endpoint> {
        match self.socket {
            Socket::Tcp(ref listener) => listener.local_addr().map(Endpoint::Inet),
            Socket::Unix(ref listener) => listener.local_addr().map(Endpoint::from),
        }
    }

    fn is_tls(&self) -> bool {
        self.acceptor.is_some()
    }
}

impl Incoming {
    #[cfg(test)]
    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    /// No-op on Unix sockets.
    pub fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        match self.stream {
            Stream::Tcp(ref stream) => stream.set_nodelay(nodelay),
            Stream::Unix(_) => Ok(()),
        }
    }

    /// Complete the transport (TLS handshake if needed) and run the echo
    /// loop until the connection closes.
    ///
    /// A failed handshake returns the error; the socket is dropped with it.
    pub async fn serve(self, buffer_size: usize) -> io::Result<Summary> {
        match (self.stream, self.acceptor) {
            (Stream::Tcp(stream), None) => Ok(echo::handle_connection(stream, buffer_size).await),
            (Stream::Unix(stream), None) => Ok(echo::handle_connection(stream, buffer_size).await),
            (Stream::Tcp(stream), Some(acceptor)) => {
                let stream = acceptor.accept(stream).await?;
                Ok(echo::handle_connection(stream, buffer_size).await)
            }
            (Stream::Unix(stream), Some(acceptor)) => {
                let stream = acceptor.accept(stream).await?;
                Ok(echo::handle_connection(stream, buffer_size).await)
            }
        }
    }
}

/// Create a TCP listener with SO_REUSEADDR.
///
/// SO_REUSEPORT is left off so a second server on the same port fails to
/// bind.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    TcpListener::from_std(socket.into())
}

/// Create a Unix domain socket listener, replacing a stale socket file.
fn create_unix_listener(path: &Path, backlog: i32) -> io::Result<UnixListener> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }

    let socket = socket2::Socket::new(socket2::Domain::UNIX, socket2::Type::STREAM, None)?;
    socket.set_nonblocking(true)?;
    socket.bind(&socket2::SockAddr::unix(path)?)?;
    socket.listen(backlog)?;

    UnixListener::from_std(socket.into())
}

/// Fatal listener construction errors
#[derive(Debug)]
pub enum ListenError {
    Bind(ListenAddr, io::Error),
    Tls(TlsError),
}

impl std::fmt::Display for ListenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenError::Bind(addr, e) => write!(f, "Couldn't start listening on {addr}: {e}"),
            ListenError::Tls(e) => write!(f, "Couldn't load TLS identity: {e}"),
        }
    }
}

impl std::error::Error for ListenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenError::Bind(_, e) => Some(e),
            ListenError::Tls(e) => Some(e),
        }
    }
}
