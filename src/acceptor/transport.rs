//! Listen + Accept Capability
//!
//! The acceptor never touches sockets directly. It is handed a [`Transport`]
//! that knows how to bind a listening endpoint, and the [`Listener`] it
//! produces knows how to accept one connection, either right away
//! ([`Listener::try_accept`]) or by registering with the runtime's I/O
//! driver ([`Listener::poll_accept`]).
//!
//! [`TcpTransport`] is the production implementation on top of Tokio.
//! Tests plug in doubles that complete synchronously, fail, or never
//! complete at all.

use futures::task::noop_waker_ref;
use std::io;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

/// Backlog used for listening sockets.
pub const LISTEN_BACKLOG: u32 = 256;

/// Something that can open a listening endpoint.
pub trait Transport: Send + Sync + 'static {
    /// The listening socket type this transport produces.
    type Listener: Listener;

    /// Binds and starts listening on `endpoint`.
    ///
    /// Port 0 asks the transport for an ephemeral port; the actual
    /// endpoint is available through [`Listener::local_addr`].
    fn bind(&self, endpoint: SocketAddr) -> io::Result<Self::Listener>;
}

/// A listening socket able to accept connections.
pub trait Listener: Send + Sync + 'static {
    /// The connection type handed out on a successful accept.
    type Stream: Send + 'static;

    /// The endpoint the socket is actually bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Attempts an accept without waiting.
    ///
    /// `Ok(None)` means nothing is pending yet and the caller should fall
    /// back to [`Listener::poll_accept`].
    fn try_accept(&self) -> io::Result<Option<(Self::Stream, SocketAddr)>> {
        let mut cx = Context::from_waker(noop_waker_ref());
        match self.poll_accept(&mut cx) {
            Poll::Ready(result) => result.map(Some),
            Poll::Pending => Ok(None),
        }
    }

    /// Polls for the next inbound connection.
    ///
    /// Takes `&self` so the caller can poll through a lock and drop the
    /// listener between polls; dropping it closes the socket.
    fn poll_accept(&self, cx: &mut Context<'_>) -> Poll<io::Result<(Self::Stream, SocketAddr)>>;

    /// Prepares an accepted stream before it is handed to the caller.
    fn configure(&self, stream: &Self::Stream) -> io::Result<()>;
}

/// TCP transport backed by Tokio sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    type Listener = BoundTcpListener;

    fn bind(&self, endpoint: SocketAddr) -> io::Result<BoundTcpListener> {
        let socket = if endpoint.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.bind(endpoint)?;
        let inner = socket.listen(LISTEN_BACKLOG)?;
        Ok(BoundTcpListener { inner })
    }
}

/// A Tokio `TcpListener` registered with the runtime's I/O driver.
#[derive(Debug)]
pub struct BoundTcpListener {
    inner: TcpListener,
}

impl Listener for BoundTcpListener {
    type Stream = TcpStream;

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    fn poll_accept(&self, cx: &mut Context<'_>) -> Poll<io::Result<(TcpStream, SocketAddr)>> {
        self.inner.poll_accept(cx)
    }

    fn configure(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(true)
    }
}
