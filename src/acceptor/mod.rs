//! Single-Shot Acceptor Module
//!
//! A protocol-agnostic building block: listen on one endpoint, hand exactly
//! one inbound connection to a callback, then release the socket.
//!
//! ## Modules
//!
//! - `guard`: the once-only release flag that serializes teardown
//! - `transport`: the injected listen/accept capability and its TCP implementation
//! - `single_shot`: the `AsyncAcceptor` itself
//!
//! ## Example
//!
//! ```ignore
//! use socksbind::acceptor::AsyncAcceptor;
//!
//! let acceptor = AsyncAcceptor::tcp();
//! let inbound = acceptor.start_oneshot("127.0.0.1:0".parse::<std::net::SocketAddr>()?)?;
//! let port = acceptor.local_addr().unwrap().port();
//!
//! // ...tell the peer about `port`...
//!
//! let accepted = inbound.await?;
//! ```

pub mod guard;
pub mod single_shot;
pub mod transport;

// Re-export commonly used types for convenience
pub use guard::ReleaseGuard;
pub use single_shot::{Accepted, AcceptorError, AcceptorState, AsyncAcceptor, StreamOf};
pub use transport::{BoundTcpListener, Listener, TcpTransport, Transport, LISTEN_BACKLOG};
