//! # socksbind - SOCKS5 BIND on a Single-Shot Acceptor
//!
//! socksbind implements the SOCKS5 BIND command: the proxy opens a listening
//! socket for the client, reports where it is, and waits for exactly one
//! inbound connection without dedicating a thread to `accept`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              socksbind                                  │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌────────────────────┐           │
//! │  │ TCP Server  │───>│ Connection  │───>│ BindCommandHandler │           │
//! │  │ (Listener)  │    │  Handler    │    └─────────┬──────────┘           │
//! │  └─────────────┘    └──────┬──────┘              │ allocate()           │
//! │                            │                     ▼                      │
//! │                     ┌──────┴──────┐    ┌────────────────────┐           │
//! │                     │   SOCKS5    │    │     PortBinder     │           │
//! │                     │   Parser    │    │  ┌──────────────┐  │           │
//! │                     └─────────────┘    │  │AsyncAcceptor │  │──> inbound│
//! │                                        │  │ (one-shot)   │  │   channel │
//! │                                        │  └──────────────┘  │           │
//! │                                        └────────────────────┘           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use socksbind::allocator::{BinderConfig, PortBinder};
//! use socksbind::commands::BindCommandHandler;
//! use socksbind::connection::{handle_connection, ConnectionStats};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (binder, mut inbound) = PortBinder::tcp(BinderConfig::default());
//!     let bind_handler = BindCommandHandler::new(Arc::new(binder));
//!     let stats = Arc::new(ConnectionStats::new());
//!
//!     tokio::spawn(async move {
//!         while let Some(connection) = inbound.recv().await {
//!             println!("BIND peer {} connected", connection.peer_addr);
//!         }
//!     });
//!
//!     let listener = TcpListener::bind("127.0.0.1:1080").await.unwrap();
//!     loop {
//!         let (stream, addr) = listener.accept().await.unwrap();
//!         tokio::spawn(handle_connection(stream, addr, bind_handler.clone(), Arc::clone(&stats)));
//!     }
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`acceptor`]: The single-shot, completion-driven acceptor
//! - [`allocator`]: Port allocation for BIND, backed by acceptors
//! - [`commands`]: The BIND command handler
//! - [`protocol`]: SOCKS5 frame parsing and reply encoding
//! - [`connection`]: Client connection management
//!
//! ## Design Highlights
//!
//! ### Exactly-Once Teardown
//!
//! An acceptor can be stopped by its own completion, by a timeout, or by
//! anyone holding a handle, all at the same time. An atomic
//! compare-and-set flag picks one winner; only the winner releases the
//! socket and runs the release hook.
//!
//! ### Single Shot
//!
//! A BIND request gets exactly one reverse connection. After delivering it
//! the acceptor closes its socket, so the port is never left open.

pub mod acceptor;
pub mod allocator;
pub mod commands;
pub mod connection;
pub mod protocol;

// Re-export commonly used types for convenience
pub use acceptor::{Accepted, AcceptorError, AcceptorState, AsyncAcceptor};
pub use allocator::{BindEndpoint, BinderConfig, PortAllocator, PortBinder};
pub use commands::BindCommandHandler;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{ParseError, Reply, ReplyCode, Request};

/// The default port the proxy listens on
pub const DEFAULT_PORT: u16 = 1080;

/// The default host the proxy binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of socksbind
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
