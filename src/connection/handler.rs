//! Connection Handler Module
//!
//! This module drives a single SOCKS5 client connection from greeting to
//! the command reply.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. Greeting: VER NMETHODS METHODS
//!        │          └── no "no authentication" offered ──> 0xFF, close
//!        ▼
//! 3. Method selection: VER 0x00
//!        │
//!        ▼
//! 4. Request: VER CMD RSV ATYP DST.ADDR DST.PORT
//!        │          └── malformed ──> failure reply, close
//!        ▼
//! 5. Dispatch
//!        ├── BIND ──> BindCommandHandler (replies and closes)
//!        └── other ──> CommandNotSupported, close
//! ```
//!
//! ## Buffer Management
//!
//! Frames may arrive split across reads, or the request may arrive in the
//! same segment as the greeting. Everything read goes into a `BytesMut`
//! and the incremental parsers consume exactly one frame at a time.

use crate::allocator::PortAllocator;
use crate::commands::BindCommandHandler;
use crate::protocol::types::method;
use crate::protocol::{
    method_selection, parse_greeting, parse_request, Command, ParseError, ParseResult, Reply,
    ReplyCode,
};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Maximum size for the read buffer. The largest request frame is 262 bytes.
const MAX_BUFFER_SIZE: usize = 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 512;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// BIND requests dispatched
    pub bind_requests: AtomicU64,
    /// Requests answered with CommandNotSupported
    pub unsupported_commands: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn bind_requested(&self) {
        self.bind_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unsupported_command(&self) {
        self.unsupported_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection.
pub struct ConnectionHandler<A> {
    /// The TCP stream for this connection
    stream: TcpStream,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// Handler for BIND requests (shared across connections)
    bind_handler: BindCommandHandler<A>,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl<A: PortAllocator> ConnectionHandler<A> {
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The TCP stream for this connection
    /// * `addr` - The client's socket address
    /// * `bind_handler` - The handler for BIND requests
    /// * `stats` - Shared connection statistics
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        bind_handler: BindCommandHandler<A>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream,
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            bind_handler,
            stats,
        }
    }

    /// Runs the connection to completion.
    pub async fn run(self) -> Result<(), ConnectionError> {
        let addr = self.addr;
        let stats = Arc::clone(&self.stats);
        info!(client = %addr, "Client connected");

        let result = self.serve().await;

        match &result {
            Ok(()) => debug!(client = %addr, "Client session finished"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %addr, "Client disconnected")
            }
            Err(ConnectionError::IoError(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %addr, error = %e, "Connection error"),
        }

        stats.connection_closed();
        result
    }

    /// Greeting, request, dispatch.
    async fn serve(mut self) -> Result<(), ConnectionError> {
        let greeting = self.read_frame(parse_greeting).await?;
        if !greeting.offers(method::NO_AUTH) {
            self.stream
                .write_all(&method_selection(method::NO_ACCEPTABLE))
                .await?;
            return Err(ConnectionError::NoAcceptableMethod);
        }
        self.stream
            .write_all(&method_selection(method::NO_AUTH))
            .await?;

        let request = match self.read_frame(parse_request).await {
            Ok(request) => request,
            Err(ConnectionError::ParseError(e)) => {
                let code = match e {
                    ParseError::UnknownCommand(_) => ReplyCode::CommandNotSupported,
                    ParseError::UnknownAddressType(_) => ReplyCode::AddressTypeNotSupported,
                    _ => ReplyCode::GeneralFailure,
                };
                if let Err(write_err) = Reply::failure(code).write_to(&mut self.stream).await {
                    debug!(client = %self.addr, error = %write_err, "Failed to send error reply");
                }
                return Err(ConnectionError::ParseError(e));
            }
            Err(e) => return Err(e),
        };

        debug!(
            client = %self.addr,
            command = %request.command,
            destination = %request.destination,
            "Request received"
        );

        match request.command {
            Command::Bind => {
                self.stats.bind_requested();
                self.bind_handler.handle(self.stream, &request).await;
            }
            other => {
                self.stats.unsupported_command();
                debug!(client = %self.addr, command = %other, "Command not supported");
                Reply::failure(ReplyCode::CommandNotSupported)
                    .write_to(&mut self.stream)
                    .await?;
                self.stream.shutdown().await?;
            }
        }

        Ok(())
    }

    /// Reads until `parse` yields a complete frame, then consumes it.
    async fn read_frame<T>(
        &mut self,
        parse: fn(&[u8]) -> ParseResult<Option<(T, usize)>>,
    ) -> Result<T, ConnectionError> {
        loop {
            if !self.buffer.is_empty() {
                if let Some((frame, consumed)) = parse(&self.buffer)? {
                    let _ = self.buffer.split_to(consumed);
                    trace!(
                        client = %self.addr,
                        consumed = consumed,
                        remaining = self.buffer.len(),
                        "Parsed frame"
                    );
                    return Ok(frame);
                }
            }

            self.read_more_data().await?;
        }
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            warn!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 256 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.read_buf(&mut self.buffer).await?;

        if n == 0 {
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            } else {
                return Err(ConnectionError::UnexpectedEof);
            }
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// SOCKS5 parse error
    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),

    /// The client offered no authentication method we support
    #[error("No acceptable authentication method")]
    NoAcceptableMethod,

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial frame)
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Buffer size limit exceeded
    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Handles a client connection.
///
/// This is a convenience function that creates a ConnectionHandler
/// and runs it to completion.
pub async fn handle_connection<A: PortAllocator>(
    stream: TcpStream,
    addr: SocketAddr,
    bind_handler: BindCommandHandler<A>,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, bind_handler, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}
