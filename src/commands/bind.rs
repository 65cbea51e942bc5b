//! BIND Command Handler
//!
//! Answers a SOCKS5 BIND request: ask the allocator for a listening port,
//! tell the client where it is, close the request stream.
//!
//! ```text
//!  Request ──> PortAllocator::allocate(dst)
//!                   │
//!          ┌────────┴─────────┐
//!          ▼                  ▼
//!    Bound(port)         Unavailable
//!          │                  │
//!          ▼                  ▼
//!  success reply       failure reply
//!  127.0.0.1:port      0.0.0.0:0
//!          └────────┬─────────┘
//!                   ▼
//!            close the stream
//! ```
//!
//! Allocation failures never surface as errors; the client learns about
//! them through the reply code.

use crate::allocator::{BindEndpoint, PortAllocator};
use crate::protocol::{Reply, ReplyCode, Request};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Handles BIND requests against a port allocator.
pub struct BindCommandHandler<A> {
    allocator: Arc<A>,
    advertised_ip: IpAddr,
    failure_code: ReplyCode,
}

impl<A> Clone for BindCommandHandler<A> {
    fn clone(&self) -> Self {
        Self {
            allocator: Arc::clone(&self.allocator),
            advertised_ip: self.advertised_ip,
            failure_code: self.failure_code,
        }
    }
}

impl<A: PortAllocator> BindCommandHandler<A> {
    /// Creates a handler that advertises the loopback address and reports
    /// allocation failures as a general server failure.
    pub fn new(allocator: Arc<A>) -> Self {
        Self {
            allocator,
            advertised_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            failure_code: ReplyCode::GeneralFailure,
        }
    }

    /// Overrides the address placed in success replies.
    pub fn with_advertised_ip(mut self, ip: IpAddr) -> Self {
        self.advertised_ip = ip;
        self
    }

    /// Overrides the reply code sent when no port could be allocated.
    pub fn with_failure_code(mut self, code: ReplyCode) -> Self {
        self.failure_code = code;
        self
    }

    pub fn allocator(&self) -> &Arc<A> {
        &self.allocator
    }

    /// Handles one BIND request and closes `stream` afterwards.
    ///
    /// Exactly one reply is written. Write and close errors are logged,
    /// never returned.
    pub async fn handle<S>(&self, mut stream: S, request: &Request)
    where
        S: AsyncWrite + Unpin,
    {
        let endpoint = self.allocator.allocate(&request.destination).await;

        let reply = match endpoint {
            BindEndpoint::Bound(bound) => {
                debug!(destination = %request.destination, port = bound.port(), "BIND port allocated");
                Reply::new(
                    SocketAddr::new(self.advertised_ip, bound.port()),
                    ReplyCode::Succeeded,
                )
            }
            BindEndpoint::Unavailable => {
                debug!(destination = %request.destination, "No port available for BIND");
                Reply::failure(self.failure_code)
            }
        };

        if let Err(e) = reply.write_to(&mut stream).await {
            debug!(error = %e, "Failed to send BIND reply");
        }

        if let Err(e) = stream.shutdown().await {
            trace!(error = %e, "Failed to close request stream");
        }
    }
}
