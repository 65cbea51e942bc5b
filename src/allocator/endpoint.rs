//! Bound Endpoints and the Allocation Seam
//!
//! The BIND handler asks a [`PortAllocator`] for a listening endpoint and
//! only cares about one thing in the answer: which port, if any, is now
//! waiting for the inbound connection.

use crate::protocol::Address;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};

/// The outcome of a port allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindEndpoint {
    /// A listener is bound and waiting on this address
    Bound(SocketAddr),
    /// No port could be allocated
    Unavailable,
}

impl BindEndpoint {
    /// Builds an endpoint from a raw port, where port 0 means "no port".
    pub fn from_port(ip: IpAddr, port: u16) -> Self {
        if port == 0 {
            BindEndpoint::Unavailable
        } else {
            BindEndpoint::Bound(SocketAddr::new(ip, port))
        }
    }

    /// The allocated port, or 0 when unavailable.
    pub fn port(&self) -> u16 {
        match self {
            BindEndpoint::Bound(addr) => addr.port(),
            BindEndpoint::Unavailable => 0,
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, BindEndpoint::Bound(_))
    }
}

/// Allocates a listening endpoint for a BIND request.
///
/// Implementations own the listener they create and are responsible for
/// delivering the eventual inbound connection. Failure is reported as
/// [`BindEndpoint::Unavailable`], never as an error.
pub trait PortAllocator: Send + Sync {
    fn allocate(&self, target: &Address) -> impl Future<Output = BindEndpoint> + Send;
}
