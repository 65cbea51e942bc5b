//! Acceptor-Backed Port Binder
//!
//! [`PortBinder`] answers BIND allocations by starting a fresh
//! [`AsyncAcceptor`] on an ephemeral port. The inbound connection, when it
//! arrives, is pushed onto a channel for whoever relays data.
//!
//! ```text
//!  allocate(target)
//!        │
//!        ▼
//!  AsyncAcceptor::start((bind_ip, 0)) ──> port reported to the client
//!        │
//!        ├── peer connects ──> InboundConnection ──> mpsc channel
//!        └── accept_timeout ──> stop()
//! ```
//!
//! Each allocation is independent: one acceptor, one port, one connection.

use crate::acceptor::{AsyncAcceptor, StreamOf, TcpTransport, Transport};
use crate::allocator::endpoint::{BindEndpoint, PortAllocator};
use crate::protocol::Address;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Default time a BIND listener waits for its inbound connection.
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for the port binder.
#[derive(Debug, Clone)]
pub struct BinderConfig {
    /// Interface BIND listeners are opened on (default: 0.0.0.0)
    pub bind_ip: IpAddr,

    /// How long a listener waits before giving up (default: 60s)
    pub accept_timeout: Duration,
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
        }
    }
}

/// A connection that arrived on a BIND listener.
#[derive(Debug)]
pub struct InboundConnection<S> {
    /// The destination named in the BIND request
    pub target: Address,
    /// Address of the peer that connected
    pub peer_addr: SocketAddr,
    /// The accepted connection
    pub stream: S,
}

/// Allocates BIND ports by starting one single-shot acceptor per request.
pub struct PortBinder<T: Transport + Clone = TcpTransport> {
    transport: T,
    config: BinderConfig,
    inbound_tx: mpsc::UnboundedSender<InboundConnection<StreamOf<T>>>,
    pending: Arc<AtomicUsize>,
}

impl PortBinder<TcpTransport> {
    /// Creates a binder over Tokio TCP sockets.
    pub fn tcp(
        config: BinderConfig,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<InboundConnection<StreamOf<TcpTransport>>>,
    ) {
        Self::new(TcpTransport, config)
    }
}

impl<T: Transport + Clone> PortBinder<T> {
    /// Creates a binder and the receiving end for inbound connections.
    pub fn new(
        transport: T,
        config: BinderConfig,
    ) -> (Self, mpsc::UnboundedReceiver<InboundConnection<StreamOf<T>>>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let binder = Self {
            transport,
            config,
            inbound_tx,
            pending: Arc::new(AtomicUsize::new(0)),
        };
        (binder, inbound_rx)
    }

    pub fn config(&self) -> &BinderConfig {
        &self.config
    }

    /// Number of listeners still waiting for their connection.
    pub fn pending_binds(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Opens a listener for `target` and returns the bound endpoint.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(&self, target: &Address) -> BindEndpoint {
        let (released_tx, released_rx) = oneshot::channel::<()>();
        let pending = Arc::clone(&self.pending);
        pending.fetch_add(1, Ordering::AcqRel);

        let acceptor = AsyncAcceptor::new(self.transport.clone()).with_release_hook(move || {
            pending.fetch_sub(1, Ordering::AcqRel);
            let _ = released_tx.send(());
        });

        let inbound_tx = self.inbound_tx.clone();
        let inbound_target = target.clone();
        let endpoint = SocketAddr::new(self.config.bind_ip, 0);

        let started = acceptor.start(endpoint, move |accepted, _| {
            let inbound = InboundConnection {
                target: inbound_target,
                peer_addr: accepted.peer_addr,
                stream: accepted.stream,
            };
            if inbound_tx.send(inbound).is_err() {
                warn!("Inbound connection receiver dropped, closing connection");
            }
        });

        if let Err(e) = started {
            warn!(destination = %target, error = %e, "Failed to open BIND listener");
            acceptor.stop();
            return BindEndpoint::Unavailable;
        }

        let Some(bound) = acceptor.local_addr() else {
            acceptor.stop();
            return BindEndpoint::Unavailable;
        };

        info!(destination = %target, bound = %bound, "BIND listener opened");

        let timeout = self.config.accept_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    debug!(bound = %bound, "BIND listener timed out");
                    acceptor.stop();
                }
                _ = released_rx => {}
            }
        });

        BindEndpoint::Bound(bound)
    }
}

impl<T: Transport + Clone> PortAllocator for PortBinder<T> {
    fn allocate(&self, target: &Address) -> impl Future<Output = BindEndpoint> + Send {
        let endpoint = self.bind(target);
        async move { endpoint }
    }
}
