//! Single-Shot Asynchronous Acceptor
//!
//! [`AsyncAcceptor`] owns one listening socket and waits for exactly one
//! inbound connection without parking a thread on `accept`.
//!
//! ## Lifecycle
//!
//! ```text
//!   Created ──start()──> Listening ──┬── connection ──> on_connected ──> stop()
//!                                    ├── accept error ───────────────> stop()
//!                                    └── stop() from anywhere
//!                                                 │
//!                                                 ▼
//!                                              Stopped (terminal)
//! ```
//!
//! ## Completion
//!
//! `start()` binds, then makes one accept attempt on the calling stack. If a
//! client is already waiting, the completion handler runs inline before
//! `start()` returns. Otherwise a Tokio task awaits the accept and the
//! handler runs on whichever worker the I/O driver wakes.
//!
//! ## Teardown
//!
//! Every path ends in [`AsyncAcceptor::stop`]. A [`ReleaseGuard`] makes the
//! body of `stop()` run exactly once no matter how many tasks race on it:
//! the winner closes the listener, cancels the pending accept, drops the
//! callback and runs the release hook. A cancelled accept resolves as
//! "aborted" and returns without touching anything.
//!
//! The listener lives only in the acceptor's resource slot. The pending
//! accept polls it through the lock, so the socket is closed by the time
//! `stop()` returns.

use super::guard::ReleaseGuard;
use super::transport::{Listener, TcpTransport, Transport};
use std::fmt;
use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tracing::{debug, trace, warn};

const CREATED: u8 = 0;
const LISTENING: u8 = 1;
const STOPPED: u8 = 2;

/// The stream type produced by a transport's listener.
pub type StreamOf<T> = <<T as Transport>::Listener as Listener>::Stream;

type OnConnected<T> = Box<dyn FnOnce(Accepted<StreamOf<T>>, &AsyncAcceptor<T>) + Send>;
type ReleaseHook = Box<dyn FnOnce() + Send>;

/// Lifecycle state of an acceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptorState {
    /// Constructed, not started yet
    Created,
    /// Bound and waiting for the inbound connection
    Listening,
    /// Released; terminal
    Stopped,
}

impl AcceptorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            CREATED => AcceptorState::Created,
            LISTENING => AcceptorState::Listening,
            _ => AcceptorState::Stopped,
        }
    }
}

/// A successfully accepted, ready-to-use connection.
#[derive(Debug)]
pub struct Accepted<S> {
    /// The connection, already configured (`TCP_NODELAY` for TCP)
    pub stream: S,
    /// Remote address of the connecting peer
    pub peer_addr: SocketAddr,
}

/// Errors returned by [`AsyncAcceptor::start`].
#[derive(Debug, thiserror::Error)]
pub enum AcceptorError {
    /// No listen endpoint was supplied
    #[error("listen endpoint is not configured")]
    InvalidConfiguration,

    /// `start` was already called on this acceptor
    #[error("acceptor has already been started")]
    AlreadyStarted,

    /// The acceptor was stopped before it could start listening
    #[error("acceptor is stopped")]
    Stopped,

    /// `start` was called outside a Tokio runtime
    #[error("acceptor must be started from within a Tokio runtime")]
    NoRuntime,

    /// Binding the listen endpoint failed
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Everything teardown has to release, taken out in one piece.
struct Resources<T: Transport> {
    listener: Option<T::Listener>,
    on_connected: Option<OnConnected<T>>,
    release_hook: Option<ReleaseHook>,
}

impl<T: Transport> Default for Resources<T> {
    fn default() -> Self {
        Self {
            listener: None,
            on_connected: None,
            release_hook: None,
        }
    }
}

struct Inner<T: Transport> {
    transport: T,
    state: AtomicU8,
    released: ReleaseGuard,
    local_addr: OnceLock<SocketAddr>,
    resources: Mutex<Resources<T>>,
    /// Flipped to `true` once by `stop()`; the pending accept watches it.
    cancel: watch::Sender<bool>,
}

impl<T: Transport> Inner<T> {
    fn lock_resources(&self) -> MutexGuard<'_, Resources<T>> {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A listener that accepts one connection and then shuts itself down.
///
/// Handles are cheap to clone; all clones refer to the same acceptor, so a
/// timeout task or a client hang-up can `stop()` it from anywhere.
///
/// Dropping every handle does not stop a started acceptor: the pending
/// accept keeps its own handle, and the port stays bound until a peer
/// connects or someone calls [`stop`](Self::stop). Callers that may give up
/// waiting must arrange a `stop()`, as `PortBinder` does with its accept
/// timeout.
///
/// # Example
///
/// ```ignore
/// use socksbind::acceptor::AsyncAcceptor;
///
/// let acceptor = AsyncAcceptor::tcp();
/// acceptor.start("127.0.0.1:0".parse::<std::net::SocketAddr>()?, |accepted, _| {
///     println!("inbound connection from {}", accepted.peer_addr);
/// })?;
/// println!("waiting on {:?}", acceptor.local_addr());
/// ```
pub struct AsyncAcceptor<T: Transport = TcpTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for AsyncAcceptor<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> fmt::Debug for AsyncAcceptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncAcceptor")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

impl AsyncAcceptor<TcpTransport> {
    /// Creates an acceptor over plain Tokio TCP sockets.
    pub fn tcp() -> Self {
        Self::new(TcpTransport)
    }
}

impl<T: Transport> AsyncAcceptor<T> {
    /// Creates an acceptor that will listen through `transport`.
    pub fn new(transport: T) -> Self {
        let (cancel, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                transport,
                state: AtomicU8::new(CREATED),
                released: ReleaseGuard::new(),
                local_addr: OnceLock::new(),
                resources: Mutex::new(Resources::default()),
                cancel,
            }),
        }
    }

    /// Installs a hook that runs once, at the end of teardown.
    ///
    /// If the acceptor is already stopped the hook runs immediately.
    pub fn with_release_hook<H>(self, hook: H) -> Self
    where
        H: FnOnce() + Send + 'static,
    {
        {
            let mut resources = self.inner.lock_resources();
            // stop() claims the guard before it takes the slot: a hook stored
            // while the guard is clear is always picked up by teardown.
            if !self.inner.released.is_released() {
                resources.release_hook = Some(Box::new(hook));
                drop(resources);
                return self;
            }
        }

        trace!("Acceptor already released, running release hook now");
        hook();
        self
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> AcceptorState {
        AcceptorState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Returns true once teardown has been claimed.
    pub fn is_stopped(&self) -> bool {
        self.inner.released.is_released()
    }

    /// The endpoint actually bound, including an ephemeral port.
    ///
    /// `None` until `start` has bound the listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.get().copied()
    }

    /// Binds `endpoint` and begins waiting for one connection.
    ///
    /// `on_connected` receives the configured connection and runs at most
    /// once. It may run inline, before `start` returns, when a client is
    /// already queued on the socket.
    pub fn start<F>(
        &self,
        endpoint: impl Into<Option<SocketAddr>>,
        on_connected: F,
    ) -> Result<(), AcceptorError>
    where
        F: FnOnce(Accepted<StreamOf<T>>, &AsyncAcceptor<T>) + Send + 'static,
    {
        let endpoint = endpoint.into().ok_or(AcceptorError::InvalidConfiguration)?;
        let runtime = Handle::try_current().map_err(|_| AcceptorError::NoRuntime)?;

        self.inner
            .state
            .compare_exchange(CREATED, LISTENING, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|current| match current {
                STOPPED => AcceptorError::Stopped,
                _ => AcceptorError::AlreadyStarted,
            })?;

        let listener = match self.bind(endpoint) {
            Ok(listener) => listener,
            Err(source) => {
                warn!(endpoint = %endpoint, error = %source, "Failed to bind listen endpoint");
                self.stop();
                return Err(AcceptorError::Bind { endpoint, source });
            }
        };

        {
            let mut resources = self.inner.lock_resources();
            // stop() claims the guard before taking the lock, so checking
            // under the lock leaves no window for a missed release.
            if self.inner.released.is_released() {
                return Err(AcceptorError::Stopped);
            }
            resources.listener = Some(listener);
            resources.on_connected = Some(Box::new(on_connected));
        }

        debug!(endpoint = ?self.local_addr(), "Acceptor listening");

        self.start_accept(&runtime);
        Ok(())
    }

    /// Like [`start`](Self::start), but delivers the connection through a
    /// one-shot channel.
    ///
    /// The receiver resolves to an error if the acceptor stops without a
    /// connection.
    pub fn start_oneshot(
        &self,
        endpoint: impl Into<Option<SocketAddr>>,
    ) -> Result<oneshot::Receiver<Accepted<StreamOf<T>>>, AcceptorError> {
        let (tx, rx) = oneshot::channel();
        self.start(endpoint, move |accepted, _| {
            let _ = tx.send(accepted);
        })?;
        Ok(rx)
    }

    /// Releases the acceptor. Idempotent and safe from any thread.
    ///
    /// The first call closes the listener, cancels a pending accept, clears
    /// the callback and runs the release hook. The socket is closed before
    /// it returns. Later calls do nothing.
    pub fn stop(&self) {
        if !self.inner.released.try_release() {
            trace!("Acceptor already released");
            return;
        }

        self.inner.state.store(STOPPED, Ordering::Release);

        let resources = std::mem::take(&mut *self.inner.lock_resources());
        self.inner.cancel.send_replace(true);

        drop(resources.listener);
        drop(resources.on_connected);
        if let Some(hook) = resources.release_hook {
            hook();
        }

        debug!(endpoint = ?self.local_addr(), "Acceptor stopped");
    }

    fn bind(&self, endpoint: SocketAddr) -> io::Result<T::Listener> {
        let listener = self.inner.transport.bind(endpoint)?;
        let bound = listener.local_addr()?;
        let _ = self.inner.local_addr.set(bound);
        Ok(listener)
    }

    /// Issues the single accept for this acceptor.
    fn start_accept(&self, runtime: &Handle) {
        let attempt = match self.inner.lock_resources().listener.as_ref() {
            Some(listener) => listener.try_accept(),
            None => {
                trace!("Listener released before accept was issued");
                return;
            }
        };

        match attempt {
            Ok(Some(accepted)) => {
                trace!("Accept completed synchronously");
                self.on_completed(Ok(accepted));
            }
            Ok(None) => {
                let acceptor = self.clone();
                let mut cancel = self.inner.cancel.subscribe();

                runtime.spawn(async move {
                    let outcome = tokio::select! {
                        outcome = poll_fn(|cx| acceptor.poll_accept(cx)) => outcome,
                        _ = cancel.wait_for(|stopped| *stopped) => None,
                    };
                    match outcome {
                        Some(outcome) => acceptor.on_completed(outcome),
                        None => trace!("Pending accept aborted"),
                    }
                });
            }
            Err(e) => self.on_completed(Err(e)),
        }
    }

    /// Polls the listener held in the resource slot.
    ///
    /// Resolves to `None` once `stop()` has taken the listener.
    fn poll_accept(
        &self,
        cx: &mut Context<'_>,
    ) -> Poll<Option<io::Result<(StreamOf<T>, SocketAddr)>>> {
        match self.inner.lock_resources().listener.as_ref() {
            Some(listener) => listener.poll_accept(cx).map(Some),
            None => Poll::Ready(None),
        }
    }

    /// Reacts to the resolution of the accept. Runs at most once.
    fn on_completed(&self, outcome: io::Result<(StreamOf<T>, SocketAddr)>) {
        let (stream, peer_addr) = match outcome {
            Ok(accepted) => accepted,
            Err(e) if self.is_stopped() => {
                trace!(error = %e, "Accept aborted by stop");
                return;
            }
            Err(e) => {
                warn!(endpoint = ?self.local_addr(), error = %e, "Accept failed");
                self.stop();
                return;
            }
        };

        let delivery = {
            let mut resources = self.inner.lock_resources();
            let configured = resources
                .listener
                .as_ref()
                .map(|listener| listener.configure(&stream));
            match configured {
                Some(Ok(())) => Ok(resources.on_connected.take()),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            }
        };

        match delivery {
            Ok(Some(on_connected)) => {
                debug!(peer = %peer_addr, endpoint = ?self.local_addr(), "Connection accepted");
                on_connected(Accepted { stream, peer_addr }, self);
            }
            Ok(None) => {
                trace!(peer = %peer_addr, "Acceptor released before delivery, dropping connection");
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "Failed to configure accepted connection");
            }
        }

        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;
    use std::task::ready;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio::time::Sleep;

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
    }

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    async fn wait_stopped<T: Transport>(acceptor: &AsyncAcceptor<T>) {
        for _ in 0..200 {
            if acceptor.state() == AcceptorState::Stopped {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("acceptor did not stop");
    }

    /// How a scripted listener resolves its accept.
    #[derive(Debug, Clone, Copy)]
    enum Script {
        /// A client is already queued: `try_accept` succeeds
        Immediate,
        /// `try_accept` fails on the calling stack
        ImmediateError,
        /// Nobody ever connects
        Pending,
        /// The accept resolves with an error after a delay
        FailAfter(Duration),
        /// A client connects after a delay
        ConnectAfter(Duration),
    }

    struct ScriptedTransport {
        script: Script,
        closed: Arc<AtomicUsize>,
    }

    impl ScriptedTransport {
        fn new(script: Script) -> (Self, Arc<AtomicUsize>) {
            let closed = counter();
            let transport = Self {
                script,
                closed: Arc::clone(&closed),
            };
            (transport, closed)
        }
    }

    struct ScriptedListener {
        script: Script,
        addr: SocketAddr,
        closed: Arc<AtomicUsize>,
        delay: Mutex<Option<Pin<Box<Sleep>>>>,
    }

    impl Drop for ScriptedListener {
        fn drop(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Transport for ScriptedTransport {
        type Listener = ScriptedListener;

        fn bind(&self, endpoint: SocketAddr) -> io::Result<ScriptedListener> {
            let port = if endpoint.port() == 0 { 40000 } else { endpoint.port() };
            Ok(ScriptedListener {
                script: self.script,
                addr: SocketAddr::new(endpoint.ip(), port),
                closed: Arc::clone(&self.closed),
                delay: Mutex::new(None),
            })
        }
    }

    impl Listener for ScriptedListener {
        type Stream = u32;

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(self.addr)
        }

        fn try_accept(&self) -> io::Result<Option<(u32, SocketAddr)>> {
            match self.script {
                Script::Immediate => Ok(Some((1, loopback(50001)))),
                Script::ImmediateError => Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "socket closed between bind and accept",
                )),
                _ => Ok(None),
            }
        }

        fn poll_accept(&self, cx: &mut Context<'_>) -> Poll<io::Result<(u32, SocketAddr)>> {
            let delay = match self.script {
                Script::FailAfter(delay) | Script::ConnectAfter(delay) => delay,
                _ => return Poll::Pending,
            };

            let mut timer = self.delay.lock().unwrap();
            let sleep = timer.get_or_insert_with(|| Box::pin(tokio::time::sleep(delay)));
            ready!(sleep.as_mut().poll(cx));

            match self.script {
                Script::FailAfter(_) => Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "accept failed",
                ))),
                _ => Poll::Ready(Ok((2, loopback(50002)))),
            }
        }

        fn configure(&self, _stream: &u32) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let acceptor = AsyncAcceptor::tcp();
        let result = acceptor.start(loopback(0), |_, _| {});

        assert!(matches!(result, Err(AcceptorError::NoRuntime)));
        assert_eq!(acceptor.state(), AcceptorState::Created);
    }

    #[tokio::test]
    async fn test_start_without_endpoint_fails() {
        let acceptor = AsyncAcceptor::tcp();
        let result = acceptor.start(None::<SocketAddr>, |_, _| {});

        assert!(matches!(result, Err(AcceptorError::InvalidConfiguration)));
        assert_eq!(acceptor.state(), AcceptorState::Created);
        assert!(acceptor.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_ephemeral_port_accepts_one_client() {
        let acceptor = AsyncAcceptor::tcp();
        let rx = acceptor.start_oneshot(loopback(0)).unwrap();

        let addr = acceptor.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(acceptor.state(), AcceptorState::Listening);

        let client = TcpStream::connect(addr).await.unwrap();
        let accepted = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(accepted.peer_addr, client.local_addr().unwrap());
        assert!(accepted.stream.nodelay().unwrap());

        wait_stopped(&acceptor).await;
    }

    #[tokio::test]
    async fn test_listener_closed_after_first_connection() {
        let acceptor = AsyncAcceptor::tcp();
        let rx = acceptor.start_oneshot(loopback(0)).unwrap();
        let addr = acceptor.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        let _accepted = rx.await.unwrap();
        wait_stopped(&acceptor).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_before_connection_cancels_accept() {
        let calls = counter();
        let acceptor = AsyncAcceptor::tcp();

        let calls_clone = Arc::clone(&calls);
        acceptor
            .start(loopback(0), move |_, _| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        let addr = acceptor.local_addr().unwrap();

        acceptor.stop();
        assert_eq!(acceptor.state(), AcceptorState::Stopped);

        // No yield: the socket must already be closed when stop() returns
        let refused = std::net::TcpStream::connect_timeout(&addr, Duration::from_millis(200));
        assert!(refused.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_closes_socket_with_accept_in_flight() {
        let (transport, closed) = ScriptedTransport::new(Script::Pending);
        let acceptor = AsyncAcceptor::new(transport);
        acceptor.start(loopback(0), |_, _| {}).unwrap();

        // Let the spawned accept register with the listener
        tokio::task::yield_now().await;
        assert_eq!(closed.load(Ordering::SeqCst), 0);

        acceptor.stop();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_accept_error_after_stop_is_aborted() {
        let (transport, closed) = ScriptedTransport::new(Script::Pending);
        let calls = counter();
        let hooks = counter();

        let hooks_clone = Arc::clone(&hooks);
        let acceptor = AsyncAcceptor::new(transport).with_release_hook(move || {
            hooks_clone.fetch_add(1, Ordering::SeqCst);
        });
        let calls_clone = Arc::clone(&calls);
        acceptor
            .start(loopback(0), move |_, _| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        acceptor.stop();
        acceptor.on_completed(Err(io::Error::new(
            io::ErrorKind::Interrupted,
            "accept cancelled",
        )));

        assert_eq!(hooks.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(acceptor.state(), AcceptorState::Stopped);
    }

    #[tokio::test]
    async fn test_connection_after_stop_is_dropped() {
        let (transport, _closed) = ScriptedTransport::new(Script::Pending);
        let calls = counter();
        let acceptor = AsyncAcceptor::new(transport);

        let calls_clone = Arc::clone(&calls);
        acceptor
            .start(loopback(0), move |_, _| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        acceptor.stop();
        acceptor.on_completed(Ok((3, loopback(50003))));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_accept_issued_after_stop_does_nothing() {
        let (transport, closed) = ScriptedTransport::new(Script::Immediate);
        let calls = counter();
        let hooks = counter();

        let hooks_clone = Arc::clone(&hooks);
        let acceptor = AsyncAcceptor::new(transport).with_release_hook(move || {
            hooks_clone.fetch_add(1, Ordering::SeqCst);
        });
        let calls_clone = Arc::clone(&calls);
        {
            // Same state start() leaves behind just before it issues the accept
            let mut resources = acceptor.inner.lock_resources();
            resources.listener = Some(acceptor.bind(loopback(0)).unwrap());
            resources.on_connected = Some(Box::new(
                move |_: Accepted<u32>, _: &AsyncAcceptor<ScriptedTransport>| {
                    calls_clone.fetch_add(1, Ordering::SeqCst);
                },
            ));
        }
        acceptor.inner.state.store(LISTENING, Ordering::Release);

        acceptor.stop();
        acceptor.start_accept(&Handle::current());
        tokio::task::yield_now().await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(hooks.load(Ordering::SeqCst), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_hook_added_after_stop_runs_immediately() {
        let hooks = counter();
        let acceptor = AsyncAcceptor::tcp();
        acceptor.stop();

        let hooks_clone = Arc::clone(&hooks);
        let acceptor = acceptor.with_release_hook(move || {
            hooks_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hooks.load(Ordering::SeqCst), 1);

        acceptor.stop();
        assert_eq!(hooks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_oneshot_errors_when_stopped_without_connection() {
        let acceptor = AsyncAcceptor::tcp();
        let rx = acceptor.start_oneshot(loopback(0)).unwrap();

        acceptor.stop();

        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_synchronous_completion_runs_inline() {
        let (transport, closed) = ScriptedTransport::new(Script::Immediate);
        let calls = counter();
        let acceptor = AsyncAcceptor::new(transport);

        let calls_clone = Arc::clone(&calls);
        acceptor
            .start(loopback(0), move |accepted, acceptor| {
                assert_eq!(accepted.stream, 1);
                assert_eq!(accepted.peer_addr, loopback(50001));
                // The callback runs before the internal stop
                assert_eq!(acceptor.state(), AcceptorState::Listening);
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        // No await in between: everything happened on the start() stack
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(acceptor.state(), AcceptorState::Stopped);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(acceptor.local_addr(), Some(loopback(40000)));
    }

    #[tokio::test]
    async fn test_synchronous_accept_error_stops_without_callback() {
        let (transport, closed) = ScriptedTransport::new(Script::ImmediateError);
        let calls = counter();
        let hooks = counter();

        let hooks_clone = Arc::clone(&hooks);
        let acceptor = AsyncAcceptor::new(transport).with_release_hook(move || {
            hooks_clone.fetch_add(1, Ordering::SeqCst);
        });

        let calls_clone = Arc::clone(&calls);
        acceptor
            .start(loopback(0), move |_, _| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert_eq!(acceptor.state(), AcceptorState::Stopped);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(hooks.load(Ordering::SeqCst), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_accept_failure_mid_flight_stops_without_callback() {
        let (transport, closed) = ScriptedTransport::new(Script::FailAfter(Duration::from_millis(10)));
        let calls = counter();
        let acceptor = AsyncAcceptor::new(transport);

        let calls_clone = Arc::clone(&calls);
        acceptor
            .start(loopback(0), move |_, _| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(acceptor.state(), AcceptorState::Listening);

        wait_stopped(&acceptor).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delayed_connection_delivered_once() {
        let (transport, closed) =
            ScriptedTransport::new(Script::ConnectAfter(Duration::from_millis(10)));
        let acceptor = AsyncAcceptor::new(transport);

        let rx = acceptor.start_oneshot(loopback(0)).unwrap();
        let accepted = rx.await.unwrap();

        assert_eq!(accepted.stream, 2);
        wait_stopped(&acceptor).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (transport, closed) = ScriptedTransport::new(Script::Pending);
        let hooks = counter();

        let hooks_clone = Arc::clone(&hooks);
        let acceptor = AsyncAcceptor::new(transport).with_release_hook(move || {
            hooks_clone.fetch_add(1, Ordering::SeqCst);
        });
        acceptor.start(loopback(0), |_, _| {}).unwrap();

        acceptor.stop();
        acceptor.stop();
        acceptor.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(hooks.load(Ordering::SeqCst), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(acceptor.state(), AcceptorState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_before_start_is_allowed() {
        let hooks = counter();
        let hooks_clone = Arc::clone(&hooks);
        let acceptor = AsyncAcceptor::tcp().with_release_hook(move || {
            hooks_clone.fetch_add(1, Ordering::SeqCst);
        });

        acceptor.stop();
        acceptor.stop();

        assert_eq!(hooks.load(Ordering::SeqCst), 1);
        assert!(matches!(
            acceptor.start(loopback(0), |_, _| {}),
            Err(AcceptorError::Stopped)
        ));
    }

    #[tokio::test]
    async fn test_second_start_rejected() {
        let (transport, _closed) = ScriptedTransport::new(Script::Pending);
        let acceptor = AsyncAcceptor::new(transport);

        acceptor.start(loopback(0), |_, _| {}).unwrap();
        assert!(matches!(
            acceptor.start(loopback(0), |_, _| {}),
            Err(AcceptorError::AlreadyStarted)
        ));

        acceptor.stop();
    }

    #[tokio::test]
    async fn test_bind_failure_reports_error_and_stops() {
        let occupied = tokio::net::TcpListener::bind(loopback(0)).await.unwrap();
        let addr = occupied.local_addr().unwrap();

        let acceptor = AsyncAcceptor::tcp();
        let result = acceptor.start(addr, |_, _| {});

        assert!(matches!(result, Err(AcceptorError::Bind { endpoint, .. }) if endpoint == addr));
        assert_eq!(acceptor.state(), AcceptorState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_stops_tear_down_once() {
        let (transport, closed) = ScriptedTransport::new(Script::Pending);
        let hooks = counter();

        let hooks_clone = Arc::clone(&hooks);
        let acceptor = AsyncAcceptor::new(transport).with_release_hook(move || {
            hooks_clone.fetch_add(1, Ordering::SeqCst);
        });
        acceptor.start(loopback(0), |_, _| {}).unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let acceptor = acceptor.clone();
                tokio::spawn(async move { acceptor.stop() })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(hooks.load(Ordering::SeqCst), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stop_racing_completion_tears_down_once() {
        for _ in 0..50 {
            let (transport, closed) =
                ScriptedTransport::new(Script::ConnectAfter(Duration::from_millis(1)));
            let calls = counter();
            let hooks = counter();

            let hooks_clone = Arc::clone(&hooks);
            let acceptor = AsyncAcceptor::new(transport).with_release_hook(move || {
                hooks_clone.fetch_add(1, Ordering::SeqCst);
            });

            let calls_clone = Arc::clone(&calls);
            acceptor
                .start(loopback(0), move |_, _| {
                    calls_clone.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();

            let canceller = acceptor.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                canceller.stop();
            })
            .await
            .unwrap();

            wait_stopped(&acceptor).await;
            tokio::time::sleep(Duration::from_millis(10)).await;

            assert!(calls.load(Ordering::SeqCst) <= 1);
            assert_eq!(hooks.load(Ordering::SeqCst), 1);
            assert_eq!(closed.load(Ordering::SeqCst), 1);
        }
    }
}
