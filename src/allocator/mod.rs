//! Port Allocation Module
//!
//! Supplies the BIND command with a listening endpoint.
//!
//! - `endpoint`: `BindEndpoint` and the `PortAllocator` trait
//! - `binder`: `PortBinder`, which backs every allocation with an `AsyncAcceptor`

pub mod binder;
pub mod endpoint;

// Re-export commonly used types
pub use binder::{BinderConfig, InboundConnection, PortBinder, DEFAULT_ACCEPT_TIMEOUT};
pub use endpoint::{BindEndpoint, PortAllocator};
