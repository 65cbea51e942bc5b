//! Connection Handler Module
//!
//! This module manages individual SOCKS5 client connections. Each client
//! is handled by its own async task.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                    (main.rs)                                │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept()
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────┐     │
//! │  │  Greeting   │───>│   Request   │───>│   Dispatch   │     │
//! │  └─────────────┘    └─────────────┘    └──────┬───────┘     │
//! │                                               │             │
//! │                           BIND ───────────────┤             │
//! │                                               ▼             │
//! │                                   ┌─────────────────────┐   │
//! │                                   │ BindCommandHandler  │   │
//! │                                   └─────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use socksbind::allocator::{BinderConfig, PortBinder};
//! use socksbind::commands::BindCommandHandler;
//! use socksbind::connection::{handle_connection, ConnectionStats};
//! use std::sync::Arc;
//!
//! let (binder, inbound) = PortBinder::tcp(BinderConfig::default());
//! let bind_handler = BindCommandHandler::new(Arc::new(binder));
//! let stats = Arc::new(ConnectionStats::new());
//!
//! // For each accepted connection...
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, bind_handler.clone(), Arc::clone(&stats)));
//! ```

pub mod handler;

// Re-export commonly used types
pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
