//! Command Handler Module
//!
//! Handlers for SOCKS5 request commands. Only BIND is implemented here;
//! the connection layer answers every other command with
//! `CommandNotSupported`.
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────────┐
//! │  SOCKS5 Parser      │  (protocol module)
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │ BindCommandHandler  │  (this module)
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │ PortAllocator       │  (allocator module)
//! └─────────────────────┘
//! ```

pub mod bind;

// Re-export the BIND handler
pub use bind::BindCommandHandler;
