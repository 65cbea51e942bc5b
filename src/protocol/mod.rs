//! SOCKS5 Protocol Implementation
//!
//! The subset of SOCKS5 needed to answer a BIND request: the method
//! greeting, the request frame, and the reply encoder.
//!
//! ## Modules
//!
//! - `types`: Commands, reply codes, addresses and reply serialization
//! - `parser`: Incremental parsers for the greeting and request frames
//!
//! ## Example
//!
//! ```ignore
//! use socksbind::protocol::{parse_request, Reply, ReplyCode};
//!
//! let data = [0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1, 0x1F, 0x90];
//! let (request, consumed) = parse_request(&data)?.unwrap();
//!
//! let reply = Reply::new("127.0.0.1:51234".parse()?, ReplyCode::Succeeded);
//! let bytes = reply.serialize();
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_greeting, parse_request, ParseError, ParseResult};
pub use types::{
    method_selection, write_reply, Address, Command, Greeting, Reply, ReplyCode, Request,
    SOCKS_VERSION,
};
