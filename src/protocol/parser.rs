//! Incremental SOCKS5 Frame Parser
//!
//! Parsers read from a buffer and return either:
//! - `Ok(Some((frame, consumed)))` - a complete frame, `consumed` bytes used
//! - `Ok(None)` - the frame is incomplete, read more data
//! - `Err(ParseError)` - the bytes are not valid SOCKS5
//!
//! This lets the connection handler append whatever the socket delivers to
//! a buffer and retry until a full frame is available.

use crate::protocol::types::{atyp, Address, Command, Greeting, Request, SOCKS_VERSION};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use thiserror::Error;

/// Errors that can occur while parsing SOCKS5 frames.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// The version byte was not 0x05
    #[error("unsupported protocol version: {0:#04x}")]
    InvalidVersion(u8),

    /// The greeting listed no authentication methods
    #[error("greeting offers no authentication methods")]
    NoMethods,

    /// Unknown request command
    #[error("unknown command: {0:#04x}")]
    UnknownCommand(u8),

    /// The reserved byte must be zero
    #[error("reserved byte must be zero, got {0:#04x}")]
    InvalidReserved(u8),

    /// Unknown address type
    #[error("unknown address type: {0:#04x}")]
    UnknownAddressType(u8),

    /// Domain names must be at least one byte long
    #[error("empty domain name")]
    EmptyDomain,

    /// Domain name is not valid UTF-8
    #[error("invalid UTF-8 in domain name: {0}")]
    InvalidUtf8(String),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Parses the client greeting: `VER | NMETHODS | METHODS`.
pub fn parse_greeting(buf: &[u8]) -> ParseResult<Option<(Greeting, usize)>> {
    if buf.len() < 2 {
        return Ok(None);
    }
    check_version(buf[0])?;

    let count = buf[1] as usize;
    if count == 0 {
        return Err(ParseError::NoMethods);
    }

    let end = 2 + count;
    if buf.len() < end {
        return Ok(None);
    }

    let greeting = Greeting {
        methods: buf[2..end].to_vec(),
    };
    Ok(Some((greeting, end)))
}

/// Parses a request: `VER | CMD | RSV | ATYP | DST.ADDR | DST.PORT`.
pub fn parse_request(buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    check_version(buf[0])?;

    let command = Command::from_u8(buf[1]).ok_or(ParseError::UnknownCommand(buf[1]))?;
    if buf[2] != 0x00 {
        return Err(ParseError::InvalidReserved(buf[2]));
    }

    let Some((destination, consumed)) = parse_address(&buf[3..])? else {
        return Ok(None);
    };

    Ok(Some((
        Request {
            command,
            destination,
        },
        3 + consumed,
    )))
}

/// Parses `ATYP | ADDR | PORT`.
fn parse_address(buf: &[u8]) -> ParseResult<Option<(Address, usize)>> {
    let Some(&kind) = buf.first() else {
        return Ok(None);
    };

    match kind {
        atyp::IPV4 => {
            let end = 1 + 4 + 2;
            if buf.len() < end {
                return Ok(None);
            }
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&buf[1..5]);
            let port = read_port(&buf[5..7]);
            let addr = SocketAddr::new(Ipv4Addr::from(octets).into(), port);
            Ok(Some((Address::Ip(addr), end)))
        }
        atyp::IPV6 => {
            let end = 1 + 16 + 2;
            if buf.len() < end {
                return Ok(None);
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[1..17]);
            let port = read_port(&buf[17..19]);
            let addr = SocketAddr::new(Ipv6Addr::from(octets).into(), port);
            Ok(Some((Address::Ip(addr), end)))
        }
        atyp::DOMAIN => {
            let Some(&len) = buf.get(1) else {
                return Ok(None);
            };
            if len == 0 {
                return Err(ParseError::EmptyDomain);
            }

            let name_end = 2 + len as usize;
            let end = name_end + 2;
            if buf.len() < end {
                return Ok(None);
            }

            let host = std::str::from_utf8(&buf[2..name_end])
                .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?
                .to_string();
            let port = read_port(&buf[name_end..end]);
            Ok(Some((Address::Domain(host, port), end)))
        }
        other => Err(ParseError::UnknownAddressType(other)),
    }
}

fn check_version(byte: u8) -> ParseResult<()> {
    if byte == SOCKS_VERSION {
        Ok(())
    } else {
        Err(ParseError::InvalidVersion(byte))
    }
}

fn read_port(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}
