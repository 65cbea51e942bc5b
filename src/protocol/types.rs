//! SOCKS5 Data Types
//!
//! Wire-level types for the parts of SOCKS5 (RFC 1928) the proxy speaks.
//!
//! ## Frame Formats
//!
//! ```text
//! Greeting:          VER | NMETHODS | METHODS (1..255)
//! Method selection:  VER | METHOD
//! Request:           VER | CMD | RSV | ATYP | DST.ADDR | DST.PORT
//! Reply:             VER | REP | RSV | ATYP | BND.ADDR | BND.PORT
//! ```
//!
//! `ATYP` is `0x01` (IPv4, 4 bytes), `0x03` (domain, length-prefixed) or
//! `0x04` (IPv6, 16 bytes). Ports are big-endian `u16`.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Protocol version byte
pub const SOCKS_VERSION: u8 = 0x05;

/// Authentication method identifiers
pub mod method {
    pub const NO_AUTH: u8 = 0x00;
    pub const GSSAPI: u8 = 0x01;
    pub const USERNAME_PASSWORD: u8 = 0x02;
    pub const NO_ACCEPTABLE: u8 = 0xFF;
}

/// Address type identifiers
pub mod atyp {
    pub const IPV4: u8 = 0x01;
    pub const DOMAIN: u8 = 0x03;
    pub const IPV6: u8 = 0x04;
}

/// Request commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Bind,
    UdpAssociate,
}

impl Command {
    pub fn as_u8(self) -> u8 {
        match self {
            Command::Connect => 0x01,
            Command::Bind => 0x02,
            Command::UdpAssociate => 0x03,
        }
    }

    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Command::Connect),
            0x02 => Some(Command::Bind),
            0x03 => Some(Command::UdpAssociate),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Connect => write!(f, "CONNECT"),
            Command::Bind => write!(f, "BIND"),
            Command::UdpAssociate => write!(f, "UDP ASSOCIATE"),
        }
    }
}

/// Reply status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    Succeeded,
    GeneralFailure,
    NotAllowed,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefused,
    TtlExpired,
    CommandNotSupported,
    AddressTypeNotSupported,
}

impl ReplyCode {
    pub fn as_u8(self) -> u8 {
        match self {
            ReplyCode::Succeeded => 0x00,
            ReplyCode::GeneralFailure => 0x01,
            ReplyCode::NotAllowed => 0x02,
            ReplyCode::NetworkUnreachable => 0x03,
            ReplyCode::HostUnreachable => 0x04,
            ReplyCode::ConnectionRefused => 0x05,
            ReplyCode::TtlExpired => 0x06,
            ReplyCode::CommandNotSupported => 0x07,
            ReplyCode::AddressTypeNotSupported => 0x08,
        }
    }
}

/// A destination address as carried in a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// A literal IPv4 or IPv6 socket address
    Ip(SocketAddr),
    /// A host name with a port, resolved by the proxy
    Domain(String, u16),
}

impl Address {
    pub fn port(&self) -> u16 {
        match self {
            Address::Ip(addr) => addr.port(),
            Address::Domain(_, port) => *port,
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::Ip(addr)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ip(addr) => write!(f, "{}", addr),
            Address::Domain(host, port) => write!(f, "{}:{}", host, port),
        }
    }
}

/// The client's method-selection greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    /// Authentication methods offered by the client
    pub methods: Vec<u8>,
}

impl Greeting {
    pub fn offers(&self, method: u8) -> bool {
        self.methods.contains(&method)
    }
}

/// A parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub destination: Address,
}

/// A reply sent back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub code: ReplyCode,
    pub bound: SocketAddr,
}

impl Reply {
    pub fn new(bound: SocketAddr, code: ReplyCode) -> Self {
        Self { code, bound }
    }

    /// A failure reply with the wildcard IPv4 address and port 0.
    pub fn failure(code: ReplyCode) -> Self {
        Self::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0), code)
    }

    /// Serializes the reply to its wire format.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(22);
        self.serialize_into(&mut buf);
        buf.freeze()
    }

    /// Serializes the reply, appending to an existing buffer.
    pub fn serialize_into(&self, buf: &mut BytesMut) {
        buf.put_u8(SOCKS_VERSION);
        buf.put_u8(self.code.as_u8());
        buf.put_u8(0x00);
        match self.bound.ip() {
            IpAddr::V4(ip) => {
                buf.put_u8(atyp::IPV4);
                buf.put_slice(&ip.octets());
            }
            IpAddr::V6(ip) => {
                buf.put_u8(atyp::IPV6);
                buf.put_slice(&ip.octets());
            }
        }
        buf.put_u16(self.bound.port());
    }

    /// Writes and flushes the reply.
    pub async fn write_to<W>(&self, stream: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        stream.write_all(&self.serialize()).await?;
        stream.flush().await
    }
}

/// Writes a single reply for `endpoint` with status `code`.
pub async fn write_reply<W>(stream: &mut W, endpoint: SocketAddr, code: ReplyCode) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    Reply::new(endpoint, code).write_to(stream).await
}

/// Serializes the server's method-selection message.
pub fn method_selection(method: u8) -> [u8; 2] {
    [SOCKS_VERSION, method]
}
