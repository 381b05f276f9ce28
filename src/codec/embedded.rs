//! Parsing of the embedded original IP header and original transport
//! fragment carried inside a time-exceeded / destination-unreachable
//! message.

use crate::family::AddressFamily;

use super::echo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddedProtocol {
    Echo,
    Datagram,
    Stream,
    Numeric(u8),
}

impl EmbeddedProtocol {
    fn from_number(n: u8) -> Self {
        match n {
            1 | 58 => Self::Echo,
            6 => Self::Stream,
            17 => Self::Datagram,
            other => Self::Numeric(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedEcho {
    pub identifier: u16,
    pub sequence: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedDatagram {
    pub source_port: u16,
    pub dest_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedStream {
    pub source_port: u16,
    pub dest_port: u16,
    pub sequence: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddedTransport {
    Echo(EmbeddedEcho),
    Datagram(EmbeddedDatagram),
    Stream(EmbeddedStream),
    /// The protocol was recognized but not enough of the original transport
    /// header survived truncation to extract a correlation field, or the
    /// protocol itself was unrecognized.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedPacket {
    pub protocol: EmbeddedProtocol,
    pub transport: EmbeddedTransport,
}

/// Split the embedded original IP header off the front of `bytes` and parse
/// whatever of the original transport header survived (only the first 8
/// bytes are guaranteed by the node that generated the error).
pub fn parse(family: AddressFamily, bytes: &[u8]) -> EmbeddedPacket {
    match family {
        AddressFamily::V4 => parse_v4(bytes),
        AddressFamily::V6 => parse_v6(bytes),
    }
}

fn parse_v4(bytes: &[u8]) -> EmbeddedPacket {
    if bytes.is_empty() {
        return EmbeddedPacket { protocol: EmbeddedProtocol::Numeric(0), transport: EmbeddedTransport::Unknown };
    }
    let header_len = usize::from(bytes[0] & 0x0f) * 4;
    let protocol_number = bytes.get(9).copied().unwrap_or(0);
    let protocol = EmbeddedProtocol::from_number(protocol_number);
    let transport_bytes = bytes.get(header_len..).unwrap_or(&[]);
    EmbeddedPacket { protocol, transport: parse_transport(protocol, transport_bytes) }
}

fn parse_v6(bytes: &[u8]) -> EmbeddedPacket {
    const V6_HEADER_LEN: usize = 40;
    if bytes.len() < V6_HEADER_LEN {
        return EmbeddedPacket { protocol: EmbeddedProtocol::Numeric(0), transport: EmbeddedTransport::Unknown };
    }
    let protocol_number = bytes[6];
    let protocol = EmbeddedProtocol::from_number(protocol_number);
    let transport_bytes = &bytes[V6_HEADER_LEN..];
    EmbeddedPacket { protocol, transport: parse_transport(protocol, transport_bytes) }
}

fn parse_transport(protocol: EmbeddedProtocol, bytes: &[u8]) -> EmbeddedTransport {
    match protocol {
        EmbeddedProtocol::Echo => echo::parse_header(bytes)
            .map(|h| EmbeddedTransport::Echo(EmbeddedEcho { identifier: h.identifier, sequence: h.sequence }))
            .unwrap_or(EmbeddedTransport::Unknown),
        EmbeddedProtocol::Datagram => {
            if bytes.len() < 4 {
                EmbeddedTransport::Unknown
            } else {
                EmbeddedTransport::Datagram(EmbeddedDatagram {
                    source_port: u16::from_be_bytes([bytes[0], bytes[1]]),
                    dest_port: u16::from_be_bytes([bytes[2], bytes[3]]),
                })
            }
        }
        EmbeddedProtocol::Stream => {
            if bytes.len() < 8 {
                EmbeddedTransport::Unknown
            } else {
                EmbeddedTransport::Stream(EmbeddedStream {
                    source_port: u16::from_be_bytes([bytes[0], bytes[1]]),
                    dest_port: u16::from_be_bytes([bytes[2], bytes[3]]),
                    sequence: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
                })
            }
        }
        EmbeddedProtocol::Numeric(_) => EmbeddedTransport::Unknown,
    }
}
