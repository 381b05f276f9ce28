//! Packet codecs (C1): echo-request encoding, echo/error decoding, and
//! embedded original-packet parsing.

pub mod checksum;
pub mod echo;
pub mod embedded;

use crate::error::TraceError;
use crate::family::AddressFamily;

pub use echo::encode_request;
pub use embedded::{EmbeddedPacket, EmbeddedProtocol, EmbeddedTransport};

use std::net::{IpAddr, Ipv4Addr};

/// Strip the *outer* IP header the receiver's raw socket may or may not have
/// delivered.
///
/// v4 raw sockets deliver the IP header in the buffer; the source address is
/// read from it. v6 raw sockets strip the IP header before userspace ever
/// sees it, so the source address must come from the kernel's peer tuple
/// instead — `peer` is used as-is in that case.
pub fn split_received(family: AddressFamily, buf: &[u8], peer: IpAddr) -> (IpAddr, &[u8]) {
    match family {
        AddressFamily::V4 => {
            if buf.len() < 20 {
                return (peer, buf);
            }
            let header_len = usize::from(buf[0] & 0x0f) * 4;
            let source = IpAddr::V4(Ipv4Addr::new(buf[12], buf[13], buf[14], buf[15]));
            (source, buf.get(header_len..).unwrap_or(&[]))
        }
        AddressFamily::V6 => (peer, buf),
    }
}

/// A decoded echo or error message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    EchoReply { identifier: u16, sequence: u16, payload: Vec<u8> },
    TimeExceeded { code: u8, embedded: EmbeddedPacket },
    DestinationUnreachable { code: u8, embedded: EmbeddedPacket },
    Unparsed { kind: u8, code: u8, payload: Vec<u8> },
}

const TYPE_ECHO_REPLY: u8 = 0;
const TYPE_DEST_UNREACHABLE: u8 = 3;
const TYPE_TIME_EXCEEDED: u8 = 11;

/// Normalize a raw ICMPv6 type into the ICMPv4 namespace so the rest of the
/// decoder only has one set of constants to know about. v4 types pass
/// through untouched by construction (this function is only ever called for
/// v6 input).
fn normalize_v6_type(raw: u8) -> u8 {
    match raw {
        129 => TYPE_ECHO_REPLY,
        1 => TYPE_DEST_UNREACHABLE,
        2 => TYPE_DEST_UNREACHABLE, // packet-too-big folded into destination-unreachable
        3 => TYPE_TIME_EXCEEDED,
        other => other,
    }
}

/// Decode a raw echo/error message received on the family's raw socket.
pub fn decode(buf: &[u8], family: AddressFamily) -> Result<Message, TraceError> {
    if buf.len() < 4 {
        return Err(TraceError::Codec("message shorter than type/code/checksum".into()));
    }
    let raw_type = buf[0];
    let code = buf[1];
    let kind = match family {
        AddressFamily::V4 => raw_type,
        AddressFamily::V6 => normalize_v6_type(raw_type),
    };

    match kind {
        TYPE_ECHO_REPLY => {
            if buf.len() < 8 {
                return Err(TraceError::Codec("echo reply shorter than 8 bytes".into()));
            }
            Ok(Message::EchoReply {
                identifier: u16::from_be_bytes([buf[4], buf[5]]),
                sequence: u16::from_be_bytes([buf[6], buf[7]]),
                payload: buf[8..].to_vec(),
            })
        }
        TYPE_TIME_EXCEEDED => {
            // 4 unused bytes, then the embedded original packet.
            let rest = buf.get(8..).unwrap_or(&[]);
            Ok(Message::TimeExceeded { code, embedded: embedded::parse(family, rest) })
        }
        TYPE_DEST_UNREACHABLE => {
            // 2 unused + 2 next-hop-MTU bytes, then the embedded original packet.
            let rest = buf.get(8..).unwrap_or(&[]);
            Ok(Message::DestinationUnreachable { code, embedded: embedded::parse(family, rest) })
        }
        other => Ok(Message::Unparsed { kind: other, code, payload: buf.get(4..).unwrap_or(&[]).to_vec() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_echo_reply_v4() {
        let mut buf = vec![0u8, 0, 0, 0, 0x01, 0x02, 0x00, 0x09];
        buf.extend_from_slice(b"hi");
        let msg = decode(&buf, AddressFamily::V4).unwrap();
        assert_eq!(
            msg,
            Message::EchoReply { identifier: 0x0102, sequence: 0x0009, payload: b"hi".to_vec() }
        );
    }

    #[test]
    fn decodes_echo_reply_v6_normalized_from_129() {
        let mut buf = vec![129u8, 0, 0, 0, 0x01, 0x02, 0x00, 0x09];
        buf.extend_from_slice(b"hi");
        let msg = decode(&buf, AddressFamily::V6).unwrap();
        assert_eq!(
            msg,
            Message::EchoReply { identifier: 0x0102, sequence: 0x0009, payload: b"hi".to_vec() }
        );
    }

    #[test]
    fn decodes_time_exceeded_with_embedded_echo() {
        let mut buf = vec![11u8, 0, 0, 0, 0, 0, 0, 0]; // type, code, checksum, 4 unused
        let mut embedded_ip = vec![0x45u8, 0, 0, 0, 0, 0, 0, 0, 0, 1]; // v4 header, protocol=1 (icmp)
        embedded_ip.resize(20, 0);
        embedded_ip[9] = 1;
        let echo = echo::encode_request(AddressFamily::V4, 0x1234, 5, &[]);
        embedded_ip.extend_from_slice(&echo);
        buf.extend_from_slice(&embedded_ip);

        let msg = decode(&buf, AddressFamily::V4).unwrap();
        match msg {
            Message::TimeExceeded { embedded, .. } => {
                assert_eq!(embedded.protocol, EmbeddedProtocol::Echo);
                assert_eq!(
                    embedded.transport,
                    EmbeddedTransport::Echo(embedded::EmbeddedEcho { identifier: 0x1234, sequence: 5 })
                );
            }
            other => panic!("expected TimeExceeded, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_type_is_unparsed() {
        let buf = vec![200u8, 1, 0, 0, 9, 9];
        let msg = decode(&buf, AddressFamily::V4).unwrap();
        assert_eq!(msg, Message::Unparsed { kind: 200, code: 1, payload: vec![9, 9] });
    }

    #[test]
    fn too_short_is_an_error() {
        assert!(decode(&[1, 2], AddressFamily::V4).is_err());
    }

    #[test]
    fn v4_split_reads_source_from_header_not_peer() {
        let mut buf = vec![0x45u8, 0, 0, 28, 0, 0, 0, 0, 64, 1, 0, 0, 10, 0, 0, 1, 10, 0, 0, 2];
        buf.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0]);
        let peer: IpAddr = "10.9.9.9".parse().unwrap();
        let (source, payload) = split_received(AddressFamily::V4, &buf, peer);
        assert_eq!(source, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(payload.len(), 8);
    }

    #[test]
    fn v6_split_always_uses_peer_tuple() {
        let buf = [0u8, 0, 0, 0, 0, 0, 0, 0];
        let peer: IpAddr = "fe80::1".parse().unwrap();
        let (source, payload) = split_received(AddressFamily::V6, &buf, peer);
        assert_eq!(source, peer);
        assert_eq!(payload.len(), 8);
    }
}
