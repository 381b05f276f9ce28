//! Echo-request encoding and the shared 8-byte echo header shape, which is
//! also reused to re-parse an embedded original echo request.

use crate::family::AddressFamily;

use super::checksum;

/// Build an echo-request packet: `{type, code, checksum, identifier,
/// sequence}` followed by `payload`, with the checksum computed over the
/// whole thing and written back into bytes 2-3.
pub fn encode_request(family: AddressFamily, identifier: u16, sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + payload.len());
    buf.push(family.echo_request_type());
    buf.push(0);
    buf.push(0);
    buf.push(0);
    buf.extend_from_slice(&identifier.to_be_bytes());
    buf.extend_from_slice(&sequence.to_be_bytes());
    buf.extend_from_slice(payload);

    let sum = checksum::compute(&buf);
    buf[2..4].copy_from_slice(&sum.to_be_bytes());
    buf
}

/// The fixed 8-byte echo header: `type, code, checksum, identifier,
/// sequence`. Returns `None` if fewer than 8 bytes are available.
pub struct EchoHeader {
    pub kind: u8,
    pub code: u8,
    pub identifier: u16,
    pub sequence: u16,
}

pub fn parse_header(bytes: &[u8]) -> Option<EchoHeader> {
    if bytes.len() < 8 {
        return None;
    }
    Some(EchoHeader {
        kind: bytes[0],
        code: bytes[1],
        identifier: u16::from_be_bytes([bytes[4], bytes[5]]),
        sequence: u16::from_be_bytes([bytes[6], bytes[7]]),
    })
}
