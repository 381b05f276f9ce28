//! Correlation keys and the key-extraction table.

use crate::codec::{EmbeddedProtocol, EmbeddedTransport, Message};
use crate::options::ProbeKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub kind: ProbeKind,
    pub identifier: u16,
}

/// Extract the `(kind, identifier)` key a decoded message should route on,
/// or `None` if the message doesn't carry enough to correlate (dropped).
pub fn extract_key(message: &Message) -> Option<CorrelationKey> {
    match message {
        Message::EchoReply { identifier, .. } => {
            Some(CorrelationKey { kind: ProbeKind::Echo, identifier: *identifier })
        }
        Message::TimeExceeded { embedded, .. } | Message::DestinationUnreachable { embedded, .. } => {
            match (embedded.protocol, embedded.transport) {
                (EmbeddedProtocol::Echo, EmbeddedTransport::Echo(e)) => {
                    Some(CorrelationKey { kind: ProbeKind::Echo, identifier: e.identifier })
                }
                (EmbeddedProtocol::Datagram, EmbeddedTransport::Datagram(d)) => {
                    Some(CorrelationKey { kind: ProbeKind::Datagram, identifier: d.source_port })
                }
                (EmbeddedProtocol::Stream, EmbeddedTransport::Stream(s)) => {
                    Some(CorrelationKey { kind: ProbeKind::Stream, identifier: s.source_port })
                }
                _ => None,
            }
        }
        Message::Unparsed { .. } => None,
    }
}
