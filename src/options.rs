use crate::family::AddressFamily;

/// Probing method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ProbeKind {
    Echo,
    Datagram,
    Stream,
}

/// Options recognized by [`crate::run`]. Constructed directly by callers —
/// there is no file/env configuration layer above this; `Default` carries
/// the documented defaults.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Options {
    pub kind: ProbeKind,
    pub family: AddressFamily,
    pub max_hops: u8,
    pub max_retries: u8,
    pub timeout_seconds: u64,
    pub probes_per_hop: usize,
    pub min_ttl: u8,
    pub print_output: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            kind: ProbeKind::Datagram,
            family: AddressFamily::V4,
            max_hops: 20,
            max_retries: 3,
            timeout_seconds: 1,
            probes_per_hop: 3,
            min_ttl: 1,
            print_output: true,
        }
    }
}

/// Default destination port for datagram probes (the traditional traceroute
/// UDP base port).
pub const DEFAULT_DATAGRAM_PORT: u16 = 33434;
/// Default destination port for stream-handshake probes.
pub const DEFAULT_STREAM_PORT: u16 = 80;

/// Stagger between concurrently launched probes within a single hop. Must be
/// greater than zero.
pub const PROBE_STAGGER: std::time::Duration = std::time::Duration::from_millis(50);

/// Grace delay the receiver waits after its last registration is removed
/// before it actually shuts its socket down.
pub const RECEIVER_GRACE: std::time::Duration = std::time::Duration::from_secs(5);
