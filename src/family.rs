//! Address-family wire constants: the handful of things that differ between
//! running this engine over IPv4 and over IPv6.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use socket2::{Domain, Protocol};

/// Which IP version a probe, socket, or receiver operates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    /// Derive the family from a concrete address, e.g. after resolution.
    pub fn of(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }

    pub fn socket_domain(self) -> Domain {
        match self {
            Self::V4 => Domain::IPV4,
            Self::V6 => Domain::IPV6,
        }
    }

    /// Protocol number used for the shared echo/error raw socket: 1 (ICMP) for
    /// v4, 58 (ICMPv6) for v6. Never reuse the v4 constant for v6 — the kernel
    /// will refuse to deliver anything.
    pub fn echo_protocol(self) -> Protocol {
        match self {
            Self::V4 => Protocol::ICMPV4,
            Self::V6 => Protocol::ICMPV6,
        }
    }

    /// The numeric protocol value as it appears in an embedded IP header.
    pub fn echo_protocol_number(self) -> u8 {
        match self {
            Self::V4 => 1,
            Self::V6 => 58,
        }
    }

    pub fn any_addr(self) -> IpAddr {
        match self {
            Self::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Self::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }

    /// Echo-request `type` byte for an outgoing packet.
    pub fn echo_request_type(self) -> u8 {
        match self {
            Self::V4 => 8,
            Self::V6 => 128,
        }
    }
}
