//! The probe sender (C3): three flavors sharing a single skeleton — open,
//! register with the family's receiver, transmit, await a routed message or
//! timeout, then unregister on every exit path.

pub mod datagram;
pub mod echo;
pub mod stream;

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use socket2::{SockAddr, Socket, Type};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

use crate::error::TraceError;
use crate::family::AddressFamily;
use crate::options::ProbeKind;
use crate::receiver::{Delivery, ReceiverHandle};

/// A single probe's resolved outcome against the target it was aimed at.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRecord {
    pub peer: IpAddr,
    pub elapsed_us: u64,
}

/// The classified result of running one probe. Destination-vs-intermediate
/// classification happens here, since a probe already has both the peer
/// address from its reply and the target it was aimed at.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Reached(ProbeRecord),
    Intermediate(ProbeRecord),
    Timeout,
    Error(TraceError),
}

/// Run one probe of `kind` at `hop_limit` against `target`, bounded by
/// `timeout`.
pub async fn run(kind: ProbeKind, family: AddressFamily, target: IpAddr, hop_limit: u8, timeout: Duration) -> ProbeOutcome {
    match kind {
        ProbeKind::Echo => echo::probe(family, target, hop_limit, timeout).await,
        ProbeKind::Datagram => datagram::probe(family, target, hop_limit, timeout).await,
        ProbeKind::Stream => stream::probe(family, target, hop_limit, timeout).await,
    }
}

/// Open a non-blocking socket of `ty`/`protocol`, bind it to an ephemeral
/// port, and set the outgoing hop limit. Shared by the datagram and stream
/// flavors, which (unlike echo) own their send-socket exclusively.
pub(crate) async fn open_bound_socket(
    family: AddressFamily,
    ty: Type,
    protocol: Option<socket2::Protocol>,
    hop_limit: u8,
) -> Result<AsyncFd<Socket>, TraceError> {
    let socket = Socket::new(family.socket_domain(), ty, protocol).map_err(TraceError::from_socket_io)?;
    socket.set_nonblocking(true).map_err(TraceError::from_socket_io)?;
    let bind_addr = SockAddr::from(SocketAddr::new(family.any_addr(), 0));
    socket.bind(&bind_addr).map_err(TraceError::from_socket_io)?;
    match family {
        AddressFamily::V4 => socket.set_ttl(u32::from(hop_limit)),
        AddressFamily::V6 => socket.set_unicast_hops(u32::from(hop_limit)),
    }
    .map_err(TraceError::from_socket_io)?;
    AsyncFd::new(socket).map_err(TraceError::from_socket_io)
}

/// Read back the kernel-assigned ephemeral port a bound socket ended up
/// with — this becomes the probe's correlation identifier.
pub(crate) fn local_port(fd: &AsyncFd<Socket>) -> Result<u16, TraceError> {
    fd.get_ref()
        .local_addr()
        .map_err(TraceError::from_socket_io)?
        .as_socket()
        .map(|addr| addr.port())
        .ok_or_else(|| TraceError::Codec("bound socket has no local port".into()))
}

/// A collision between the kernel-assigned ephemeral port and another
/// concurrently live probe is rare enough that a generous bound still
/// resolves in practice while guaranteeing the probe doesn't spin forever.
const MAX_REGISTER_ATTEMPTS: u32 = 16;

/// Open a fresh bound socket, read back its ephemeral port, and register
/// that port with `handle`. On `AlreadyRegistered` the socket is dropped
/// (freeing the port back to the kernel) and a new one is opened, which
/// gets a new ephemeral port to re-bind on. Shared by the datagram and
/// stream flavors.
pub(crate) async fn bind_and_register_retrying(
    handle: &ReceiverHandle,
    family: AddressFamily,
    ty: Type,
    protocol: Option<socket2::Protocol>,
    hop_limit: u8,
    kind: ProbeKind,
) -> Result<(AsyncFd<Socket>, u16, mpsc::Receiver<Delivery>), TraceError> {
    for _ in 0..MAX_REGISTER_ATTEMPTS {
        let fd = open_bound_socket(family, ty, protocol, hop_limit).await?;
        let identifier = local_port(&fd)?;
        let (tx, rx) = mpsc::channel(2);
        match handle.register(kind, identifier, tx).await {
            Ok(()) => return Ok((fd, identifier, rx)),
            Err(TraceError::AlreadyRegistered) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(TraceError::AlreadyRegistered)
}
