//! UDP datagram probe flavor: its own ephemeral-port socket, a short
//! payload to the traditional traceroute base port, correlated by source
//! port rather than an echo identifier.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use socket2::{Protocol, SockAddr, Type};
use tokio::time::Instant;

use crate::codec::{self, Message};
use crate::error::TraceError;
use crate::family::AddressFamily;
use crate::options::{ProbeKind, DEFAULT_DATAGRAM_PORT};
use crate::receiver;

use super::{bind_and_register_retrying, ProbeOutcome, ProbeRecord};

pub async fn probe(family: AddressFamily, target: IpAddr, hop_limit: u8, timeout: Duration) -> ProbeOutcome {
    let handle = match receiver::get_or_start(family).await {
        Ok(handle) => handle,
        Err(e) => return ProbeOutcome::Error(e),
    };

    let (fd, identifier, mut rx) = match bind_and_register_retrying(
        &handle,
        family,
        Type::DGRAM,
        Some(Protocol::UDP),
        hop_limit,
        ProbeKind::Datagram,
    )
    .await
    {
        Ok(bound) => bound,
        Err(e) => return ProbeOutcome::Error(e),
    };
    let _guard = handle.registration_guard(ProbeKind::Datagram, identifier);

    let dest = SockAddr::from(SocketAddr::new(target, DEFAULT_DATAGRAM_PORT));
    let start = Instant::now();
    if let Err(e) = send_payload(&fd, &dest).await {
        handle.unregister(ProbeKind::Datagram, identifier).await;
        return ProbeOutcome::Error(e);
    }

    let outcome = tokio::select! {
        delivered = rx.recv() => match delivered {
            Some((peer, raw)) => classify(family, target, peer, &raw, start),
            None => ProbeOutcome::Timeout,
        },
        _ = tokio::time::sleep(timeout) => ProbeOutcome::Timeout,
    };

    handle.unregister(ProbeKind::Datagram, identifier).await;
    outcome
}

async fn send_payload(fd: &tokio::io::unix::AsyncFd<socket2::Socket>, dest: &SockAddr) -> Result<(), TraceError> {
    let payload = b"tracepath";
    loop {
        let mut guard = fd.writable().await.map_err(TraceError::from_socket_io)?;
        match guard.try_io(|inner| inner.get_ref().send_to(payload, dest)) {
            Ok(Ok(_)) => return Ok(()),
            Ok(Err(e)) => return Err(TraceError::from_socket_io(e)),
            Err(_would_block) => continue,
        }
    }
}

fn classify(family: AddressFamily, target: IpAddr, peer: IpAddr, raw: &[u8], start: Instant) -> ProbeOutcome {
    let record = ProbeRecord { peer, elapsed_us: start.elapsed().as_micros() as u64 };
    match codec::decode(raw, family) {
        Ok(Message::DestinationUnreachable { .. }) if peer == target => ProbeOutcome::Reached(record),
        Ok(Message::TimeExceeded { .. } | Message::DestinationUnreachable { .. } | Message::Unparsed { .. }) => {
            ProbeOutcome::Intermediate(record)
        }
        Ok(Message::EchoReply { .. }) => ProbeOutcome::Intermediate(record),
        Err(e) => ProbeOutcome::Error(e),
    }
}
