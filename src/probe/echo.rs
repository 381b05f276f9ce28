//! Echo-request probe flavor. Unlike datagram/stream, an echo probe never
//! opens its own socket — it transmits through the family's shared receiver
//! socket, so replies come back on the same raw socket the kernel will
//! route them to.

use std::net::IpAddr;
use std::time::Duration;

use rand_core::{OsRng, RngCore};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::codec::{self, Message};
use crate::error::TraceError;
use crate::family::AddressFamily;
use crate::options::ProbeKind;
use crate::receiver::{self, Delivery, ReceiverHandle};

use super::{ProbeOutcome, ProbeRecord};

/// Re-drawing an echo identifier is nearly free and a collision is
/// astronomically rare, so a generous bound on attempts still resolves in
/// practice while guaranteeing the probe doesn't spin forever.
const MAX_REGISTER_ATTEMPTS: u32 = 16;

pub async fn probe(family: AddressFamily, target: IpAddr, hop_limit: u8, timeout: Duration) -> ProbeOutcome {
    let handle = match receiver::get_or_start(family).await {
        Ok(handle) => handle,
        Err(e) => return ProbeOutcome::Error(e),
    };

    let (identifier, mut rx) = match register_retrying(&handle).await {
        Ok(pair) => pair,
        Err(e) => return ProbeOutcome::Error(e),
    };
    // Guards cleanup on task abort; the explicit unregister calls below
    // remain so the common exit paths confirm the actor has processed the
    // removal before this function returns.
    let _guard = handle.registration_guard(ProbeKind::Echo, identifier);

    let packet = codec::encode_request(family, identifier, 1, b"tracepath");
    let start = Instant::now();
    if let Err(e) = handle.send(hop_limit, packet, target).await {
        handle.unregister(ProbeKind::Echo, identifier).await;
        return ProbeOutcome::Error(e);
    }

    let outcome = tokio::select! {
        delivered = rx.recv() => match delivered {
            Some((peer, raw)) => classify(family, target, peer, &raw, start),
            None => ProbeOutcome::Timeout,
        },
        _ = tokio::time::sleep(timeout) => ProbeOutcome::Timeout,
    };

    handle.unregister(ProbeKind::Echo, identifier).await;
    outcome
}

/// Draw a random 16-bit echo identifier and register it, re-drawing on a
/// collision with another concurrently live probe rather than surfacing
/// `AlreadyRegistered` straight to the caller.
async fn register_retrying(handle: &ReceiverHandle) -> Result<(u16, mpsc::Receiver<Delivery>), TraceError> {
    for _ in 0..MAX_REGISTER_ATTEMPTS {
        let identifier = (OsRng.next_u32() & 0xffff) as u16;
        let (tx, rx) = mpsc::channel(2);
        match handle.register(ProbeKind::Echo, identifier, tx).await {
            Ok(()) => return Ok((identifier, rx)),
            Err(TraceError::AlreadyRegistered) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(TraceError::AlreadyRegistered)
}

fn classify(family: AddressFamily, target: IpAddr, peer: IpAddr, raw: &[u8], start: Instant) -> ProbeOutcome {
    let record = ProbeRecord { peer, elapsed_us: start.elapsed().as_micros() as u64 };
    match codec::decode(raw, family) {
        Ok(Message::EchoReply { .. }) if peer == target => ProbeOutcome::Reached(record),
        Ok(Message::EchoReply { .. }) => ProbeOutcome::Intermediate(record),
        Ok(Message::DestinationUnreachable { .. }) if peer == target => ProbeOutcome::Reached(record),
        Ok(Message::TimeExceeded { .. } | Message::DestinationUnreachable { .. } | Message::Unparsed { .. }) => {
            ProbeOutcome::Intermediate(record)
        }
        Err(e) => ProbeOutcome::Error(e),
    }
}
