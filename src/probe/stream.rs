//! TCP stream-handshake probe flavor. Initiates a non-blocking connect and
//! awaits either a routed error message or the kernel's connect outcome,
//! classifying refused/reset connections as having reached the destination.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use socket2::{Protocol, SockAddr, Socket, Type};
use tokio::io::unix::AsyncFd;
use tokio::time::Instant;

use crate::codec::{self, Message};
use crate::error::TraceError;
use crate::family::AddressFamily;
use crate::options::{ProbeKind, DEFAULT_STREAM_PORT};
use crate::receiver;

use super::{bind_and_register_retrying, ProbeOutcome, ProbeRecord};

enum ConnectOutcome {
    Reached,
    ContinueWaiting,
    Fatal(TraceError),
}

pub async fn probe(family: AddressFamily, target: IpAddr, hop_limit: u8, timeout: Duration) -> ProbeOutcome {
    let handle = match receiver::get_or_start(family).await {
        Ok(handle) => handle,
        Err(e) => return ProbeOutcome::Error(e),
    };

    let (fd, identifier, mut rx) = match bind_and_register_retrying(
        &handle,
        family,
        Type::STREAM,
        Some(Protocol::TCP),
        hop_limit,
        ProbeKind::Stream,
    )
    .await
    {
        Ok(bound) => bound,
        Err(e) => return ProbeOutcome::Error(e),
    };
    let _guard = handle.registration_guard(ProbeKind::Stream, identifier);

    let start = Instant::now();
    let dest = SockAddr::from(SocketAddr::new(target, DEFAULT_STREAM_PORT));
    if let Err(e) = begin_connect(&fd, &dest) {
        handle.unregister(ProbeKind::Stream, identifier).await;
        return ProbeOutcome::Error(e);
    }

    let deadline = Instant::now() + timeout;
    let mut connect_pending = true;
    let outcome = loop {
        let timed_out = tokio::time::sleep_until(deadline);
        tokio::select! {
            delivered = rx.recv() => {
                break match delivered {
                    Some((peer, raw)) => classify(family, target, peer, &raw, start),
                    None => ProbeOutcome::Timeout,
                };
            }
            ready = fd.writable(), if connect_pending => {
                connect_pending = false;
                match ready {
                    Ok(_guard) => match fd.get_ref().take_error() {
                        Ok(None) => break reached(target, start),
                        Ok(Some(err)) => match classify_connect_error(err) {
                            ConnectOutcome::Reached => break reached(target, start),
                            ConnectOutcome::ContinueWaiting => continue,
                            ConnectOutcome::Fatal(e) => break ProbeOutcome::Error(e),
                        },
                        Err(err) => break ProbeOutcome::Error(TraceError::from_socket_io(err)),
                    },
                    Err(err) => break ProbeOutcome::Error(TraceError::from_socket_io(err)),
                }
            }
            _ = timed_out => break ProbeOutcome::Timeout,
        }
    };

    handle.unregister(ProbeKind::Stream, identifier).await;
    outcome
}

fn reached(target: IpAddr, start: Instant) -> ProbeOutcome {
    ProbeOutcome::Reached(ProbeRecord { peer: target, elapsed_us: start.elapsed().as_micros() as u64 })
}

fn begin_connect(fd: &AsyncFd<Socket>, dest: &SockAddr) -> Result<(), TraceError> {
    match fd.get_ref().connect(dest) {
        Ok(()) => Ok(()),
        // EINPROGRESS: the non-blocking connect has been initiated; its
        // outcome shows up later as write-readiness plus `SO_ERROR`.
        Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.raw_os_error() == Some(115) => Ok(()),
        Err(e) => Err(TraceError::from_socket_io(e)),
    }
}

/// `timeout`/`etimedout` are treated identically here, pending observation
/// of whether the kernel ever actually distinguishes them for a connect —
/// both just mean "keep waiting for an error message".
fn classify_connect_error(err: io::Error) -> ConnectOutcome {
    match err.kind() {
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => ConnectOutcome::Reached,
        io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable | io::ErrorKind::TimedOut => {
            ConnectOutcome::ContinueWaiting
        }
        _ => match err.raw_os_error() {
            Some(111) | Some(104) => ConnectOutcome::Reached, // ECONNREFUSED / ECONNRESET
            Some(113) | Some(101) | Some(110) => ConnectOutcome::ContinueWaiting, // EHOSTUNREACH / ENETUNREACH / ETIMEDOUT
            _ => ConnectOutcome::Fatal(TraceError::from_socket_io(err)),
        },
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

#[cfg(test)]
mod tests {
    use super::*;

    /// A refused connect still counts as having reached the destination
    /// (the port being closed means the host itself is up).
    #[test]
    fn refused_and_reset_connects_are_reached() {
        assert!(matches!(
            classify_connect_error(io::Error::from(io::ErrorKind::ConnectionRefused)),
            ConnectOutcome::Reached
        ));
        assert!(matches!(
            classify_connect_error(io::Error::from(io::ErrorKind::ConnectionReset)),
            ConnectOutcome::Reached
        ));
    }

    #[test]
    fn unreachable_and_timeout_connects_keep_waiting_for_an_error_message() {
        assert!(matches!(
            classify_connect_error(io::Error::from(io::ErrorKind::HostUnreachable)),
            ConnectOutcome::ContinueWaiting
        ));
        assert!(matches!(
            classify_connect_error(io::Error::from(io::ErrorKind::NetworkUnreachable)),
            ConnectOutcome::ContinueWaiting
        ));
        assert!(matches!(
            classify_connect_error(io::Error::from(io::ErrorKind::TimedOut)),
            ConnectOutcome::ContinueWaiting
        ));
    }

    #[test]
    fn other_connect_errors_are_fatal() {
        assert!(matches!(
            classify_connect_error(io::Error::from(io::ErrorKind::InvalidInput)),
            ConnectOutcome::Fatal(_)
        ));
    }
}
