//! The per-family receiver actor: one task owns the raw channel,
//! demultiplexes inbound echo/error messages by correlation key, and routes
//! each to whichever probe registered for it. Uses a `tokio::select!` +
//! task-per-socket pattern to own the socket from a single task.

use std::collections::HashMap;
use std::net::IpAddr;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::channel::SharedChannel;
use crate::codec;
use crate::error::TraceError;
use crate::family::AddressFamily;
use crate::options::{ProbeKind, RECEIVER_GRACE};

use super::registry::{self, CorrelationKey};

/// A single delivered message: the peer it arrived from, and the raw bytes a
/// probe will decode for itself.
pub type Delivery = (IpAddr, Vec<u8>);

enum Command {
    Register {
        key: CorrelationKey,
        waiter: mpsc::Sender<Delivery>,
        respond: oneshot::Sender<Result<(), TraceError>>,
    },
    Unregister {
        key: CorrelationKey,
        respond: oneshot::Sender<()>,
    },
    Send {
        hop_limit: u8,
        packet: Vec<u8>,
        dest: IpAddr,
        respond: oneshot::Sender<Result<(), TraceError>>,
    },
}

/// A cheap, cloneable handle to a running receiver actor.
#[derive(Clone)]
pub struct ReceiverHandle {
    family: AddressFamily,
    cmd_tx: mpsc::Sender<Command>,
}

impl ReceiverHandle {
    /// Spawn a fresh actor task over `channel`. Exposed publicly (not just
    /// `pub(crate)`) so external test code can drive the receiver against a
    /// [`crate::channel::test_support::LoopbackChannel`] via
    /// [`crate::receiver::install_for_tests`].
    pub fn spawn(family: AddressFamily, channel: SharedChannel) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        tokio::spawn(run(family, channel, cmd_rx));
        Self { family, cmd_tx }
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Whether the actor task behind this handle has already exited.
    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }

    /// Register interest in messages keyed by `(kind, identifier)`. Returns
    /// [`TraceError::AlreadyRegistered`] if that key is already claimed.
    pub async fn register(
        &self,
        kind: ProbeKind,
        identifier: u16,
        waiter: mpsc::Sender<Delivery>,
    ) -> Result<(), TraceError> {
        let (respond, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Register { key: CorrelationKey { kind, identifier }, waiter, respond })
            .await
            .map_err(|_| TraceError::Codec("receiver actor is gone".into()))?;
        rx.await.map_err(|_| TraceError::Codec("receiver actor is gone".into()))?
    }

    /// Remove a registration. Tolerant of an unknown key — a probe always
    /// unregisters on every exit path, including ones where it never heard
    /// back, so double-unregister and unregister-after-timeout are routine.
    pub async fn unregister(&self, kind: ProbeKind, identifier: u16) {
        let (respond, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Unregister { key: CorrelationKey { kind, identifier }, respond })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// An RAII safety net for the same unregister `register` pairs with.
    /// The orchestrator kills a probe task that's still in flight at its
    /// aggregate deadline with `JoinHandle::abort`, which drops the task's
    /// future at whatever await point it's suspended at — the sequential
    /// `unregister().await` a probe runs on its happy path never gets a
    /// chance to execute. Holding one of these alongside
    /// the registration means the drop glue fires a fire-and-forget
    /// unregister even then. Safe to also unregister explicitly afterwards;
    /// the actor's `Unregister` handler is a no-op on an absent key.
    pub(crate) fn registration_guard(&self, kind: ProbeKind, identifier: u16) -> RegistrationGuard {
        RegistrationGuard { cmd_tx: self.cmd_tx.clone(), key: CorrelationKey { kind, identifier } }
    }

    /// Set the outgoing hop limit and transmit `packet` to `dest` through
    /// this family's shared socket.
    pub async fn send(&self, hop_limit: u8, packet: Vec<u8>, dest: IpAddr) -> Result<(), TraceError> {
        let (respond, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Send { hop_limit, packet, dest, respond })
            .await
            .map_err(|_| TraceError::Codec("receiver actor is gone".into()))?;
        rx.await.map_err(|_| TraceError::Codec("receiver actor is gone".into()))?
    }
}

/// See [`ReceiverHandle::registration_guard`]. Dropping this — including via
/// task abort — sends a best-effort unregister; a full or closed command
/// channel is silently ignored, matching `unregister`'s own "never errors"
/// contract.
pub(crate) struct RegistrationGuard {
    cmd_tx: mpsc::Sender<Command>,
    key: CorrelationKey,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        let (respond, _rx) = oneshot::channel();
        let _ = self.cmd_tx.try_send(Command::Unregister { key: self.key, respond });
    }
}

async fn run(family: AddressFamily, channel: SharedChannel, mut cmd_rx: mpsc::Receiver<Command>) {
    let mut registrations: HashMap<CorrelationKey, mpsc::Sender<Delivery>> = HashMap::new();
    let mut grace: Option<Instant> = None;
    let mut buf = vec![0u8; 2048];

    loop {
        let sleep_until_grace = async {
            match grace {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    None => break,
                    Some(Command::Register { key, waiter, respond }) => {
                        let result = if registrations.contains_key(&key) {
                            Err(TraceError::AlreadyRegistered)
                        } else {
                            registrations.insert(key, waiter);
                            grace = None;
                            Ok(())
                        };
                        let _ = respond.send(result);
                    }
                    Some(Command::Unregister { key, respond }) => {
                        registrations.remove(&key);
                        if registrations.is_empty() {
                            grace = Some(Instant::now() + RECEIVER_GRACE);
                        }
                        let _ = respond.send(());
                    }
                    Some(Command::Send { hop_limit, packet, dest, respond }) => {
                        let result = send_one(&channel, hop_limit, &packet, dest).await;
                        let _ = respond.send(result);
                    }
                }
            }
            received = channel.recv_from(&mut buf) => {
                match received {
                    Ok((n, peer)) => route(family, &buf[..n], peer, &mut registrations, &mut grace),
                    Err(e) => log::warn!("tracepath: receiver socket error on {family:?}: {e}"),
                }
            }
            _ = sleep_until_grace => {
                if registrations.is_empty() {
                    log::debug!("tracepath: receiver for {family:?} closing after grace period");
                    break;
                }
                grace = None;
            }
        }
    }
}

async fn send_one(channel: &SharedChannel, hop_limit: u8, packet: &[u8], dest: IpAddr) -> Result<(), TraceError> {
    channel.set_hop_limit(hop_limit).await?;
    channel.send_to(packet, dest).await
}

fn route(
    family: AddressFamily,
    buf: &[u8],
    peer: IpAddr,
    registrations: &mut HashMap<CorrelationKey, mpsc::Sender<Delivery>>,
    grace: &mut Option<Instant>,
) {
    let (source, payload) = codec::split_received(family, buf, peer);
    let message = match codec::decode(payload, family) {
        Ok(message) => message,
        Err(e) => {
            log::debug!("tracepath: failed to decode inbound message on {family:?}: {e}");
            return;
        }
    };
    let Some(key) = registry::extract_key(&message) else {
        return;
    };
    let Some(waiter) = registrations.get(&key) else {
        log::debug!("tracepath: no waiter registered for {key:?} on {family:?}, dropping");
        return;
    };
    if waiter.try_send((source, payload.to_vec())).is_err() {
        log::debug!("tracepath: waiter for {key:?} is full or gone, dropping registration");
        registrations.remove(&key);
        if registrations.is_empty() {
            *grace = Some(Instant::now() + RECEIVER_GRACE);
        }
    }
}
