//! The socket abstraction (C0) underneath C1/C2/C3: a trait narrow enough to
//! cover "set hop-limit, send to a destination, receive with peer address"
//! over a raw socket, so the receiver and probe logic can be driven by a
//! synthetic double in tests instead of requiring `CAP_NET_RAW`.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use socket2::{Domain, SockAddr, Socket, Type};
use tokio::io::unix::AsyncFd;

use crate::error::TraceError;
use crate::family::AddressFamily;

#[async_trait]
pub trait RawChannel: Send + Sync {
    async fn set_hop_limit(&self, ttl: u8) -> Result<(), TraceError>;
    async fn send_to(&self, buf: &[u8], dest: IpAddr) -> Result<(), TraceError>;
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, IpAddr), TraceError>;
}

/// A raw echo/error socket, driven asynchronously via readiness
/// notifications rather than a blocking syscall per probe. Open exactly once
/// per address family.
pub struct Socket2Channel {
    family: AddressFamily,
    fd: AsyncFd<Socket>,
}

impl Socket2Channel {
    pub fn open(family: AddressFamily) -> Result<Self, TraceError> {
        let socket = Socket::new(family.socket_domain(), Type::RAW, Some(family.echo_protocol()))
            .map_err(TraceError::from_socket_io)?;
        socket.set_nonblocking(true).map_err(TraceError::from_socket_io)?;
        let bind_addr = SockAddr::from(SocketAddr::new(family.any_addr(), 0));
        socket.bind(&bind_addr).map_err(TraceError::from_socket_io)?;
        let fd = AsyncFd::new(socket).map_err(TraceError::from_socket_io)?;
        Ok(Self { family, fd })
    }
}

#[async_trait]
impl RawChannel for Socket2Channel {
    async fn set_hop_limit(&self, ttl: u8) -> Result<(), TraceError> {
        let socket = self.fd.get_ref();
        let result = match self.family {
            AddressFamily::V4 => socket.set_ttl(u32::from(ttl)),
            AddressFamily::V6 => socket.set_unicast_hops(u32::from(ttl)),
        };
        result.map_err(TraceError::from_socket_io)
    }

    async fn send_to(&self, buf: &[u8], dest: IpAddr) -> Result<(), TraceError> {
        let dest_addr = SockAddr::from(SocketAddr::new(dest, 0));
        loop {
            let mut guard = self.fd.writable().await.map_err(TraceError::from_socket_io)?;
            match guard.try_io(|inner| inner.get_ref().send_to(buf, &dest_addr)) {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(e)) => return Err(TraceError::from_socket_io(e)),
                Err(_would_block) => continue,
            }
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, IpAddr), TraceError> {
        loop {
            let mut guard = self.fd.readable().await.map_err(TraceError::from_socket_io)?;
            // socket2's MaybeUninit-based recv_from is the one place this
            // crate needs `unsafe`: the kernel guarantees it only writes the
            // first `n` bytes it reports, so reading those `n` bytes back out
            // of the MaybeUninit buffer is sound.
            let mut uninit = vec![std::mem::MaybeUninit::new(0u8); buf.len()];
            match guard.try_io(|inner| inner.get_ref().recv_from(&mut uninit)) {
                Ok(Ok((n, peer))) => {
                    for (dst, src) in buf[..n].iter_mut().zip(uninit[..n].iter()) {
                        *dst = unsafe { src.assume_init() };
                    }
                    let addr = peer.as_socket().map(|s| s.ip()).unwrap_or(self.family.any_addr());
                    return Ok((n, addr));
                }
                Ok(Err(e)) => return Err(TraceError::from_socket_io(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

pub type SharedChannel = Arc<dyn RawChannel>;

/// A synthetic in-process double for driving the receiver and probe logic
/// without a real socket. Queued frames are delivered to `recv_from` in
/// order; `sent` records everything handed to `send_to` for assertions.
/// Always compiled (not `cfg(test)`) so both unit tests and the `tests/`
/// integration suite can use it.
pub mod test_support {
    use super::*;
    use tokio::sync::Mutex;

    pub struct LoopbackChannel {
        inbox: Mutex<tokio::sync::mpsc::UnboundedReceiver<(IpAddr, Vec<u8>)>>,
        pub feed: tokio::sync::mpsc::UnboundedSender<(IpAddr, Vec<u8>)>,
        pub sent: Mutex<Vec<(IpAddr, Vec<u8>)>>,
        pub hop_limits: Mutex<Vec<u8>>,
    }

    impl LoopbackChannel {
        pub fn new() -> Arc<Self> {
            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            Arc::new(Self {
                inbox: Mutex::new(rx),
                feed: tx,
                sent: Mutex::new(Vec::new()),
                hop_limits: Mutex::new(Vec::new()),
            })
        }

        /// Queue a synthetic inbound message as though it arrived from `peer`.
        pub fn inject(&self, peer: IpAddr, raw: Vec<u8>) {
            let _ = self.feed.send((peer, raw));
        }
    }

    #[async_trait]
    impl RawChannel for LoopbackChannel {
        async fn set_hop_limit(&self, ttl: u8) -> Result<(), TraceError> {
            self.hop_limits.lock().await.push(ttl);
            Ok(())
        }

        async fn send_to(&self, buf: &[u8], dest: IpAddr) -> Result<(), TraceError> {
            self.sent.lock().await.push((dest, buf.to_vec()));
            Ok(())
        }

        async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, IpAddr), TraceError> {
            let (peer, raw) = self
                .inbox
                .lock()
                .await
                .recv()
                .await
                .ok_or_else(|| TraceError::Codec("loopback channel closed".into()))?;
            let n = raw.len().min(buf.len());
            buf[..n].copy_from_slice(&raw[..n]);
            Ok((n, peer))
        }
    }
}
