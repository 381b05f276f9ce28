//! Crate-wide error currency. Every fallible boundary operation returns
//! `Result<_, TraceError>`; internal helpers propagate with `?`.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("failed to resolve target: {0}")]
    ResolutionFailed(String),

    #[error("permission denied opening raw socket: {0}")]
    PermissionDenied(#[source] io::Error),

    #[error("host unreachable: {0}")]
    HostUnreachable(#[source] io::Error),

    #[error("no route to host: {0}")]
    NoRoute(#[source] io::Error),

    #[error("correlation key already registered")]
    AlreadyRegistered,

    #[error("malformed packet: {0}")]
    Codec(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

// `io::Error` has no `PartialEq`, so this compares by rendered message. Only
// used by `ProbeOutcome`/`HopResult` test assertions, never for control flow.
impl PartialEq for TraceError {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl TraceError {
    /// Classify a raw `io::Error` from a socket operation into the taxonomy
    /// §7 describes, rather than collapsing everything into `Io`.
    pub fn from_socket_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(err),
            io::ErrorKind::NotConnected | io::ErrorKind::AddrNotAvailable => Self::NoRoute(err),
            io::ErrorKind::HostUnreachable => Self::HostUnreachable(err),
            io::ErrorKind::NetworkUnreachable => Self::HostUnreachable(err),
            _ => {
                if let Some(code) = err.raw_os_error() {
                    // EHOSTUNREACH / ENETUNREACH / EACCES beyond what ErrorKind
                    // maps on this platform.
                    match code {
                        13 => return Self::PermissionDenied(err),
                        65 => return Self::HostUnreachable(err), // EHOSTUNREACH
                        101 => return Self::HostUnreachable(err), // ENETUNREACH
                        _ => {}
                    }
                }
                Self::Io(err)
            }
        }
    }
}
