use std::net::IpAddr;

/// A single successful probe, as recorded in a finished [`HopResult`]. This is
/// the output-facing shape; the live in-flight probe record (send-socket,
/// wait-channel, timers) lives only inside `probe::*` for the duration of one
/// send/await cycle and is never exposed past it.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProbeReport {
    pub source: IpAddr,
    pub elapsed_us: u64,
}

/// The outcome of one hop (one TTL value) in a trace.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum HopResult {
    Reached { ttl: u8, probes: Vec<ProbeReport> },
    Intermediate { ttl: u8, probes: Vec<ProbeReport> },
    Timeout { ttl: u8, retries: u8 },
    Error { ttl: u8, reason: String },
}

impl HopResult {
    pub fn ttl(&self) -> u8 {
        match self {
            Self::Reached { ttl, .. }
            | Self::Intermediate { ttl, .. }
            | Self::Timeout { ttl, .. }
            | Self::Error { ttl, .. } => *ttl,
        }
    }

    pub fn probes(&self) -> &[ProbeReport] {
        match self {
            Self::Reached { probes, .. } | Self::Intermediate { probes, .. } => probes,
            Self::Timeout { .. } | Self::Error { .. } => &[],
        }
    }

    pub fn is_reached(&self) -> bool {
        matches!(self, Self::Reached { .. })
    }
}

/// An ordered trace, indexed 1..N, terminating on first `Reached` or on
/// hop-cap exhaustion.
pub type Trace = Vec<HopResult>;

/// Top-level result of [`crate::run`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum TraceOutcome {
    Reached(Trace),
    MaxHopsExceeded(Trace),
}

impl TraceOutcome {
    pub fn trace(&self) -> &Trace {
        match self {
            Self::Reached(t) | Self::MaxHopsExceeded(t) => t,
        }
    }
}
