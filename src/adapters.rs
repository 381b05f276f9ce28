//! Boundary adapters (C5): hostname resolution, reverse lookup, and
//! human-readable rendering. Kept as swappable traits so tests can supply
//! deterministic fakes instead of touching the real resolver.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

use async_trait::async_trait;

use crate::error::TraceError;
use crate::family::AddressFamily;
use crate::trace::{HopResult, Trace};

#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn resolve(&self, target: &str, family_hint: Option<AddressFamily>) -> Result<(IpAddr, AddressFamily), TraceError>;
}

/// Numeric addresses resolve instantly; everything else goes through
/// `ToSocketAddrs` on a blocking thread, matching how the cloudflare-speed-cli
/// example keeps the runtime's worker threads off a blocking getaddrinfo call.
pub struct DefaultNameResolver;

#[async_trait]
impl NameResolver for DefaultNameResolver {
    async fn resolve(&self, target: &str, family_hint: Option<AddressFamily>) -> Result<(IpAddr, AddressFamily), TraceError> {
        if let Ok(addr) = target.parse::<IpAddr>() {
            return Ok((addr, AddressFamily::of(addr)));
        }

        let owned_target = target.to_string();
        let addrs = tokio::task::spawn_blocking(move || {
            (owned_target.as_str(), 0u16).to_socket_addrs().map(|iter| iter.map(|s| s.ip()).collect::<Vec<_>>())
        })
        .await
        .map_err(|_| TraceError::ResolutionFailed("resolver task panicked".into()))?
        .map_err(|e| TraceError::ResolutionFailed(e.to_string()))?;

        let chosen = family_hint
            .and_then(|hint| addrs.iter().copied().find(|a| AddressFamily::of(*a) == hint))
            .or_else(|| addrs.first().copied())
            .ok_or_else(|| TraceError::ResolutionFailed(format!("no addresses found for {target}")))?;
        Ok((chosen, AddressFamily::of(chosen)))
    }
}

#[async_trait]
pub trait ReverseResolver: Send + Sync {
    async fn reverse(&self, addr: IpAddr) -> Option<String>;
}

/// Falls back to `None` (numeric rendering) on any failure — a reverse
/// lookup is cosmetic, never worth failing a trace over.
pub struct DefaultReverseResolver;

#[async_trait]
impl ReverseResolver for DefaultReverseResolver {
    async fn reverse(&self, addr: IpAddr) -> Option<String> {
        tokio::task::spawn_blocking(move || {
            dns_lookup::getnameinfo(&SocketAddr::new(addr, 0), 0).ok().map(|(name, _service)| name)
        })
        .await
        .ok()
        .flatten()
    }
}

/// Render a trace in the console format: one line per hop, one group per
/// distinct source address within the hop, continuation lines for
/// additional addresses indented by three spaces, timeouts as repeated `*`.
pub async fn render(trace: &Trace, reverse: &dyn ReverseResolver) -> String {
    let mut out = String::new();
    for hop in trace {
        match hop {
            HopResult::Reached { ttl, probes } | HopResult::Intermediate { ttl, probes } => {
                render_probe_group(&mut out, *ttl, probes, reverse).await;
            }
            HopResult::Timeout { ttl, retries } => {
                let stars = vec!["*"; usize::from(*retries)].join("  ");
                out.push_str(&format!("{ttl}  {stars}\n"));
            }
            HopResult::Error { ttl, reason } => {
                out.push_str(&format!("{ttl}  !{reason}\n"));
            }
        }
    }
    out
}

async fn render_probe_group(out: &mut String, ttl: u8, probes: &[crate::trace::ProbeReport], reverse: &dyn ReverseResolver) {
    let mut by_source: Vec<(IpAddr, Vec<u64>)> = Vec::new();
    for probe in probes {
        match by_source.iter_mut().find(|(addr, _)| *addr == probe.source) {
            Some((_, times)) => times.push(probe.elapsed_us),
            None => by_source.push((probe.source, vec![probe.elapsed_us])),
        }
    }

    for (index, (addr, times)) in by_source.iter().enumerate() {
        let name = reverse.reverse(*addr).await.unwrap_or_else(|| addr.to_string());
        let times_str = times.iter().map(|us| format!("{:.3}ms", *us as f64 / 1000.0)).collect::<Vec<_>>().join("  ");
        if index == 0 {
            out.push_str(&format!("{ttl}  {name} ({addr}) {times_str}\n"));
        } else {
            out.push_str(&format!("   {name} ({addr}) {times_str}\n"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    struct NumericOnly;

    #[async_trait]
    impl ReverseResolver for NumericOnly {
        async fn reverse(&self, _addr: IpAddr) -> Option<String> {
            None
        }
    }

    #[tokio::test]
    async fn numeric_target_resolves_without_dns() {
        let resolver = DefaultNameResolver;
        let (addr, family) = resolver.resolve("192.0.2.1", None).await.unwrap();
        assert_eq!(addr, IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)));
        assert_eq!(family, AddressFamily::V4);
    }

    #[tokio::test]
    async fn render_groups_continuation_lines_by_source() {
        let probes = vec![
            crate::trace::ProbeReport { source: Ipv4Addr::new(10, 0, 0, 1).into(), elapsed_us: 1500 },
            crate::trace::ProbeReport { source: Ipv4Addr::new(10, 0, 0, 2).into(), elapsed_us: 2200 },
        ];
        let trace = vec![HopResult::Intermediate { ttl: 2, probes }];
        let rendered = render(&trace, &NumericOnly).await;
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("2  "));
        assert!(lines[1].starts_with("   "));
    }

    #[tokio::test]
    async fn render_timeout_hop_prints_stars() {
        let trace = vec![HopResult::Timeout { ttl: 4, retries: 3 }];
        let rendered = render(&trace, &NumericOnly).await;
        assert_eq!(rendered.trim(), "4  *  *  *");
    }
}
