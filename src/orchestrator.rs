//! The trace orchestrator (C4): per-hop parallel probing with staggered
//! launch, retry-on-total-timeout, and the combine policy that decides
//! whether a hop reached the destination, was merely an intermediate, timed
//! out, or errored.

use std::net::IpAddr;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::TraceError;
use crate::options::{Options, PROBE_STAGGER};
use crate::probe::{self, ProbeOutcome, ProbeRecord};
use crate::trace::{HopResult, ProbeReport, Trace, TraceOutcome};

/// Run the full per-hop loop against an already-resolved `target`.
pub async fn trace(target: IpAddr, options: &Options) -> TraceOutcome {
    let mut hops: Trace = Vec::new();
    let mut ttl = options.min_ttl;
    let mut retries = 0u8;

    loop {
        if ttl > options.max_hops {
            return TraceOutcome::MaxHopsExceeded(hops);
        }

        let outcomes = run_hop(target, options, ttl).await;
        match combine(ttl, outcomes, retries, options.max_retries) {
            Combine::Reached(result) => {
                hops.push(result);
                return TraceOutcome::Reached(hops);
            }
            Combine::Advance(result) => {
                hops.push(result);
                retries = 0;
                ttl += 1;
            }
            Combine::Retry => {
                retries += 1;
            }
        }
    }
}

async fn run_hop(target: IpAddr, options: &Options, ttl: u8) -> Vec<ProbeOutcome> {
    let per_probe_timeout = Duration::from_secs(options.timeout_seconds);
    let mut handles: Vec<JoinHandle<ProbeOutcome>> = Vec::with_capacity(options.probes_per_hop);

    for k in 0..options.probes_per_hop {
        let stagger = PROBE_STAGGER * k as u32;
        let kind = options.kind;
        let family = options.family;
        handles.push(tokio::spawn(async move {
            if !stagger.is_zero() {
                tokio::time::sleep(stagger).await;
            }
            probe::run(kind, family, target, ttl, per_probe_timeout).await
        }));
    }

    let aggregate = per_probe_timeout + Duration::from_secs(1) + PROBE_STAGGER * options.probes_per_hop as u32;
    let deadline = Instant::now() + aggregate;

    let mut outcomes = Vec::with_capacity(handles.len());
    for mut handle in handles {
        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(outcome)) => outcomes.push(outcome),
            Ok(Err(_join_error)) => outcomes.push(ProbeOutcome::Error(TraceError::Codec("probe task panicked".into()))),
            Err(_elapsed) => {
                handle.abort();
                outcomes.push(ProbeOutcome::Timeout);
            }
        }
    }
    outcomes
}

enum Combine {
    Reached(HopResult),
    Advance(HopResult),
    Retry,
}

/// Decide whether a hop reached the destination, was an intermediate,
/// should be retried, or timed out, from one hop's probe outcomes.
fn combine(ttl: u8, outcomes: Vec<ProbeOutcome>, retries: u8, max_retries: u8) -> Combine {
    let mut reached = Vec::new();
    let mut intermediate = Vec::new();
    let mut saw_timeout = false;
    let mut first_error: Option<TraceError> = None;

    for outcome in outcomes {
        match outcome {
            ProbeOutcome::Reached(record) => reached.push(record),
            ProbeOutcome::Intermediate(record) => intermediate.push(record),
            ProbeOutcome::Timeout => saw_timeout = true,
            ProbeOutcome::Error(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    if !reached.is_empty() {
        // A destination-reached outcome absorbs same-TTL intermediates too —
        // they most likely also reached the destination (§4.4).
        let mut probes: Vec<ProbeReport> = reached.into_iter().map(as_report).collect();
        probes.extend(intermediate.into_iter().map(as_report));
        return Combine::Reached(HopResult::Reached { ttl, probes });
    }

    if !intermediate.is_empty() {
        return Combine::Advance(HopResult::Intermediate {
            ttl,
            probes: intermediate.into_iter().map(as_report).collect(),
        });
    }

    if let Some(reason) = first_error {
        return Combine::Advance(HopResult::Error { ttl, reason: reason.to_string() });
    }

    debug_assert!(saw_timeout, "combine() called with no probe outcomes for ttl {ttl}");
    if retries < max_retries {
        Combine::Retry
    } else {
        Combine::Advance(HopResult::Timeout { ttl, retries: max_retries })
    }
}

fn as_report(record: ProbeRecord) -> ProbeReport {
    ProbeReport { source: record.peer, elapsed_us: record.elapsed_us }
}
