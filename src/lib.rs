//! Network path discovery: emit probe packets with deliberately limited hop
//! counts and correlate the error messages they provoke back to the probe
//! that sent them. Three probe flavors (echo, datagram, stream) over IPv4
//! and IPv6, built around a single shared per-family receiver that
//! demultiplexes inbound messages by correlation key.

pub mod adapters;
pub mod channel;
pub mod codec;
pub mod error;
pub mod family;
pub mod options;
pub mod orchestrator;
pub mod probe;
pub mod receiver;
pub mod trace;

pub use adapters::{DefaultNameResolver, DefaultReverseResolver, NameResolver, ReverseResolver};
pub use error::TraceError;
pub use family::AddressFamily;
pub use options::{Options, ProbeKind};
pub use trace::{HopResult, ProbeReport, Trace, TraceOutcome};

/// Resolve `target`, run the trace, and (if `options.print_output`) render it
/// to stdout. This is the crate's sole library entry point — there is no
/// CLI/argument-parsing binary here.
pub async fn run(target: &str, options: Options) -> Result<TraceOutcome, TraceError> {
    let resolver = DefaultNameResolver;
    let (addr, resolved_family) = resolver.resolve(target, Some(options.family)).await?;

    let mut options = options;
    options.family = resolved_family;

    let outcome = orchestrator::trace(addr, &options).await;

    if options.print_output {
        let reverse = DefaultReverseResolver;
        let rendered = adapters::render(outcome.trace(), &reverse).await;
        print!("{rendered}");
    }

    Ok(outcome)
}
