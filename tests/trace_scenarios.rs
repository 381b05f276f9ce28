//! End-to-end orchestrator scenarios, driven against a synthetic wire
//! instead of a real raw socket. Each test installs a
//! [`LoopbackChannel`] as the process-wide V4 receiver, then races a
//! background "responder" task against [`tracepath::orchestrator::trace`]:
//! the responder watches the channel's outbound log, decodes the echo
//! identifier each probe just sent, and injects the scripted reply for it.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Mutex as StdMutex, Once};
use std::time::Duration;

use tracepath::channel::test_support::LoopbackChannel;
use tracepath::codec::{self, echo};
use tracepath::options::ProbeKind;
use tracepath::receiver::{self, ReceiverHandle};
use tracepath::trace::{HopResult, TraceOutcome};
use tracepath::{AddressFamily, Options};

static LOCK: StdMutex<()> = StdMutex::new(());

static INIT: Once = Once::new();

fn setup() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
            .is_test(true)
            .try_init();
    });
}

fn target() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1))
}

enum Scripted {
    TimeExceededFrom(IpAddr),
    EchoReplyFromTarget,
}

fn build_reply(scripted: &Scripted, identifier: u16, target: IpAddr) -> (IpAddr, Vec<u8>) {
    match scripted {
        Scripted::TimeExceededFrom(router) => {
            let mut buf = vec![11u8, 0, 0, 0, 0, 0, 0, 0];
            let mut embedded_ip = vec![0x45u8, 0, 0, 0, 0, 0, 0, 0, 0, 1];
            embedded_ip.resize(20, 0);
            embedded_ip[9] = 1;
            embedded_ip.extend_from_slice(&codec::encode_request(AddressFamily::V4, identifier, 1, &[]));
            buf.extend_from_slice(&embedded_ip);
            (*router, buf)
        }
        Scripted::EchoReplyFromTarget => {
            let mut pkt = codec::encode_request(AddressFamily::V4, identifier, 1, b"tracepath");
            pkt[0] = 0; // echo-reply type
            (target, pkt)
        }
    }
}

/// Spawn a background task that watches `channel.sent` for new outbound echo
/// requests (in arrival order) and injects `script[i]`'s reply for the i-th
/// one, keyed off the identifier the probe actually chose.
fn spawn_responder(channel: std::sync::Arc<LoopbackChannel>, script: Vec<Scripted>, target: IpAddr) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut seen = 0usize;
        while seen < script.len() {
            tokio::time::sleep(Duration::from_millis(2)).await;
            let sent = channel.sent.lock().await;
            if sent.len() <= seen {
                continue;
            }
            let (_dest, packet) = sent[seen].clone();
            drop(sent);
            let identifier = echo::parse_header(&packet).expect("probe always sends a valid echo header").identifier;
            let (peer, reply) = build_reply(&script[seen], identifier, target);
            channel.inject(peer, reply);
            seen += 1;
        }
    })
}

#[tokio::test]
async fn scenario_1_simple_reach_at_hop_3() {
    let _guard = LOCK.lock().unwrap();
    setup();
    receiver::reset_for_tests().await;
    let channel = LoopbackChannel::new();
    receiver::install_for_tests(AddressFamily::V4, ReceiverHandle::spawn(AddressFamily::V4, channel.clone())).await;

    let target = target();
    let router_a: IpAddr = Ipv4Addr::new(10, 0, 0, 1).into();
    let router_b: IpAddr = Ipv4Addr::new(10, 0, 0, 2).into();
    let script = vec![
        Scripted::TimeExceededFrom(router_a),
        Scripted::TimeExceededFrom(router_b),
        Scripted::EchoReplyFromTarget,
    ];
    let responder = spawn_responder(channel, script, target);

    let options = Options {
        kind: ProbeKind::Echo,
        family: AddressFamily::V4,
        max_hops: 5,
        max_retries: 3,
        timeout_seconds: 2,
        probes_per_hop: 1,
        min_ttl: 1,
        print_output: false,
    };
    let outcome = tracepath::orchestrator::trace(target, &options).await;
    responder.await.unwrap();

    match outcome {
        TraceOutcome::Reached(hops) => {
            assert_eq!(hops.len(), 3);
            assert_eq!(hops[0].ttl(), 1);
            assert!(matches!(hops[0], HopResult::Intermediate { .. }));
            assert_eq!(hops[1].ttl(), 2);
            assert!(matches!(hops[1], HopResult::Intermediate { .. }));
            assert_eq!(hops[2].ttl(), 3);
            assert!(hops[2].is_reached());
            assert_eq!(hops[2].probes()[0].source, target);
        }
        TraceOutcome::MaxHopsExceeded(hops) => panic!("expected to reach the target, got {hops:?}"),
    }
}

#[tokio::test]
async fn scenario_2_parallel_probes_multiple_intermediates_at_one_hop() {
    let _guard = LOCK.lock().unwrap();
    setup();
    receiver::reset_for_tests().await;
    let channel = LoopbackChannel::new();
    receiver::install_for_tests(AddressFamily::V4, ReceiverHandle::spawn(AddressFamily::V4, channel.clone())).await;

    let target = target();
    let routers: Vec<IpAddr> =
        vec![Ipv4Addr::new(10, 0, 1, 1).into(), Ipv4Addr::new(10, 0, 1, 2).into(), Ipv4Addr::new(10, 0, 1, 3).into()];
    let script = routers.iter().map(|r| Scripted::TimeExceededFrom(*r)).collect();
    let responder = spawn_responder(channel, script, target);

    let options = Options {
        kind: ProbeKind::Echo,
        family: AddressFamily::V4,
        max_hops: 2,
        max_retries: 3,
        timeout_seconds: 2,
        probes_per_hop: 3,
        min_ttl: 2,
        print_output: false,
    };
    let outcome = tracepath::orchestrator::trace(target, &options).await;
    responder.await.unwrap();

    match outcome {
        TraceOutcome::MaxHopsExceeded(hops) => {
            assert_eq!(hops.len(), 1);
            match &hops[0] {
                HopResult::Intermediate { ttl, probes } => {
                    assert_eq!(*ttl, 2);
                    assert_eq!(probes.len(), 3);
                    let mut sources: Vec<IpAddr> = probes.iter().map(|p| p.source).collect();
                    sources.sort();
                    let mut expected = routers.clone();
                    expected.sort();
                    assert_eq!(sources, expected);
                }
                other => panic!("expected Intermediate hop, got {other:?}"),
            }
        }
        TraceOutcome::Reached(hops) => panic!("did not expect to reach the target, got {hops:?}"),
    }
}

#[tokio::test]
async fn scenario_3_total_timeout_retries_then_advances() {
    let _guard = LOCK.lock().unwrap();
    setup();
    receiver::reset_for_tests().await;
    let channel = LoopbackChannel::new();
    receiver::install_for_tests(AddressFamily::V4, ReceiverHandle::spawn(AddressFamily::V4, channel)).await;

    // No responder at all: every probe at ttl 4 times out, every retry.
    let options = Options {
        kind: ProbeKind::Echo,
        family: AddressFamily::V4,
        max_hops: 4,
        max_retries: 3,
        timeout_seconds: 0,
        probes_per_hop: 1,
        min_ttl: 4,
        print_output: false,
    };
    let outcome = tracepath::orchestrator::trace(target(), &options).await;

    match outcome {
        TraceOutcome::MaxHopsExceeded(hops) => {
            assert_eq!(hops.len(), 1);
            assert_eq!(hops[0], HopResult::Timeout { ttl: 4, retries: 3 });
        }
        TraceOutcome::Reached(hops) => panic!("expected max-hops exhaustion, got {hops:?}"),
    }
}
