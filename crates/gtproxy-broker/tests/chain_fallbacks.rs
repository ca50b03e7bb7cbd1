//! Timeouts, disconnects, fire-and-forget and injection.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::time::{Duration, Instant};

use gtproxy_broker::broker::{ChainOutcome, Directive, Response};
use gtproxy_broker::config::Fallback;
use gtproxy_broker::interest::{BlockingMode, Interest, InterestKind};
use gtproxy_core::protocol::frame::{ExtFrame, FrameOp};
use gtproxy_core::protocol::{Direction, NetType, TankType};
use gtproxy_core::ProxyError;

use harness::*;

fn all_tanks(id: u32, priority: i32) -> Interest {
    Interest::new(id, InterestKind::Net(NetType::TankPacket)).with_priority(priority)
}

fn observer(id: u32) -> Interest {
    Interest::new(id, InterestKind::Net(NetType::GenericText)).with_blocking(BlockingMode::SendAndForget)
}

#[tokio::test]
async fn silent_holder_times_out_with_cancel() {
    let mut cfg = section(50);
    cfg.on_timeout = Fallback::Cancel;
    let (broker, _inj) = broker_with(cfg);
    let mut rx = connect(&broker, "silent", vec![all_tanks(1, 0)]);

    let started = Instant::now();
    let h = dispatch(&broker, tank(TankType::State, 1), Direction::ClientToServer);
    let f = next_frame(&mut rx).await;

    match finish(h).await {
        ChainOutcome::Cancelled(p) => assert_eq!(p.hit_count, 1),
        other => panic!("unexpected {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(broker.metrics().hop_timeouts.get(&[]), 1);

    // Too late: the chain already moved on.
    let err = answer(&broker, "silent", &f, Directive::Pass).unwrap_err();
    assert!(matches!(err, ProxyError::UnknownChain(_)));
}

#[tokio::test]
async fn silent_holder_times_out_with_pass() {
    let (broker, _inj) = broker_with(section(50));
    let _rx_a = connect(&broker, "silent", vec![all_tanks(1, 2)]);
    let mut rx_b = connect(&broker, "B", vec![all_tanks(1, 1)]);

    let h = dispatch(&broker, tank(TankType::State, 1), Direction::ClientToServer);
    let f = next_frame(&mut rx_b).await;
    assert_eq!(f.hit_count, 1);
    answer(&broker, "B", &f, Directive::Pass).unwrap();

    match finish(h).await {
        ChainOutcome::Forward(p) => assert_eq!(p.hit_count, 2),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn timeout_bounds_each_hop_not_the_chain() {
    let (broker, _inj) = broker_with(section(200));
    let mut rx_a = connect(&broker, "A", vec![all_tanks(1, 2)]);
    let mut rx_b = connect(&broker, "B", vec![all_tanks(1, 1)]);

    let h = dispatch(&broker, tank(TankType::State, 1), Direction::ClientToServer);

    let f = next_frame(&mut rx_a).await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    answer(&broker, "A", &f, Directive::Pass).unwrap();

    let f = next_frame(&mut rx_b).await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    answer(&broker, "B", &f, Directive::Pass).unwrap();

    assert!(matches!(finish(h).await, ChainOutcome::Forward(ref p) if p.hit_count == 2));
    assert_eq!(broker.metrics().hop_timeouts.get(&[]), 0);
}

#[tokio::test]
async fn holder_disconnect_applies_pass() {
    let (broker, _inj) = broker();
    let mut rx_a = connect(&broker, "A", vec![all_tanks(1, 2)]);
    let mut rx_b = connect(&broker, "B", vec![all_tanks(1, 1)]);
    assert_eq!(broker.extension_count(), 2);

    let h = dispatch(&broker, tank(TankType::State, 1), Direction::ClientToServer);
    let _ = next_frame(&mut rx_a).await;
    broker.unregister("A");
    assert_eq!(broker.extension_count(), 1);

    let f = next_frame(&mut rx_b).await;
    answer(&broker, "B", &f, Directive::Pass).unwrap();

    assert!(matches!(finish(h).await, ChainOutcome::Forward(ref p) if p.hit_count == 2));
    assert_eq!(broker.metrics().disconnect_fallbacks.get(&[]), 1);
    assert_eq!(broker.metrics().extensions_connected.get(&[]), 1);
}

#[tokio::test]
async fn holder_disconnect_applies_cancel() {
    let mut cfg = section(5000);
    cfg.on_disconnect = Fallback::Cancel;
    let (broker, _inj) = broker_with(cfg);
    let mut rx_a = connect(&broker, "A", vec![all_tanks(1, 2)]);
    let mut rx_b = connect(&broker, "B", vec![all_tanks(1, 1)]);

    let h = dispatch(&broker, tank(TankType::State, 1), Direction::ClientToServer);
    let _ = next_frame(&mut rx_a).await;

    let b = std::sync::Arc::clone(&broker);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        b.unregister("A");
    });

    assert!(matches!(finish(h).await, ChainOutcome::Cancelled(_)));
    assert!(rx_b.try_recv().is_err());
}

#[tokio::test]
async fn closed_link_counts_as_disconnect() {
    let (broker, _inj) = broker();
    let rx_a = connect(&broker, "gone", vec![all_tanks(1, 2)]);
    drop(rx_a);
    let mut rx_b = connect(&broker, "B", vec![all_tanks(1, 1)]);

    let h = dispatch(&broker, tank(TankType::State, 1), Direction::ClientToServer);
    let f = next_frame(&mut rx_b).await;
    assert_eq!(f.hit_count, 1);
    answer(&broker, "B", &f, Directive::Pass).unwrap();

    assert!(matches!(finish(h).await, ChainOutcome::Forward(_)));
    assert_eq!(broker.metrics().disconnect_fallbacks.get(&[]), 1);
}

#[tokio::test]
async fn replaced_session_cleanup_keeps_the_successor() {
    let (broker, _inj) = broker();
    let (old, mut old_rx) = connect_session(&broker, "dup", vec![all_tanks(1, 0)]);
    let (new, mut new_rx) = connect_session(&broker, "dup", vec![all_tanks(1, 0)]);
    assert_ne!(old, new);
    assert!(!broker.is_current("dup", old));
    assert!(broker.is_current("dup", new));

    // The replaced link is closed, so the old session winds down and
    // cleans up after itself.
    assert!(old_rx.recv().await.is_none());
    broker.unregister_session("dup", old);
    assert_eq!(broker.extension_count(), 1);
    assert_eq!(broker.metrics().extensions_connected.get(&[]), 1);

    let h = dispatch(&broker, tank(TankType::State, 1), Direction::ClientToServer);
    let f = next_frame(&mut new_rx).await;
    answer(&broker, "dup", &f, Directive::Pass).unwrap();
    assert!(matches!(finish(h).await, ChainOutcome::Forward(ref p) if p.hit_count == 1));

    broker.unregister_session("dup", new);
    assert_eq!(broker.extension_count(), 0);
    assert_eq!(broker.metrics().extensions_connected.get(&[]), 0);
}

#[tokio::test]
async fn replacing_a_holder_releases_its_chain() {
    let (broker, _inj) = broker();
    let mut old_rx = connect(&broker, "A", vec![all_tanks(1, 2)]);
    let mut rx_b = connect(&broker, "B", vec![all_tanks(1, 1)]);

    let h = dispatch(&broker, tank(TankType::State, 1), Direction::ClientToServer);
    let held = next_frame(&mut old_rx).await;
    let _new_rx = connect(&broker, "A", vec![all_tanks(1, 2)]);

    let f = next_frame(&mut rx_b).await;
    assert_eq!(f.hit_count, 1);
    answer(&broker, "B", &f, Directive::Pass).unwrap();

    assert!(matches!(finish(h).await, ChainOutcome::Forward(ref p) if p.hit_count == 2));
    assert_eq!(broker.metrics().disconnect_fallbacks.get(&[]), 1);
    let err = answer(&broker, "A", &held, Directive::Cancel).unwrap_err();
    assert!(matches!(err, ProxyError::UnknownChain(_)));
}

#[tokio::test]
async fn sweep_drops_chains_nobody_awaits() {
    let (broker, _inj) = broker();
    let mut rx = connect(&broker, "A", vec![all_tanks(1, 0)]);

    let h = dispatch(&broker, tank(TankType::State, 1), Direction::ClientToServer);
    let f = next_frame(&mut rx).await;
    assert_eq!(broker.sweep_expired(), 0);
    assert_eq!(broker.active_chains(), 1);

    h.abort();
    assert!(h.await.unwrap_err().is_cancelled());
    assert_eq!(broker.sweep_expired(), 1);
    assert_eq!(broker.active_chains(), 0);
    assert_eq!(
        broker.metrics().chain_outcomes.get(&[("outcome", "abandoned")]),
        1
    );

    let err = answer(&broker, "A", &f, Directive::Pass).unwrap_err();
    assert!(matches!(err, ProxyError::UnknownChain(_)));
}

#[tokio::test]
async fn unregister_of_unknown_extension_is_harmless() {
    let (broker, _inj) = broker();
    broker.unregister("nobody");
    assert_eq!(broker.extension_count(), 0);
    assert_eq!(broker.metrics().extensions_connected.get(&[]), 0);
}

#[tokio::test]
async fn observers_never_gate_the_packet() {
    let (broker, mut injected) = broker();
    let mut rx = connect(&broker, "watcher", vec![observer(9)]);

    let original = text(NetType::GenericText, &[&["action", "input"], &["text", "hi"]]);
    let out = broker
        .process(original.clone(), Direction::ClientToServer, 3)
        .await
        .unwrap();
    assert_eq!(out, ChainOutcome::Passthrough);

    let f = next_frame(&mut rx).await;
    assert_eq!(f.op, FrameOp::Deliver);
    assert_eq!(f.interest_id, 9);
    assert_eq!(f.packet, original);
    assert_eq!(broker.pending_fire_and_forget(), 1);

    let reply = text(NetType::GenericText, &[&["action", "input"], &["text", "bye"]]);
    answer(&broker, "watcher", &f, Directive::forward(reply.clone())).unwrap();

    let p = injected.try_recv().unwrap();
    assert_eq!(p.bytes, reply);
    assert_eq!(p.direction, Direction::ClientToServer);
    assert_eq!(p.flags, 3);
    assert_eq!(broker.pending_fire_and_forget(), 0);
    assert_eq!(
        broker.metrics().injected_packets.get(&[("source", "fire_and_forget")]),
        1
    );
}

#[tokio::test]
async fn observer_pass_injects_nothing() {
    let (broker, mut injected) = broker();
    let mut rx = connect(&broker, "watcher", vec![observer(1)]);

    broker
        .process(text(NetType::GenericText, &[&["a", "b"]]), Direction::ServerToClient, 0)
        .await
        .unwrap();
    let f = next_frame(&mut rx).await;

    let err = answer(&broker, "intruder", &f, Directive::Cancel).unwrap_err();
    assert!(matches!(err, ProxyError::NotChainHolder { .. }));

    answer(&broker, "watcher", &f, Directive::Pass).unwrap();
    assert!(injected.try_recv().is_err());
    assert_eq!(broker.pending_fire_and_forget(), 0);
}

#[tokio::test]
async fn observers_and_blockers_on_the_same_packet() {
    let (broker, _inj) = broker();
    let mut rx_watch = connect(&broker, "watcher", vec![observer(1)]);
    let mut rx_block = connect(
        &broker,
        "blocker",
        vec![Interest::new(2, InterestKind::Net(NetType::GenericText))],
    );

    let h = dispatch(&broker, text(NetType::GenericText, &[&["a", "b"]]), Direction::ClientToServer);
    let seen = next_frame(&mut rx_watch).await;
    let held = next_frame(&mut rx_block).await;
    assert_ne!(seen.packet_id, held.packet_id);

    answer(&broker, "blocker", &held, Directive::Cancel).unwrap();
    assert!(matches!(finish(h).await, ChainOutcome::Cancelled(_)));
    assert_eq!(broker.pending_fire_and_forget(), 1);
}

#[tokio::test]
async fn stale_observer_entries_are_swept() {
    let (broker, _inj) = broker_with(section(20));
    let mut rx = connect(&broker, "watcher", vec![observer(1)]);

    broker
        .process(text(NetType::GenericText, &[&["a", "b"]]), Direction::ClientToServer, 0)
        .await
        .unwrap();
    let f = next_frame(&mut rx).await;

    assert_eq!(broker.sweep_expired(), 0);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(broker.sweep_expired(), 1);

    let err = answer(&broker, "watcher", &f, Directive::Pass).unwrap_err();
    assert!(matches!(err, ProxyError::UnknownChain(_)));
}

#[tokio::test]
async fn unregister_drops_observer_entries() {
    let (broker, _inj) = broker();
    let mut rx = connect(&broker, "watcher", vec![observer(1)]);
    broker
        .process(text(NetType::GenericText, &[&["a", "b"]]), Direction::ClientToServer, 0)
        .await
        .unwrap();
    let _ = next_frame(&mut rx).await;

    broker.unregister("watcher");
    assert_eq!(broker.pending_fire_and_forget(), 0);
}

#[tokio::test]
async fn push_injects_valid_packets_only() {
    let (broker, mut injected) = broker();

    let pkt = tank(TankType::SendParticleEffect, 4);
    broker.inject(pkt.clone(), Direction::ServerToClient, 7).unwrap();
    let p = injected.try_recv().unwrap();
    assert_eq!(p.bytes, pkt);
    assert_eq!(p.direction, Direction::ServerToClient);
    assert_eq!(p.flags, 7);
    assert_eq!(broker.metrics().injected_packets.get(&[("source", "push")]), 1);

    let err = broker
        .inject(bytes::Bytes::from_static(&[9, 0, 0, 0, 0]), Direction::ServerToClient, 0)
        .unwrap_err();
    assert!(matches!(err, ProxyError::Codec(_)));
    assert!(injected.try_recv().is_err());
}

#[test]
fn frames_map_to_responses() {
    let mut frame = ExtFrame::new(FrameOp::Forward, 11, tank(TankType::State, 1));
    frame.direction = Direction::ServerToClient;
    frame.interest_id = 4;
    let resp = Response::from_frame(frame.clone()).unwrap();
    assert_eq!(resp.packet_id, 11);
    assert_eq!(resp.interest_id, 4);
    assert_eq!(
        resp.directive,
        Directive::Forward {
            packet: frame.packet.clone(),
            direction: Direction::ServerToClient,
        }
    );

    let cancel = Response::from_frame(ExtFrame::new(FrameOp::Cancel, 12, bytes::Bytes::new())).unwrap();
    assert_eq!(cancel.directive, Directive::Cancel);

    frame.op = FrameOp::Deliver;
    let err = Response::from_frame(frame).unwrap_err();
    assert_eq!(err.code().as_str(), "BAD_REQUEST");
}
