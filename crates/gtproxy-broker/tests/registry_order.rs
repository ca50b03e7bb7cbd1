//! Registry buckets: ordering, merging and removal.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use tokio::sync::mpsc;

use gtproxy_broker::interest::{Interest, InterestKind};
use gtproxy_broker::registry::{Client, Extension, ExtensionRegistry};
use gtproxy_core::protocol::{Direction, NetPacket, NetType, StrKv, TankPacket, TankType};

fn ext(name: &str, interests: Vec<Interest>) -> Extension {
    Extension {
        id: Arc::from(name),
        interests,
        link: mpsc::channel(1).0,
    }
}

fn names(clients: &[Client]) -> Vec<String> {
    clients.iter().map(|c| c.ext.to_string()).collect()
}

fn tank_kind() -> InterestKind {
    InterestKind::Net(NetType::TankPacket)
}

#[test]
fn priorities_5_1_5_3_dispatch_as_5a_5b_3_1() {
    let mut reg = ExtensionRegistry::new();
    for (name, prio) in [("5a", 5), ("1", 1), ("5b", 5), ("3", 3)] {
        reg.register(ext(name, vec![Interest::new(1, tank_kind()).with_priority(prio)]));
    }

    assert_eq!(names(reg.bucket(tank_kind())), ["5a", "5b", "3", "1"]);

    let packet = NetPacket::tank(TankPacket::new(TankType::State));
    assert_eq!(
        names(&reg.matches(&packet, Direction::ClientToServer)),
        ["5a", "5b", "3", "1"]
    );
}

#[test]
fn negative_priorities_sort_last() {
    let mut reg = ExtensionRegistry::new();
    reg.register(ext("neg", vec![Interest::new(1, tank_kind()).with_priority(-10)]));
    reg.register(ext("zero", vec![Interest::new(1, tank_kind())]));
    reg.register(ext("big", vec![Interest::new(1, tank_kind()).with_priority(i32::MAX)]));
    assert_eq!(names(reg.bucket(tank_kind())), ["big", "zero", "neg"]);
}

#[test]
fn tank_packets_merge_net_and_subtype_buckets() {
    let mut reg = ExtensionRegistry::new();
    reg.register(ext("all", vec![Interest::new(1, tank_kind()).with_priority(1)]));
    reg.register(ext(
        "calls",
        vec![Interest::new(2, InterestKind::Tank(TankType::CallFunction)).with_priority(2)],
    ));
    reg.register(ext(
        "state",
        vec![Interest::new(3, InterestKind::Tank(TankType::State)).with_priority(3)],
    ));

    let call = NetPacket::tank(TankPacket::new(TankType::CallFunction));
    assert_eq!(names(&reg.matches(&call, Direction::ServerToClient)), ["calls", "all"]);

    let text = NetPacket::table(NetType::GenericText, StrKv::new());
    assert!(reg.matches(&text, Direction::ServerToClient).is_empty());
}

#[test]
fn direction_filters_clients() {
    let mut reg = ExtensionRegistry::new();
    reg.register(ext(
        "out",
        vec![Interest::new(1, tank_kind()).with_direction(Direction::ClientToServer)],
    ));
    reg.register(ext(
        "in",
        vec![Interest::new(1, tank_kind()).with_direction(Direction::ServerToClient)],
    ));
    reg.register(ext("both", vec![Interest::new(1, tank_kind())]));

    let packet = NetPacket::tank(TankPacket::new(TankType::State));
    assert_eq!(names(&reg.matches(&packet, Direction::ClientToServer)), ["out", "both"]);
    assert_eq!(names(&reg.matches(&packet, Direction::ServerToClient)), ["in", "both"]);
}

#[test]
fn unregister_removes_every_client() {
    let mut reg = ExtensionRegistry::new();
    reg.register(ext(
        "multi",
        vec![
            Interest::new(1, tank_kind()),
            Interest::new(2, InterestKind::Net(NetType::GenericText)),
        ],
    ));
    reg.register(ext("other", vec![Interest::new(1, tank_kind())]));
    assert_eq!(reg.len(), 2);

    let entry = reg.unregister("multi").unwrap();
    assert_eq!(entry.interests.len(), 2);
    assert_eq!(reg.len(), 1);
    assert_eq!(names(reg.bucket(tank_kind())), ["other"]);
    assert_eq!(reg.bucket_len(InterestKind::Net(NetType::GenericText)), 0);

    assert!(reg.unregister("multi").is_none());
    assert!(!reg.contains("multi"));
}

#[test]
fn duplicate_registration_replaces() {
    let mut reg = ExtensionRegistry::new();
    reg.register(ext("dup", vec![Interest::new(1, tank_kind()).with_priority(9)]));
    reg.register(ext("mid", vec![Interest::new(1, tank_kind()).with_priority(5)]));
    reg.register(ext("dup", vec![Interest::new(2, tank_kind()).with_priority(1)]));

    assert_eq!(reg.len(), 2);
    let bucket = reg.bucket(tank_kind());
    assert_eq!(names(bucket), ["mid", "dup"]);
    assert_eq!(bucket[1].interest.id, 2);
}

#[test]
fn ties_keep_registration_order_across_interleaved_inserts() {
    let mut reg = ExtensionRegistry::new();
    let order = [("a", 2), ("b", 7), ("c", 2), ("d", 7), ("e", 2), ("f", 0)];
    for (name, prio) in order {
        reg.register(ext(name, vec![Interest::new(1, tank_kind()).with_priority(prio)]));
    }
    assert_eq!(names(reg.bucket(tank_kind())), ["b", "d", "a", "c", "e", "f"]);

    let seqs: Vec<u64> = reg.bucket(tank_kind()).iter().map(|c| c.seq).collect();
    let prios: Vec<i32> = reg.bucket(tank_kind()).iter().map(Client::priority).collect();
    assert!(prios.windows(2).all(|w| w[0] >= w[1]));
    for w in reg.bucket(tank_kind()).windows(2) {
        if w[0].priority() == w[1].priority() {
            assert!(w[0].seq < w[1].seq);
        }
    }
    assert_eq!(seqs.len(), order.len());
}

#[test]
fn stale_session_cannot_unregister_its_replacement() {
    let mut reg = ExtensionRegistry::new();
    let (first, replaced) = reg.register(ext("dup", vec![Interest::new(1, tank_kind())]));
    assert!(replaced.is_none());
    let (second, replaced) = reg.register(ext("dup", vec![Interest::new(2, tank_kind())]));
    assert_eq!(replaced.map(|e| e.session), Some(first));
    assert_ne!(first, second);

    assert!(reg.unregister_session("dup", first).is_none());
    assert!(reg.is_current("dup", second));
    assert_eq!(reg.bucket(tank_kind())[0].session, second);

    assert!(reg.unregister_session("dup", second).is_some());
    assert!(reg.is_empty());
}
