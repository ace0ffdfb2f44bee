use swimnode::testing::SimCluster;
use swimnode::{MembershipEvent, NodeConfig, PeerId, Snapshot, Status, StatusKind};

fn id(name: &str) -> PeerId {
    PeerId::from(name)
}

fn config(local: &str, contacts: &[&str]) -> NodeConfig {
    let mut config = NodeConfig::new(id(local)).with_contacts(contacts.iter().map(|c| id(c)));
    config.view_dump_interval = None;
    config
}

// What a node knows before the cluster starts
fn seed(cluster: &mut SimCluster, node: &str, alive: &[&str]) {
    let snapshot: Snapshot = alive
        .iter()
        .map(|peer| (id(peer), Status::alive(id(peer), 0, id(node))))
        .collect();
    cluster.node_mut(&id(node)).merge_snapshot(&snapshot);
    cluster.node_mut(&id(node)).drain_events();
}

fn three_node_cluster() -> SimCluster {
    let mut cluster = SimCluster::new();
    cluster.add_node(config("a", &["c"]));
    cluster.add_node(config("b", &["a"]));
    cluster.add_node(config("c", &[]));
    seed(&mut cluster, "a", &["b", "c"]);
    cluster
}

#[test]
fn test_unreachable_peer_is_declared_dead() {
    let mut cluster = three_node_cluster();
    let (a, c) = (id("a"), id("c"));
    cluster.isolate(&c);
    cluster.start_all();

    // Direct probe at 3000, timeout and suspicion at 5000
    cluster.advance_ms(4_999);
    assert_eq!(cluster.kind(&a, &c), Some(StatusKind::Alive));

    cluster.advance_ms(1);
    assert_eq!(cluster.kind(&a, &c), Some(StatusKind::Suspected));
    assert!(cluster.node(&a).is_tracking_suspect(&c));
    assert_eq!(
        cluster.node(&a).relay_peers_for(&c).map(|relays| relays.len()),
        Some(1)
    );

    cluster.advance_ms(4_999);
    assert_eq!(cluster.kind(&a, &c), Some(StatusKind::Suspected));

    cluster.advance_ms(1);
    assert_eq!(cluster.kind(&a, &c), Some(StatusKind::Dead));
    assert!(!cluster.node(&a).is_tracking_suspect(&c));

    let events = cluster.node_mut(&a).drain_events();
    assert!(events
        .iter()
        .any(|event| matches!(event, MembershipEvent::MemberSuspected(s) if s.owner == c)));
    assert!(events
        .iter()
        .any(|event| matches!(event, MembershipEvent::MemberDead(s) if s.owner == c)));

    // The relay gave up silently
    assert_eq!(cluster.node(&id("b")).relay_count(), 0);
}

#[test]
fn test_death_spreads_through_gossip() {
    let mut cluster = three_node_cluster();
    let (a, b, c) = (id("a"), id("b"), id("c"));
    cluster.isolate(&c);
    cluster.start_all();

    cluster.advance_ms(10_000);
    assert_eq!(cluster.kind(&a, &c), Some(StatusKind::Dead));
    // b heard about the suspicion but does not share it at the same incarnation
    assert_eq!(cluster.kind(&b, &c), Some(StatusKind::Alive));

    // b's next probe of a brings back the death
    cluster.advance_ms(2_000);
    let status = cluster.status(&b, &c).expect("b knows c");
    assert_eq!(status.kind, StatusKind::Dead);
    assert_eq!(status.reporter, b);

    // Dead peers are no longer probed
    let delivered = cluster.delivered();
    let dropped = cluster.dropped();
    cluster.advance_ms(30_000);
    assert_eq!(cluster.dropped(), dropped);
    assert!(cluster.delivered() > delivered);
    assert_eq!(cluster.kind(&a, &c), Some(StatusKind::Dead));
}

#[test]
fn test_suspected_peer_refutes_after_recovery() {
    let mut cluster = SimCluster::new();
    let (a, c) = (id("a"), id("c"));
    cluster.add_node(config("a", &["c"]));
    cluster.add_node(config("c", &[]));
    seed(&mut cluster, "a", &["c"]);

    cluster.isolate(&c);
    cluster.start_all();
    cluster.advance_ms(5_000);
    assert_eq!(cluster.kind(&a, &c), Some(StatusKind::Suspected));
    assert!(cluster.node(&a).relay_peers_for(&c).is_some_and(|r| r.is_empty()));

    // The next probe carries the suspicion to c, which refutes it
    cluster.heal(&c);
    cluster.advance_ms(1_000);

    assert_eq!(cluster.node(&c).view().incarnation(), 1);
    let status = cluster.status(&a, &c).expect("a knows c");
    assert_eq!(status.kind, StatusKind::Alive);
    assert_eq!(status.incarnation, 1);
    assert!(!cluster.node(&a).is_tracking_suspect(&c));

    let refuted = cluster.node_mut(&c).drain_events();
    assert!(refuted
        .iter()
        .any(|event| matches!(event, MembershipEvent::Refuted { incarnation: 1 })));

    // Past the first escalation deadline
    cluster.advance_ms(10_000);
    assert_eq!(cluster.kind(&a, &c), Some(StatusKind::Alive));
}

#[test]
fn test_relay_keeps_partitioned_peer_from_dying() {
    let mut cluster = SimCluster::new();
    let (a, b, c) = (id("a"), id("b"), id("c"));
    cluster.add_node(config("a", &["c"]));
    cluster.add_node(config("b", &[]));
    cluster.add_node(config("c", &[]));
    seed(&mut cluster, "a", &["b", "c"]);

    cluster.block_link(&a, &c);
    cluster.start_all();

    // The direct probe fails but b reaches c on a's behalf
    cluster.advance_ms(5_000);
    assert_eq!(cluster.kind(&a, &c), Some(StatusKind::Suspected));
    assert!(!cluster.node(&a).is_tracking_suspect(&c));
    assert_eq!(cluster.kind(&b, &c), Some(StatusKind::Alive));
    assert_eq!(cluster.node(&b).relay_count(), 0);

    cluster.advance_ms(30_000);
    assert_eq!(cluster.kind(&a, &c), Some(StatusKind::Suspected));
    assert!(!cluster
        .node_mut(&a)
        .drain_events()
        .iter()
        .any(|event| matches!(event, MembershipEvent::MemberDead(_))));

    // Once the link heals, c sees the suspicion and refutes it
    cluster.unblock_link(&a, &c);
    cluster.advance_ms(3_000);
    let status = cluster.status(&a, &c).expect("a knows c");
    assert_eq!(status.kind, StatusKind::Alive);
    assert_eq!(status.incarnation, 1);
}

#[test]
fn test_views_converge_through_a_seed_node() {
    let mut cluster = SimCluster::new();
    let names = ["n1", "n2", "n3", "n4"];
    for name in names {
        let contacts: &[&str] = if name == "n1" { &[] } else { &["n1"] };
        let mut config = config(name, contacts);
        config.probe_discovered_peers = true;
        cluster.add_node(config);
    }

    cluster.start_all();
    cluster.advance_ms(15_000);

    for observer in names {
        let view = cluster.node(&id(observer)).view();
        assert_eq!(view.len(), names.len(), "{} has an incomplete view", observer);
        for subject in names {
            assert_eq!(
                cluster.kind(&id(observer), &id(subject)),
                Some(StatusKind::Alive),
                "{} sees {} as not alive",
                observer,
                subject
            );
        }
    }
    assert_eq!(cluster.dropped(), 0);
}
