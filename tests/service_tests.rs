use anyhow::{bail, Result};
use std::time::Duration;
use tokio::time::{sleep, Instant};

use swimnode::runtime::ServiceHandle;
use swimnode::{MembershipEvent, PeerId, StatusKind, SwimConfig, SwimService};

fn fast_config(contacts: Vec<String>) -> SwimConfig {
    SwimConfig {
        bind_addr: "127.0.0.1:0".parse().expect("valid address"),
        contact_peers: contacts,
        probe_interval_ms: 100,
        probe_timeout_ms: 50,
        indirect_escalation_timeout_ms: 200,
        suspicion_timeout_ms: 400,
        relay_timeout_ms: 50,
        view_dump_interval_ms: None,
        ..SwimConfig::default()
    }
}

async fn wait_for_alive(handle: &ServiceHandle, peer: &PeerId) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if handle.view().get(peer).map(|status| status.kind) == Some(StatusKind::Alive) {
            return Ok(());
        }
        sleep(Duration::from_millis(20)).await;
    }
    bail!("{} never showed up as alive", peer)
}

#[tokio::test]
async fn test_two_nodes_discover_each_other_over_udp() -> Result<()> {
    let first = SwimService::bind(fast_config(Vec::new())).await?;
    let first_id = PeerId::new(first.local_addr()?.to_string());

    let second = SwimService::bind(fast_config(vec![first_id.to_string()])).await?;
    let second_id = PeerId::new(second.local_addr()?.to_string());

    let mut first = first.spawn();
    let second = second.spawn();
    let mut events = first.take_events().expect("events are available once");
    assert!(first.take_events().is_none());

    wait_for_alive(&first, &second_id).await?;
    wait_for_alive(&second, &first_id).await?;

    let joined = tokio::time::timeout(Duration::from_secs(1), events.recv()).await?;
    match joined {
        Some(MembershipEvent::MemberJoined(status)) => assert_eq!(status.owner, second_id),
        other => panic!("expected a join, got {:?}", other),
    }

    second.shutdown().await?;
    first.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_silent_peer_is_declared_dead_over_udp() -> Result<()> {
    // Bound but never answering
    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await?;
    let silent_id = PeerId::new(silent.local_addr()?.to_string());

    let service = SwimService::bind(fast_config(vec![silent_id.to_string()])).await?;
    let mut handle = service.spawn();
    let mut events = handle.take_events().expect("events are available once");

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut declared_dead = false;
    while !declared_dead && Instant::now() < deadline {
        if let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(100), events.recv()).await {
            declared_dead = matches!(event, MembershipEvent::MemberDead(status) if status.owner == silent_id);
        }
    }

    assert!(declared_dead);
    assert_eq!(
        handle.view().get(&silent_id).map(|status| status.kind),
        Some(StatusKind::Dead)
    );

    handle.shutdown().await?;
    Ok(())
}
