use relayswap::block::{Block, Cid, MemoryBlockStore, PeerId};
use relayswap::network::ChannelNetwork;
use relayswap::relay::{RelayConfig, RelayCoordinator, RelayCoordinatorBuilder, RelayEvent, RelayState};
use relayswap::session::{SessionFactory, SessionOptions, StoreSession, UpstreamSession};
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};

fn store_factory(store: MemoryBlockStore) -> Arc<dyn SessionFactory> {
    Arc::new(move |options: SessionOptions| -> Arc<dyn UpstreamSession> {
        Arc::new(StoreSession::new(store.clone(), options))
    })
}

fn make_blocks(n: usize) -> Vec<Block> {
    (0..n)
        .map(|i| Block::new(format!("block payload {i}").into_bytes()))
        .collect()
}

fn relay(store: &MemoryBlockStore, net: &ChannelNetwork, config: RelayConfig) -> RelayCoordinator {
    RelayCoordinatorBuilder::new()
        .config(config)
        .session_factory(store_factory(store.clone()))
        .block_sender(Arc::new(net.clone()))
        .build()
        .unwrap()
}

async fn recv_cids(rx: &mut mpsc::Receiver<Block>, n: usize) -> HashSet<Cid> {
    let mut got = HashSet::new();
    for _ in 0..n {
        let block = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for block")
            .expect("channel closed");
        got.insert(block.cid());
    }
    got
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

/// Two peers with overlapping wants; the shared block reaches both exactly once
#[tokio::test]
async fn test_overlapping_wants_end_to_end() {
    let store = MemoryBlockStore::new();
    let net = ChannelNetwork::new(32);
    let coordinator = relay(&store, &net, RelayConfig::default());

    let p0 = PeerId::new("p0");
    let p1 = PeerId::new("p1");
    let mut rx0 = net.connect(p0.clone());
    let mut rx1 = net.connect(p1.clone());

    let blocks = make_blocks(5);
    let cids: Vec<Cid> = blocks.iter().map(|b| b.cid()).collect();

    coordinator
        .receive_from(p0.clone(), &cids[..3], &cids[..3], &[])
        .await
        .unwrap();
    coordinator
        .receive_from(p1.clone(), &cids[2..], &cids[2..], &[])
        .await
        .unwrap();
    assert_eq!(coordinator.stat().wantlist.len(), 5);

    // Content shows up upstream after the wants were relayed
    for block in &blocks {
        store.put(block.clone());
    }

    let got0 = recv_cids(&mut rx0, 3).await;
    let got1 = recv_cids(&mut rx1, 3).await;
    assert_eq!(got0, cids[..3].iter().copied().collect::<HashSet<_>>());
    assert_eq!(got1, cids[2..].iter().copied().collect::<HashSet<_>>());

    wait_until(|| coordinator.registry().is_empty()).await;
    sleep(Duration::from_millis(20)).await;
    assert!(rx0.try_recv().is_err());
    assert!(rx1.try_recv().is_err());

    let stat = coordinator.stat();
    assert!(stat.wantlist.is_empty());
    assert_eq!(stat.blocks_received, 5);
    assert_eq!(stat.dup_blks_received, 0);
    assert_eq!(stat.blocks_sent, 6);
    assert_eq!(stat.upstream_wants, 5);
    assert_eq!(stat.peers.len(), 2);
}

#[tokio::test]
async fn test_cached_blocks_forwarded_immediately() {
    let store = MemoryBlockStore::new();
    let net = ChannelNetwork::new(32);
    let coordinator = relay(&store, &net, RelayConfig::default());

    let blocks = make_blocks(3);
    for block in &blocks {
        store.put(block.clone());
    }

    let peer = PeerId::random();
    let mut rx = net.connect(peer.clone());
    let cids: Vec<Cid> = blocks.iter().map(|b| b.cid()).collect();
    coordinator
        .receive_from(peer, &cids, &[], &cids)
        .await
        .unwrap();

    let got = recv_cids(&mut rx, 3).await;
    assert_eq!(got.len(), 3);
    wait_until(|| coordinator.registry().is_empty()).await;
}

#[tokio::test]
async fn test_late_peer_joins_in_flight_fetch() {
    let store = MemoryBlockStore::new();
    let net = ChannelNetwork::new(32);
    let coordinator = relay(&store, &net, RelayConfig::default());

    let block = make_blocks(1).remove(0);
    let cid = block.cid();
    let peers: Vec<PeerId> = (0..4).map(|i| PeerId::new(format!("peer-{i}"))).collect();
    let mut receivers: Vec<_> = peers.iter().map(|p| net.connect(p.clone())).collect();

    for peer in &peers {
        coordinator
            .receive_from(peer.clone(), &[cid], &[cid], &[])
            .await
            .unwrap();
    }
    assert_eq!(coordinator.stat().upstream_wants, 1);
    assert_eq!(coordinator.in_flight(), 1);

    store.put(block);
    for rx in receivers.iter_mut() {
        assert_eq!(recv_cids(rx, 1).await, HashSet::from([cid]));
    }
    wait_until(|| coordinator.registry().is_empty()).await;
    assert_eq!(coordinator.stat().blocks_received, 1);
}

#[tokio::test]
async fn test_config_file_and_events() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"node_id": "relay-a", "ttl": 3, "idle_timeout": null}}"#
    )
    .unwrap();
    let config = RelayConfig::from_file(file.path()).unwrap();
    assert_eq!(config.node_id, "relay-a");
    assert_eq!(config.max_forward_retries, 5);

    let store = MemoryBlockStore::new();
    let net = ChannelNetwork::new(8);
    let (tx, mut events) = mpsc::channel(64);
    let coordinator = relay(&store, &net, config).with_events(tx);
    assert_eq!(coordinator.node_id(), "relay-a");

    let peer = PeerId::new("p0");
    let mut rx = net.connect(peer.clone());
    let block = make_blocks(1).remove(0);
    let cid = block.cid();

    coordinator
        .receive_from(peer.clone(), &[cid], &[cid], &[])
        .await
        .unwrap();
    store.put(block);
    recv_cids(&mut rx, 1).await;
    wait_until(|| coordinator.registry().is_empty()).await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen
        .iter()
        .any(|e| matches!(e, RelayEvent::SessionStarted { .. })));
    assert!(seen.contains(&RelayEvent::WantsRelayed {
        peer: peer.clone(),
        cids: vec![cid],
    }));
    assert!(seen.contains(&RelayEvent::BlockForwarded { cid, peer }));
}

#[tokio::test]
async fn test_maintenance_releases_idle_session() {
    let store = MemoryBlockStore::new();
    let net = ChannelNetwork::new(8);
    let config = RelayConfig {
        maintenance_interval: Duration::from_millis(10),
        idle_timeout: Some(Duration::from_millis(20)),
        ..Default::default()
    };
    let coordinator = relay(&store, &net, config);
    let maintenance = coordinator.spawn_maintenance();

    let peer = PeerId::new("p0");
    let mut rx = net.connect(peer.clone());
    let block = make_blocks(1).remove(0);
    store.put(block.clone());

    coordinator
        .receive_from(peer, &[block.cid()], &[], &[])
        .await
        .unwrap();
    assert!(coordinator.state().is_active());
    recv_cids(&mut rx, 1).await;

    wait_until(|| coordinator.state() == RelayState::Uninitialized).await;

    coordinator.shutdown().await.unwrap();
    timeout(Duration::from_secs(1), maintenance)
        .await
        .expect("maintenance task did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_disconnected_peer_gets_retry_after_reconnect() {
    let store = MemoryBlockStore::new();
    let net = ChannelNetwork::new(8);
    let config = RelayConfig {
        max_forward_retries: 100,
        retry_initial_interval: Duration::from_millis(5),
        retry_max_interval: Duration::from_millis(20),
        maintenance_interval: Duration::from_millis(10),
        ..Default::default()
    };
    let coordinator = relay(&store, &net, config);
    let _maintenance = coordinator.spawn_maintenance();

    // Peer is not reachable when the block arrives
    let peer = PeerId::new("flaky");
    let block = make_blocks(1).remove(0);
    coordinator
        .receive_from(peer.clone(), &[block.cid()], &[], &[])
        .await
        .unwrap();
    store.put(block.clone());
    wait_until(|| coordinator.stat().forward_failures >= 1).await;
    assert!(coordinator.registry().is_interested(&block.cid(), &peer));

    let mut rx = net.connect(peer.clone());
    assert_eq!(recv_cids(&mut rx, 1).await, HashSet::from([block.cid()]));
    wait_until(|| coordinator.pending_deliveries() == 0).await;
    assert!(coordinator.registry().is_empty());

    coordinator.shutdown().await.unwrap();
}
