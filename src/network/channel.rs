use crate::block::{Block, PeerId};
use crate::network::error::{NetworkError, NetworkResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Send primitive owned by the transport layer
#[async_trait]
pub trait BlockSender: Send + Sync {
    /// Deliver `block` to `peer`
    async fn send_block(&self, peer: &PeerId, block: &Block) -> NetworkResult<()>;
}

/// In-process transport: one bounded channel per connected peer
#[derive(Clone)]
pub struct ChannelNetwork {
    peers: Arc<DashMap<PeerId, mpsc::Sender<Block>>>,
    capacity: usize,
    send_timeout: Duration,
}

impl ChannelNetwork {
    pub fn new(capacity: usize) -> Self {
        Self {
            peers: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
            send_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Register a peer and return its inbound block stream
    pub fn connect(&self, peer: PeerId) -> mpsc::Receiver<Block> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.peers.insert(peer, tx);
        rx
    }

    pub fn disconnect(&self, peer: &PeerId) -> bool {
        self.peers.remove(peer).is_some()
    }

    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.peers.contains_key(peer)
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.peers.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for ChannelNetwork {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl BlockSender for ChannelNetwork {
    async fn send_block(&self, peer: &PeerId, block: &Block) -> NetworkResult<()> {
        // Clone the sender so no map guard is held across the await
        let tx = self
            .peers
            .get(peer)
            .map(|e| e.value().clone())
            .ok_or_else(|| NetworkError::PeerUnreachable(peer.clone()))?;

        match tokio::time::timeout(self.send_timeout, tx.send(block.clone())).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                self.peers.remove(peer);
                Err(NetworkError::ChannelClosed(peer.clone()))
            }
            Err(_) => Err(NetworkError::Timeout(self.send_timeout)),
        }
    }
}
