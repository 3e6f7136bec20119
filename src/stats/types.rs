use crate::block::{Cid, PeerId};
use serde::{Deserialize, Serialize};

/// Point-in-time view of relay traffic
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Aggregate want-list currently relayed upstream, sorted
    pub wantlist: Vec<Cid>,

    pub blocks_received: u64,
    pub data_received: u64,
    pub dup_blks_received: u64,
    pub dup_data_received: u64,
    pub messages_received: u64,

    /// Blocks forwarded to downstream peers
    pub blocks_sent: u64,
    pub data_sent: u64,

    /// Forward attempts that failed and were kept for retry
    pub forward_failures: u64,
    /// Interests retired after exhausting forward retries
    pub forwards_dropped: u64,
    /// CIDs handed to the upstream session
    pub upstream_wants: u64,

    /// Peers with a live want log, sorted
    pub peers: Vec<PeerId>,
}

impl Stat {
    pub fn wantlist_len(&self) -> usize {
        self.wantlist.len()
    }

    /// Fraction of received blocks that nobody needed anymore
    pub fn duplicate_ratio(&self) -> f64 {
        if self.blocks_received == 0 {
            return 0.0;
        }
        self.dup_blks_received as f64 / self.blocks_received as f64
    }
}

impl std::fmt::Display for Stat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Relay: {} recv ({} dup), {} sent, {} wants, {} peers",
            self.blocks_received,
            self.dup_blks_received,
            self.blocks_sent,
            self.wantlist.len(),
            self.peers.len()
        )
    }
}
