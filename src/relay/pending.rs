//! Blocks held for peers whose delivery failed
//!
//! A block stays here while at least one interested peer has not received
//! it, so retries never go back upstream. Each (cid, peer) pair carries its
//! own exponential backoff.

use crate::block::{Block, Cid, PeerId};
use backoff::{backoff::Backoff, ExponentialBackoff};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct RetryState {
    attempts: u32,
    backoff: ExponentialBackoff,
    next_attempt: Instant,
}

struct PendingBlock {
    block: Block,
    peers: HashMap<PeerId, RetryState>,
}

/// A delivery whose retry time has come
#[derive(Debug, Clone)]
pub struct DueDelivery {
    pub block: Block,
    pub peer: PeerId,
    /// Failed attempts so far
    pub attempts: u32,
}

pub struct PendingDeliveries {
    entries: Mutex<HashMap<Cid, PendingBlock>>,
    initial_interval: Duration,
    max_interval: Duration,
}

impl PendingDeliveries {
    pub fn new(initial_interval: Duration, max_interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            initial_interval,
            max_interval,
        }
    }

    fn new_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            current_interval: self.initial_interval,
            max_interval: self.max_interval,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Record a failed delivery. Returns the failed attempt count for the pair.
    pub fn record_failure(&self, block: &Block, peer: &PeerId) -> u32 {
        let fresh = self.new_backoff();
        let mut entries = self.entries.lock();
        let pending = entries.entry(block.cid()).or_insert_with(|| PendingBlock {
            block: block.clone(),
            peers: HashMap::new(),
        });
        let state = pending
            .peers
            .entry(peer.clone())
            .or_insert_with(|| RetryState {
                attempts: 0,
                backoff: fresh,
                next_attempt: Instant::now(),
            });

        state.attempts += 1;
        let delay = state.backoff.next_backoff().unwrap_or(self.max_interval);
        state.next_attempt = Instant::now() + delay;
        state.attempts
    }

    /// Forget the pair, dropping the block once no peer is left
    pub fn clear_peer(&self, cid: &Cid, peer: &PeerId) {
        let mut entries = self.entries.lock();
        if let Some(pending) = entries.get_mut(cid) {
            pending.peers.remove(peer);
            if pending.peers.is_empty() {
                entries.remove(cid);
            }
        }
    }

    /// Forget every pair involving `peer`
    pub fn remove_peer(&self, peer: &PeerId) {
        self.entries.lock().retain(|_, pending| {
            pending.peers.remove(peer);
            !pending.peers.is_empty()
        });
    }

    /// Deliveries whose backoff has elapsed at `now`
    pub fn due(&self, now: Instant) -> Vec<DueDelivery> {
        let entries = self.entries.lock();
        entries
            .values()
            .flat_map(|pending| {
                pending
                    .peers
                    .iter()
                    .filter(move |(_, state)| state.next_attempt <= now)
                    .map(move |(peer, state)| DueDelivery {
                        block: pending.block.clone(),
                        peer: peer.clone(),
                        attempts: state.attempts,
                    })
            })
            .collect()
    }

    /// Whether a block for `cid` is held for at least one peer
    pub fn holds(&self, cid: &Cid) -> bool {
        self.entries.lock().contains_key(cid)
    }

    /// Copy of the held block for `cid`
    pub fn held_block(&self, cid: &Cid) -> Option<Block> {
        self.entries.lock().get(cid).map(|p| p.block.clone())
    }

    pub fn attempts(&self, cid: &Cid, peer: &PeerId) -> u32 {
        self.entries
            .lock()
            .get(cid)
            .and_then(|p| p.peers.get(peer))
            .map_or(0, |s| s.attempts)
    }

    /// Number of (cid, peer) pairs awaiting retry
    pub fn len(&self) -> usize {
        self.entries.lock().values().map(|p| p.peers.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
