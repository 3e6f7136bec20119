use crate::block::{Cid, PeerId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// Marker kept for each (cid, peer) pair with outstanding interest
#[derive(Debug, Clone, Copy)]
pub struct Interest {
    /// Peer has been delivered the block (or is known to hold it)
    pub seen: bool,
    /// When the interest was registered
    pub since: Instant,
}

impl Interest {
    fn new() -> Self {
        Self {
            seen: false,
            since: Instant::now(),
        }
    }
}

/// Index from CID to the peers currently waiting for it
///
/// A CID is present only while at least one peer is interested; the entry is
/// dropped the moment its peer set becomes empty. All access goes through one
/// lock so readers never observe a partially updated peer set.
#[derive(Default)]
pub struct InterestRegistry {
    r: RwLock<HashMap<Cid, HashMap<PeerId, Interest>>>,
}

impl InterestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Peers currently interested in `cid` (empty if unknown)
    pub fn interested_peers(&self, cid: &Cid) -> HashSet<PeerId> {
        self.r
            .read()
            .get(cid)
            .map(|peers| peers.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Interested peers that have not been marked as seen yet
    pub fn unseen_peers(&self, cid: &Cid) -> Vec<PeerId> {
        self.r
            .read()
            .get(cid)
            .map(|peers| {
                peers
                    .iter()
                    .filter(|(_, interest)| !interest.seen)
                    .map(|(peer, _)| peer.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Register interest. Returns true if the pair was not tracked before.
    pub fn add_interest(&self, cid: Cid, peer: PeerId) -> bool {
        let mut r = self.r.write();
        let peers = r.entry(cid).or_default();
        if peers.contains_key(&peer) {
            return false;
        }
        peers.insert(peer, Interest::new());
        true
    }

    /// Retire interest. Removing an untracked pair is a no-op returning false.
    pub fn remove_interest(&self, cid: &Cid, peer: &PeerId) -> bool {
        let mut r = self.r.write();
        let Some(peers) = r.get_mut(cid) else {
            return false;
        };
        let removed = peers.remove(peer).is_some();
        if peers.is_empty() {
            r.remove(cid);
        }
        removed
    }

    /// Record that `peer` got the block for `cid`. Interest is kept until
    /// `remove_interest` is called. Returns false if the pair is untracked.
    pub fn block_seen(&self, cid: &Cid, peer: &PeerId) -> bool {
        match self.r.write().get_mut(cid).and_then(|p| p.get_mut(peer)) {
            Some(interest) => {
                interest.seen = true;
                true
            }
            None => false,
        }
    }

    pub fn is_interested(&self, cid: &Cid, peer: &PeerId) -> bool {
        self.r
            .read()
            .get(cid)
            .is_some_and(|peers| peers.contains_key(peer))
    }

    /// Whether any entry exists for `cid`
    pub fn contains(&self, cid: &Cid) -> bool {
        self.r.read().contains_key(cid)
    }

    /// Drop every interest held by `peer`, returning the affected CIDs
    pub fn remove_peer(&self, peer: &PeerId) -> Vec<Cid> {
        let mut r = self.r.write();
        let mut affected = Vec::new();
        r.retain(|cid, peers| {
            if peers.remove(peer).is_some() {
                affected.push(*cid);
            }
            !peers.is_empty()
        });
        affected
    }

    /// All CIDs with outstanding interest
    pub fn cids(&self) -> Vec<Cid> {
        self.r.read().keys().copied().collect()
    }

    /// Number of CIDs with outstanding interest
    pub fn len(&self) -> usize {
        self.r.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.r.read().is_empty()
    }

    pub fn clear(&self) {
        self.r.write().clear();
    }
}
