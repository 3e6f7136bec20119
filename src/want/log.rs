use crate::block::{Cid, PeerId};
use crate::want::types::{WantEntry, WantType};
use std::collections::HashSet;

/// Append-only want history for a single peer
///
/// Entries are never reordered or removed, so a position in the log stays
/// valid for the log's whole lifetime. Duplicate keys are kept on purpose:
/// the log is a full record that can be replayed against a fresh upstream
/// session.
#[derive(Debug, Clone)]
pub struct PeerWantLog {
    peer: PeerId,
    entries: Vec<WantEntry>,
    keys: HashSet<Cid>,
}

impl PeerWantLog {
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            entries: Vec::new(),
            keys: HashSet::new(),
        }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Append a block want for `cid`
    pub fn update(&mut self, cid: Cid) {
        self.push(WantEntry::block(cid));
    }

    /// Append a want of a specific type
    pub fn update_with(&mut self, cid: Cid, want_type: WantType) {
        self.push(WantEntry::new(cid, want_type));
    }

    fn push(&mut self, entry: WantEntry) {
        self.keys.insert(entry.key);
        self.entries.push(entry);
    }

    /// Whether `cid` appears anywhere in the history
    pub fn contains(&self, cid: &Cid) -> bool {
        self.keys.contains(cid)
    }

    /// Append every entry of `other` whose key this log has never recorded.
    /// Returns the number of entries appended.
    pub fn absorb(&mut self, other: &PeerWantLog) -> usize {
        let before = self.entries.len();
        for entry in other.entries() {
            if !self.keys.contains(&entry.key) {
                self.push(*entry);
            }
        }
        self.entries.len() - before
    }

    /// Full ordered history
    pub fn entries(&self) -> &[WantEntry] {
        &self.entries
    }

    /// Entries appended at or after `position`
    pub fn since(&self, position: usize) -> &[WantEntry] {
        self.entries.get(position..).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
