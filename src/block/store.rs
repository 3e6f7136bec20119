//! Content-addressed in-memory block store
//!
//! Blocks are immutable: if the cid is present the content is correct, so
//! `put` of an existing block is a no-op. Every newly inserted block is also
//! published on a broadcast channel so waiting fetch sessions can pick it up.

use crate::block::types::{Block, Cid};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

const NOTIFY_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct MemoryBlockStore {
    blocks: Arc<DashMap<Cid, Block>>,
    notify: broadcast::Sender<Block>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            blocks: Arc::new(DashMap::new()),
            notify,
        }
    }

    /// Store a block. Returns false if it was already present.
    pub fn put(&self, block: Block) -> bool {
        if self.blocks.contains_key(&block.cid()) {
            return false;
        }
        self.blocks.insert(block.cid(), block.clone());
        // No subscribers is fine
        let _ = self.notify.send(block);
        true
    }

    pub fn get(&self, cid: &Cid) -> Option<Block> {
        self.blocks.get(cid).map(|b| b.value().clone())
    }

    pub fn has(&self, cid: &Cid) -> bool {
        self.blocks.contains_key(cid)
    }

    pub fn remove(&self, cid: &Cid) -> Option<Block> {
        self.blocks.remove(cid).map(|(_, b)| b)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Subscribe to blocks stored from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Block> {
        self.notify.subscribe()
    }
}

impl Default for MemoryBlockStore {
    fn default() -> Self {
        Self::new()
    }
}
