use crate::block::Cid;
use serde::{Deserialize, Serialize};

/// Kind of want a peer expressed for a CID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WantType {
    /// Send me the block
    Block,
    /// Tell me whether you have the block
    Have,
}

/// One entry in a peer's want log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WantEntry {
    pub key: Cid,
    pub want_type: WantType,
}

impl WantEntry {
    pub fn new(key: Cid, want_type: WantType) -> Self {
        Self { key, want_type }
    }

    pub fn block(key: Cid) -> Self {
        Self::new(key, WantType::Block)
    }
}
