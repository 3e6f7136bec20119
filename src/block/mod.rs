//! Content and peer identifiers plus the in-memory block store
//!
//! Blocks are addressed by the BLAKE3 hash of their payload. The relay core
//! treats both `Cid` and `PeerId` as opaque keys.

pub mod store;
pub mod types;

pub use store::MemoryBlockStore;
pub use types::{Block, Cid, PeerId};
