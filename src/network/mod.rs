//! Outbound delivery of blocks to downstream peers

pub mod channel;
pub mod error;

pub use channel::{BlockSender, ChannelNetwork};
pub use error::{NetworkError, NetworkResult};
