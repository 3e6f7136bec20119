//! Per-peer want tracking
//!
//! Each relayed peer owns an append-only log of the CIDs it asked for. The
//! coordinator keeps its own cursor per peer and only ever reads the tail of
//! the log past that cursor.

pub mod log;
pub mod types;

pub use log::PeerWantLog;
pub use types::{WantEntry, WantType};
