//! Want-list relay
//!
//! A relay node sits between downstream peers and an upstream fetch session.
//! It merges every peer's wants into one upstream want-list, fetches each
//! block once, and forwards it to every peer still waiting for it.
//!
//! Key pieces:
//! - `RelayCoordinator` owns the interest registry and the lazy upstream session
//! - `PendingDeliveries` holds blocks whose forward failed, with per-peer backoff
//! - `RelayConfig` carries hop budget, retry and idle-teardown settings

pub mod coordinator;
pub mod pending;
pub mod types;

pub use coordinator::{RelayCoordinator, RelayCoordinatorBuilder};
pub use pending::{DueDelivery, PendingDeliveries};
pub use types::{RelayConfig, RelayError, RelayEvent, RelayResult, RelayState};
