//! relayswap: want-list relay for a block exchange
//!
//! Downstream peers announce the blocks they want; the relay merges those
//! wants into a single upstream session and fans each retrieved block back
//! out to every peer that asked for it.

pub mod block;
pub mod network;
pub mod registry;
pub mod relay;
pub mod session;
pub mod stats;
pub mod want;

pub use block::{Block, Cid, MemoryBlockStore, PeerId};
pub use network::{BlockSender, ChannelNetwork, NetworkError};
pub use registry::InterestRegistry;
pub use relay::{RelayConfig, RelayCoordinator, RelayCoordinatorBuilder, RelayError, RelayEvent};
pub use session::{FetchContext, SessionFactory, SessionOptions, StoreSession, UpstreamSession};
pub use stats::Stat;
pub use want::{PeerWantLog, WantType};
