use crate::block::PeerId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(PeerId),

    #[error("Channel to peer {0} closed")]
    ChannelClosed(PeerId),

    #[error("Send to peer timed out after {0:?}")]
    Timeout(std::time::Duration),
}

pub type NetworkResult<T> = Result<T, NetworkError>;
