use crate::block::Cid;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Fetch cancelled")]
    Cancelled,

    #[error("Session closed")]
    Closed,

    #[error("Block not found: {0}")]
    NotFound(Cid),

    #[error("Upstream error: {0}")]
    Upstream(String),
}

pub type SessionResult<T> = Result<T, SessionError>;
