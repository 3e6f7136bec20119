//! Upstream fetch sessions
//!
//! The relay consumes upstream content through the narrow `UpstreamSession`
//! trait so it can run against the real exchange, a local cache, or a test
//! double. `StoreSession` is the cache-backed implementation.

pub mod error;
pub mod store_session;
pub mod types;

pub use error::{SessionError, SessionResult};
pub use store_session::StoreSession;
pub use types::{
    next_session_id, CancelHandle, FetchContext, SessionFactory, SessionOptions, UpstreamSession,
};
