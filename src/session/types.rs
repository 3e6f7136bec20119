use crate::block::{Block, Cid};
use crate::session::error::SessionResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique session identifier
pub fn next_session_id() -> u64 {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Cancellable scope for an upstream fetch
///
/// Cloning a context shares its cancellation state. Cancellation is
/// triggered through the paired `CancelHandle`.
#[derive(Clone, Debug)]
pub struct FetchContext {
    cancelled: watch::Receiver<bool>,
    // Keeps the channel open for contexts that nobody can cancel
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

/// Trigger for a `FetchContext`
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl FetchContext {
    /// New cancellable context
    pub fn new() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                cancelled: rx,
                _keepalive: None,
            },
            CancelHandle { tx: Arc::new(tx) },
        )
    }

    /// Context that is never cancelled
    pub fn background() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            cancelled: rx,
            _keepalive: Some(Arc::new(tx)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Resolves once the context is cancelled
    ///
    /// If the handle is dropped without cancelling, this never resolves.
    pub async fn cancelled(&self) {
        let mut rx = self.cancelled.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Options an upstream session is created with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Remaining relay hops for wants issued by this session
    pub ttl: u8,
    /// Session fetches on behalf of other peers
    pub relay: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            ttl: 0,
            relay: false,
        }
    }
}

/// Engine that retrieves blocks from the wider network or a local cache
///
/// Implementations may deliver blocks in any order. Every requested CID must
/// eventually show up on the returned stream unless the context is cancelled
/// or the session shut down.
#[async_trait]
pub trait UpstreamSession: Send + Sync {
    /// Fetch a single block
    async fn get_block(&self, ctx: &FetchContext, cid: Cid) -> SessionResult<Block>;

    /// Extend the session's want-list and stream the blocks back
    async fn get_blocks(
        &self,
        ctx: &FetchContext,
        cids: &[Cid],
    ) -> SessionResult<mpsc::Receiver<Block>>;

    /// Opaque session identifier
    fn id(&self) -> u64;

    /// Release the session. Open streams end.
    async fn shutdown(&self);
}

/// Creates upstream sessions on demand
pub trait SessionFactory: Send + Sync {
    fn new_session(&self, options: SessionOptions) -> Arc<dyn UpstreamSession>;
}

impl<F> SessionFactory for F
where
    F: Fn(SessionOptions) -> Arc<dyn UpstreamSession> + Send + Sync,
{
    fn new_session(&self, options: SessionOptions) -> Arc<dyn UpstreamSession> {
        self(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let (ctx, handle) = FetchContext::new();
        assert!(!ctx.is_cancelled());

        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.cancelled().await })
        };

        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(ctx.is_cancelled());
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_background_never_cancels() {
        let ctx = FetchContext::background();
        let result = tokio::time::timeout(Duration::from_millis(20), ctx.cancelled()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_dropped_handle_does_not_cancel() {
        let (ctx, handle) = FetchContext::new();
        drop(handle);
        let result = tokio::time::timeout(Duration::from_millis(20), ctx.cancelled()).await;
        assert!(result.is_err());
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = next_session_id();
        let b = next_session_id();
        assert_ne!(a, b);
    }
}
