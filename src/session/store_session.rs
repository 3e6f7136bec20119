//! Upstream session backed by a local block store
//!
//! Blocks already in the store are delivered straight away; the rest are
//! delivered as soon as they are stored. This is what a relay uses when the
//! content is served from its own cache, and what tests use in place of a
//! network.

use crate::block::{Block, Cid, MemoryBlockStore};
use crate::session::error::{SessionError, SessionResult};
use crate::session::types::{
    next_session_id, CancelHandle, FetchContext, SessionOptions, UpstreamSession,
};
use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::{broadcast, mpsc};

const DEFAULT_STREAM_CAPACITY: usize = 64;

pub struct StoreSession {
    id: u64,
    store: MemoryBlockStore,
    options: SessionOptions,
    closed: FetchContext,
    close_handle: CancelHandle,
    stream_capacity: usize,
}

impl StoreSession {
    pub fn new(store: MemoryBlockStore, options: SessionOptions) -> Self {
        let (closed, close_handle) = FetchContext::new();
        Self {
            id: next_session_id(),
            store,
            options,
            closed,
            close_handle,
            stream_capacity: DEFAULT_STREAM_CAPACITY,
        }
    }

    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity.max(1);
        self
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Move every block of `remaining` that is already stored into `out`
    fn take_present(store: &MemoryBlockStore, remaining: &mut HashSet<Cid>) -> Vec<Block> {
        let present: Vec<Block> = remaining.iter().filter_map(|c| store.get(c)).collect();
        for block in &present {
            remaining.remove(&block.cid());
        }
        present
    }
}

#[async_trait]
impl UpstreamSession for StoreSession {
    async fn get_block(&self, ctx: &FetchContext, cid: Cid) -> SessionResult<Block> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }

        // Subscribe before looking so a concurrent put is not missed
        let mut sub = self.store.subscribe();
        if let Some(block) = self.store.get(&cid) {
            return Ok(block);
        }

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Err(SessionError::Cancelled),
                _ = self.closed.cancelled() => return Err(SessionError::Closed),
                msg = sub.recv() => match msg {
                    Ok(block) if block.cid() == cid => return Ok(block),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if let Some(block) = self.store.get(&cid) {
                            return Ok(block);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return Err(SessionError::Closed),
                },
            }
        }
    }

    async fn get_blocks(
        &self,
        ctx: &FetchContext,
        cids: &[Cid],
    ) -> SessionResult<mpsc::Receiver<Block>> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }

        let (tx, rx) = mpsc::channel(self.stream_capacity);
        let mut remaining: HashSet<Cid> = cids.iter().copied().collect();
        let mut sub = self.store.subscribe();
        let store = self.store.clone();
        let ctx = ctx.clone();
        let closed = self.closed.clone();
        let session_id = self.id;

        tokio::spawn(async move {
            for block in Self::take_present(&store, &mut remaining) {
                if tx.send(block).await.is_err() {
                    return;
                }
            }

            while !remaining.is_empty() {
                let next = tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = closed.cancelled() => break,
                    msg = sub.recv() => msg,
                };
                let ready = match next {
                    Ok(block) if remaining.remove(&block.cid()) => vec![block],
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(session_id, skipped, "store notifications lagged");
                        Self::take_present(&store, &mut remaining)
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                for block in ready {
                    if tx.send(block).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    fn id(&self) -> u64 {
        self.id
    }

    async fn shutdown(&self) {
        self.close_handle.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn session(store: &MemoryBlockStore) -> StoreSession {
        StoreSession::new(store.clone(), SessionOptions::default())
    }

    #[tokio::test]
    async fn test_get_block_present() {
        let store = MemoryBlockStore::new();
        let block = Block::new(vec![1u8; 32]);
        store.put(block.clone());

        let got = session(&store)
            .get_block(&FetchContext::background(), block.cid())
            .await
            .unwrap();
        assert_eq!(got, block);
    }

    #[tokio::test]
    async fn test_get_block_waits_for_put() {
        let store = MemoryBlockStore::new();
        let s = session(&store);
        let block = Block::new(vec![2u8; 32]);

        let putter = {
            let store = store.clone();
            let block = block.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                store.put(block);
            })
        };

        let got = tokio::time::timeout(
            Duration::from_secs(1),
            s.get_block(&FetchContext::background(), block.cid()),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(got.cid(), block.cid());
        putter.await.unwrap();
    }

    #[tokio::test]
    async fn test_get_block_cancelled() {
        let store = MemoryBlockStore::new();
        let s = session(&store);
        let (ctx, handle) = FetchContext::new();
        handle.cancel();

        let result = s.get_block(&ctx, Cid::of(b"missing")).await;
        assert_eq!(result, Err(SessionError::Cancelled));
    }

    #[tokio::test]
    async fn test_get_blocks_streams_all() {
        let store = MemoryBlockStore::new();
        let s = session(&store);
        let blocks: Vec<Block> = (0..4u8).map(|i| Block::new(vec![i; 16])).collect();
        store.put(blocks[0].clone());
        store.put(blocks[1].clone());

        let cids: Vec<Cid> = blocks.iter().map(|b| b.cid()).collect();
        let mut rx = s
            .get_blocks(&FetchContext::background(), &cids)
            .await
            .unwrap();

        store.put(blocks[2].clone());
        store.put(blocks[3].clone());

        let mut got = HashSet::new();
        for _ in 0..4 {
            let b = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            got.insert(b.cid());
        }
        assert_eq!(got, cids.into_iter().collect::<HashSet<_>>());

        // Stream ends once everything was delivered
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_ends_streams() {
        let store = MemoryBlockStore::new();
        let s = session(&store);
        let mut rx = s
            .get_blocks(&FetchContext::background(), &[Cid::of(b"never")])
            .await
            .unwrap();

        s.shutdown().await;
        let end = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert!(end.is_none());
        assert!(s.get_blocks(&FetchContext::background(), &[]).await.is_err());
    }
}
