//! Relay coordinator
//!
//! Merges the want-lists of many downstream peers into one upstream fetch
//! session and fans retrieved blocks back out to every peer still waiting
//! for them.
//!
//! Lock order: `wants` before the registry's internal lock, `wants` before
//! `slot`. No lock guard is held across an await point.

use crate::block::{Block, Cid, PeerId};
use crate::network::BlockSender;
use crate::registry::InterestRegistry;
use crate::relay::pending::PendingDeliveries;
use crate::relay::types::{RelayConfig, RelayError, RelayEvent, RelayResult, RelayState};
use crate::session::{CancelHandle, FetchContext, SessionFactory, UpstreamSession};
use crate::stats::{ExchangeStats, Stat};
use crate::want::{PeerWantLog, WantType};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Bookkeeping that must change atomically with respect to block arrival
struct WantState {
    /// Per-peer position in its want log already merged into the registry
    cursors: HashMap<PeerId, usize>,
    /// CIDs requested upstream and not yet arrived, with the owning fetch
    in_flight: HashMap<Cid, u64>,
    /// CIDs whose fetch ended without delivering them
    orphaned: HashSet<Cid>,
    last_activity: Instant,
}

impl WantState {
    fn new() -> Self {
        Self {
            cursors: HashMap::new(),
            in_flight: HashMap::new(),
            orphaned: HashSet::new(),
            last_activity: Instant::now(),
        }
    }

    fn release(&mut self, cids: impl IntoIterator<Item = Cid>, fetch_id: u64) {
        for cid in cids {
            if self.in_flight.get(&cid) == Some(&fetch_id) {
                self.in_flight.remove(&cid);
                self.orphaned.insert(cid);
            }
        }
    }
}

#[derive(Clone)]
struct ActiveSession {
    session: Arc<dyn UpstreamSession>,
    ctx: FetchContext,
    cancel: CancelHandle,
    block_tx: mpsc::Sender<Block>,
}

enum SessionSlot {
    Uninitialized,
    Active(ActiveSession),
    ShutDown,
}

/// Drives a single upstream session on behalf of many downstream peers
#[derive(Clone)]
pub struct RelayCoordinator {
    config: Arc<RelayConfig>,
    registry: Arc<InterestRegistry>,
    logs: Arc<DashMap<PeerId, PeerWantLog>>,
    wants: Arc<Mutex<WantState>>,
    slot: Arc<Mutex<SessionSlot>>,
    factory: Arc<dyn SessionFactory>,
    sender: Arc<dyn BlockSender>,
    stats: Arc<ExchangeStats>,
    pending: Arc<PendingDeliveries>,
    // Serializes block handling so the seen-check cannot race
    arrival_lock: Arc<tokio::sync::Mutex<()>>,
    next_fetch_id: Arc<AtomicU64>,
    event_tx: Option<mpsc::Sender<RelayEvent>>,
}

impl RelayCoordinator {
    /// Create a coordinator. No upstream session exists until the first want.
    pub fn new(
        config: RelayConfig,
        factory: Arc<dyn SessionFactory>,
        sender: Arc<dyn BlockSender>,
    ) -> RelayResult<Self> {
        config.validate()?;
        crate::stats::init_metrics();
        let pending = PendingDeliveries::new(
            config.retry_initial_interval,
            config.retry_max_interval,
        );

        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(InterestRegistry::new()),
            logs: Arc::new(DashMap::new()),
            wants: Arc::new(Mutex::new(WantState::new())),
            slot: Arc::new(Mutex::new(SessionSlot::Uninitialized)),
            factory,
            sender,
            stats: Arc::new(ExchangeStats::new()),
            pending: Arc::new(pending),
            arrival_lock: Arc::new(tokio::sync::Mutex::new(())),
            next_fetch_id: Arc::new(AtomicU64::new(1)),
            event_tx: None,
        })
    }

    /// Create with an event channel for monitoring
    pub fn with_events(mut self, tx: mpsc::Sender<RelayEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn state(&self) -> RelayState {
        match &*self.slot.lock() {
            SessionSlot::Uninitialized => RelayState::Uninitialized,
            SessionSlot::Active(active) => RelayState::Active {
                session_id: active.session.id(),
            },
            SessionSlot::ShutDown => RelayState::ShutDown,
        }
    }

    /// Identifier of the current upstream session, if any
    pub fn session_id(&self) -> Option<u64> {
        match self.state() {
            RelayState::Active { session_id } => Some(session_id),
            _ => None,
        }
    }

    fn ensure_running(&self) -> RelayResult<()> {
        if matches!(*self.slot.lock(), SessionSlot::ShutDown) {
            return Err(RelayError::ShutDown);
        }
        Ok(())
    }

    /// Entry point for a parsed want message from a downstream peer
    ///
    /// `keys` is the union of the message's CIDs; `want_blocks` and
    /// `want_haves` partition them by want type. Both types are relayed
    /// the same way.
    pub async fn receive_from(
        &self,
        peer: PeerId,
        keys: &[Cid],
        want_blocks: &[Cid],
        want_haves: &[Cid],
    ) -> RelayResult<()> {
        self.ensure_running()?;
        self.stats.record_message_received();

        {
            let mut log = self
                .logs
                .entry(peer.clone())
                .or_insert_with(|| PeerWantLog::new(peer.clone()));

            let mut seen = HashSet::new();
            for cid in keys.iter().chain(want_blocks).chain(want_haves) {
                if !seen.insert(*cid) {
                    continue;
                }
                let want_type = if want_haves.contains(cid) && !want_blocks.contains(cid) {
                    WantType::Have
                } else {
                    WantType::Block
                };
                log.update_with(*cid, want_type);
            }
        }

        self.relay_wants(&FetchContext::background(), &peer).await
    }

    /// Merge a peer's want log into the registry and extend the upstream
    /// want-list with whatever is not already being fetched
    ///
    /// `log` is folded into the peer's stored log: keys the stored log has
    /// never seen are appended, so the per-peer cursor always indexes a
    /// single history. A peer that reconnects after `peer_disconnected`
    /// starts from an empty stored log, so its whole history is replayed.
    pub async fn update_session(&self, ctx: &FetchContext, log: &PeerWantLog) -> RelayResult<()> {
        self.ensure_running()?;
        let peer = log.peer().clone();
        {
            let mut stored = self
                .logs
                .entry(peer.clone())
                .or_insert_with(|| PeerWantLog::new(peer.clone()));
            stored.absorb(log);
        }

        self.relay_wants(ctx, &peer).await
    }

    /// Register the stored log's entries past the peer's cursor and request
    /// upstream whatever is neither in flight nor held for retry
    ///
    /// CIDs whose earlier fetch ended without delivering them are requested
    /// again while any peer still waits for them.
    async fn relay_wants(&self, ctx: &FetchContext, peer: &PeerId) -> RelayResult<()> {
        let fetch_id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);

        // Interest is registered before anything goes upstream, so a block
        // can never arrive ahead of the registry entry it is meant for
        let (fresh, held, request) = {
            let mut wants = self.wants.lock();
            let cursor = wants.cursors.get(peer).copied().unwrap_or(0);
            let delta: Vec<Cid> = match self.logs.get(peer) {
                Some(log) => {
                    wants.cursors.insert(peer.clone(), log.len());
                    log.since(cursor).iter().map(|e| e.key).collect()
                }
                None => Vec::new(),
            };

            let mut queued = HashSet::new();
            let mut fresh = Vec::new();
            let mut held = Vec::new();
            let mut candidates = Vec::new();
            for cid in delta {
                if self.registry.add_interest(cid, peer.clone()) {
                    fresh.push(cid);
                }
                if !queued.insert(cid) {
                    continue;
                }
                // Blocks kept for a failed forward are served from the book
                if self.pending.holds(&cid) {
                    if self.pending.attempts(&cid, peer) == 0 {
                        held.push(cid);
                    }
                    continue;
                }
                candidates.push(cid);
            }

            let orphaned: Vec<Cid> = wants.orphaned.drain().collect();
            for cid in orphaned {
                if self.registry.contains(&cid)
                    && !self.pending.holds(&cid)
                    && queued.insert(cid)
                {
                    candidates.push(cid);
                }
            }

            let request: Vec<Cid> = candidates
                .into_iter()
                .filter(|cid| !wants.in_flight.contains_key(cid))
                .collect();
            for cid in &request {
                wants.in_flight.insert(*cid, fetch_id);
            }
            wants.last_activity = Instant::now();
            (fresh, held, request)
        };

        if !fresh.is_empty() {
            tracing::debug!(peer = %peer, count = fresh.len(), "registered relayed wants");
            self.emit_event(RelayEvent::WantsRelayed {
                peer: peer.clone(),
                cids: fresh,
            });
        }
        if !held.is_empty() {
            self.serve_held(&held, peer).await;
        }
        if request.is_empty() {
            return Ok(());
        }

        let active = match self.ensure_session() {
            Ok(active) => active,
            Err(e) => {
                self.wants.lock().release(request, fetch_id);
                return Err(e);
            }
        };

        let stream = match active.session.get_blocks(ctx, &request).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(
                    session_id = active.session.id(),
                    count = request.len(),
                    "upstream want extension failed: {}",
                    e
                );
                self.wants.lock().release(request, fetch_id);
                return Err(e.into());
            }
        };

        self.stats.record_upstream_wants(request.len());
        tracing::debug!(
            session_id = active.session.id(),
            count = request.len(),
            "extended upstream want-list"
        );
        self.spawn_pump(ctx.clone(), active, stream, request, fetch_id);
        Ok(())
    }

    /// Forward blocks already held in the retry book to a newly interested peer
    async fn serve_held(&self, cids: &[Cid], peer: &PeerId) {
        let _serial = self.arrival_lock.lock().await;
        for cid in cids {
            let Some(block) = self.pending.held_block(cid) else {
                continue;
            };
            if self.registry.is_interested(cid, peer) && self.pending.attempts(cid, peer) == 0 {
                self.deliver(&block, peer).await;
            }
        }
    }

    /// Current upstream session, created on first use
    fn ensure_session(&self) -> RelayResult<ActiveSession> {
        let (active, block_rx) = {
            let mut slot = self.slot.lock();
            match &*slot {
                SessionSlot::Active(active) => return Ok(active.clone()),
                SessionSlot::ShutDown => return Err(RelayError::ShutDown),
                SessionSlot::Uninitialized => {}
            }

            let session = self.factory.new_session(self.config.session_options());
            let (ctx, cancel) = FetchContext::new();
            let (block_tx, block_rx) = mpsc::channel(self.config.block_channel_capacity);
            let active = ActiveSession {
                session,
                ctx,
                cancel,
                block_tx,
            };
            *slot = SessionSlot::Active(active.clone());
            (active, block_rx)
        };

        let session_id = active.session.id();
        tracing::info!(node = %self.config.node_id, session_id, "upstream session started");
        self.spawn_arrival_loop(active.ctx.clone(), block_rx);
        self.emit_event(RelayEvent::SessionStarted { session_id });
        Ok(active)
    }

    /// Consume blocks from every upstream stream of one session
    fn spawn_arrival_loop(&self, ctx: FetchContext, mut block_rx: mpsc::Receiver<Block>) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            loop {
                let block = tokio::select! {
                    _ = ctx.cancelled() => break,
                    block = block_rx.recv() => match block {
                        Some(block) => block,
                        None => break,
                    },
                };
                if let Err(e) = coordinator.handle_block(block).await {
                    tracing::debug!("block arrival loop stopping: {}", e);
                    break;
                }
            }
        });
    }

    /// Move one upstream stream into the session's arrival channel
    fn spawn_pump(
        &self,
        caller: FetchContext,
        active: ActiveSession,
        mut stream: mpsc::Receiver<Block>,
        cids: Vec<Cid>,
        fetch_id: u64,
    ) {
        let wants = self.wants.clone();
        tokio::spawn(async move {
            let mut remaining: HashSet<Cid> = cids.into_iter().collect();
            while !remaining.is_empty() {
                let block = tokio::select! {
                    _ = caller.cancelled() => break,
                    _ = active.ctx.cancelled() => break,
                    block = stream.recv() => match block {
                        Some(block) => block,
                        None => break,
                    },
                };
                remaining.remove(&block.cid());
                if active.block_tx.send(block).await.is_err() {
                    break;
                }
            }

            // Undelivered CIDs become eligible for a new fetch; interest stays
            if !remaining.is_empty() {
                tracing::debug!(
                    fetch_id,
                    count = remaining.len(),
                    "upstream fetch ended before delivering every block"
                );
                wants.lock().release(remaining, fetch_id);
            }
        });
    }

    /// Fan a block from upstream out to every peer still waiting for it
    ///
    /// Each waiting peer receives at most one copy per arrival. Peers that
    /// already got the block are skipped, so repeated arrivals are dropped
    /// as duplicates.
    pub async fn handle_block(&self, block: Block) -> RelayResult<()> {
        self.ensure_running()?;
        let _serial = self.arrival_lock.lock().await;
        let cid = block.cid();

        let peers = {
            let mut wants = self.wants.lock();
            wants.in_flight.remove(&cid);
            wants.orphaned.remove(&cid);
            wants.last_activity = Instant::now();
            self.registry.unseen_peers(&cid)
        };

        self.stats.record_block_received(block.len(), peers.is_empty());
        if peers.is_empty() {
            tracing::debug!(cid = %cid.short(), "no peer waiting for block");
            return Ok(());
        }

        for peer in peers {
            self.deliver(&block, &peer).await;
        }
        Ok(())
    }

    /// Forward to one peer. Success retires the interest; failure keeps it
    /// and books a retry.
    async fn deliver(&self, block: &Block, peer: &PeerId) -> bool {
        let cid = block.cid();
        match self.sender.send_block(peer, block).await {
            Ok(()) => {
                self.registry.block_seen(&cid, peer);
                self.registry.remove_interest(&cid, peer);
                self.pending.clear_peer(&cid, peer);
                self.stats.record_block_sent(block.len());
                tracing::debug!(cid = %cid.short(), peer = %peer, "forwarded block");
                self.emit_event(RelayEvent::BlockForwarded {
                    cid,
                    peer: peer.clone(),
                });
                true
            }
            Err(e) => {
                let attempts = self.pending.record_failure(block, peer);
                self.stats.record_forward_failure();
                tracing::warn!(
                    cid = %cid.short(),
                    peer = %peer,
                    attempts,
                    "forward failed, keeping interest: {}",
                    e
                );
                self.emit_event(RelayEvent::ForwardFailed {
                    cid,
                    peer: peer.clone(),
                    attempts,
                    error: e.to_string(),
                });
                false
            }
        }
    }

    /// Retry due deliveries and release the upstream session when idle
    pub async fn maintenance_cycle(&self) -> RelayResult<()> {
        self.ensure_running()?;
        self.retry_pending().await;
        self.teardown_if_idle().await;
        Ok(())
    }

    /// Re-attempt failed forwards from the held blocks, never from upstream
    pub async fn retry_pending(&self) -> usize {
        let _serial = self.arrival_lock.lock().await;
        let mut delivered = 0;

        for due in self.pending.due(Instant::now()) {
            let cid = due.block.cid();
            if !self.registry.is_interested(&cid, &due.peer) {
                self.pending.clear_peer(&cid, &due.peer);
                continue;
            }

            if due.attempts > self.config.max_forward_retries {
                self.registry.remove_interest(&cid, &due.peer);
                self.pending.clear_peer(&cid, &due.peer);
                self.stats.record_forward_dropped();
                tracing::warn!(
                    cid = %cid.short(),
                    peer = %due.peer,
                    attempts = due.attempts,
                    "giving up on forward, interest retired"
                );
                self.emit_event(RelayEvent::InterestDropped {
                    cid,
                    peer: due.peer,
                });
                continue;
            }

            if self.deliver(&due.block, &due.peer).await {
                delivered += 1;
            }
        }
        delivered
    }

    async fn teardown_if_idle(&self) {
        let Some(idle_timeout) = self.config.idle_timeout else {
            return;
        };

        let released = {
            let mut wants = self.wants.lock();
            let idle = wants.in_flight.is_empty()
                && self.registry.is_empty()
                && self.pending.is_empty()
                && wants.last_activity.elapsed() >= idle_timeout;
            if !idle {
                return;
            }

            let mut slot = self.slot.lock();
            if !matches!(*slot, SessionSlot::Active(_)) {
                return;
            }
            wants.orphaned.clear();
            match std::mem::replace(&mut *slot, SessionSlot::Uninitialized) {
                SessionSlot::Active(active) => active,
                _ => return,
            }
        };

        let session_id = released.session.id();
        released.cancel.cancel();
        released.session.shutdown().await;
        tracing::info!(session_id, "upstream session idle, released");
        self.emit_event(RelayEvent::SessionClosed { session_id });
    }

    /// Run `maintenance_cycle` every `maintenance_interval` until shutdown
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        let period = self.config.maintenance_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if coordinator.maintenance_cycle().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Forget a peer: its log, its cursor and every interest it holds
    pub fn peer_disconnected(&self, peer: &PeerId) -> RelayResult<Vec<Cid>> {
        self.ensure_running()?;
        self.logs.remove(peer);
        self.wants.lock().cursors.remove(peer);
        self.pending.remove_peer(peer);
        let affected = self.registry.remove_peer(peer);
        tracing::debug!(peer = %peer, retired = affected.len(), "peer disconnected");
        Ok(affected)
    }

    /// Release the upstream session and all relay state. Terminal.
    pub async fn shutdown(&self) -> RelayResult<()> {
        let previous = std::mem::replace(&mut *self.slot.lock(), SessionSlot::ShutDown);
        let active = match previous {
            SessionSlot::ShutDown => return Err(RelayError::ShutDown),
            SessionSlot::Active(active) => Some(active),
            SessionSlot::Uninitialized => None,
        };

        if let Some(active) = active {
            let session_id = active.session.id();
            active.cancel.cancel();
            active.session.shutdown().await;
            self.emit_event(RelayEvent::SessionClosed { session_id });
        }

        {
            let mut wants = self.wants.lock();
            wants.cursors.clear();
            wants.in_flight.clear();
            wants.orphaned.clear();
        }
        self.registry.clear();
        self.logs.clear();
        self.pending.clear();

        tracing::info!(node = %self.config.node_id, "relay coordinator shut down");
        Ok(())
    }

    pub fn interested_peers(&self, cid: &Cid) -> HashSet<PeerId> {
        self.registry.interested_peers(cid)
    }

    /// Mark `cid` as delivered to `peer`. Interest is kept.
    pub fn block_seen(&self, cid: &Cid, peer: &PeerId) -> RelayResult<bool> {
        self.ensure_running()?;
        Ok(self.registry.block_seen(cid, peer))
    }

    /// Retire `peer`'s interest in `cid`. Untracked pairs are a no-op.
    pub fn remove_interest(&self, cid: &Cid, peer: &PeerId) -> RelayResult<bool> {
        self.ensure_running()?;
        Ok(self.registry.remove_interest(cid, peer))
    }

    pub fn registry(&self) -> &InterestRegistry {
        &self.registry
    }

    /// Snapshot of a peer's want log
    pub fn want_log(&self, peer: &PeerId) -> Option<PeerWantLog> {
        self.logs.get(peer).map(|log| log.value().clone())
    }

    /// CIDs currently requested upstream and not yet arrived
    pub fn in_flight(&self) -> usize {
        self.wants.lock().in_flight.len()
    }

    /// Failed (cid, peer) deliveries awaiting retry
    pub fn pending_deliveries(&self) -> usize {
        self.pending.len()
    }

    /// Point-in-time statistics
    pub fn stat(&self) -> Stat {
        let peers = self.logs.iter().map(|e| e.key().clone()).collect();
        self.stats.snapshot(self.registry.cids(), peers)
    }

    /// Emit an event if there's a listener. Never blocks.
    fn emit_event(&self, event: RelayEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.try_send(event);
        }
    }
}

/// Builder for relay coordinators
pub struct RelayCoordinatorBuilder {
    config: RelayConfig,
    factory: Option<Arc<dyn SessionFactory>>,
    sender: Option<Arc<dyn BlockSender>>,
    event_tx: Option<mpsc::Sender<RelayEvent>>,
}

impl RelayCoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            config: RelayConfig::default(),
            factory: None,
            sender: None,
            event_tx: None,
        }
    }

    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.config.node_id = id.into();
        self
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.config.ttl = ttl;
        self
    }

    pub fn idle_timeout(mut self, timeout: Option<std::time::Duration>) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn session_factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn block_sender(mut self, sender: Arc<dyn BlockSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn events(mut self, tx: mpsc::Sender<RelayEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn build(self) -> RelayResult<RelayCoordinator> {
        let factory = self
            .factory
            .ok_or_else(|| RelayError::InvalidConfig("session factory not set".into()))?;
        let sender = self
            .sender
            .ok_or_else(|| RelayError::InvalidConfig("block sender not set".into()))?;

        let coordinator = RelayCoordinator::new(self.config, factory, sender)?;
        Ok(match self.event_tx {
            Some(tx) => coordinator.with_events(tx),
            None => coordinator,
        })
    }
}

impl Default for RelayCoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
