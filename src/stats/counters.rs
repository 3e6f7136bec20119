use crate::block::{Cid, PeerId};
use crate::stats::recorder;
use crate::stats::types::Stat;
use parking_lot::Mutex;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    blocks_recvd: u64,
    data_recvd: u64,
    dup_blocks_recvd: u64,
    dup_data_recvd: u64,
    messages_recvd: u64,
    blocks_sent: u64,
    data_sent: u64,
    forward_failures: u64,
    forwards_dropped: u64,
    upstream_wants: u64,
}

/// Traffic counters guarded by a single lock
///
/// Readers copy all counters under the lock, so a snapshot is never torn.
#[derive(Debug, Default)]
pub struct ExchangeStats {
    counters: Mutex<Counters>,
}

impl ExchangeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_message_received(&self) {
        self.counters.lock().messages_recvd += 1;
        recorder::record_message_received();
    }

    /// Count a block arriving from upstream
    pub fn record_block_received(&self, size: usize, duplicate: bool) {
        {
            let mut c = self.counters.lock();
            c.blocks_recvd += 1;
            c.data_recvd += size as u64;
            if duplicate {
                c.dup_blocks_recvd += 1;
                c.dup_data_recvd += size as u64;
            }
        }
        recorder::record_block_received(size, duplicate);
    }

    /// Count a block forwarded to a downstream peer
    pub fn record_block_sent(&self, size: usize) {
        {
            let mut c = self.counters.lock();
            c.blocks_sent += 1;
            c.data_sent += size as u64;
        }
        recorder::record_block_forwarded(size);
    }

    pub fn record_forward_failure(&self) {
        self.counters.lock().forward_failures += 1;
        recorder::record_forward_failure();
    }

    pub fn record_forward_dropped(&self) {
        self.counters.lock().forwards_dropped += 1;
        recorder::record_forward_dropped();
    }

    pub fn record_upstream_wants(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.counters.lock().upstream_wants += count as u64;
        recorder::record_upstream_wants(count);
    }

    /// Consistent snapshot of the counters plus the caller-supplied want-list
    /// and peer set
    pub fn snapshot(&self, mut wantlist: Vec<Cid>, mut peers: Vec<PeerId>) -> Stat {
        let c = *self.counters.lock();
        wantlist.sort();
        peers.sort();
        recorder::set_interest_cids(wantlist.len());

        Stat {
            wantlist,
            blocks_received: c.blocks_recvd,
            data_received: c.data_recvd,
            dup_blks_received: c.dup_blocks_recvd,
            dup_data_received: c.dup_data_recvd,
            messages_received: c.messages_recvd,
            blocks_sent: c.blocks_sent,
            data_sent: c.data_sent,
            forward_failures: c.forward_failures,
            forwards_dropped: c.forwards_dropped,
            upstream_wants: c.upstream_wants,
            peers,
        }
    }
}
