//! Metrics recorder for relay traffic
//!
//! Thin wrappers over the `metrics` facade. Without an installed recorder
//! these calls do nothing.

use metrics::{counter, describe_counter, describe_gauge, gauge};
use std::sync::atomic::{AtomicBool, Ordering};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    describe_counter!(
        "relay_blocks_received_total",
        "Blocks received from the upstream session"
    );
    describe_counter!(
        "relay_bytes_received_total",
        "Bytes received from the upstream session"
    );
    describe_counter!(
        "relay_duplicate_blocks_total",
        "Blocks received that no peer was waiting for"
    );
    describe_counter!(
        "relay_blocks_forwarded_total",
        "Blocks forwarded to downstream peers"
    );
    describe_counter!(
        "relay_bytes_forwarded_total",
        "Bytes forwarded to downstream peers"
    );
    describe_counter!(
        "relay_forward_failures_total",
        "Forward attempts that failed"
    );
    describe_counter!(
        "relay_forwards_dropped_total",
        "Interests retired after exhausting forward retries"
    );
    describe_counter!(
        "relay_messages_received_total",
        "Want messages received from downstream peers"
    );
    describe_counter!(
        "relay_upstream_wants_total",
        "CIDs requested from the upstream session"
    );

    describe_gauge!(
        "relay_interest_cids",
        "CIDs with at least one interested peer"
    );
}

pub fn record_block_received(size: usize, duplicate: bool) {
    counter!("relay_blocks_received_total").increment(1);
    counter!("relay_bytes_received_total").increment(size as u64);
    if duplicate {
        counter!("relay_duplicate_blocks_total").increment(1);
    }
}

pub fn record_block_forwarded(size: usize) {
    counter!("relay_blocks_forwarded_total").increment(1);
    counter!("relay_bytes_forwarded_total").increment(size as u64);
}

pub fn record_forward_failure() {
    counter!("relay_forward_failures_total").increment(1);
}

pub fn record_forward_dropped() {
    counter!("relay_forwards_dropped_total").increment(1);
}

pub fn record_message_received() {
    counter!("relay_messages_received_total").increment(1);
}

pub fn record_upstream_wants(count: usize) {
    counter!("relay_upstream_wants_total").increment(count as u64);
}

pub fn set_interest_cids(count: usize) {
    gauge!("relay_interest_cids").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        // Should not panic when called multiple times
        init_metrics();
        init_metrics();
    }

    #[test]
    fn test_recording_without_recorder() {
        record_block_received(10, true);
        record_block_forwarded(10);
        set_interest_cids(3);
    }
}
