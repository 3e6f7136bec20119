//! Exchange statistics
//!
//! `ExchangeStats` keeps lock-protected counters that back the `Stat`
//! snapshot; every update is mirrored to the `metrics` facade so an
//! embedder-installed recorder (Prometheus or otherwise) sees the same
//! traffic.

pub mod counters;
pub mod recorder;
pub mod types;

pub use counters::ExchangeStats;
pub use recorder::init_metrics;
pub use types::Stat;
