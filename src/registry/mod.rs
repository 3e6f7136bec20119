//! Content-interest registry: which downstream peers still wait for a CID

pub mod registry;

pub use registry::{Interest, InterestRegistry};
