//! # System Module
//!
//! Broker metrics and the structural integrity check.
//!
//! Both are pure reads over a store snapshot and work against either backend.

mod metrics;

pub use metrics::*;
