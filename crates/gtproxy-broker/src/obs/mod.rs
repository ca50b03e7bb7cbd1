//! Lightweight in-process metrics.
//!
//! Stored as atomics in `DashMap`s and rendered by the `/metrics` handler.

pub mod metrics;

pub use metrics::BrokerMetrics;
