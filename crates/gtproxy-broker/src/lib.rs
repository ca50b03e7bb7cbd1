//! gtproxy broker library entry.
//!
//! Interest model, extension registry, the chain dispatch engine and the
//! WebSocket endpoint extensions connect to. Consumed by the binary
//! (`main.rs`) and by integration tests.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod app_state;
pub mod broker;
pub mod config;
pub mod interest;
pub mod obs;
pub mod ops;
pub mod registry;
pub mod router;
pub mod transport;

pub use broker::{Broker, ChainOutcome, Directive, PendingPacket, Response};
