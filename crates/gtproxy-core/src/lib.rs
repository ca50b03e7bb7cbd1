//! gtproxy core: transport-agnostic protocol primitives and error types.
//!
//! This crate defines the game wire codec (envelope, tank struct, tables,
//! variants) and the extension lanes shared by the broker and extension
//! tooling. It carries no transport or runtime dependencies.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! Every fallible path surfaces as `CodecError`/`ProxyError` so a malformed
//! packet costs one message, never the process.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{CodecError, ProxyError, Result};
