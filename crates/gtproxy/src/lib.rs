//! Top-level facade crate for gtproxy.
//!
//! Re-exports the protocol core and the broker library so users can depend on a single crate.

pub mod core {
    pub use gtproxy_core::*;
}

pub mod broker {
    pub use gtproxy_broker::*;
}
