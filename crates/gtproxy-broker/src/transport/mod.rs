//! Extension transport (WebSocket).
//!
//! Exposes the upgrade handler and the codec that decodes each socket message
//! once into a control message or an extension frame.

pub mod codec;
pub mod ws;
