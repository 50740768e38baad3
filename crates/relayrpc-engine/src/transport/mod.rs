//! Transport layer (WebSocket).
//!
//! Exposes the WS upgrade handler and the codec that moves frames in and out
//! of a per-connection engine.

pub mod codec;
pub mod ws;
