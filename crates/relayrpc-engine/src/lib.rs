//! relayrpc engine library entry.
//!
//! Wires the classifier, the method registry, the worker pool and the
//! pending-call store into one bidirectional message engine, plus the
//! WebSocket adapter used by the `relayrpc-gateway` binary and by
//! integration tests.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod app_state;
pub mod config;
pub mod correlation;
pub mod dispatch;
pub mod error;
pub mod router;
pub mod services;
pub mod transport;

pub use correlation::CallOptions;
pub use dispatch::{Egress, Engine, EngineBuilder, HandlerResult, MethodHandler, MethodRegistry, TrackingId};
pub use error::{BoxError, EngineError, Result};
