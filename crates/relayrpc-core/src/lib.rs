//! relayrpc core: transport-agnostic protocol primitives and error types.
//!
//! This crate defines the wire envelope, the protocol error taxonomy, and the
//! classifier that turns raw inbound bytes into validated envelopes. It
//! carries no transport or runtime dependencies so it can be reused by any
//! adapter.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Malformed input is
//! reported as a classified error, never as a crash.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

pub use error::{ErrorCode, Result, RpcError};
pub use protocol::classify::{batch_kind, classify, BatchKind, Checked, Classified, Kind, MethodSet};
pub use protocol::envelope::{correlation_key, Envelope, ErrorObject};
