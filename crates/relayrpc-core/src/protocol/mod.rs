//! Protocol modules.
//!
//! - `envelope`: request/response wire structures and builders.
//! - `classify`: raw bytes to classified, validated envelopes (single or batch).
//!
//! Both are panic-free: malformed input is reported as an `RpcError` carried
//! by the classification result, keeping the dispatch loop resilient to
//! hostile traffic.

pub mod classify;
pub mod envelope;
