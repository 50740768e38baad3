//! Top-level facade crate for relayrpc.
//!
//! Re-exports the protocol core and the engine so users can depend on a single crate.

pub mod core {
    pub use relayrpc_core::*;
}

pub mod engine {
    pub use relayrpc_engine::*;
}
