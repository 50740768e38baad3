//! Built-in methods served by the gateway.

mod builtin;

pub use builtin::{echo, ping, register_builtin};
