//! Pending outbound calls and the reply correlation behind them.

mod call;
mod store;

pub use call::CallOptions;
pub use store::{run_sweeper, Delivery, PendingGuard, PendingStore, Reply, ReplySlot};
