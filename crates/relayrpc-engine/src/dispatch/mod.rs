pub mod egress;
pub mod engine;
mod pool;
pub mod registry;

pub use egress::Egress;
pub use engine::{Engine, EngineBuilder, TrackingId};
pub use registry::{HandlerResult, Invocation, MethodHandler, MethodRegistry};
