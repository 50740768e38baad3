//! Engine error type (sync call API, ingestion, configuration).

use thiserror::Error;

/// Boxed error returned by handlers and egress callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no egress configured")]
    NoEgress,

    #[error("egress already configured")]
    EgressAlreadySet,

    #[error("message has no id")]
    MissingId,

    #[error("empty batch")]
    EmptyBatch,

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("egress write failed: {0}")]
    Egress(String),

    #[error("call timed out")]
    Timeout,

    #[error("call cancelled")]
    Cancelled,

    #[error("engine closed")]
    Closed,

    #[error("ingestion queue full")]
    QueueFull,

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("handler failed: {0}")]
    Handler(BoxError),

    #[error("invalid config: {0}")]
    Config(String),
}

impl EngineError {
    /// Stable code for logs and adapters.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineError::NoEgress => "NO_EGRESS",
            EngineError::EgressAlreadySet => "EGRESS_ALREADY_SET",
            EngineError::MissingId => "MISSING_ID",
            EngineError::EmptyBatch => "EMPTY_BATCH",
            EngineError::Encode(_) => "ENCODE",
            EngineError::Egress(_) => "EGRESS",
            EngineError::Timeout => "TIMEOUT",
            EngineError::Cancelled => "CANCELLED",
            EngineError::Closed => "CLOSED",
            EngineError::QueueFull => "QUEUE_FULL",
            EngineError::MethodNotFound(_) => "METHOD_NOT_FOUND",
            EngineError::Handler(_) => "HANDLER",
            EngineError::Config(_) => "CONFIG",
        }
    }
}
