//! Protocol error taxonomy shared by the classifier, registry, and engine.

use thiserror::Error;

/// Lowest code of the range reserved for protocol-defined errors.
pub const RESERVED_MIN: i32 = -32768;
/// Highest code of the range reserved for protocol-defined errors.
pub const RESERVED_MAX: i32 = -32000;

/// Protocol error codes (stable wire API).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Input is not decodable JSON or not object/array shaped.
    ParseError,
    /// Decodable, but violates the request/response shape rules.
    InvalidRequest,
    /// Request names a method nobody registered.
    MethodNotFound,
    /// Handler could not decode its params.
    InvalidParams,
    /// Handler failed.
    InternalError,
    /// Every handler slot is taken and the backlog is full.
    ServerBusy,
}

impl ErrorCode {
    /// Numeric code written on the wire.
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::ServerBusy => -32000,
        }
    }

    /// Default human-readable message.
    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::ParseError => "Parse error",
            ErrorCode::InvalidRequest => "Invalid Request",
            ErrorCode::MethodNotFound => "Method not found",
            ErrorCode::InvalidParams => "Invalid params",
            ErrorCode::InternalError => "Internal error",
            ErrorCode::ServerBusy => "Server busy",
        }
    }

    /// Reverse of `code`; `None` for application-defined codes.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -32700 => Some(ErrorCode::ParseError),
            -32600 => Some(ErrorCode::InvalidRequest),
            -32601 => Some(ErrorCode::MethodNotFound),
            -32602 => Some(ErrorCode::InvalidParams),
            -32603 => Some(ErrorCode::InternalError),
            -32000 => Some(ErrorCode::ServerBusy),
            _ => None,
        }
    }

    /// True when `code` falls in the protocol-reserved range.
    pub fn is_reserved(code: i32) -> bool {
        (RESERVED_MIN..=RESERVED_MAX).contains(&code)
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Protocol-level failure. The payload is a local cause for logs; only the
/// code and its default message reach the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl RpcError {
    /// Map to the wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            RpcError::Parse(_) => ErrorCode::ParseError,
            RpcError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            RpcError::MethodNotFound(_) => ErrorCode::MethodNotFound,
            RpcError::InvalidParams(_) => ErrorCode::InvalidParams,
            RpcError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_from_code() {
        for c in [
            ErrorCode::ParseError,
            ErrorCode::InvalidRequest,
            ErrorCode::MethodNotFound,
            ErrorCode::InvalidParams,
            ErrorCode::InternalError,
            ErrorCode::ServerBusy,
        ] {
            assert_eq!(ErrorCode::from_code(c.code()), Some(c));
            assert!(ErrorCode::is_reserved(c.code()));
        }
        assert_eq!(ErrorCode::from_code(42), None);
        assert!(!ErrorCode::is_reserved(-31999));
    }
}
