//! Envelope (JSON) and builders.
//!
//! `params` and `result` are kept as `RawValue` so handlers and callers decode
//! them lazily into their own types.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

use crate::error::{ErrorCode, Result, RpcError};

/// Version tag written when the compatibility flag is on.
pub const VERSION: &str = "2.0";

/// One request or response on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version tag (only emitted in compat mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,
    /// Method name; empty on responses.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    /// Correlation id. `Some(Value::Null)` is a present `null`.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Request payload, stored as raw JSON (lazy parsing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Box<RawValue>>,
    /// Response payload. A literal `null` result still counts as present.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<RawValue>>,
    /// Response error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

/// Structured error carried by a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<ErrorCode> for ErrorObject {
    fn from(code: ErrorCode) -> Self {
        ErrorObject::new(code.code(), code.message())
    }
}

/// Only the code's default text goes out; the local cause stays local.
impl From<&RpcError> for ErrorObject {
    fn from(err: &RpcError) -> Self {
        err.code().into()
    }
}

// Distinguishes `"id": null` (present) from a missing field.
fn present<'de, D, T>(de: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(de).map(Some)
}

impl Envelope {
    /// Request with a fresh UUID string id.
    pub fn request(method: impl Into<String>) -> Self {
        Self::request_with_id(method, uuid::Uuid::new_v4().to_string())
    }

    pub fn request_with_id(method: impl Into<String>, id: impl Into<Value>) -> Self {
        Self {
            method: method.into(),
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Request without an id; the peer must not answer it.
    pub fn notification(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Self::default()
        }
    }

    pub fn with_params<T: Serialize + ?Sized>(mut self, params: &T) -> Result<Self> {
        let raw = serde_json::value::to_raw_value(params)
            .map_err(|e| RpcError::Internal(format!("params encode failed: {e}")))?;
        self.params = Some(raw);
        Ok(self)
    }

    /// Successful response.
    pub fn result<T: Serialize + ?Sized>(id: Value, value: &T) -> Result<Self> {
        let raw = serde_json::value::to_raw_value(value)
            .map_err(|e| RpcError::Internal(format!("result encode failed: {e}")))?;
        Ok(Self {
            id: Some(id),
            result: Some(raw),
            ..Self::default()
        })
    }

    /// Error response.
    pub fn error(id: Value, error: impl Into<ErrorObject>) -> Self {
        Self {
            id: Some(id),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Response for input that never got far enough to yield an id.
    pub fn parse_error() -> Self {
        Self::error(Value::Null, ErrorCode::ParseError)
    }

    /// Marks the envelope with the version tag.
    pub fn with_version(mut self) -> Self {
        self.jsonrpc = Some(VERSION.to_string());
        self
    }

    pub fn is_request(&self) -> bool {
        !self.method.is_empty()
    }

    /// Id for error echoes: the envelope's id, or `null`.
    pub fn id_or_null(&self) -> Value {
        self.id.clone().unwrap_or(Value::Null)
    }

    /// Canonical store key for this envelope's id.
    pub fn key(&self) -> Option<String> {
        self.id.as_ref().map(correlation_key)
    }

    /// Decode `params` into `T`. Failures map to InvalidParams so handlers can
    /// answer with `Envelope::error(id, &err)`.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T> {
        let raw = self
            .params
            .as_ref()
            .ok_or_else(|| RpcError::InvalidParams("missing params".into()))?;
        serde_json::from_str(raw.get()).map_err(|e| RpcError::InvalidParams(e.to_string()))
    }

    /// Decode `result` into `T`.
    pub fn result_as<T: DeserializeOwned>(&self) -> Result<T> {
        let raw = self
            .result
            .as_ref()
            .ok_or_else(|| RpcError::InvalidRequest("response carries no result".into()))?;
        serde_json::from_str(raw.get()).map_err(|e| RpcError::Parse(e.to_string()))
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| RpcError::Internal(format!("envelope encode failed: {e}")))
    }
}

/// Compact JSON text of an id: `"7"` and `7` never collide.
pub fn correlation_key(id: &Value) -> String {
    id.to_string()
}
