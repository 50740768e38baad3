//! Classification and static validation of inbound bytes.
//!
//! Rules:
//! - Never trust the first byte alone for arrays: `[` must close with `]` and
//!   the whole text must be valid JSON before the batch decode runs.
//! - Syntax failures are ParseError; well-formed JSON with the wrong shape is
//!   InvalidRequest.
//! - Nothing here panics; every failure becomes a `Checked` with an error.

use std::collections::HashSet;

use serde::de::IgnoredAny;
use serde_json::value::RawValue;
use serde_json::Value;

use crate::error::RpcError;
use crate::protocol::envelope::Envelope;

/// Method existence lookup used by the validator.
pub trait MethodSet {
    fn contains_method(&self, method: &str) -> bool;
}

impl MethodSet for HashSet<String> {
    fn contains_method(&self, method: &str) -> bool {
        self.contains(method)
    }
}

impl<const N: usize> MethodSet for [&str; N] {
    fn contains_method(&self, method: &str) -> bool {
        self.iter().any(|m| *m == method)
    }
}

/// Derived message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Invalid,
    Request,
    Response,
}

/// One envelope after static validation.
#[derive(Debug, Clone)]
pub struct Checked {
    /// Decoded envelope, if decoding got that far.
    pub envelope: Option<Envelope>,
    pub kind: Kind,
    /// Why validation failed (`None` when valid).
    pub error: Option<RpcError>,
}

impl Checked {
    fn valid(envelope: Envelope, kind: Kind) -> Self {
        Self {
            envelope: Some(envelope),
            kind,
            error: None,
        }
    }

    fn invalid(envelope: Option<Envelope>, error: RpcError) -> Self {
        Self {
            envelope,
            kind: Kind::Invalid,
            error: Some(error),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }

    /// Wire code: 0 when valid.
    pub fn code(&self) -> i32 {
        self.error.as_ref().map(|e| e.code().code()).unwrap_or(0)
    }

    /// Id to echo in an error response. Non-scalar ids are not echoed.
    pub fn id_echo(&self) -> Value {
        match self.envelope.as_ref().and_then(|e| e.id.as_ref()) {
            Some(id) if !id.is_object() && !id.is_array() => id.clone(),
            _ => Value::Null,
        }
    }

    /// Request or response shape from `method` presence, whether or not the
    /// element passed validation. `None` when the element never decoded.
    pub fn shape(&self) -> Option<Kind> {
        self.envelope.as_ref().map(|env| {
            if env.is_request() {
                Kind::Request
            } else {
                Kind::Response
            }
        })
    }

    /// A request-shaped envelope without id is a notification; it never gets
    /// an answer, not even an error.
    pub fn expects_reply(&self) -> bool {
        match &self.envelope {
            Some(env) if env.is_request() => env.id.is_some(),
            _ => true,
        }
    }

    /// Error response for an invalid envelope.
    pub fn error_response(&self) -> Option<Envelope> {
        self.error
            .as_ref()
            .map(|err| Envelope::error(self.id_echo(), err))
    }
}

/// How a batch is treated, from the shapes of its elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Requests,
    Responses,
    /// Request-shaped and response-shaped elements in one array; not supported.
    Mixed,
}

/// Result of classifying one inbound message.
#[derive(Debug, Clone)]
pub enum Classified {
    /// Top-level failure (not JSON, not object/array, empty batch).
    Rejected(Checked),
    Single(Checked),
    /// Non-empty batch, one entry per element in input order.
    Batch(Vec<Checked>),
}

/// Classify raw inbound bytes.
pub fn classify(input: &[u8], methods: &dyn MethodSet) -> Classified {
    let input = input.trim_ascii();

    match input.first() {
        Some(b'{') => classify_object(input, methods),
        Some(b'[') if looks_like_array(input) => classify_batch(input, methods),
        Some(b'[') => Classified::Rejected(Checked::invalid(
            None,
            RpcError::Parse("malformed array".into()),
        )),
        Some(_) => Classified::Rejected(Checked::invalid(
            None,
            RpcError::Parse("input is not an object or array".into()),
        )),
        None => Classified::Rejected(Checked::invalid(None, RpcError::Parse("empty input".into()))),
    }
}

/// Cheap array pre-check before the structural decode.
pub fn looks_like_array(input: &[u8]) -> bool {
    let input = input.trim_ascii();
    if input.len() < 2 || input.first() != Some(&b'[') || input.last() != Some(&b']') {
        return false;
    }
    serde_json::from_slice::<IgnoredAny>(input).is_ok()
}

fn classify_object(input: &[u8], methods: &dyn MethodSet) -> Classified {
    let text = match std::str::from_utf8(input) {
        Ok(t) => t,
        Err(e) => return Classified::Rejected(Checked::invalid(None, RpcError::Parse(e.to_string()))),
    };
    if let Err(e) = serde_json::from_str::<IgnoredAny>(text) {
        return Classified::Rejected(Checked::invalid(None, RpcError::Parse(e.to_string())));
    }
    Classified::Single(check_element(text, methods))
}

fn classify_batch(input: &[u8], methods: &dyn MethodSet) -> Classified {
    let items: Vec<Box<RawValue>> = match serde_json::from_slice(input) {
        Ok(items) => items,
        Err(e) => return Classified::Rejected(Checked::invalid(None, RpcError::Parse(e.to_string()))),
    };
    if items.is_empty() {
        return Classified::Rejected(Checked::invalid(
            None,
            RpcError::InvalidRequest("empty batch".into()),
        ));
    }
    Classified::Batch(items.iter().map(|raw| check_element(raw.get(), methods)).collect())
}

fn check_element(text: &str, methods: &dyn MethodSet) -> Checked {
    match serde_json::from_str::<Envelope>(text) {
        Ok(env) => check_envelope(env, methods),
        Err(e) => Checked::invalid(
            None,
            RpcError::InvalidRequest(format!("invalid message format: {e}")),
        ),
    }
}

/// Static request/response rules for one decoded envelope.
pub fn check_envelope(env: Envelope, methods: &dyn MethodSet) -> Checked {
    if env.id.as_ref().is_some_and(|id| id.is_object() || id.is_array()) {
        return Checked::invalid(Some(env), RpcError::InvalidRequest("id must be a scalar".into()));
    }

    if env.is_request() {
        if env.result.is_some() || env.error.is_some() {
            return Checked::invalid(
                Some(env),
                RpcError::InvalidRequest("request must not carry result or error".into()),
            );
        }
        if !methods.contains_method(&env.method) {
            let method = env.method.clone();
            return Checked::invalid(Some(env), RpcError::MethodNotFound(method));
        }
        return Checked::valid(env, Kind::Request);
    }

    if env.id.is_none() {
        return Checked::invalid(
            Some(env),
            RpcError::InvalidRequest("response must carry an id".into()),
        );
    }
    if env.result.is_some() == env.error.is_some() {
        return Checked::invalid(
            Some(env),
            RpcError::InvalidRequest("response must carry exactly one of result or error".into()),
        );
    }
    Checked::valid(env, Kind::Response)
}

/// Batch kind from element shapes, valid or not. Undecodable elements have no
/// shape; a batch with no known shape is answered like a request batch (one
/// inline error per element).
pub fn batch_kind(items: &[Checked]) -> BatchKind {
    let requests = items.iter().any(|c| c.shape() == Some(Kind::Request));
    let responses = items.iter().any(|c| c.shape() == Some(Kind::Response));
    match (requests, responses) {
        (true, true) => BatchKind::Mixed,
        (false, true) => BatchKind::Responses,
        _ => BatchKind::Requests,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use super::*;
    use crate::error::ErrorCode;

    const METHODS: [&str; 2] = ["ping", "sum"];

    fn single(input: &str) -> Checked {
        match classify(input.as_bytes(), &METHODS) {
            Classified::Single(c) => c,
            other => panic!("expected single, got {other:?}"),
        }
    }

    #[test]
    fn array_precheck() {
        assert!(looks_like_array(b" [1, 2] "));
        assert!(!looks_like_array(b"[1, 2"));
        assert!(!looks_like_array(b"[1,]"));
        assert!(!looks_like_array(b"{}"));
        assert!(!looks_like_array(b"["));
    }

    #[test]
    fn notification_with_unknown_method_expects_no_reply() {
        let c = single(r#"{"method":"nope"}"#);
        assert_eq!(c.error.as_ref().unwrap().code(), ErrorCode::MethodNotFound);
        assert!(!c.expects_reply());

        let c = single(r#"{"method":"nope","id":3}"#);
        assert!(c.expects_reply());
        assert_eq!(c.id_echo(), serde_json::json!(3));
    }

    #[test]
    fn object_id_is_rejected_and_not_echoed() {
        let c = single(r#"{"id":{"a":1},"result":1}"#);
        assert_eq!(c.code(), -32600);
        assert_eq!(c.id_echo(), Value::Null);
    }

    #[test]
    fn batch_kinds() {
        let Classified::Batch(items) = classify(
            br#"[{"method":"ping","id":1},{"id":2,"result":true}]"#,
            &METHODS,
        ) else {
            panic!("expected batch");
        };
        assert_eq!(batch_kind(&items), BatchKind::Mixed);

        let Classified::Batch(items) = classify(br#"[{"id":2,"result":true},{"x":1}]"#, &METHODS) else {
            panic!("expected batch");
        };
        assert_eq!(batch_kind(&items), BatchKind::Responses);

        let Classified::Batch(items) = classify(br#"[1, "a"]"#, &METHODS) else {
            panic!("expected batch");
        };
        assert_eq!(batch_kind(&items), BatchKind::Requests);
        assert!(items.iter().all(|c| c.code() == -32600));
    }

    #[test]
    fn invalid_request_next_to_response_is_mixed() {
        let Classified::Batch(items) = classify(
            br#"[{"method":"nope","id":1},{"id":"k","result":1}]"#,
            &METHODS,
        ) else {
            panic!("expected batch");
        };
        assert_eq!(items[0].shape(), Some(Kind::Request));
        assert!(!items[0].is_valid());
        assert_eq!(batch_kind(&items), BatchKind::Mixed);
    }
}
