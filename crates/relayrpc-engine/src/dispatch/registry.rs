use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use relayrpc_core::{Envelope, ErrorCode, MethodSet};

use crate::error::{BoxError, EngineError};

/// What a handler returns: `Ok(Some(reply))`, `Ok(None)` for "no reply",
/// or an application error that goes out as a generic InternalError.
pub type HandlerResult = std::result::Result<Option<Envelope>, BoxError>;

/// Request handler bound to one method name.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(&self, req: Envelope) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> MethodHandler for F
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, req: Envelope) -> HandlerResult {
        (self)(req).await
    }
}

/// Adapter for plain synchronous handlers (see `MethodRegistry::register_fn`).
struct FnHandler<F>(F);

#[async_trait]
impl<F> MethodHandler for FnHandler<F>
where
    F: Fn(Envelope) -> HandlerResult + Send + Sync + 'static,
{
    async fn handle(&self, req: Envelope) -> HandlerResult {
        (self.0)(req)
    }
}

/// Outcome of one registry invocation.
#[derive(Debug)]
pub struct Invocation {
    /// Envelope to write back, if any.
    pub response: Option<Envelope>,
    /// 0 on success, otherwise the error code carried by `response`.
    pub code: i32,
    /// Local error for logging; never serialized.
    pub error: Option<EngineError>,
}

/// Method name -> handler. Registration overwrites (last write wins).
#[derive(Default)]
pub struct MethodRegistry {
    methods: DashMap<String, Arc<dyn MethodHandler>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self {
            methods: DashMap::new(),
        }
    }

    pub fn register<H>(&self, name: impl Into<String>, handler: H)
    where
        H: MethodHandler + 'static,
    {
        self.register_arc(name, Arc::new(handler));
    }

    /// Register a synchronous handler; it runs on a worker like any other.
    pub fn register_fn<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(Envelope) -> HandlerResult + Send + Sync + 'static,
    {
        self.register_arc(name, Arc::new(FnHandler(f)));
    }

    pub fn register_arc(&self, name: impl Into<String>, handler: Arc<dyn MethodHandler>) {
        let name = name.into();
        if self.methods.insert(name.clone(), handler).is_some() {
            tracing::debug!(method = %name, "handler replaced");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn methods(&self) -> Vec<String> {
        self.methods.iter().map(|e| e.key().clone()).collect()
    }

    /// Run the handler for `req.method` and shape its outcome into a
    /// well-formed response. Requests without id (notifications) never get a
    /// response, not even an error.
    pub async fn invoke(&self, req: Envelope) -> Invocation {
        let handler = self.methods.get(req.method.as_str()).map(|e| Arc::clone(e.value()));

        let Some(handler) = handler else {
            let code = ErrorCode::MethodNotFound;
            return Invocation {
                response: req.id.clone().map(|id| Envelope::error(id, code)),
                code: code.code(),
                error: Some(EngineError::MethodNotFound(req.method)),
            };
        };

        let id = req.id.clone();
        match handler.handle(req).await {
            Ok(Some(resp)) => {
                let code = resp.error.as_ref().map(|e| e.code).unwrap_or(0);
                Invocation {
                    response: Some(resp),
                    code,
                    error: None,
                }
            }
            Ok(None) => Invocation {
                response: None,
                code: 0,
                error: None,
            },
            Err(e) => {
                let code = ErrorCode::InternalError;
                Invocation {
                    response: id.map(|id: Value| Envelope::error(id, code)),
                    code: code.code(),
                    error: Some(EngineError::Handler(e)),
                }
            }
        }
    }
}

impl MethodSet for MethodRegistry {
    fn contains_method(&self, method: &str) -> bool {
        self.contains(method)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    async fn pong(req: Envelope) -> HandlerResult {
        Ok(Some(Envelope::result(req.id_or_null(), &json!({"pong": true}))?))
    }

    async fn fails(_req: Envelope) -> HandlerResult {
        Err("connection to db lost".into())
    }

    async fn silent(_req: Envelope) -> HandlerResult {
        Ok(None)
    }

    #[tokio::test]
    async fn unknown_method_yields_method_not_found() {
        let reg = MethodRegistry::new();
        let inv = reg.invoke(Envelope::request_with_id("nope", 1)).await;
        assert_eq!(inv.code, -32601);
        assert!(matches!(inv.error, Some(EngineError::MethodNotFound(ref m)) if m == "nope"));
        let resp = inv.response.unwrap();
        assert_eq!(resp.id, Some(json!(1)));
        assert_eq!(resp.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn handler_error_is_wrapped_without_leaking() {
        let reg = MethodRegistry::new();
        reg.register("boom", fails);
        let inv = reg.invoke(Envelope::request_with_id("boom", "a")).await;
        assert_eq!(inv.code, -32603);
        let text = String::from_utf8(inv.response.unwrap().to_vec().unwrap()).unwrap();
        assert!(!text.contains("db lost"));
        assert!(matches!(inv.error, Some(EngineError::Handler(ref e)) if e.to_string().contains("db lost")));
    }

    #[tokio::test]
    async fn no_reply_outcome_stays_empty() {
        let reg = MethodRegistry::new();
        reg.register("tick", silent);
        let inv = reg.invoke(Envelope::request_with_id("tick", 1)).await;
        assert!(inv.response.is_none());
        assert_eq!(inv.code, 0);
        assert!(inv.error.is_none());
    }

    #[tokio::test]
    async fn notifications_get_no_error_response() {
        let reg = MethodRegistry::new();
        reg.register("boom", fails);
        let inv = reg.invoke(Envelope::notification("boom")).await;
        assert!(inv.response.is_none());
        assert_eq!(inv.code, -32603);
    }

    #[tokio::test]
    async fn reply_error_code_is_reported() {
        let reg = MethodRegistry::new();
        reg.register("strict", |req: Envelope| async move {
            let err = req.params_as::<Vec<i64>>().unwrap_err();
            Ok::<_, BoxError>(Some(Envelope::error(req.id_or_null(), &err)))
        });
        let inv = reg.invoke(Envelope::request_with_id("strict", 1)).await;
        assert_eq!(inv.code, -32602);
    }

    #[tokio::test]
    async fn sync_handlers_run_through_the_same_path() {
        let reg = MethodRegistry::new();
        reg.register_fn("now", |req: Envelope| {
            Ok(Some(Envelope::result(req.id_or_null(), &42)?))
        });
        let inv = reg.invoke(Envelope::request_with_id("now", 9)).await;
        assert_eq!(inv.code, 0);
        assert_eq!(inv.response.unwrap().result.unwrap().get(), "42");
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let reg = MethodRegistry::new();
        reg.register("x", fails);
        reg.register("x", pong);
        let inv = reg.invoke(Envelope::request_with_id("x", 1)).await;
        assert_eq!(inv.code, 0);
        assert_eq!(reg.methods(), vec!["x".to_string()]);
    }
}
