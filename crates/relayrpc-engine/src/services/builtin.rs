use serde_json::json;

use relayrpc_core::{Envelope, ErrorCode};

use crate::dispatch::{HandlerResult, MethodRegistry};

/// `ping` -> `{"pong":true}`.
pub async fn ping(req: Envelope) -> HandlerResult {
    Ok(Some(Envelope::result(req.id_or_null(), &json!({ "pong": true }))?))
}

/// `echo` -> the request's params, unchanged.
pub async fn echo(req: Envelope) -> HandlerResult {
    let id = req.id_or_null();
    let resp = match req.params {
        Some(params) => Envelope {
            id: Some(id),
            result: Some(params),
            ..Envelope::default()
        },
        None => Envelope::error(id, ErrorCode::InvalidParams),
    };
    Ok(Some(resp))
}

pub fn register_builtin(registry: &MethodRegistry) {
    registry.register("ping", ping);
    registry.register("echo", echo);
}
