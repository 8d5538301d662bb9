use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const FAMILIES: &[TryHandle] = &[
    handlers::core::try_handle,
    handlers::auth::try_handle,
    handlers::users::try_handle,
    handlers::students::try_handle,
    handlers::subjects::try_handle,
    handlers::classes::try_handle,
    handlers::terms::try_handle,
    handlers::marks::try_handle,
    handlers::reports::try_handle,
    handlers::saved_reports::try_handle,
    handlers::attendance::try_handle,
    handlers::promotion::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    tracing::debug!(request_id = %req.id, method = %req.method, "request");
    for try_handle in FAMILIES.iter().copied() {
        if let Some(resp) = try_handle(state, &req) {
            return resp;
        }
    }
    tracing::warn!(method = %req.method, "unknown method");
    err(
        Some(&req.id),
        "not_implemented",
        format!("unknown method: {}", req.method),
        404,
    )
}
