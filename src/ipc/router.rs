use super::handlers;
use super::types::{AppState, Request};
use crate::access::{self, Access, Role};
use crate::ipc::error::{err, ErrorBody};
use serde_json::json;
use tracing::{debug, warn};

fn dispatch(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if let Some(resp) = handlers::core::try_handle(state, req) {
        return Some(resp);
    }
    if let Some(resp) = handlers::classes::try_handle(state, req) {
        return Some(resp);
    }
    if let Some(resp) = handlers::subjects::try_handle(state, req) {
        return Some(resp);
    }
    if let Some(resp) = handlers::teachers::try_handle(state, req) {
        return Some(resp);
    }
    if let Some(resp) = handlers::students::try_handle(state, req) {
        return Some(resp);
    }
    if let Some(resp) = handlers::exams::try_handle(state, req) {
        return Some(resp);
    }
    if let Some(resp) = handlers::marks::try_handle(state, req) {
        return Some(resp);
    }
    if let Some(resp) = handlers::reports::try_handle(state, req) {
        return Some(resp);
    }
    handlers::backup::try_handle(state, req)
}

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    let role = match req.role.as_deref() {
        None => Role::Admin,
        Some(raw) => match Role::parse(raw) {
            Some(r) => r,
            None => {
                return err(
                    Some(&req.id),
                    ErrorBody::new("bad_params", format!("unknown role: {}", raw)),
                )
            }
        },
    };

    let access = access::method_access(&req.method);
    if access.is_some() && !access::is_allowed(role, &req.method) {
        warn!(method = %req.method, role = role.as_str(), "request refused");
        return err(
            Some(&req.id),
            ErrorBody::new(
                "forbidden",
                format!("{} may not call {}", role.as_str(), req.method),
            )
            .with_details(json!({ "role": role.as_str(), "method": req.method })),
        );
    }

    debug!(id = %req.id, method = %req.method, role = role.as_str(), "request");
    let Some(resp) = dispatch(state, &req) else {
        return err(
            Some(&req.id),
            ErrorBody::new("not_implemented", format!("unknown method: {}", req.method)),
        );
    };

    let succeeded = resp.get("ok").and_then(|v| v.as_bool()) == Some(true);
    if succeeded && access == Some(Access::Write) {
        state.cache.clear();
    }
    if !succeeded {
        let code = resp
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        debug!(id = %req.id, method = %req.method, code, "request failed");
    }
    resp
}
