use crate::db;
use crate::ipc::helpers::{db_conn, optional_str, required_str, respond, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;

pub const SCHOOL_SETTINGS_KEY: &str = "school";
pub const DEFAULT_SCHOOL_NAME: &str = "School";

fn handle_health(state: &mut AppState, _req: &Request) -> HandlerResult {
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
        "cachedReports": state.cache.len(),
    }))
}

pub fn select_workspace(state: &mut AppState, path: PathBuf) -> HandlerResult {
    let conn = db::open_db(&path)
        .map_err(|e| HandlerErr::new("db_open_failed", format!("{e:#}")))?;
    info!(workspace = %path.display(), "workspace opened");
    state.workspace = Some(path.clone());
    state.db = Some(conn);
    Ok(json!({ "workspacePath": path.to_string_lossy() }))
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> HandlerResult {
    let path = required_str(&req.params, "path")?;
    select_workspace(state, PathBuf::from(path))
}

/// School-wide settings with defaults filled in.
pub fn school_settings(conn: &rusqlite::Connection) -> Result<Value, HandlerErr> {
    let stored = db::settings_get_json(conn, SCHOOL_SETTINGS_KEY)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .unwrap_or_else(|| json!({}));
    Ok(json!({
        "schoolName": stored
            .get("schoolName")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_SCHOOL_NAME),
        "termLabel": stored.get("termLabel").cloned().unwrap_or(Value::Null),
    }))
}

pub fn school_name(conn: &rusqlite::Connection) -> Result<String, HandlerErr> {
    Ok(school_settings(conn)?
        .get("schoolName")
        .and_then(|v| v.as_str())
        .unwrap_or(DEFAULT_SCHOOL_NAME)
        .to_string())
}

fn handle_settings_get(state: &mut AppState, _req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    school_settings(conn)
}

fn handle_settings_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let mut current = school_settings(conn)?;
    if let Some(name) = optional_str(&req.params, "schoolName")? {
        current["schoolName"] = json!(name);
    }
    if req.params.get("termLabel").is_some() {
        current["termLabel"] = match optional_str(&req.params, "termLabel")? {
            Some(t) => json!(t),
            None => Value::Null,
        };
    }
    db::settings_set_json(conn, SCHOOL_SETTINGS_KEY, &current)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(current)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "health" => handle_health(state, req),
        "workspace.select" => handle_workspace_select(state, req),
        "settings.get" => handle_settings_get(state, req),
        "settings.update" => handle_settings_update(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
