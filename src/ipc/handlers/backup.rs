use super::core::select_workspace;
use crate::backup;
use crate::ipc::helpers::{required_str, respond, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

fn workspace_path(state: &AppState) -> Result<PathBuf, HandlerErr> {
    state
        .workspace
        .clone()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn handle_backup_export(state: &mut AppState, req: &Request) -> HandlerResult {
    let workspace = workspace_path(state)?;
    let out_path = PathBuf::from(required_str(&req.params, "outPath")?);

    let summary = backup::export_workspace_bundle(&workspace, &out_path)
        .map_err(|e| HandlerErr::new("io_failed", format!("{e:#}")))?;
    info!(out = %out_path.display(), "workspace exported");
    Ok(json!({
        "path": out_path.to_string_lossy(),
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
        "dbSha256": summary.db_sha256
    }))
}

fn handle_backup_import(state: &mut AppState, req: &Request) -> HandlerResult {
    let workspace = workspace_path(state)?;
    let in_path = PathBuf::from(required_str(&req.params, "inPath")?);
    if !in_path.is_file() {
        return Err(HandlerErr::new("not_found", "backup file not found")
            .with_details(json!({ "path": in_path.to_string_lossy() })));
    }

    // The database file is replaced underneath; the connection must be closed.
    state.db = None;
    let imported = backup::import_workspace_bundle(&in_path, &workspace);
    let reopened = select_workspace(state, workspace);
    let summary = imported.map_err(|e| HandlerErr::new("import_failed", format!("{e:#}")))?;
    reopened?;

    info!(from = %in_path.display(), format = %summary.bundle_format_detected, "workspace restored");
    Ok(json!({
        "bundleFormatDetected": summary.bundle_format_detected
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.export" => handle_backup_export(state, req),
        "backup.import" => handle_backup_import(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
