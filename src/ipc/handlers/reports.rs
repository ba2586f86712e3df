use super::classes::parse_level;
use super::core::school_name;
use crate::cache::ReportCache;
use crate::calc::{self, CalcContext};
use crate::grading::{self, SubjectMark};
use crate::ipc::helpers::{
    db_conn, optional_bool, optional_str, parse_mark, required_str, respond, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::render;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::debug;

fn to_json<T: Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

/// Serves `key` from the report cache, building and storing it on a miss.
fn cached_report<F>(state: &mut AppState, key: String, build: F) -> HandlerResult
where
    F: FnOnce(&Connection) -> HandlerResult,
{
    db_conn(state)?;
    if let Some(hit) = state.cache.get(&key) {
        debug!(key = %key, "report cache hit");
        return Ok(hit);
    }
    let value = build(db_conn(state)?)?;
    state.cache.put(key, value.clone());
    Ok(value)
}

fn handle_grading_preview(_state: &mut AppState, req: &Request) -> HandlerResult {
    let level = parse_level(&required_str(&req.params, "level")?)?;
    let Some(raw) = req.params.get("subjects").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing subjects[]"));
    };

    let mut subjects: Vec<SubjectMark> = Vec::with_capacity(raw.len());
    for (i, entry) in raw.iter().enumerate() {
        if !entry.is_object() {
            return Err(HandlerErr::bad_params(format!("subjects[{}] must be an object", i)));
        }
        let code = optional_str(entry, "code")?.unwrap_or_else(|| format!("S{}", i + 1));
        let name = optional_str(entry, "name")?.unwrap_or_default();
        let marks = parse_mark(entry.get("marks"), &format!("subjects[{}].marks", i))?;
        let principal = optional_bool(entry, "principal")?.unwrap_or(true);
        subjects.push(SubjectMark {
            code,
            name,
            marks,
            principal,
        });
    }

    let result = grading::compute_result(level, &subjects)
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    to_json(&result)
}

fn handle_student_result(state: &mut AppState, req: &Request) -> HandlerResult {
    let exam_id = required_str(&req.params, "examId")?;
    let student_id = required_str(&req.params, "studentId")?;
    let key = ReportCache::key("studentResult", &[exam_id.as_str(), student_id.as_str()]);
    cached_report(state, key, |conn| {
        let ctx = CalcContext {
            conn,
            exam_id: &exam_id,
        };
        to_json(&calc::compute_student_report(&ctx, &student_id)?)
    })
}

fn handle_class_results(state: &mut AppState, req: &Request) -> HandlerResult {
    let exam_id = required_str(&req.params, "examId")?;
    let key = ReportCache::key("classResults", &[exam_id.as_str()]);
    cached_report(state, key, |conn| {
        let ctx = CalcContext {
            conn,
            exam_id: &exam_id,
        };
        to_json(&calc::compute_class_results(&ctx)?)
    })
}

fn handle_report_card(state: &mut AppState, req: &Request) -> HandlerResult {
    let exam_id = required_str(&req.params, "examId")?;
    let student_id = required_str(&req.params, "studentId")?;
    let key = ReportCache::key("reportCard", &[exam_id.as_str(), student_id.as_str()]);
    cached_report(state, key, |conn| {
        let ctx = CalcContext {
            conn,
            exam_id: &exam_id,
        };
        let report = calc::compute_student_report(&ctx, &student_id)?;
        let text = render::report_card(&school_name(conn)?, &report);
        Ok(json!({
            "examId": exam_id,
            "studentId": student_id,
            "text": text
        }))
    })
}

fn handle_result_sheet(state: &mut AppState, req: &Request) -> HandlerResult {
    let exam_id = required_str(&req.params, "examId")?;
    let key = ReportCache::key("resultSheet", &[exam_id.as_str()]);
    cached_report(state, key, |conn| {
        let ctx = CalcContext {
            conn,
            exam_id: &exam_id,
        };
        let results = calc::compute_class_results(&ctx)?;
        let text = render::result_sheet(&school_name(conn)?, &results);
        Ok(json!({
            "examId": exam_id,
            "studentCount": results.students.len(),
            "text": text
        }))
    })
}

fn handle_export_csv(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let exam_id = required_str(&req.params, "examId")?;
    let out_path = PathBuf::from(required_str(&req.params, "outPath")?);
    let ctx = CalcContext {
        conn,
        exam_id: &exam_id,
    };
    let results = calc::compute_class_results(&ctx)?;

    let file = std::fs::File::create(&out_path).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string())
            .with_details(json!({ "path": out_path.to_string_lossy() }))
    })?;
    render::write_results_csv(file, &results)
        .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
    Ok(json!({
        "path": out_path.to_string_lossy(),
        "rowCount": results.students.len()
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "grading.preview" => handle_grading_preview(state, req),
        "reports.studentResult" => handle_student_result(state, req),
        "reports.classResults" => handle_class_results(state, req),
        "reports.reportCard" => handle_report_card(state, req),
        "reports.resultSheet" => handle_result_sheet(state, req),
        "reports.exportCsv" => handle_export_csv(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
