use crate::calc;
use crate::db;
use crate::ipc::helpers::{
    db_conn, required_mark, required_str, respond, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const BULK_SET_MAX_ENTRIES: usize = 2000;

/// Where a mark lands once the exam and subject have been checked.
struct MarkTarget {
    exam_id: String,
    class_id: String,
    subject_id: String,
}

fn resolve_target(conn: &Connection, exam_id: &str, subject_id: &str) -> Result<MarkTarget, HandlerErr> {
    let exam = calc::load_exam(conn, exam_id)?;
    let subject_level: Option<String> = conn
        .query_row("SELECT level FROM subjects WHERE id = ?", [subject_id], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some(subject_level) = subject_level else {
        return Err(HandlerErr::new("not_found", "subject not found"));
    };
    if subject_level != exam.level.as_str() {
        return Err(HandlerErr::bad_params("subject level does not match exam class level")
            .with_details(json!({
                "subjectLevel": subject_level,
                "classLevel": exam.level.as_str()
            })));
    }
    Ok(MarkTarget {
        exam_id: exam.id,
        class_id: exam.class_id,
        subject_id: subject_id.to_string(),
    })
}

fn ensure_student_in_class(conn: &Connection, student_id: &str, class_id: &str) -> Result<(), HandlerErr> {
    let found: Option<String> = conn
        .query_row("SELECT class_id FROM students WHERE id = ?", [student_id], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    match found {
        None => Err(HandlerErr::new("not_found", "student not found")
            .with_details(json!({ "studentId": student_id }))),
        Some(c) if c != class_id => Err(HandlerErr::bad_params("student is not in the exam class")
            .with_details(json!({ "studentId": student_id }))),
        Some(_) => Ok(()),
    }
}

fn upsert_mark(
    conn: &Connection,
    target: &MarkTarget,
    student_id: &str,
    marks: Option<f64>,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO marks(id, exam_id, student_id, subject_id, marks, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(exam_id, student_id, subject_id) DO UPDATE SET
           marks = excluded.marks,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            &target.exam_id,
            student_id,
            &target.subject_id,
            marks,
            db::now_timestamp(),
        ),
    )?;
    Ok(())
}

fn handle_marks_grid(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let exam_id = required_str(&req.params, "examId")?;
    let grid = calc::load_mark_grid(conn, &exam_id)?;
    serde_json::to_value(grid).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

fn handle_marks_set(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let exam_id = required_str(&req.params, "examId")?;
    let student_id = required_str(&req.params, "studentId")?;
    let subject_id = required_str(&req.params, "subjectId")?;
    let marks = required_mark(&req.params, "marks")?;

    let target = resolve_target(conn, &exam_id, &subject_id)?;
    ensure_student_in_class(conn, &student_id, &target.class_id)?;
    upsert_mark(conn, &target, &student_id, marks).map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "marks" }))
    })?;
    Ok(json!({ "ok": true, "marks": marks }))
}

fn handle_marks_bulk_set(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let exam_id = required_str(&req.params, "examId")?;
    let subject_id = required_str(&req.params, "subjectId")?;
    let Some(entries) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing entries[]"));
    };
    if entries.len() > BULK_SET_MAX_ENTRIES {
        return Err(HandlerErr::bad_params("too many entries")
            .with_details(json!({ "count": entries.len(), "max": BULK_SET_MAX_ENTRIES })));
    }
    let target = resolve_target(conn, &exam_id, &subject_id)?;

    // Nothing is written unless every entry is valid.
    let mut parsed: Vec<(String, Option<f64>)> = Vec::with_capacity(entries.len());
    let mut errors: Vec<serde_json::Value> = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        let student_id = match required_str(entry, "studentId") {
            Ok(v) => v,
            Err(e) => {
                errors.push(json!({ "index": i, "code": e.code, "message": e.message }));
                continue;
            }
        };
        let checked = required_mark(entry, "marks")
            .and_then(|m| ensure_student_in_class(conn, &student_id, &target.class_id).map(|_| m));
        match checked {
            Ok(m) => parsed.push((student_id, m)),
            Err(e) => errors.push(json!({
                "index": i,
                "studentId": student_id,
                "code": e.code,
                "message": e.message
            })),
        }
    }
    if !errors.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} invalid entries", errors.len()))
            .with_details(json!({ "errors": errors })));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    for (student_id, marks) in &parsed {
        if let Err(e) = upsert_mark(&tx, &target, student_id, *marks) {
            let _ = tx.rollback();
            return Err(HandlerErr::db("db_insert_failed", e)
                .with_details(json!({ "table": "marks", "studentId": student_id })));
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;
    Ok(json!({ "ok": true, "updated": parsed.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "marks.grid" => handle_marks_grid(state, req),
        "marks.set" => handle_marks_set(state, req),
        "marks.bulkSet" => handle_marks_bulk_set(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
