use crate::db;
use crate::ipc::helpers::{
    db_conn, ensure_row, optional_i64, required_str, respond, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_exams_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    ensure_row(conn, "classes", &class_id, "class")?;

    let mut stmt = conn
        .prepare(
            "SELECT e.id, e.name, e.term, e.year, e.created_at,
               (SELECT COUNT(*) FROM marks m WHERE m.exam_id = e.id AND m.marks IS NOT NULL) AS mark_count
             FROM exams e
             WHERE e.class_id = ?
             ORDER BY e.year DESC, e.term DESC, e.created_at DESC",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let exams = stmt
        .query_map([&class_id], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let term: Option<i64> = r.get(2)?;
            let year: Option<i64> = r.get(3)?;
            let created_at: String = r.get(4)?;
            let mark_count: i64 = r.get(5)?;
            Ok(json!({
                "id": id,
                "name": name,
                "term": term,
                "year": year,
                "createdAt": created_at,
                "markCount": mark_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "exams": exams }))
}

fn handle_exams_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    let name = required_str(&req.params, "name")?;
    let term = optional_i64(&req.params, "term")?;
    let year = optional_i64(&req.params, "year")?;
    if let Some(t) = term {
        if t < 1 {
            return Err(HandlerErr::bad_params("term must be a positive number")
                .with_details(json!({ "term": t })));
        }
    }
    ensure_row(conn, "classes", &class_id, "class")?;

    let exam_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO exams(id, class_id, name, term, year, created_at) VALUES(?, ?, ?, ?, ?, ?)",
        (&exam_id, &class_id, &name, term, year, db::now_timestamp()),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "exams" })))?;
    Ok(json!({ "examId": exam_id }))
}

fn handle_exams_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let exam_id = required_str(&req.params, "examId")?;
    ensure_row(conn, "exams", &exam_id, "exam")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    for (table, sql) in [
        ("marks", "DELETE FROM marks WHERE exam_id = ?"),
        ("exams", "DELETE FROM exams WHERE id = ?"),
    ] {
        if let Err(e) = tx.execute(sql, [&exam_id]) {
            let _ = tx.rollback();
            return Err(HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": table })));
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "exams.list" => handle_exams_list(state, req),
        "exams.create" => handle_exams_create(state, req),
        "exams.delete" => handle_exams_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
