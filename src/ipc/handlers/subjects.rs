use super::classes::parse_level;
use crate::grading::Level;
use crate::ipc::helpers::{
    db_conn, ensure_row, optional_bool, optional_str, patch_object, required_str, respond,
    HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

fn normalize_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

fn ensure_code_free(conn: &Connection, code: &str, except_id: Option<&str>) -> Result<(), HandlerErr> {
    let owner: Option<String> = conn
        .query_row("SELECT id FROM subjects WHERE code = ?", [code], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    match owner {
        Some(id) if Some(id.as_str()) != except_id => Err(HandlerErr::new(
            "conflict",
            format!("subject code {} already exists", code),
        )
        .with_details(json!({ "subjectId": id }))),
        _ => Ok(()),
    }
}

/// A subject keeps its level while classes of that level use it.
fn ensure_subject_level_change(conn: &Connection, subject_id: &str, level: Level) -> Result<(), HandlerErr> {
    let (assigned, marks): (i64, i64) = conn
        .query_row(
            "SELECT
               (SELECT COUNT(*) FROM class_subjects cs
                  JOIN classes c ON c.id = cs.class_id
                 WHERE cs.subject_id = ?1 AND c.level <> ?2),
               (SELECT COUNT(*) FROM marks m
                  JOIN exams e ON e.id = m.exam_id
                  JOIN classes c ON c.id = e.class_id
                 WHERE m.subject_id = ?1 AND c.level <> ?2)",
            (subject_id, level.as_str()),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if assigned > 0 || marks > 0 {
        return Err(HandlerErr::new(
            "conflict",
            "subject is in use by classes of its current level",
        )
        .with_details(json!({
            "level": level.as_str(),
            "assignedClasses": assigned,
            "marks": marks
        })));
    }
    Ok(())
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let level = optional_str(&req.params, "level")?
        .map(|l| parse_level(&l))
        .transpose()?;

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.code, s.name, s.level, s.principal,
               (SELECT COUNT(*) FROM class_subjects cs WHERE cs.subject_id = s.id) AS class_count
             FROM subjects s
             WHERE ?1 IS NULL OR s.level = ?1
             ORDER BY s.level, s.code",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let subjects = stmt
        .query_map([level.map(|l| l.as_str())], |r| {
            let id: String = r.get(0)?;
            let code: String = r.get(1)?;
            let name: String = r.get(2)?;
            let level: String = r.get(3)?;
            let principal: i64 = r.get(4)?;
            let class_count: i64 = r.get(5)?;
            Ok(json!({
                "id": id,
                "code": code,
                "name": name,
                "level": level,
                "principal": principal != 0,
                "classCount": class_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "subjects": subjects }))
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let code = normalize_code(&required_str(&req.params, "code")?);
    let name = required_str(&req.params, "name")?;
    let level = parse_level(&required_str(&req.params, "level")?)?;
    let principal = optional_bool(&req.params, "principal")?.unwrap_or(true);
    ensure_code_free(conn, &code, None)?;

    let subject_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, code, name, level, principal) VALUES(?, ?, ?, ?, ?)",
        (&subject_id, &code, &name, level.as_str(), principal as i64),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "subjects" })))?;

    Ok(json!({
        "subjectId": subject_id,
        "code": code,
        "name": name,
        "level": level,
        "principal": principal
    }))
}

fn handle_subjects_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let subject_id = required_str(&req.params, "subjectId")?;
    let patch = Value::Object(patch_object(&req.params)?.clone());
    ensure_row(conn, "subjects", &subject_id, "subject")?;

    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    if patch.get("code").is_some() {
        let code = normalize_code(&required_str(&patch, "code")?);
        ensure_code_free(conn, &code, Some(&subject_id))?;
        sets.push("code = ?");
        values.push(code.into());
    }
    if patch.get("name").is_some() {
        sets.push("name = ?");
        values.push(required_str(&patch, "name")?.into());
    }
    if patch.get("level").is_some() {
        let level = parse_level(&required_str(&patch, "level")?)?;
        ensure_subject_level_change(conn, &subject_id, level)?;
        sets.push("level = ?");
        values.push(level.as_str().to_string().into());
    }
    if let Some(principal) = optional_bool(&patch, "principal")? {
        sets.push("principal = ?");
        values.push((principal as i64).into());
    }
    if sets.is_empty() {
        return Err(HandlerErr::bad_params("patch has no updatable fields"));
    }
    values.push(subject_id.into());

    let sql = format!("UPDATE subjects SET {} WHERE id = ?", sets.join(", "));
    conn.execute(&sql, rusqlite::params_from_iter(values))
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(json!({ "ok": true }))
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let subject_id = required_str(&req.params, "subjectId")?;
    ensure_row(conn, "subjects", &subject_id, "subject")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    for (table, sql) in [
        ("marks", "DELETE FROM marks WHERE subject_id = ?"),
        ("class_subjects", "DELETE FROM class_subjects WHERE subject_id = ?"),
        ("subjects", "DELETE FROM subjects WHERE id = ?"),
    ] {
        if let Err(e) = tx.execute(sql, [&subject_id]) {
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
        "subjects.list" => handle_subjects_list(state, req),
        "subjects.create" => handle_subjects_create(state, req),
        "subjects.update" => handle_subjects_update(state, req),
        "subjects.delete" => handle_subjects_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
