use crate::db;
use crate::ipc::helpers::{
    db_conn, ensure_row, optional_bool, optional_i64, optional_str, patch_object, required_str,
    respond, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::roster::{self, RosterRow};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

fn next_sort_order(conn: &Connection, class_id: &str) -> Result<i64, HandlerErr> {
    conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE class_id = ?",
        [class_id],
        |r| r.get(0),
    )
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    let include_inactive = optional_bool(&req.params, "includeInactive")?.unwrap_or(true);

    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, admission_no, sex, active, sort_order, updated_at
             FROM students
             WHERE class_id = ?1 AND (?2 = 1 OR active = 1)
             ORDER BY sort_order, last_name, first_name",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let students = stmt
        .query_map((&class_id, include_inactive as i64), |r| {
            let id: String = r.get(0)?;
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            let admission_no: Option<String> = r.get(3)?;
            let sex: Option<String> = r.get(4)?;
            let active: i64 = r.get(5)?;
            let sort_order: i64 = r.get(6)?;
            let updated_at: Option<String> = r.get(7)?;
            Ok(json!({
                "id": id,
                "lastName": last,
                "firstName": first,
                "displayName": format!("{}, {}", last, first),
                "admissionNo": admission_no,
                "sex": sex,
                "active": active != 0,
                "sortOrder": sort_order,
                "updatedAt": updated_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "students": students }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    let last = required_str(&req.params, "lastName")?;
    let first = required_str(&req.params, "firstName")?;
    let admission_no = optional_str(&req.params, "admissionNo")?;
    let sex = optional_str(&req.params, "sex")?;
    let active = optional_bool(&req.params, "active")?.unwrap_or(true);
    ensure_row(conn, "classes", &class_id, "class")?;

    let sort_order = next_sort_order(conn, &class_id)?;
    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, class_id, last_name, first_name, admission_no, sex, active, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &class_id,
            &last,
            &first,
            &admission_no,
            &sex,
            active as i64,
            sort_order,
            db::now_timestamp(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "students" })))?;
    Ok(json!({ "studentId": student_id, "sortOrder": sort_order }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(&req.params, "studentId")?;
    let patch = Value::Object(patch_object(&req.params)?.clone());
    ensure_row(conn, "students", &student_id, "student")?;

    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    for (key, set) in [("lastName", "last_name = ?"), ("firstName", "first_name = ?")] {
        if patch.get(key).is_some() {
            sets.push(set);
            values.push(required_str(&patch, key)?.into());
        }
    }
    for (key, set) in [("admissionNo", "admission_no = ?"), ("sex", "sex = ?")] {
        if patch.get(key).is_some() {
            sets.push(set);
            values.push(match optional_str(&patch, key)? {
                Some(v) => v.into(),
                None => rusqlite::types::Value::Null,
            });
        }
    }
    if let Some(active) = optional_bool(&patch, "active")? {
        sets.push("active = ?");
        values.push((active as i64).into());
    }
    if let Some(order) = optional_i64(&patch, "sortOrder")? {
        sets.push("sort_order = ?");
        values.push(order.into());
    }
    if patch.get("classId").is_some() {
        let class_id = required_str(&patch, "classId")?;
        ensure_row(conn, "classes", &class_id, "class")?;
        sets.push("class_id = ?");
        values.push(class_id.into());
    }
    if sets.is_empty() {
        return Err(HandlerErr::bad_params("patch has no updatable fields"));
    }
    sets.push("updated_at = ?");
    values.push(db::now_timestamp().into());
    values.push(student_id.into());

    let sql = format!("UPDATE students SET {} WHERE id = ?", sets.join(", "));
    conn.execute(&sql, rusqlite::params_from_iter(values))
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(json!({ "ok": true }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(&req.params, "studentId")?;
    ensure_row(conn, "students", &student_id, "student")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    for (table, sql) in [
        ("marks", "DELETE FROM marks WHERE student_id = ?"),
        ("students", "DELETE FROM students WHERE id = ?"),
    ] {
        if let Err(e) = tx.execute(sql, [&student_id]) {
            let _ = tx.rollback();
            return Err(HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": table })));
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;
    Ok(json!({ "ok": true }))
}

fn upsert_roster_row(
    conn: &Connection,
    class_id: &str,
    row: &RosterRow,
    sort_order: &mut i64,
) -> Result<bool, rusqlite::Error> {
    let existing: Option<String> = match row.admission_no.as_deref() {
        Some(adm) => conn
            .query_row(
                "SELECT id FROM students WHERE class_id = ? AND admission_no = ?",
                (class_id, adm),
                |r| r.get(0),
            )
            .optional()?,
        None => None,
    };
    let now = db::now_timestamp();
    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE students
                 SET last_name = ?, first_name = ?, sex = ?, active = ?, updated_at = ?
                 WHERE id = ?",
                (
                    &row.last_name,
                    &row.first_name,
                    &row.sex,
                    row.active as i64,
                    &now,
                    &id,
                ),
            )?;
            Ok(false)
        }
        None => {
            conn.execute(
                "INSERT INTO students(id, class_id, last_name, first_name, admission_no, sex, active, sort_order, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    class_id,
                    &row.last_name,
                    &row.first_name,
                    &row.admission_no,
                    &row.sex,
                    row.active as i64,
                    *sort_order,
                    &now,
                ),
            )?;
            *sort_order += 1;
            Ok(true)
        }
    }
}

fn handle_students_import_csv(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    let in_path = PathBuf::from(required_str(&req.params, "inPath")?);
    ensure_row(conn, "classes", &class_id, "class")?;

    let text = std::fs::read_to_string(&in_path).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string())
            .with_details(json!({ "path": in_path.to_string_lossy() }))
    })?;
    let (rows, warnings) = roster::parse_roster(&text)
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;

    let mut sort_order = next_sort_order(conn, &class_id)?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let mut created = 0usize;
    let mut updated = 0usize;
    for row in &rows {
        match upsert_roster_row(&tx, &class_id, row, &mut sort_order) {
            Ok(true) => created += 1,
            Ok(false) => updated += 1,
            Err(e) => {
                let _ = tx.rollback();
                return Err(HandlerErr::db("db_insert_failed", e)
                    .with_details(json!({ "table": "students", "line": row.line_no })));
            }
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    info!(class_id = %class_id, created, updated, warnings = warnings.len(), "roster imported");
    Ok(json!({
        "created": created,
        "updated": updated,
        "warnings": warnings
    }))
}

fn handle_students_export_csv(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    let out_path = PathBuf::from(required_str(&req.params, "outPath")?);
    ensure_row(conn, "classes", &class_id, "class")?;

    let mut stmt = conn
        .prepare(
            "SELECT admission_no, last_name, first_name, sex, active
             FROM students
             WHERE class_id = ?
             ORDER BY sort_order",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map([&class_id], |r| {
            let active: i64 = r.get(4)?;
            Ok(RosterRow {
                line_no: 0,
                admission_no: r.get(0)?,
                last_name: r.get(1)?,
                first_name: r.get(2)?,
                sex: r.get(3)?,
                active: active != 0,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let file = std::fs::File::create(&out_path).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string())
            .with_details(json!({ "path": out_path.to_string_lossy() }))
    })?;
    roster::write_roster(file, &rows).map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
    Ok(json!({
        "path": out_path.to_string_lossy(),
        "rowCount": rows.len()
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => handle_students_list(state, req),
        "students.create" => handle_students_create(state, req),
        "students.update" => handle_students_update(state, req),
        "students.delete" => handle_students_delete(state, req),
        "students.importCsv" => handle_students_import_csv(state, req),
        "students.exportCsv" => handle_students_export_csv(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
