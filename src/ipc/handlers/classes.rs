use crate::grading::Level;
use crate::ipc::helpers::{
    db_conn, ensure_row, optional_i64, optional_str, patch_object, required_str, respond,
    HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

pub fn parse_level(raw: &str) -> Result<Level, HandlerErr> {
    Level::parse(raw).ok_or_else(|| {
        HandlerErr::bad_params("level must be one of: o_level, a_level")
            .with_details(json!({ "level": raw }))
    })
}

/// A class keeps its level while it holds subjects or marks of that level.
fn ensure_class_level_change(conn: &Connection, class_id: &str, level: Level) -> Result<(), HandlerErr> {
    let (assigned, marks): (i64, i64) = conn
        .query_row(
            "SELECT
               (SELECT COUNT(*) FROM class_subjects cs
                  JOIN subjects s ON s.id = cs.subject_id
                 WHERE cs.class_id = ?1 AND s.level <> ?2),
               (SELECT COUNT(*) FROM marks m
                  JOIN exams e ON e.id = m.exam_id
                  JOIN subjects s ON s.id = m.subject_id
                 WHERE e.class_id = ?1 AND s.level <> ?2)",
            (class_id, level.as_str()),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if assigned > 0 || marks > 0 {
        return Err(HandlerErr::new(
            "conflict",
            "class has subjects or marks of its current level",
        )
        .with_details(json!({
            "level": level.as_str(),
            "assignedSubjects": assigned,
            "marks": marks
        })));
    }
    Ok(())
}

fn handle_classes_list(state: &mut AppState, _req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;

    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = conn
        .prepare(
            "SELECT
               c.id,
               c.name,
               c.level,
               c.stream,
               c.year,
               (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id AND s.active = 1) AS student_count,
               (SELECT COUNT(*) FROM exams e WHERE e.class_id = c.id) AS exam_count,
               (SELECT COUNT(*) FROM class_subjects cs WHERE cs.class_id = c.id) AS subject_count
             FROM classes c
             ORDER BY c.name, c.stream",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let classes = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let level: String = row.get(2)?;
            let stream: Option<String> = row.get(3)?;
            let year: Option<i64> = row.get(4)?;
            let student_count: i64 = row.get(5)?;
            let exam_count: i64 = row.get(6)?;
            let subject_count: i64 = row.get(7)?;
            Ok(json!({
                "id": id,
                "name": name,
                "level": level,
                "stream": stream,
                "year": year,
                "studentCount": student_count,
                "examCount": exam_count,
                "subjectCount": subject_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    Ok(json!({ "classes": classes }))
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let name = required_str(&req.params, "name")?;
    let level = parse_level(&required_str(&req.params, "level")?)?;
    let stream = optional_str(&req.params, "stream")?;
    let year = optional_i64(&req.params, "year")?;

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, level, stream, year) VALUES(?, ?, ?, ?, ?)",
        (&class_id, &name, level.as_str(), &stream, year),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "classes" })))?;

    Ok(json!({ "classId": class_id, "name": name, "level": level }))
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    let patch = patch_object(&req.params)?;
    ensure_row(conn, "classes", &class_id, "class")?;

    let patch_value = Value::Object(patch.clone());
    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    if patch.contains_key("name") {
        sets.push("name = ?");
        values.push(required_str(&patch_value, "name")?.into());
    }
    if patch.contains_key("level") {
        let level = parse_level(&required_str(&patch_value, "level")?)?;
        ensure_class_level_change(conn, &class_id, level)?;
        sets.push("level = ?");
        values.push(level.as_str().to_string().into());
    }
    if patch.contains_key("stream") {
        sets.push("stream = ?");
        values.push(match optional_str(&patch_value, "stream")? {
            Some(s) => s.into(),
            None => rusqlite::types::Value::Null,
        });
    }
    if patch.contains_key("year") {
        sets.push("year = ?");
        values.push(match optional_i64(&patch_value, "year")? {
            Some(y) => y.into(),
            None => rusqlite::types::Value::Null,
        });
    }
    if sets.is_empty() {
        return Err(HandlerErr::bad_params("patch has no updatable fields"));
    }
    values.push(class_id.clone().into());

    let sql = format!("UPDATE classes SET {} WHERE id = ?", sets.join(", "));
    conn.execute(&sql, rusqlite::params_from_iter(values))
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(json!({ "ok": true }))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    ensure_row(conn, "classes", &class_id, "class")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    // Explicit dependency order; the schema has no ON DELETE CASCADE.
    let steps: [(&str, &str); 5] = [
        (
            "marks",
            "DELETE FROM marks
             WHERE exam_id IN (SELECT id FROM exams WHERE class_id = ?1)
                OR student_id IN (SELECT id FROM students WHERE class_id = ?1)",
        ),
        ("exams", "DELETE FROM exams WHERE class_id = ?1"),
        ("class_subjects", "DELETE FROM class_subjects WHERE class_id = ?1"),
        ("students", "DELETE FROM students WHERE class_id = ?1"),
        ("classes", "DELETE FROM classes WHERE id = ?1"),
    ];
    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [&class_id]) {
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
        "classes.list" => handle_classes_list(state, req),
        "classes.create" => handle_classes_create(state, req),
        "classes.update" => handle_classes_update(state, req),
        "classes.delete" => handle_classes_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
