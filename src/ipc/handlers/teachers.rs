use crate::ipc::helpers::{
    db_conn, ensure_row, optional_i64, optional_str, patch_object, required_str, respond,
    HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};
use uuid::Uuid;

fn handle_teachers_list(state: &mut AppState, _req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let mut stmt = conn
        .prepare(
            "SELECT t.id, t.last_name, t.first_name, t.email, t.phone,
               (SELECT COUNT(*) FROM class_subjects cs WHERE cs.teacher_id = t.id) AS assignment_count
             FROM teachers t
             ORDER BY t.last_name, t.first_name",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let teachers = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            let email: Option<String> = r.get(3)?;
            let phone: Option<String> = r.get(4)?;
            let assignments: i64 = r.get(5)?;
            Ok(json!({
                "id": id,
                "lastName": last,
                "firstName": first,
                "displayName": format!("{}, {}", last, first),
                "email": email,
                "phone": phone,
                "assignmentCount": assignments
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "teachers": teachers }))
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let last = required_str(&req.params, "lastName")?;
    let first = required_str(&req.params, "firstName")?;
    let email = optional_str(&req.params, "email")?;
    let phone = optional_str(&req.params, "phone")?;

    let teacher_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teachers(id, last_name, first_name, email, phone) VALUES(?, ?, ?, ?, ?)",
        (&teacher_id, &last, &first, &email, &phone),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "teachers" })))?;
    Ok(json!({ "teacherId": teacher_id }))
}

fn handle_teachers_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let teacher_id = required_str(&req.params, "teacherId")?;
    let patch = Value::Object(patch_object(&req.params)?.clone());
    ensure_row(conn, "teachers", &teacher_id, "teacher")?;

    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    for (key, set) in [("lastName", "last_name = ?"), ("firstName", "first_name = ?")] {
        if patch.get(key).is_some() {
            sets.push(set);
            values.push(required_str(&patch, key)?.into());
        }
    }
    for (key, set) in [("email", "email = ?"), ("phone", "phone = ?")] {
        if patch.get(key).is_some() {
            sets.push(set);
            values.push(match optional_str(&patch, key)? {
                Some(v) => v.into(),
                None => rusqlite::types::Value::Null,
            });
        }
    }
    if sets.is_empty() {
        return Err(HandlerErr::bad_params("patch has no updatable fields"));
    }
    values.push(teacher_id.into());

    let sql = format!("UPDATE teachers SET {} WHERE id = ?", sets.join(", "));
    conn.execute(&sql, rusqlite::params_from_iter(values))
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(json!({ "ok": true }))
}

fn handle_teachers_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let teacher_id = required_str(&req.params, "teacherId")?;
    ensure_row(conn, "teachers", &teacher_id, "teacher")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    // Assignments survive without a teacher.
    if let Err(e) = tx.execute(
        "UPDATE class_subjects SET teacher_id = NULL WHERE teacher_id = ?",
        [&teacher_id],
    ) {
        let _ = tx.rollback();
        return Err(HandlerErr::db("db_update_failed", e)
            .with_details(json!({ "table": "class_subjects" })));
    }
    if let Err(e) = tx.execute("DELETE FROM teachers WHERE id = ?", [&teacher_id]) {
        let _ = tx.rollback();
        return Err(HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": "teachers" })));
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;
    Ok(json!({ "ok": true }))
}

fn handle_class_subjects_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    ensure_row(conn, "classes", &class_id, "class")?;

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.code, s.name, s.principal, cs.sort_order, t.id, t.last_name, t.first_name
             FROM class_subjects cs
             JOIN subjects s ON s.id = cs.subject_id
             LEFT JOIN teachers t ON t.id = cs.teacher_id
             WHERE cs.class_id = ?
             ORDER BY cs.sort_order, s.code",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map([&class_id], |r| {
            let subject_id: String = r.get(0)?;
            let code: String = r.get(1)?;
            let name: String = r.get(2)?;
            let principal: i64 = r.get(3)?;
            let sort_order: i64 = r.get(4)?;
            let teacher_id: Option<String> = r.get(5)?;
            let last: Option<String> = r.get(6)?;
            let first: Option<String> = r.get(7)?;
            Ok(json!({
                "subjectId": subject_id,
                "code": code,
                "name": name,
                "principal": principal != 0,
                "sortOrder": sort_order,
                "teacherId": teacher_id,
                "teacherName": last.map(|l| format!("{}, {}", l, first.unwrap_or_default())),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "classId": class_id, "subjects": rows }))
}

fn handle_class_subjects_assign(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    let subject_id = required_str(&req.params, "subjectId")?;
    let teacher_id = optional_str(&req.params, "teacherId")?;
    ensure_row(conn, "classes", &class_id, "class")?;
    ensure_row(conn, "subjects", &subject_id, "subject")?;
    if let Some(t) = teacher_id.as_deref() {
        ensure_row(conn, "teachers", t, "teacher")?;
    }

    let class_level: String = conn
        .query_row("SELECT level FROM classes WHERE id = ?", [&class_id], |r| r.get(0))
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let subject_level: String = conn
        .query_row("SELECT level FROM subjects WHERE id = ?", [&subject_id], |r| r.get(0))
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if class_level != subject_level {
        return Err(HandlerErr::bad_params("subject level does not match class level")
            .with_details(json!({ "classLevel": class_level, "subjectLevel": subject_level })));
    }

    let sort_order = match optional_i64(&req.params, "sortOrder")? {
        Some(v) => v,
        None => conn
            .query_row(
                "SELECT COALESCE(
                   (SELECT sort_order FROM class_subjects WHERE class_id = ?1 AND subject_id = ?2),
                   (SELECT COALESCE(MAX(sort_order) + 1, 0) FROM class_subjects WHERE class_id = ?1))",
                (&class_id, &subject_id),
                |r| r.get(0),
            )
            .map_err(|e| HandlerErr::db("db_query_failed", e))?,
    };

    conn.execute(
        "INSERT INTO class_subjects(class_id, subject_id, teacher_id, sort_order)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(class_id, subject_id)
         DO UPDATE SET teacher_id = excluded.teacher_id, sort_order = excluded.sort_order",
        (&class_id, &subject_id, &teacher_id, sort_order),
    )
    .map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "class_subjects" }))
    })?;
    Ok(json!({ "ok": true, "sortOrder": sort_order }))
}

fn handle_class_subjects_remove(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    let subject_id = required_str(&req.params, "subjectId")?;
    let removed = conn
        .execute(
            "DELETE FROM class_subjects WHERE class_id = ? AND subject_id = ?",
            (&class_id, &subject_id),
        )
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if removed == 0 {
        return Err(HandlerErr::new("not_found", "subject is not assigned to class"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "teachers.list" => handle_teachers_list(state, req),
        "teachers.create" => handle_teachers_create(state, req),
        "teachers.update" => handle_teachers_update(state, req),
        "teachers.delete" => handle_teachers_delete(state, req),
        "classSubjects.list" => handle_class_subjects_list(state, req),
        "classSubjects.assign" => handle_class_subjects_assign(state, req),
        "classSubjects.remove" => handle_class_subjects_remove(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
