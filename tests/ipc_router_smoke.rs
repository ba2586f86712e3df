use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoolbookd");
    let mut child = Command::new(exe)
        .env_remove("SCHOOLBOOK_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoolbookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn read_response(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let value = read_response(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn result_str(v: &serde_json::Value, key: &str) -> String {
    v.get("result")
        .and_then(|r| r.get(key))
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing result.{} in {}", key, v))
        .to_string()
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("schoolbook-router-smoke");
    let bundle_out = workspace.join("smoke-backup.sbbackup.zip");
    let roster_out = workspace.join("smoke-roster.csv");
    let results_out = workspace.join("smoke-results.csv");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["result"]["workspacePath"].is_null());
    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "name": "Smoke Class", "level": "o_level" }),
    );
    let class_id = result_str(&class, "classId");
    let _ = request(&mut stdin, &mut reader, "4", "classes.list", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "5",
        "classes.update",
        json!({ "classId": class_id, "patch": { "stream": "B" } }),
    );

    let subject = request(
        &mut stdin,
        &mut reader,
        "6",
        "subjects.create",
        json!({ "code": "HIS", "name": "History", "level": "o_level" }),
    );
    let subject_id = result_str(&subject, "subjectId");
    let _ = request(&mut stdin, &mut reader, "7", "subjects.list", json!({ "level": "o_level" }));
    let _ = request(
        &mut stdin,
        &mut reader,
        "8",
        "subjects.update",
        json!({ "subjectId": subject_id, "patch": { "name": "World History" } }),
    );

    let teacher = request(
        &mut stdin,
        &mut reader,
        "9",
        "teachers.create",
        json!({ "lastName": "Mushi", "firstName": "Grace" }),
    );
    let teacher_id = result_str(&teacher, "teacherId");
    let _ = request(&mut stdin, &mut reader, "10", "teachers.list", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "11",
        "teachers.update",
        json!({ "teacherId": teacher_id, "patch": { "email": "grace@example.org" } }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "12",
        "classSubjects.assign",
        json!({ "classId": class_id, "subjectId": subject_id, "teacherId": teacher_id }),
    );
    let assigned = request(
        &mut stdin,
        &mut reader,
        "13",
        "classSubjects.list",
        json!({ "classId": class_id }),
    );
    assert_eq!(assigned["result"]["subjects"][0]["teacherName"], "Mushi, Grace");

    let student = request(
        &mut stdin,
        &mut reader,
        "14",
        "students.create",
        json!({ "classId": class_id, "lastName": "Lyimo", "firstName": "Neema", "admissionNo": "S-1" }),
    );
    let student_id = result_str(&student, "studentId");
    let _ = request(&mut stdin, &mut reader, "15", "students.list", json!({ "classId": class_id }));
    let _ = request(
        &mut stdin,
        &mut reader,
        "16",
        "students.update",
        json!({ "studentId": student_id, "patch": { "sex": "F" } }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "17",
        "students.exportCsv",
        json!({ "classId": class_id, "outPath": roster_out.to_string_lossy() }),
    );

    let exam = request(
        &mut stdin,
        &mut reader,
        "18",
        "exams.create",
        json!({ "classId": class_id, "name": "Smoke Exam", "term": 1, "year": 2024 }),
    );
    let exam_id = result_str(&exam, "examId");
    let _ = request(&mut stdin, &mut reader, "19", "exams.list", json!({ "classId": class_id }));
    let _ = request(
        &mut stdin,
        &mut reader,
        "20",
        "marks.set",
        json!({ "examId": exam_id, "studentId": student_id, "subjectId": subject_id, "marks": 64 }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "21",
        "marks.bulkSet",
        json!({ "examId": exam_id, "subjectId": subject_id, "entries": [{ "studentId": student_id, "marks": null }] }),
    );
    let _ = request(&mut stdin, &mut reader, "22", "marks.grid", json!({ "examId": exam_id }));

    let _ = request(
        &mut stdin,
        &mut reader,
        "23",
        "grading.preview",
        json!({ "level": "o_level", "subjects": [{ "code": "HIS", "marks": 50 }] }),
    );
    let _ = request(&mut stdin, &mut reader, "24", "reports.classResults", json!({ "examId": exam_id }));
    let _ = request(
        &mut stdin,
        &mut reader,
        "25",
        "reports.studentResult",
        json!({ "examId": exam_id, "studentId": student_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "26",
        "reports.reportCard",
        json!({ "examId": exam_id, "studentId": student_id }),
    );
    let _ = request(&mut stdin, &mut reader, "27", "reports.resultSheet", json!({ "examId": exam_id }));
    let _ = request(
        &mut stdin,
        &mut reader,
        "28",
        "reports.exportCsv",
        json!({ "examId": exam_id, "outPath": results_out.to_string_lossy() }),
    );

    let _ = request(&mut stdin, &mut reader, "29", "settings.get", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "30",
        "settings.update",
        json!({ "schoolName": "Smoke School", "termLabel": "Term 1" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "31",
        "backup.export",
        json!({ "outPath": bundle_out.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "32",
        "backup.import",
        json!({ "inPath": bundle_out.to_string_lossy() }),
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "33",
        "classSubjects.remove",
        json!({ "classId": class_id, "subjectId": subject_id }),
    );
    let _ = request(&mut stdin, &mut reader, "34", "exams.delete", json!({ "examId": exam_id }));
    let _ = request(&mut stdin, &mut reader, "35", "students.delete", json!({ "studentId": student_id }));
    let _ = request(&mut stdin, &mut reader, "36", "teachers.delete", json!({ "teacherId": teacher_id }));
    let _ = request(&mut stdin, &mut reader, "37", "subjects.delete", json!({ "subjectId": subject_id }));
    let _ = request(&mut stdin, &mut reader, "38", "classes.delete", json!({ "classId": class_id }));

    let health = request(&mut stdin, &mut reader, "39", "health", json!({}));
    assert_eq!(health["result"]["cachedReports"], 0);

    // Unknown methods and garbage lines still get a reply.
    writeln!(stdin, "{}", json!({ "id": "40", "method": "nope.nothing" })).expect("write");
    stdin.flush().expect("flush");
    let resp = read_response(&mut reader);
    assert_eq!(resp["error"]["code"], "not_implemented");
    writeln!(stdin, "this is not json").expect("write");
    stdin.flush().expect("flush");
    let resp = read_response(&mut reader);
    assert_eq!(resp["error"]["code"], "bad_json");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn data_methods_need_a_workspace() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let resp = request(&mut stdin, &mut reader, "1", "subjects.list", json!({}));
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "no_workspace");
    let resp = request(&mut stdin, &mut reader, "2", "backup.export", json!({ "outPath": "/tmp/x.zip" }));
    assert_eq!(resp["error"]["code"], "no_workspace");
    let resp = request(&mut stdin, &mut reader, "3", "classes.list", json!({}));
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "no_workspace");

    // A plain file cannot become a workspace; the error stays on one line.
    let blocker_dir = temp_dir("schoolbook-not-a-dir");
    let blocker = blocker_dir.join("occupied");
    std::fs::write(&blocker, "x").expect("write blocker");
    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": blocker.to_string_lossy() }),
    );
    assert_eq!(resp["error"]["code"], "db_open_failed");
    let message = resp["error"]["message"].as_str().unwrap_or("");
    assert!(message.starts_with("failed to create workspace"), "{}", message);
    assert!(!message.contains('\n'), "{}", message);
    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(blocker_dir);
}
