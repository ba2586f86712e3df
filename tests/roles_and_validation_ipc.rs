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

struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    fn spawn() -> Self {
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
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    fn call(&mut self, role: Option<&str>, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let mut payload = json!({ "id": self.next_id.to_string(), "method": method, "params": params });
        if let Some(role) = role {
            payload["role"] = json!(role);
        }
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        serde_json::from_str(line.trim()).expect("parse response json")
    }

    fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let resp = self.call(None, method, params);
        assert_eq!(resp["ok"], true, "{} failed: {}", method, resp);
        resp["result"].clone()
    }

    fn error_code(&mut self, role: Option<&str>, method: &str, params: serde_json::Value) -> String {
        let resp = self.call(role, method, params);
        assert_eq!(resp["ok"], false, "{} unexpectedly succeeded: {}", method, resp);
        resp["error"]["code"].as_str().unwrap_or("").to_string()
    }

    fn close(self) {
        let Sidecar { mut child, stdin, .. } = self;
        drop(stdin);
        let _ = child.wait();
    }
}

struct Fixture {
    class_id: String,
    subject_id: String,
    student_id: String,
    exam_id: String,
}

fn seed(sc: &mut Sidecar, workspace: &PathBuf) -> Fixture {
    sc.ok("workspace.select", json!({ "path": workspace.to_string_lossy() }));
    let class_id = sc.ok("classes.create", json!({ "name": "Form Two", "level": "o_level" }))["classId"]
        .as_str()
        .expect("classId")
        .to_string();
    let subject_id = sc.ok("subjects.create", json!({ "code": "CIV", "name": "Civics", "level": "o_level" }))
        ["subjectId"]
        .as_str()
        .expect("subjectId")
        .to_string();
    sc.ok("classSubjects.assign", json!({ "classId": class_id, "subjectId": subject_id }));
    let student_id = sc.ok(
        "students.create",
        json!({ "classId": class_id, "lastName": "Massawe", "firstName": "Rehema" }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();
    let exam_id = sc.ok("exams.create", json!({ "classId": class_id, "name": "Quiz" }))["examId"]
        .as_str()
        .expect("examId")
        .to_string();
    Fixture {
        class_id,
        subject_id,
        student_id,
        exam_id,
    }
}

#[test]
fn roles_are_limited_to_their_methods() {
    let workspace = temp_dir("schoolbook-roles");
    let mut sc = Sidecar::spawn();
    let fx = seed(&mut sc, &workspace);
    let mark = json!({ "examId": fx.exam_id, "studentId": fx.student_id, "subjectId": fx.subject_id, "marks": 58 });

    // Teachers enter marks but cannot change structure.
    assert_eq!(sc.call(Some("teacher"), "marks.set", mark.clone())["ok"], true);
    assert_eq!(
        sc.error_code(Some("teacher"), "classes.delete", json!({ "classId": fx.class_id })),
        "forbidden"
    );
    assert_eq!(
        sc.call(Some("teacher"), "reports.classResults", json!({ "examId": fx.exam_id }))["ok"],
        true
    );

    // Students and parents only see single-student reports.
    for role in ["student", "parent"] {
        let own = json!({ "examId": fx.exam_id, "studentId": fx.student_id });
        assert_eq!(sc.call(Some(role), "reports.studentResult", own.clone())["ok"], true);
        assert_eq!(sc.call(Some(role), "reports.reportCard", own)["ok"], true);
        assert_eq!(
            sc.error_code(Some(role), "reports.classResults", json!({ "examId": fx.exam_id })),
            "forbidden"
        );
        assert_eq!(sc.error_code(Some(role), "marks.set", mark.clone()), "forbidden");
    }

    assert_eq!(
        sc.call(Some("finance"), "students.list", json!({ "classId": fx.class_id }))["ok"],
        true
    );
    assert_eq!(
        sc.error_code(Some("finance"), "marks.grid", json!({ "examId": fx.exam_id })),
        "forbidden"
    );
    assert_eq!(sc.error_code(Some("janitor"), "health", json!({})), "bad_params");

    sc.close();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn invalid_marks_are_rejected_without_partial_writes() {
    let workspace = temp_dir("schoolbook-mark-validation");
    let mut sc = Sidecar::spawn();
    let fx = seed(&mut sc, &workspace);

    for bad in [json!(101), json!(-0.5), json!("seventy")] {
        let code = sc.error_code(
            None,
            "marks.set",
            json!({ "examId": fx.exam_id, "studentId": fx.student_id, "subjectId": fx.subject_id, "marks": bad }),
        );
        assert_eq!(code, "bad_params");
    }

    let second = sc.ok(
        "students.create",
        json!({ "classId": fx.class_id, "lastName": "Ngowi", "firstName": "Peter" }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();
    let resp = sc.call(
        None,
        "marks.bulkSet",
        json!({
            "examId": fx.exam_id,
            "subjectId": fx.subject_id,
            "entries": [
                { "studentId": fx.student_id, "marks": 77 },
                { "studentId": second, "marks": 250 }
            ]
        }),
    );
    assert_eq!(resp["error"]["code"], "bad_params");
    assert_eq!(resp["error"]["details"]["errors"][0]["index"], 1);

    let grid = sc.ok("marks.grid", json!({ "examId": fx.exam_id }));
    assert!(grid["rows"][0]["marks"][0].is_null(), "{}", grid);

    // A student from another class cannot be marked in this exam.
    let other_class = sc.ok("classes.create", json!({ "name": "Form Three", "level": "o_level" }))["classId"]
        .as_str()
        .expect("classId")
        .to_string();
    let outsider = sc.ok(
        "students.create",
        json!({ "classId": other_class, "lastName": "Kweka", "firstName": "Joyce" }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();
    assert_eq!(
        sc.error_code(
            None,
            "marks.set",
            json!({ "examId": fx.exam_id, "studentId": outsider, "subjectId": fx.subject_id, "marks": 50 })
        ),
        "bad_params"
    );

    // A-Level subjects do not belong in an O-Level exam.
    let a_subject = sc.ok("subjects.create", json!({ "code": "ECO", "name": "Economics", "level": "a_level" }))
        ["subjectId"]
        .as_str()
        .expect("subjectId")
        .to_string();
    assert_eq!(
        sc.error_code(
            None,
            "marks.set",
            json!({ "examId": fx.exam_id, "studentId": fx.student_id, "subjectId": a_subject, "marks": 50 })
        ),
        "bad_params"
    );
    assert_eq!(
        sc.error_code(None, "classSubjects.assign", json!({ "classId": fx.class_id, "subjectId": a_subject })),
        "bad_params"
    );
    assert_eq!(
        sc.error_code(None, "subjects.create", json!({ "code": "civ", "name": "Dup", "level": "o_level" })),
        "conflict"
    );
    assert_eq!(
        sc.error_code(None, "exams.delete", json!({ "examId": "missing" })),
        "not_found"
    );

    sc.close();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn grading_preview_needs_no_workspace() {
    let mut sc = Sidecar::spawn();
    let result = sc.ok(
        "grading.preview",
        json!({
            "level": "o_level",
            "subjects": [
                { "code": "MAT", "marks": 85 },
                { "code": "ENG", "marks": 70 },
                { "code": "KIS", "marks": 55 },
                { "code": "BIO", "marks": 40 },
                { "code": "CHE", "marks": 90 },
                { "code": "PHY", "marks": 65 },
                { "code": "GEO", "marks": 30 },
                { "code": "HIS", "marks": null }
            ]
        }),
    );
    assert_eq!(result["totalPoints"], 17);
    assert_eq!(result["division"], "II");
    assert_eq!(result["selectedCount"], 7);
    assert_eq!(result["subjects"][7]["grade"], serde_json::Value::Null);

    assert_eq!(
        sc.error_code(None, "grading.preview", json!({ "level": "b_level", "subjects": [] })),
        "bad_params"
    );
    assert_eq!(
        sc.error_code(
            None,
            "grading.preview",
            json!({ "level": "a_level", "subjects": [{ "code": "PHY", "marks": 100.5 }] })
        ),
        "bad_params"
    );
    sc.close();
}

#[test]
fn roster_csv_import_upserts_by_admission_number() {
    let workspace = temp_dir("schoolbook-roster-ipc");
    let mut sc = Sidecar::spawn();
    let fx = seed(&mut sc, &workspace);

    let roster = workspace.join("roster.csv");
    std::fs::write(
        &roster,
        "admission_no,last_name,first_name,sex,active\n\
         R-1,Shirima,Anna,f,1\n\
         R-2,,Missing,m,1\n\
         R-3,Lema,Hassan,m,later\n\
         R-4,Mrema,Zuhura,F,0\n",
    )
    .expect("write roster");
    let first = sc.ok("students.importCsv", json!({ "classId": fx.class_id, "inPath": roster.to_string_lossy() }));
    assert_eq!(first["created"], 2);
    assert_eq!(first["updated"], 0);
    let codes: Vec<&str> = first["warnings"]
        .as_array()
        .expect("warnings")
        .iter()
        .filter_map(|w| w["code"].as_str())
        .collect();
    assert_eq!(codes, vec!["missing_name", "bad_active"]);

    std::fs::write(
        &roster,
        "admission_no,last_name,first_name,sex,active\nR-1,Shirima,Annah,F,1\n",
    )
    .expect("rewrite roster");
    let second = sc.ok("students.importCsv", json!({ "classId": fx.class_id, "inPath": roster.to_string_lossy() }));
    assert_eq!(second["created"], 0);
    assert_eq!(second["updated"], 1);

    let listed = sc.ok("students.list", json!({ "classId": fx.class_id, "includeInactive": false }));
    let names: Vec<&str> = listed["students"]
        .as_array()
        .expect("students")
        .iter()
        .filter_map(|s| s["displayName"].as_str())
        .collect();
    assert_eq!(names, vec!["Massawe, Rehema", "Shirima, Annah"]);

    let out = workspace.join("export.csv");
    let exported = sc.ok("students.exportCsv", json!({ "classId": fx.class_id, "outPath": out.to_string_lossy() }));
    assert_eq!(exported["rowCount"], 3);
    let text = std::fs::read_to_string(&out).expect("read export");
    assert!(text.starts_with("admission_no,last_name,first_name,sex,active"), "{}", text);
    assert!(text.contains("R-4,Mrema,Zuhura,F,0"), "{}", text);

    sc.close();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn level_changes_are_refused_while_in_use() {
    let workspace = temp_dir("schoolbook-level-change");
    let mut sc = Sidecar::spawn();
    let fx = seed(&mut sc, &workspace);
    sc.ok(
        "marks.set",
        json!({ "examId": fx.exam_id, "studentId": fx.student_id, "subjectId": fx.subject_id, "marks": 75 }),
    );

    let resp = sc.call(
        None,
        "classes.update",
        json!({ "classId": fx.class_id, "patch": { "level": "a_level" } }),
    );
    assert_eq!(resp["error"]["code"], "conflict", "{}", resp);
    assert_eq!(resp["error"]["details"]["assignedSubjects"], 1);
    assert_eq!(resp["error"]["details"]["marks"], 1);
    assert_eq!(
        sc.error_code(None, "subjects.update", json!({ "subjectId": fx.subject_id, "patch": { "level": "a_level" } })),
        "conflict"
    );

    let classes = sc.ok("classes.list", json!({}));
    assert_eq!(classes["classes"][0]["level"], "o_level");
    let report = sc.ok(
        "reports.studentResult",
        json!({ "examId": fx.exam_id, "studentId": fx.student_id }),
    );
    let result = &report["student"]["result"];
    assert_eq!(result["level"], "o_level", "{}", report);
    assert_eq!(result["subjects"][0]["points"], 2, "{}", report);

    // Setting the same level again, or moving unused records, is fine.
    sc.ok("classes.update", json!({ "classId": fx.class_id, "patch": { "level": "o_level" } }));
    let empty_class = sc.ok("classes.create", json!({ "name": "Form Five", "level": "o_level" }))["classId"]
        .as_str()
        .expect("classId")
        .to_string();
    sc.ok("classes.update", json!({ "classId": empty_class, "patch": { "level": "a_level" } }));
    let spare = sc.ok("subjects.create", json!({ "code": "GEO", "name": "Geography", "level": "o_level" }))
        ["subjectId"]
        .as_str()
        .expect("subjectId")
        .to_string();
    sc.ok("subjects.update", json!({ "subjectId": spare, "patch": { "level": "a_level" } }));

    sc.close();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn marks_set_without_a_marks_key_keeps_the_stored_mark() {
    let workspace = temp_dir("schoolbook-mark-missing-key");
    let mut sc = Sidecar::spawn();
    let fx = seed(&mut sc, &workspace);
    let target = json!({ "examId": fx.exam_id, "studentId": fx.student_id, "subjectId": fx.subject_id });

    let mut with_mark = target.clone();
    with_mark["marks"] = json!(64);
    sc.ok("marks.set", with_mark);

    assert_eq!(sc.error_code(None, "marks.set", target.clone()), "bad_params");
    let resp = sc.call(
        None,
        "marks.bulkSet",
        json!({ "examId": fx.exam_id, "subjectId": fx.subject_id, "entries": [{ "studentId": fx.student_id }] }),
    );
    assert_eq!(resp["error"]["code"], "bad_params");
    let grid = sc.ok("marks.grid", json!({ "examId": fx.exam_id }));
    assert_eq!(grid["rows"][0]["marks"][0].as_f64(), Some(64.0), "{}", grid);

    // An explicit null still clears.
    let mut cleared = target.clone();
    cleared["marks"] = serde_json::Value::Null;
    sc.ok("marks.set", cleared);
    let grid = sc.ok("marks.grid", json!({ "examId": fx.exam_id }));
    assert!(grid["rows"][0]["marks"][0].is_null(), "{}", grid);

    sc.close();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn importing_a_non_backup_file_keeps_the_workspace() {
    let workspace = temp_dir("schoolbook-import-text");
    let inputs = temp_dir("schoolbook-import-text-in");
    let mut sc = Sidecar::spawn();
    let fx = seed(&mut sc, &workspace);

    let notes = inputs.join("notes.txt");
    std::fs::write(&notes, "just some text, not a database").expect("write notes");
    let resp = sc.call(None, "backup.import", json!({ "inPath": notes.to_string_lossy() }));
    assert_eq!(resp["error"]["code"], "import_failed", "{}", resp);

    let classes = sc.ok("classes.list", json!({}));
    assert_eq!(classes["classes"][0]["id"], fx.class_id.as_str());
    let students = sc.ok("students.list", json!({ "classId": fx.class_id }));
    assert_eq!(students["students"][0]["id"], fx.student_id.as_str());

    sc.close();
    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(inputs);
}
