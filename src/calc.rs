use crate::grading::{self, Division, Level, StudentResult, SubjectMark};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    fn db(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CalcContext<'a> {
    pub conn: &'a Connection,
    pub exam_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamInfo {
    pub id: String,
    pub name: String,
    pub term: Option<i64>,
    pub year: Option<i64>,
    pub class_id: String,
    pub class_name: String,
    pub stream: Option<String>,
    pub level: Level,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectColumn {
    pub subject_id: String,
    pub code: String,
    pub name: String,
    pub principal: bool,
    pub teacher_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub student_id: String,
    pub display_name: String,
    pub admission_no: Option<String>,
    pub sort_order: i64,
    pub position: Option<usize>,
    pub result: StudentResult,
}

impl StudentRow {
    fn is_ranked(&self) -> bool {
        self.result.graded_count() > 0
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStats {
    pub subject_id: String,
    pub code: String,
    pub name: String,
    pub candidates: usize,
    pub average: Option<f64>,
    pub mean_points: Option<f64>,
    pub grade_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DivisionCount {
    pub division: Division,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassResults {
    pub exam: ExamInfo,
    pub subjects: Vec<SubjectColumn>,
    pub students: Vec<StudentRow>,
    pub subject_stats: Vec<SubjectStats>,
    pub division_summary: Vec<DivisionCount>,
    pub ranked_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    pub exam: ExamInfo,
    pub student: StudentRow,
    pub ranked_count: usize,
}

pub fn load_exam(conn: &Connection, exam_id: &str) -> Result<ExamInfo, CalcError> {
    let row: Option<(String, Option<i64>, Option<i64>, String, String, Option<String>, String)> =
        conn.query_row(
            "SELECT e.name, e.term, e.year, c.id, c.name, c.stream, c.level
             FROM exams e
             JOIN classes c ON c.id = e.class_id
             WHERE e.id = ?",
            [exam_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                ))
            },
        )
        .optional()
        .map_err(CalcError::db)?;
    let Some((name, term, year, class_id, class_name, stream, level_raw)) = row else {
        return Err(CalcError::new("not_found", "exam not found"));
    };
    let Some(level) = Level::parse(&level_raw) else {
        return Err(
            CalcError::new("bad_data", format!("class has unknown level {}", level_raw))
                .with_details(json!({ "classId": class_id })),
        );
    };

    Ok(ExamInfo {
        id: exam_id.to_string(),
        name,
        term,
        year,
        class_id,
        class_name,
        stream,
        level,
    })
}

/// Subjects taught in the class, plus any subject that already has marks for
/// this exam (it may have been unassigned after marking).
fn load_subject_columns(
    conn: &Connection,
    class_id: &str,
    exam_id: &str,
) -> Result<Vec<SubjectColumn>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.code, s.name, s.principal, t.last_name, t.first_name
             FROM subjects s
             LEFT JOIN class_subjects cs ON cs.subject_id = s.id AND cs.class_id = ?1
             LEFT JOIN teachers t ON t.id = cs.teacher_id
             WHERE cs.class_id IS NOT NULL
                OR s.id IN (SELECT subject_id FROM marks WHERE exam_id = ?2)
             ORDER BY COALESCE(cs.sort_order, 2147483647), s.code",
        )
        .map_err(CalcError::db)?;
    stmt.query_map((class_id, exam_id), |r| {
        let last: Option<String> = r.get(4)?;
        let first: Option<String> = r.get(5)?;
        Ok(SubjectColumn {
            subject_id: r.get(0)?,
            code: r.get(1)?,
            name: r.get(2)?,
            principal: r.get::<_, i64>(3)? != 0,
            teacher_name: last.map(|l| match first {
                Some(f) if !f.is_empty() => format!("{}, {}", l, f),
                _ => l,
            }),
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(CalcError::db)
}

struct RosterEntry {
    id: String,
    display_name: String,
    admission_no: Option<String>,
    sort_order: i64,
}

fn load_roster(conn: &Connection, class_id: &str) -> Result<Vec<RosterEntry>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, admission_no, sort_order
             FROM students
             WHERE class_id = ? AND active = 1
             ORDER BY sort_order",
        )
        .map_err(CalcError::db)?;
    stmt.query_map([class_id], |r| {
        let last: String = r.get(1)?;
        let first: String = r.get(2)?;
        Ok(RosterEntry {
            id: r.get(0)?,
            display_name: format!("{}, {}", last, first),
            admission_no: r.get(3)?,
            sort_order: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(CalcError::db)
}

fn load_marks(
    conn: &Connection,
    exam_id: &str,
) -> Result<HashMap<(String, String), Option<f64>>, CalcError> {
    let mut stmt = conn
        .prepare("SELECT student_id, subject_id, marks FROM marks WHERE exam_id = ?")
        .map_err(CalcError::db)?;
    let rows = stmt
        .query_map([exam_id], |r| {
            let student_id: String = r.get(0)?;
            let subject_id: String = r.get(1)?;
            let marks: Option<f64> = r.get(2)?;
            Ok(((student_id, subject_id), marks))
        })
        .map_err(CalcError::db)?;
    let mut out = HashMap::new();
    for row in rows {
        let (k, v) = row.map_err(CalcError::db)?;
        out.insert(k, v);
    }
    Ok(out)
}

fn compare_results(a: &StudentResult, b: &StudentResult) -> Ordering {
    a.division
        .order()
        .cmp(&b.division.order())
        .then(a.total_points.cmp(&b.total_points))
        .then_with(|| {
            // Higher average first; no average sorts last.
            let a_avg = a.average.unwrap_or(f64::NEG_INFINITY);
            let b_avg = b.average.unwrap_or(f64::NEG_INFINITY);
            b_avg.partial_cmp(&a_avg).unwrap_or(Ordering::Equal)
        })
}

/// Competition ranking (1, 2, 2, 4) over students that have at least one mark.
/// Rows keep their roster order; only `position` is written.
pub fn assign_positions(rows: &mut [StudentRow]) -> usize {
    let mut order: Vec<usize> = (0..rows.len()).filter(|&i| rows[i].is_ranked()).collect();
    order.sort_by(|&a, &b| compare_results(&rows[a].result, &rows[b].result));

    for (rank, w) in order.iter().enumerate() {
        let position = if rank > 0
            && compare_results(&rows[order[rank - 1]].result, &rows[*w].result) == Ordering::Equal
        {
            rows[order[rank - 1]].position
        } else {
            Some(rank + 1)
        };
        rows[*w].position = position;
    }
    for row in rows.iter_mut() {
        if !row.is_ranked() {
            row.position = None;
        }
    }
    order.len()
}

fn subject_stats(level: Level, columns: &[SubjectColumn], rows: &[StudentRow]) -> Vec<SubjectStats> {
    columns
        .iter()
        .enumerate()
        .map(|(ci, col)| {
            let mut marks_sum = 0.0_f64;
            let mut points_sum = 0_u32;
            let mut points_n = 0_usize;
            let mut candidates = 0_usize;
            let mut grade_counts: BTreeMap<String, usize> = BTreeMap::new();
            for row in rows {
                let Some(sr) = row.result.subjects.get(ci) else {
                    continue;
                };
                let Some(m) = sr.marks else {
                    continue;
                };
                candidates += 1;
                marks_sum += m;
                if let Some(g) = sr.grade {
                    *grade_counts.entry(g.as_str().to_string()).or_insert(0) += 1;
                    if let Some(p) = g.points(level) {
                        points_sum += u32::from(p);
                        points_n += 1;
                    }
                }
            }
            SubjectStats {
                subject_id: col.subject_id.clone(),
                code: col.code.clone(),
                name: col.name.clone(),
                candidates,
                average: (candidates > 0)
                    .then(|| grading::round_off_1_decimal(marks_sum / candidates as f64)),
                mean_points: (points_n > 0)
                    .then(|| grading::round_off_1_decimal(points_sum as f64 / points_n as f64)),
                grade_counts,
            }
        })
        .collect()
}

fn division_summary(level: Level, rows: &[StudentRow]) -> Vec<DivisionCount> {
    Division::ALL
        .iter()
        .filter(|d| level == Level::ALevel || **d != Division::Five)
        .map(|&division| DivisionCount {
            division,
            count: rows
                .iter()
                .filter(|r| r.is_ranked() && r.result.division == division)
                .count(),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridRow {
    pub student_id: String,
    pub display_name: String,
    pub admission_no: Option<String>,
    /// One entry per subject column; `None` is an absent mark.
    pub marks: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkGrid {
    pub exam: ExamInfo,
    pub subjects: Vec<SubjectColumn>,
    pub rows: Vec<GridRow>,
}

/// Raw mark-entry grid for an exam: active students by subject columns.
pub fn load_mark_grid(conn: &Connection, exam_id: &str) -> Result<MarkGrid, CalcError> {
    let exam = load_exam(conn, exam_id)?;
    let subjects = load_subject_columns(conn, &exam.class_id, exam_id)?;
    let marks = load_marks(conn, exam_id)?;
    let rows = load_roster(conn, &exam.class_id)?
        .into_iter()
        .map(|entry| GridRow {
            marks: subjects
                .iter()
                .map(|col| {
                    marks
                        .get(&(entry.id.clone(), col.subject_id.clone()))
                        .copied()
                        .flatten()
                })
                .collect(),
            student_id: entry.id,
            display_name: entry.display_name,
            admission_no: entry.admission_no,
        })
        .collect();
    Ok(MarkGrid {
        exam,
        subjects,
        rows,
    })
}

pub fn compute_class_results(ctx: &CalcContext<'_>) -> Result<ClassResults, CalcError> {
    let exam = load_exam(ctx.conn, ctx.exam_id)?;
    let subjects = load_subject_columns(ctx.conn, &exam.class_id, ctx.exam_id)?;
    let roster = load_roster(ctx.conn, &exam.class_id)?;
    let marks = load_marks(ctx.conn, ctx.exam_id)?;

    let mut students = Vec::with_capacity(roster.len());
    for entry in roster {
        let inputs: Vec<SubjectMark> = subjects
            .iter()
            .map(|col| SubjectMark {
                code: col.code.clone(),
                name: col.name.clone(),
                marks: marks
                    .get(&(entry.id.clone(), col.subject_id.clone()))
                    .copied()
                    .flatten(),
                principal: col.principal,
            })
            .collect();
        let result = grading::compute_result(exam.level, &inputs).map_err(|e| {
            CalcError::new("invalid_mark", e.to_string())
                .with_details(json!({ "studentId": entry.id }))
        })?;
        students.push(StudentRow {
            student_id: entry.id,
            display_name: entry.display_name,
            admission_no: entry.admission_no,
            sort_order: entry.sort_order,
            position: None,
            result,
        });
    }

    let ranked_count = assign_positions(&mut students);
    let subject_stats = subject_stats(exam.level, &subjects, &students);
    let division_summary = division_summary(exam.level, &students);

    Ok(ClassResults {
        exam,
        subjects,
        students,
        subject_stats,
        division_summary,
        ranked_count,
    })
}

pub fn compute_student_report(
    ctx: &CalcContext<'_>,
    student_id: &str,
) -> Result<StudentReport, CalcError> {
    let results = compute_class_results(ctx)?;
    let ranked_count = results.ranked_count;
    let exam = results.exam;
    let Some(student) = results
        .students
        .into_iter()
        .find(|s| s.student_id == student_id)
    else {
        return Err(CalcError::new("not_found", "student not found in exam class")
            .with_details(json!({ "studentId": student_id })));
    };
    Ok(StudentReport {
        exam,
        student,
        ranked_count,
    })
}
