use crate::calc::{ClassResults, ExamInfo, StudentReport};
use crate::grading::{self, MISSING_PLACEHOLDER};
use std::io::Write;
use tabled::{
    builder::Builder,
    settings::{object::Rows, Alignment, Modify, Panel, Style},
    Table, Tabled,
};

#[derive(Tabled)]
struct CardLine {
    #[tabled(rename = "Code")]
    code: String,
    #[tabled(rename = "Subject")]
    name: String,
    #[tabled(rename = "Marks")]
    marks: String,
    #[tabled(rename = "Grade")]
    grade: String,
    #[tabled(rename = "Points")]
    points: String,
    #[tabled(rename = "Counted")]
    counted: String,
}

fn exam_title(exam: &ExamInfo) -> String {
    let mut class = exam.class_name.clone();
    if let Some(stream) = exam.stream.as_deref().filter(|s| !s.is_empty()) {
        class.push(' ');
        class.push_str(stream);
    }
    let mut title = format!("{} - {}", class, exam.name);
    match (exam.term, exam.year) {
        (Some(t), Some(y)) => title.push_str(&format!(" (Term {} {})", t, y)),
        (Some(t), None) => title.push_str(&format!(" (Term {})", t)),
        (None, Some(y)) => title.push_str(&format!(" ({})", y)),
        (None, None) => {}
    }
    title
}

fn position_label(position: Option<usize>, out_of: usize) -> String {
    match position {
        Some(p) => format!("{} of {}", p, out_of),
        None => MISSING_PLACEHOLDER.to_string(),
    }
}

/// Printable report card for one student.
pub fn report_card(school_name: &str, report: &StudentReport) -> String {
    let result = &report.student.result;
    let lines: Vec<CardLine> = result
        .subjects
        .iter()
        .map(|s| CardLine {
            code: s.code.clone(),
            name: s.name.clone(),
            marks: grading::display_mark(s.marks),
            grade: s.grade_label(),
            points: s
                .points
                .map(|p| p.to_string())
                .unwrap_or_else(|| MISSING_PLACEHOLDER.to_string()),
            counted: if s.selected { "yes" } else { "" }.to_string(),
        })
        .collect();

    let header = format!(
        "{}\n{}\n{} ({})",
        school_name,
        exam_title(&report.exam),
        report.student.display_name,
        report
            .student
            .admission_no
            .as_deref()
            .unwrap_or(MISSING_PLACEHOLDER)
    );
    let mut footer = format!(
        "Division {}  Points {}  Average {}  Position {}",
        result.division,
        result.total_points,
        grading::display_mark(result.average),
        position_label(report.student.position, report.ranked_count)
    );
    if result.incomplete {
        footer.push_str(&format!(
            "\nOnly {} of {} subjects available for division",
            result.selected_count,
            result.level.best_n()
        ));
    }

    Table::new(&lines)
        .with(Panel::header(header))
        .with(Panel::footer(footer))
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .with(Style::modern())
        .to_string()
}

/// Printable class result sheet: one row per student in roster order.
pub fn result_sheet(school_name: &str, results: &ClassResults) -> String {
    let mut builder = Builder::default();

    let mut head: Vec<String> = vec!["Pos".into(), "Adm No".into(), "Name".into()];
    head.extend(results.subjects.iter().map(|s| s.code.clone()));
    head.extend(["Points".to_string(), "Div".to_string(), "Avg".to_string()]);
    builder.push_record(head);

    for row in &results.students {
        let mut rec: Vec<String> = vec![
            row.position
                .map(|p| p.to_string())
                .unwrap_or_else(|| MISSING_PLACEHOLDER.to_string()),
            row.admission_no
                .clone()
                .unwrap_or_else(|| MISSING_PLACEHOLDER.to_string()),
            row.display_name.clone(),
        ];
        for s in &row.result.subjects {
            rec.push(match s.marks {
                Some(m) => format!("{} {}", grading::display_mark(Some(m)), s.grade_label()),
                None => MISSING_PLACEHOLDER.to_string(),
            });
        }
        if row.result.graded_count() == 0 {
            rec.extend(std::iter::repeat(MISSING_PLACEHOLDER.to_string()).take(3));
        } else {
            rec.push(row.result.total_points.to_string());
            rec.push(row.result.division.to_string());
            rec.push(grading::display_mark(row.result.average));
        }
        builder.push_record(rec);
    }

    let summary = results
        .division_summary
        .iter()
        .map(|d| format!("{}: {}", d.division, d.count))
        .collect::<Vec<_>>()
        .join("  ");

    let mut table = builder.build();
    table
        .with(Panel::header(format!(
            "{}\n{}",
            school_name,
            exam_title(&results.exam)
        )))
        .with(Panel::footer(format!("Divisions  {}", summary)))
        .with(Style::modern());
    table.to_string()
}

/// Result sheet as CSV: marks and grade per subject, then the aggregate columns.
pub fn write_results_csv<W: Write>(out: W, results: &ClassResults) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_writer(out);

    let mut head: Vec<String> = vec![
        "position".into(),
        "admission_no".into(),
        "name".into(),
    ];
    for s in &results.subjects {
        head.push(format!("{}_marks", s.code));
        head.push(format!("{}_grade", s.code));
    }
    head.extend([
        "total_points".to_string(),
        "division".to_string(),
        "average".to_string(),
    ]);
    wtr.write_record(&head)?;

    for row in &results.students {
        let mut rec: Vec<String> = vec![
            row.position.map(|p| p.to_string()).unwrap_or_default(),
            row.admission_no.clone().unwrap_or_default(),
            row.display_name.clone(),
        ];
        for s in &row.result.subjects {
            rec.push(s.marks.map(|m| grading::display_mark(Some(m))).unwrap_or_default());
            rec.push(s.grade.map(|g| g.to_string()).unwrap_or_default());
        }
        if row.result.graded_count() == 0 {
            rec.extend([String::new(), String::new(), String::new()]);
        } else {
            rec.push(row.result.total_points.to_string());
            rec.push(row.result.division.to_string());
            rec.push(grading::display_mark(row.result.average));
        }
        wtr.write_record(&rec)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::StudentRow;
    use crate::grading::{compute_result, Level, SubjectMark};

    fn exam() -> ExamInfo {
        ExamInfo {
            id: "e1".into(),
            name: "Midterm".into(),
            term: Some(1),
            year: Some(2024),
            class_id: "c1".into(),
            class_name: "Form Six".into(),
            stream: Some("PCM".into()),
            level: Level::ALevel,
        }
    }

    #[test]
    fn exam_title_includes_stream_and_term() {
        assert_eq!(exam_title(&exam()), "Form Six PCM - Midterm (Term 1 2024)");
    }

    #[test]
    fn report_card_shows_placeholder_for_missing_marks() {
        let result = compute_result(
            Level::ALevel,
            &[
                SubjectMark { code: "PHY".into(), name: "Physics".into(), marks: Some(82.0), principal: true },
                SubjectMark { code: "CHE".into(), name: "Chemistry".into(), marks: None, principal: true },
            ],
        )
        .expect("result");
        let report = StudentReport {
            exam: exam(),
            student: StudentRow {
                student_id: "s1".into(),
                display_name: "Doe, Jane".into(),
                admission_no: Some("A-17".into()),
                sort_order: 0,
                position: Some(1),
                result,
            },
            ranked_count: 12,
        };
        let text = report_card("Hill School", &report);
        assert!(text.contains("Hill School"));
        assert!(text.contains("Doe, Jane (A-17)"));
        assert!(text.contains("Chemistry"));
        assert!(text.contains("Position 1 of 12"));
        assert!(text.contains("Only 1 of 3 subjects"));
    }
}
