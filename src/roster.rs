use csv::{ReaderBuilder, Trim, WriterBuilder};
use serde::Serialize;
use std::io::Write;
use thiserror::Error;

pub const ROSTER_HEADER: [&str; 5] = ["admission_no", "last_name", "first_name", "sex", "active"];

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("roster is missing required column {0}")]
    MissingColumn(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RosterRow {
    pub line_no: usize,
    pub admission_no: Option<String>,
    pub last_name: String,
    pub first_name: String,
    pub sex: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RosterWarning {
    pub line: usize,
    pub code: &'static str,
    pub message: String,
}

struct Columns {
    admission_no: Option<usize>,
    last_name: usize,
    first_name: usize,
    sex: Option<usize>,
    active: Option<usize>,
}

fn normalize_header(h: &str) -> String {
    h.trim()
        .to_ascii_lowercase()
        .replace([' ', '-'], "_")
}

fn parse_boolish(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" | "y" | "active" => Some(true),
        "0" | "false" | "no" | "n" | "inactive" => Some(false),
        _ => None,
    }
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Parses a roster CSV. Rows that cannot be used are skipped and reported as
/// warnings; only structural problems (bad CSV, missing name columns) fail.
pub fn parse_roster(text: &str) -> Result<(Vec<RosterRow>, Vec<RosterWarning>), RosterError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = rdr.headers()?.iter().map(normalize_header).collect();
    let find = |name: &str| headers.iter().position(|h| h == name);
    let cols = Columns {
        admission_no: find("admission_no").or_else(|| find("adm_no")),
        last_name: find("last_name").ok_or(RosterError::MissingColumn("last_name"))?,
        first_name: find("first_name").ok_or(RosterError::MissingColumn("first_name"))?,
        sex: find("sex").or_else(|| find("gender")),
        active: find("active"),
    };

    let mut rows = Vec::new();
    let mut warnings = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        // Header is line 1.
        let line_no = i + 2;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                warnings.push(RosterWarning {
                    line: line_no,
                    code: "bad_record",
                    message: e.to_string(),
                });
                continue;
            }
        };
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }

        let last_name = non_empty(record.get(cols.last_name));
        let first_name = non_empty(record.get(cols.first_name));
        let (Some(last_name), Some(first_name)) = (last_name, first_name) else {
            warnings.push(RosterWarning {
                line: line_no,
                code: "missing_name",
                message: "last_name and first_name are required".to_string(),
            });
            continue;
        };

        let active_raw = cols.active.and_then(|c| record.get(c)).unwrap_or("");
        let Some(active) = parse_boolish(active_raw) else {
            warnings.push(RosterWarning {
                line: line_no,
                code: "bad_active",
                message: format!("unrecognized active value {:?}", active_raw),
            });
            continue;
        };

        rows.push(RosterRow {
            line_no,
            admission_no: non_empty(cols.admission_no.and_then(|c| record.get(c))),
            last_name,
            first_name,
            sex: non_empty(cols.sex.and_then(|c| record.get(c))).map(|s| s.to_ascii_uppercase()),
            active,
        });
    }
    Ok((rows, warnings))
}

pub fn write_roster<W: Write>(out: W, rows: &[RosterRow]) -> Result<(), RosterError> {
    let mut wtr = WriterBuilder::new().from_writer(out);
    wtr.write_record(ROSTER_HEADER)?;
    for r in rows {
        wtr.write_record([
            r.admission_no.as_deref().unwrap_or(""),
            r.last_name.as_str(),
            r.first_name.as_str(),
            r.sex.as_deref().unwrap_or(""),
            if r.active { "1" } else { "0" },
        ])?;
    }
    wtr.flush()?;
    Ok(())
}
