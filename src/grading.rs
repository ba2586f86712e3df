use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Shown wherever a grade, point value or mark is absent.
pub const MISSING_PLACEHOLDER: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    OLevel,
    ALevel,
}

impl Level {
    pub fn parse(raw: &str) -> Option<Level> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "o_level" | "o-level" | "olevel" | "o" => Some(Level::OLevel),
            "a_level" | "a-level" | "alevel" | "a" => Some(Level::ALevel),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::OLevel => "o_level",
            Level::ALevel => "a_level",
        }
    }

    /// Number of subjects summed for the division.
    pub fn best_n(self) -> usize {
        match self {
            Level::OLevel => 7,
            Level::ALevel => 3,
        }
    }

    fn bands(self) -> &'static [Band] {
        match self {
            Level::OLevel => &O_LEVEL_BANDS,
            Level::ALevel => &A_LEVEL_BANDS,
        }
    }

    fn divisions(self) -> &'static [DivisionBucket] {
        match self {
            Level::OLevel => &O_LEVEL_DIVISIONS,
            Level::ALevel => &A_LEVEL_DIVISIONS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    E,
    S,
    F,
}

impl Grade {
    pub fn as_str(self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::E => "E",
            Grade::S => "S",
            Grade::F => "F",
        }
    }

    /// Point value on the given scale. `None` when the grade is not part of that
    /// scale (E and S only exist at A-Level).
    pub fn points(self, level: Level) -> Option<u8> {
        level
            .bands()
            .iter()
            .find(|b| b.grade == self)
            .map(|b| b.points)
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Division {
    #[serde(rename = "I")]
    One,
    #[serde(rename = "II")]
    Two,
    #[serde(rename = "III")]
    Three,
    #[serde(rename = "IV")]
    Four,
    #[serde(rename = "V")]
    Five,
    #[serde(rename = "0")]
    Zero,
}

impl Division {
    pub const ALL: [Division; 6] = [
        Division::One,
        Division::Two,
        Division::Three,
        Division::Four,
        Division::Five,
        Division::Zero,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Division::One => "I",
            Division::Two => "II",
            Division::Three => "III",
            Division::Four => "IV",
            Division::Five => "V",
            Division::Zero => "0",
        }
    }

    /// Sort key for ranking: I first, "0" last.
    pub fn order(self) -> u8 {
        match self {
            Division::One => 1,
            Division::Two => 2,
            Division::Three => 3,
            Division::Four => 4,
            Division::Five => 5,
            Division::Zero => 6,
        }
    }
}

impl fmt::Display for Division {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GradingError {
    #[error("mark {mark} for {subject} is outside 0-100")]
    MarkOutOfRange { subject: String, mark: f64 },
}

struct Band {
    min: u32,
    grade: Grade,
    points: u8,
}

struct DivisionBucket {
    min: u32,
    max: u32,
    division: Division,
}

// Bands are ordered best first; the last band always starts at 0.
const O_LEVEL_BANDS: [Band; 5] = [
    Band { min: 81, grade: Grade::A, points: 1 },
    Band { min: 61, grade: Grade::B, points: 2 },
    Band { min: 41, grade: Grade::C, points: 3 },
    Band { min: 21, grade: Grade::D, points: 4 },
    Band { min: 0, grade: Grade::F, points: 5 },
];

const A_LEVEL_BANDS: [Band; 7] = [
    Band { min: 80, grade: Grade::A, points: 1 },
    Band { min: 70, grade: Grade::B, points: 2 },
    Band { min: 60, grade: Grade::C, points: 3 },
    Band { min: 50, grade: Grade::D, points: 4 },
    Band { min: 40, grade: Grade::E, points: 5 },
    Band { min: 35, grade: Grade::S, points: 6 },
    Band { min: 0, grade: Grade::F, points: 7 },
];

const O_LEVEL_DIVISIONS: [DivisionBucket; 4] = [
    DivisionBucket { min: 7, max: 14, division: Division::One },
    DivisionBucket { min: 15, max: 21, division: Division::Two },
    DivisionBucket { min: 22, max: 25, division: Division::Three },
    DivisionBucket { min: 26, max: 32, division: Division::Four },
];

const A_LEVEL_DIVISIONS: [DivisionBucket; 5] = [
    DivisionBucket { min: 3, max: 9, division: Division::One },
    DivisionBucket { min: 10, max: 12, division: Division::Two },
    DivisionBucket { min: 13, max: 17, division: Division::Three },
    DivisionBucket { min: 18, max: 19, division: Division::Four },
    DivisionBucket { min: 20, max: 21, division: Division::Five },
];

/// Rounds half up to one decimal place: `floor(10x + 0.5) / 10`.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

/// Whole mark used for banding. Fractions round half up.
fn whole_mark(subject: &str, mark: f64) -> Result<u32, GradingError> {
    if !mark.is_finite() || !(0.0..=100.0).contains(&mark) {
        return Err(GradingError::MarkOutOfRange {
            subject: subject.to_string(),
            mark,
        });
    }
    Ok((mark + 0.5).floor() as u32)
}

pub fn grade_for_mark(level: Level, mark: f64) -> Result<Grade, GradingError> {
    grade_for_subject_mark(level, "mark", mark)
}

fn grade_for_subject_mark(level: Level, subject: &str, mark: f64) -> Result<Grade, GradingError> {
    let whole = whole_mark(subject, mark)?;
    let band = level
        .bands()
        .iter()
        .find(|b| whole >= b.min)
        .unwrap_or(&level.bands()[level.bands().len() - 1]);
    Ok(band.grade)
}

pub fn division_for_points(level: Level, total: u32) -> Division {
    level
        .divisions()
        .iter()
        .find(|b| total >= b.min && total <= b.max)
        .map(|b| b.division)
        .unwrap_or(Division::Zero)
}

pub fn display_grade(grade: Option<Grade>) -> String {
    grade
        .map(|g| g.as_str().to_string())
        .unwrap_or_else(|| MISSING_PLACEHOLDER.to_string())
}

pub fn display_mark(marks: Option<f64>) -> String {
    match marks {
        Some(m) if m.fract() == 0.0 => format!("{}", m as i64),
        Some(m) => format!("{:.1}", m),
        None => MISSING_PLACEHOLDER.to_string(),
    }
}

/// One subject as entered for a student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectMark {
    pub code: String,
    #[serde(default)]
    pub name: String,
    pub marks: Option<f64>,
    #[serde(default = "default_principal")]
    pub principal: bool,
}

fn default_principal() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectResult {
    pub code: String,
    pub name: String,
    pub marks: Option<f64>,
    pub grade: Option<Grade>,
    pub points: Option<u8>,
    pub principal: bool,
    pub selected: bool,
}

impl SubjectResult {
    pub fn grade_label(&self) -> String {
        display_grade(self.grade)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentResult {
    pub level: Level,
    pub subjects: Vec<SubjectResult>,
    pub selected_count: usize,
    pub total_points: u32,
    pub division: Division,
    pub total_marks: f64,
    pub average: Option<f64>,
    /// Fewer than `best_n` subjects were available for the division.
    pub incomplete: bool,
}

impl StudentResult {
    pub fn graded_count(&self) -> usize {
        self.subjects.iter().filter(|s| s.grade.is_some()).count()
    }
}

pub fn grade_subject(level: Level, subject: &SubjectMark) -> Result<SubjectResult, GradingError> {
    let grade = match subject.marks {
        Some(m) => Some(grade_for_subject_mark(level, &subject.code, m)?),
        None => None,
    };
    Ok(SubjectResult {
        code: subject.code.clone(),
        name: subject.name.clone(),
        marks: subject.marks,
        grade,
        points: grade.and_then(|g| g.points(level)),
        principal: subject.principal,
        selected: false,
    })
}

/// Indices of the subjects that count toward the division: graded principal
/// subjects, lowest points first, at most `best_n`. Equal points keep input order.
pub fn select_best(level: Level, subjects: &[SubjectResult]) -> Vec<usize> {
    let mut candidates: Vec<(usize, u8)> = subjects
        .iter()
        .enumerate()
        .filter(|(_, s)| s.principal)
        .filter_map(|(i, s)| s.points.map(|p| (i, p)))
        .collect();
    candidates.sort_by_key(|(_, p)| *p);
    candidates
        .into_iter()
        .take(level.best_n())
        .map(|(i, _)| i)
        .collect()
}

pub fn compute_result(level: Level, subjects: &[SubjectMark]) -> Result<StudentResult, GradingError> {
    let mut graded = subjects
        .iter()
        .map(|s| grade_subject(level, s))
        .collect::<Result<Vec<_>, _>>()?;

    let selected = select_best(level, &graded);
    let mut total_points = 0_u32;
    for &i in &selected {
        graded[i].selected = true;
        total_points += u32::from(graded[i].points.unwrap_or(0));
    }

    let marked: Vec<f64> = graded.iter().filter_map(|s| s.marks).collect();
    let total_marks: f64 = marked.iter().sum();
    let average = if marked.is_empty() {
        None
    } else {
        Some(round_off_1_decimal(total_marks / marked.len() as f64))
    };

    Ok(StudentResult {
        level,
        selected_count: selected.len(),
        total_points,
        division: division_for_points(level, total_points),
        total_marks,
        average,
        incomplete: selected.len() < level.best_n(),
        subjects: graded,
    })
}
