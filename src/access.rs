//! Role gating for request methods.
//!
//! Every method the daemon answers is listed here with its access kind. The
//! router refuses a request when the caller's role may not use the method and
//! clears the report cache after every successful write.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Teacher,
    Student,
    Parent,
    Finance,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            "parent" => Some(Role::Parent),
            "finance" => Some(Role::Finance),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
            Role::Parent => "parent",
            Role::Finance => "finance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

const METHODS: &[(&str, Access)] = &[
    ("health", Access::Read),
    ("workspace.select", Access::Write),
    ("settings.get", Access::Read),
    ("settings.update", Access::Write),
    ("classes.list", Access::Read),
    ("classes.create", Access::Write),
    ("classes.update", Access::Write),
    ("classes.delete", Access::Write),
    ("subjects.list", Access::Read),
    ("subjects.create", Access::Write),
    ("subjects.update", Access::Write),
    ("subjects.delete", Access::Write),
    ("teachers.list", Access::Read),
    ("teachers.create", Access::Write),
    ("teachers.update", Access::Write),
    ("teachers.delete", Access::Write),
    ("classSubjects.list", Access::Read),
    ("classSubjects.assign", Access::Write),
    ("classSubjects.remove", Access::Write),
    ("students.list", Access::Read),
    ("students.create", Access::Write),
    ("students.update", Access::Write),
    ("students.delete", Access::Write),
    ("students.importCsv", Access::Write),
    ("students.exportCsv", Access::Read),
    ("exams.list", Access::Read),
    ("exams.create", Access::Write),
    ("exams.delete", Access::Write),
    ("marks.grid", Access::Read),
    ("marks.set", Access::Write),
    ("marks.bulkSet", Access::Write),
    ("grading.preview", Access::Read),
    ("reports.studentResult", Access::Read),
    ("reports.classResults", Access::Read),
    ("reports.reportCard", Access::Read),
    ("reports.resultSheet", Access::Read),
    ("reports.exportCsv", Access::Read),
    ("backup.export", Access::Read),
    ("backup.import", Access::Write),
];

const LEARNER_METHODS: &[&str] = &[
    "health",
    "grading.preview",
    "reports.studentResult",
    "reports.reportCard",
];

const FINANCE_METHODS: &[&str] = &["health", "settings.get", "classes.list", "students.list"];

const TEACHER_WRITES: &[&str] = &["marks.set", "marks.bulkSet"];

/// `None` for methods the daemon does not know.
pub fn method_access(method: &str) -> Option<Access> {
    METHODS
        .iter()
        .find(|(name, _)| *name == method)
        .map(|(_, access)| *access)
}

pub fn is_allowed(role: Role, method: &str) -> bool {
    let Some(access) = method_access(method) else {
        return false;
    };
    match role {
        Role::Admin => true,
        Role::Teacher => match access {
            Access::Read => method != "backup.export",
            Access::Write => TEACHER_WRITES.contains(&method),
        },
        Role::Student | Role::Parent => LEARNER_METHODS.contains(&method),
        Role::Finance => FINANCE_METHODS.contains(&method),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_may_call_every_known_method() {
        for (name, _) in METHODS {
            assert!(is_allowed(Role::Admin, name), "{name}");
        }
        assert!(!is_allowed(Role::Admin, "nope.nothing"));
    }

    #[test]
    fn teacher_writes_marks_only() {
        assert!(is_allowed(Role::Teacher, "marks.bulkSet"));
        assert!(is_allowed(Role::Teacher, "reports.classResults"));
        assert!(!is_allowed(Role::Teacher, "students.delete"));
        assert!(!is_allowed(Role::Teacher, "backup.export"));
    }

    #[test]
    fn learners_and_finance_are_narrow() {
        assert!(is_allowed(Role::Parent, "reports.reportCard"));
        assert!(!is_allowed(Role::Student, "reports.classResults"));
        assert!(!is_allowed(Role::Student, "marks.set"));
        assert!(is_allowed(Role::Finance, "students.list"));
        assert!(!is_allowed(Role::Finance, "marks.grid"));
    }

    #[test]
    fn role_names_parse_case_insensitively() {
        assert_eq!(Role::parse(" Teacher "), Some(Role::Teacher));
        assert_eq!(Role::parse("janitor"), None);
        assert_eq!(Role::Finance.as_str(), "finance");
    }
}
