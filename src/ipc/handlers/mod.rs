pub mod backup;
pub mod classes;
pub mod core;
pub mod exams;
pub mod marks;
pub mod reports;
pub mod students;
pub mod subjects;
pub mod teachers;
