pub mod core;
pub mod exams;
