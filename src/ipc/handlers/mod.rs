pub mod classes;
pub mod core;
pub mod fees;
pub mod finance;
pub mod salaries;
pub mod students;
pub mod teachers;
