pub mod core;
pub mod export;
pub mod schedule;
pub mod students;
pub mod subjects;
