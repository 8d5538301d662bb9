pub mod attendance;
pub mod auth;
pub mod classes;
pub mod core;
pub mod marks;
pub mod promotion;
pub mod reports;
pub mod saved_reports;
pub mod students;
pub mod subjects;
pub mod terms;
pub mod users;
