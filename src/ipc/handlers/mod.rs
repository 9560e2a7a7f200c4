pub mod attendance;
pub mod bundle;
pub mod catalog;
pub mod core;
pub mod marks;
pub mod reports;
pub mod setup;
pub mod students;
