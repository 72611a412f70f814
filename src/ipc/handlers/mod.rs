pub mod attendance;
pub mod classes;
pub mod core;
pub mod makeup;
pub mod ranking;
pub mod sessions;
pub mod setup;
pub mod staging;
pub mod students;
