pub mod attendance;
pub mod classes;
pub mod core;
pub mod edits;
pub mod schedule;
pub mod timetable;
