pub mod app;
pub mod course;
pub mod tracker;
