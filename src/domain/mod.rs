pub mod cache;
pub mod models;
pub mod report;
pub mod segments;
