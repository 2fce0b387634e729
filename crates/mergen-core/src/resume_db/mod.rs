//! Persistent task store (SQLite via sqlx).
//!
//! One row per task (URL, destination, validators, status, last error) and
//! one row per segment (range, bytes confirmed on disk, status, retries).
//! `save` replaces a task's record in a single transaction, so a crash
//! mid-write leaves the previous record intact.

pub mod db;
mod tasks;
pub mod types;

pub use db::ResumeDb;
pub use types::TaskSummary;
