//! Row views returned by the task store.

use std::path::PathBuf;

use serde::Serialize;

use crate::task::{TaskId, TaskStatus};

/// Summary view used by `status` listings.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub url: String,
    pub destination: PathBuf,
    pub status: TaskStatus,
    pub total_size: Option<u64>,
    /// Sum of persisted segment progress (0 once a task completes and its segments are dropped).
    pub downloaded: u64,
    pub last_error: Option<String>,
}
