//! Task reads: get, load with segments, listings.

use anyhow::Result;
use sqlx::Row;
use std::path::{Path, PathBuf};

use super::super::db::ResumeDb;
use super::super::types::TaskSummary;
use super::{segment_from_row, task_from_row, TASK_COLUMNS};
use crate::task::{DownloadTask, SegmentRecord, TaskId, TaskStatus};

impl ResumeDb {
    /// Fetch one task row.
    pub async fn get_task(&self, id: TaskId) -> Result<Option<DownloadTask>> {
        let sql = format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(task_from_row))
    }

    /// Load a task and its persisted segments, ordered by index.
    ///
    /// Segment progress is sanitized on the way out: `downloaded` is clipped
    /// to the segment length and a `Complete` segment missing bytes is demoted.
    pub async fn load(&self, id: TaskId) -> Result<Option<(DownloadTask, Vec<SegmentRecord>)>> {
        let Some(task) = self.get_task(id).await? else {
            return Ok(None);
        };
        let rows = sqlx::query(
            r#"
            SELECT task_id, idx, start, end_inclusive, downloaded, status, retries
            FROM segments
            WHERE task_id = ?1
            ORDER BY idx ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let mut segments: Vec<SegmentRecord> = rows.iter().map(segment_from_row).collect();
        for seg in &mut segments {
            let before = (seg.downloaded, seg.status);
            seg.sanitize();
            if before != (seg.downloaded, seg.status) {
                tracing::warn!(
                    task_id = id,
                    segment = seg.index,
                    downloaded = seg.downloaded,
                    "corrected persisted segment state"
                );
            }
        }
        Ok(Some((task, segments)))
    }

    /// All tasks in submission order, with persisted progress.
    pub async fn list_tasks(&self) -> Result<Vec<TaskSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT t.id, t.url, t.destination, t.status, t.total_size, t.last_error,
                   COALESCE((SELECT SUM(s.downloaded) FROM segments s WHERE s.task_id = t.id), 0)
                       AS downloaded
            FROM tasks t
            ORDER BY t.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let destination: String = row.get("destination");
            let status: String = row.get("status");
            let total_size: Option<i64> = row.get("total_size");
            let downloaded: i64 = row.get("downloaded");
            out.push(TaskSummary {
                id: row.get("id"),
                url: row.get("url"),
                destination: PathBuf::from(destination),
                status: TaskStatus::parse(&status),
                total_size: total_size.map(|n| n.max(0) as u64),
                downloaded: downloaded.max(0) as u64,
                last_error: row.get("last_error"),
            });
        }
        Ok(out)
    }

    /// The oldest unfinished task that writes to the file `destination`, if any.
    pub async fn destination_owner(&self, destination: &Path) -> Result<Option<TaskId>> {
        let id: Option<TaskId> = sqlx::query_scalar(
            r#"
            SELECT id FROM tasks
            WHERE destination = ?1 AND destination_is_dir = 0
              AND status NOT IN ('completed', 'cancelled')
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(destination.to_string_lossy().into_owned())
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    /// Tasks not Completed/Cancelled, oldest first: what a restart can resume.
    pub async fn list_resumable(&self) -> Result<Vec<DownloadTask>> {
        let sql = format!(
            "SELECT {} FROM tasks WHERE status NOT IN ('completed', 'cancelled') ORDER BY id ASC",
            TASK_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(task_from_row).collect())
    }
}
