//! Task writes: add, save (atomic replace), status updates, delete, recovery.

use anyhow::Result;

use super::super::db::{unix_timestamp, ResumeDb};
use crate::task::{DownloadRequest, DownloadTask, SegmentRecord, TaskId, TaskKind, TaskStatus};

impl ResumeDb {
    /// Insert a new queued task and return its id.
    pub async fn add_task(
        &self,
        request: &DownloadRequest,
        kind: TaskKind,
        connections: usize,
        destination_is_dir: bool,
    ) -> Result<TaskId> {
        let now = unix_timestamp();
        let id = sqlx::query(
            r#"
            INSERT INTO tasks (
                url, destination, destination_is_dir, suggested_filename, total_size,
                connections, range_supported, etag, last_modified, kind, status,
                last_error, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, NULL, ?5, NULL, NULL, NULL, ?6, ?7, NULL, ?8, ?8)
            "#,
        )
        .bind(&request.url)
        .bind(request.destination.to_string_lossy().into_owned())
        .bind(destination_is_dir)
        .bind(request.suggested_filename.as_deref())
        .bind(connections as i64)
        .bind(kind.as_str())
        .bind(TaskStatus::Queued.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    /// Replace the persisted record of `task` with `task` and `segments`, atomically.
    pub async fn save(&self, task: &DownloadTask, segments: &[SegmentRecord]) -> Result<()> {
        let now = unix_timestamp();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, url, destination, destination_is_dir, suggested_filename, total_size,
                connections, range_supported, etag, last_modified, kind, status,
                last_error, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                destination = excluded.destination,
                destination_is_dir = excluded.destination_is_dir,
                suggested_filename = excluded.suggested_filename,
                total_size = excluded.total_size,
                connections = excluded.connections,
                range_supported = excluded.range_supported,
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                kind = excluded.kind,
                status = excluded.status,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(task.id)
        .bind(&task.url)
        .bind(task.destination.to_string_lossy().into_owned())
        .bind(task.destination_is_dir)
        .bind(task.suggested_filename.as_deref())
        .bind(task.total_size.map(|n| n as i64))
        .bind(task.connections as i64)
        .bind(task.range_supported)
        .bind(task.etag.as_deref())
        .bind(task.last_modified.as_deref())
        .bind(task.kind.as_str())
        .bind(task.status.as_str())
        .bind(task.last_error.as_deref())
        .bind(task.created_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM segments WHERE task_id = ?1")
            .bind(task.id)
            .execute(&mut *tx)
            .await?;

        for seg in segments {
            sqlx::query(
                r#"
                INSERT INTO segments (task_id, idx, start, end_inclusive, downloaded, status, retries)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(task.id)
            .bind(seg.index as i64)
            .bind(seg.start as i64)
            .bind(seg.end.map(|e| e as i64))
            .bind(seg.downloaded as i64)
            .bind(seg.status.as_str())
            .bind(seg.retries as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Drop the persisted segment state of a task. The task row stays as history.
    pub async fn delete(&self, id: TaskId) -> Result<()> {
        sqlx::query("DELETE FROM segments WHERE task_id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove a task and its segments entirely.
    pub async fn remove_task(&self, id: TaskId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM segments WHERE task_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let n = sqlx::query("DELETE FROM tasks WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(n > 0)
    }

    /// Set the status of a task, clearing its last error.
    pub async fn set_status(&self, id: TaskId, status: TaskStatus) -> Result<()> {
        self.set_status_with_error(id, status, None).await
    }

    /// Set the status and last error of a task.
    pub async fn set_status_with_error(
        &self,
        id: TaskId,
        status: TaskStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE tasks SET status = ?1, last_error = ?2, updated_at = ?3 WHERE id = ?4")
            .bind(status.as_str())
            .bind(last_error)
            .bind(unix_timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Reset tasks a crash left in Probing/Downloading/Completing back to Queued.
    /// Returns the number of tasks recovered.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let n = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'queued', updated_at = ?1
            WHERE status IN ('probing', 'downloading', 'completing')
            "#,
        )
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(n)
    }
}
