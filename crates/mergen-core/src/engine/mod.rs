//! Download engine: drives one task through its lifecycle.
//!
//! `Engine::run` is the single control point for a task's status. It probes
//! the resource, plans or restores segments, runs the worker pool on blocking
//! threads and finalizes, pauses, cancels or fails the task from the pool's
//! outcome. Delegated tasks hand the whole transfer to an external tool.

mod checkpoint;
mod delegated;
mod destination;
mod direct;
mod error;
mod events;

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::Instrument;

use crate::config::MergenConfig;
use crate::control::{StopReason, StopToken};
use crate::progress::ProgressSink;
use crate::resume_db::ResumeDb;
use crate::storage;
use crate::task::{DownloadTask, SegmentRecord, TaskId, TaskKind, TaskStatus};

pub use destination::DestinationLocks;
pub use error::TaskError;
pub use events::EngineEvent;
pub(crate) use events::EventSink;

/// Runs tasks against a store and configuration. Cheap to clone; the
/// scheduler hands a clone to every task it starts.
#[derive(Clone)]
pub struct Engine {
    db: ResumeDb,
    cfg: Arc<MergenConfig>,
    events: EventSink,
    destinations: Arc<DestinationLocks>,
}

impl Engine {
    pub fn new(db: ResumeDb, cfg: Arc<MergenConfig>) -> Self {
        Self {
            db,
            cfg,
            events: EventSink::default(),
            destinations: Arc::new(DestinationLocks::new()),
        }
    }

    pub fn with_events(mut self, tx: UnboundedSender<EngineEvent>) -> Self {
        self.events = EventSink::new(Some(tx));
        self
    }

    /// Share path reservations with a scheduler so derived filenames never collide.
    pub fn with_destinations(mut self, locks: Arc<DestinationLocks>) -> Self {
        self.destinations = locks;
        self
    }

    pub fn config(&self) -> &MergenConfig {
        &self.cfg
    }

    pub fn db(&self) -> &ResumeDb {
        &self.db
    }

    /// Drive `task_id` until it is Completed, Paused, Cancelled or Failed and
    /// return that status. `Err` means the task could not be loaded or its
    /// status could not be recorded.
    pub async fn run(&self, task_id: TaskId, stop: StopToken, progress: ProgressSink) -> Result<TaskStatus> {
        let (mut task, segments) = self
            .db
            .load(task_id)
            .await?
            .ok_or_else(|| anyhow!("task {} not found", task_id))?;
        if task.status.is_terminal() {
            return Ok(task.status);
        }
        if task.status.is_active() {
            tracing::info!(task_id, status = %task.status, "task was interrupted, restarting it");
            task.status = TaskStatus::Queued;
        }

        let span = tracing::info_span!("task", task_id);
        async move {
            let result = match task.kind {
                TaskKind::DirectSegmented => {
                    direct::run_direct(self, &mut task, segments, &stop, &progress).await
                }
                TaskKind::ExternalDelegated(tool) => {
                    delegated::run_delegated(self, &mut task, tool, &stop).await
                }
            };
            match result {
                Ok(status) => Ok(status),
                Err(e) => {
                    let cause = e.to_string();
                    tracing::warn!(%cause, "task failed");
                    if !task.status.can_transition_to(TaskStatus::Failed) {
                        return Err(anyhow::Error::new(e));
                    }
                    self.transition(&mut task, TaskStatus::Failed, Some(&cause))
                        .await?;
                    Ok(TaskStatus::Failed)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Apply a status change: validate the edge, persist it, emit events.
    pub(crate) async fn transition(
        &self,
        task: &mut DownloadTask,
        next: TaskStatus,
        cause: Option<&str>,
    ) -> Result<()> {
        if !task.status.can_transition_to(next) {
            anyhow::bail!(
                "illegal transition {} -> {} for task {}",
                task.status,
                next,
                task.id
            );
        }
        self.db.set_status_with_error(task.id, next, cause).await?;
        task.status = next;
        task.last_error = cause.map(str::to_string);
        tracing::info!(status = %next, "status changed");

        let task_id = task.id;
        self.events.emit(EngineEvent::StatusChanged { task_id, status: next });
        match next {
            TaskStatus::Completed => self.events.emit(EngineEvent::Completed {
                task_id,
                path: task.destination.clone(),
            }),
            TaskStatus::Paused => self.events.emit(EngineEvent::Paused { task_id }),
            TaskStatus::Cancelled => self.events.emit(EngineEvent::Cancelled { task_id }),
            TaskStatus::Failed => self.events.emit(EngineEvent::Failed {
                task_id,
                cause: cause.unwrap_or("unknown error").to_string(),
            }),
            _ => {}
        }
        Ok(())
    }

    /// Settle a user stop observed outside the worker pool (during probing or
    /// between phases).
    pub(crate) async fn settle_stop(
        &self,
        task: &mut DownloadTask,
        reason: StopReason,
        segments: &[SegmentRecord],
    ) -> Result<TaskStatus, TaskError> {
        match reason {
            StopReason::Cancel => {
                self.discard_partial(task).await?;
                self.transition(task, TaskStatus::Cancelled, None).await?;
                Ok(TaskStatus::Cancelled)
            }
            StopReason::Pause | StopReason::Abort => {
                self.db.save(task, segments).await?;
                self.transition(task, TaskStatus::Paused, None).await?;
                Ok(TaskStatus::Paused)
            }
        }
    }

    /// Delete the `.part` file and the persisted segment state of `task`.
    pub(crate) async fn discard_partial(&self, task: &DownloadTask) -> Result<()> {
        if !task.destination_is_dir {
            let temp = storage::temp_path(&task.destination);
            if let Err(e) = storage::remove_partial(&temp) {
                tracing::warn!(path = %temp.display(), "failed to remove partial file: {}", e);
            }
        }
        self.db.delete(task.id).await
    }
}
