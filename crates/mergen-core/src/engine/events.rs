//! Lifecycle events pushed to front ends.

use std::path::PathBuf;

use tokio::sync::mpsc::UnboundedSender;

use crate::task::{TaskId, TaskStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StatusChanged { task_id: TaskId, status: TaskStatus },
    Completed { task_id: TaskId, path: PathBuf },
    Failed { task_id: TaskId, cause: String },
    Paused { task_id: TaskId },
    Cancelled { task_id: TaskId },
    /// A checkpoint could not be persisted; the download keeps running.
    CheckpointFailed { task_id: TaskId, cause: String },
}

impl EngineEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            EngineEvent::StatusChanged { task_id, .. }
            | EngineEvent::Completed { task_id, .. }
            | EngineEvent::Failed { task_id, .. }
            | EngineEvent::Paused { task_id }
            | EngineEvent::Cancelled { task_id }
            | EngineEvent::CheckpointFailed { task_id, .. } => *task_id,
        }
    }
}

/// Optional event channel; sends never block and a dropped receiver is ignored.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink(Option<UnboundedSender<EngineEvent>>);

impl EventSink {
    pub(crate) fn new(tx: Option<UnboundedSender<EngineEvent>>) -> Self {
        Self(tx)
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event);
        }
    }
}
