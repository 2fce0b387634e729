//! Tasks handed to an external tool. No segments, no probe: the tool owns
//! the transfer and the engine only tracks status.

use super::{Engine, TaskError};
use crate::control::{StopReason, StopToken};
use crate::external::{expected_output, run_external, ExternalOutcome, OutputTarget};
use crate::storage;
use crate::task::{DownloadTask, ExternalTool, TaskStatus};

pub(super) async fn run_delegated(
    engine: &Engine,
    task: &mut DownloadTask,
    tool: ExternalTool,
    stop: &StopToken,
) -> Result<TaskStatus, TaskError> {
    engine.transition(task, TaskStatus::Probing, None).await?;
    if let Some(reason) = stop.reason() {
        return engine.settle_stop(task, reason, &[]).await;
    }

    let target = if task.destination_is_dir {
        OutputTarget::Directory(task.destination.clone())
    } else {
        OutputTarget::File(task.destination.clone())
    };
    if let OutputTarget::Directory(dir) = &target {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| TaskError::Resource(format!("create {}: {}", dir.display(), e)))?;
    }
    engine.transition(task, TaskStatus::Downloading, None).await?;

    let cfg = &engine.cfg;
    let outcome = run_external(&cfg.external, tool, &task.url, &target, cfg.proxy.as_deref(), stop).await?;
    match outcome {
        ExternalOutcome::Finished(path) => {
            engine.transition(task, TaskStatus::Completing, None).await?;
            task.destination = path;
            task.destination_is_dir = false;
            engine.db.save(task, &[]).await?;
            engine.transition(task, TaskStatus::Completed, None).await?;
            tracing::info!(path = %task.destination.display(), "external download complete");
            Ok(TaskStatus::Completed)
        }
        ExternalOutcome::Stopped(StopReason::Cancel) => {
            if let Some(out) = expected_output(&cfg.external, tool, &task.url, &target) {
                for path in [storage::temp_path(&out), out] {
                    if let Err(e) = storage::remove_partial(&path) {
                        tracing::warn!(path = %path.display(), "failed to remove tool output: {}", e);
                    }
                }
            }
            engine.discard_partial(task).await?;
            engine.transition(task, TaskStatus::Cancelled, None).await?;
            Ok(TaskStatus::Cancelled)
        }
        ExternalOutcome::Stopped(_) => {
            engine.transition(task, TaskStatus::Paused, None).await?;
            Ok(TaskStatus::Paused)
        }
    }
}
