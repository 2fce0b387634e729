//! Background loops that run beside the worker pool: periodic checkpoints and
//! progress snapshots.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use super::{EngineEvent, EventSink};
use crate::downloader::SegmentBoard;
use crate::progress::{ProgressSink, ProgressTracker};
use crate::resume_db::ResumeDb;
use crate::storage::StorageWriter;
use crate::task::{DownloadTask, SegmentRecord};

/// Persists segment progress of one running task.
pub(super) struct Checkpointer {
    pub(super) db: ResumeDb,
    pub(super) events: EventSink,
    pub(super) task: DownloadTask,
    pub(super) board: SegmentBoard,
    pub(super) storage: StorageWriter,
}

impl Checkpointer {
    /// Snapshot counters, flush the file, then write the snapshot. Counters are
    /// read before the flush so persisted progress never exceeds synced bytes.
    /// Failures are reported and swallowed; the download continues.
    pub(super) async fn checkpoint(&self) -> bool {
        let segments = self.board.snapshot();
        let storage = self.storage.clone();
        let synced = tokio::task::spawn_blocking(move || storage.sync())
            .await
            .map_err(|e| anyhow::anyhow!("sync task join: {}", e))
            .and_then(|r| r);
        save_if_synced(&self.db, &self.events, &self.task, &segments, synced).await
    }
}

/// Persist `segments` only when the bytes they describe reached the disk;
/// otherwise the previous checkpoint stays. Either failure emits
/// `CheckpointFailed`.
pub(super) async fn save_if_synced(
    db: &ResumeDb,
    events: &EventSink,
    task: &DownloadTask,
    segments: &[SegmentRecord],
    synced: anyhow::Result<()>,
) -> bool {
    let result = match synced {
        Ok(()) => db.save(task, segments).await,
        Err(e) => Err(e.context("sync partial file")),
    };
    match result {
        Ok(()) => {
            tracing::trace!(task_id = task.id, "checkpoint written");
            true
        }
        Err(e) => {
            let cause = format!("{:#}", e);
            tracing::warn!(task_id = task.id, %cause, "checkpoint failed");
            events.emit(EngineEvent::CheckpointFailed {
                task_id: task.id,
                cause,
            });
            false
        }
    }
}

/// Checkpoint every `interval` and whenever a segment completes. Ends when
/// the pool drops its sender.
pub(super) async fn checkpoint_loop(
    ckpt: Checkpointer,
    mut completed_rx: mpsc::Receiver<usize>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            msg = completed_rx.recv() => match msg {
                Some(index) => {
                    // Coalesce completions that arrived together into one write.
                    while completed_rx.try_recv().is_ok() {}
                    tracing::debug!(task_id = ckpt.task.id, segment = index, "checkpoint on segment completion");
                }
                None => break,
            },
            _ = ticker.tick() => {}
        }
        ckpt.checkpoint().await;
    }
}

/// Publish a snapshot every `every` until aborted.
pub(super) async fn progress_loop(mut tracker: ProgressTracker, sink: ProgressSink, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        sink.publish(tracker.sample());
    }
}
