//! Direct segmented transfer: probe, plan or restore, run the pool, settle.

use anyhow::anyhow;

use super::checkpoint::{checkpoint_loop, progress_loop, save_if_synced, Checkpointer};
use super::{Engine, TaskError};
use crate::config::MergenConfig;
use crate::control::{StopReason, StopToken};
use crate::downloader::{run_pool, PoolConfig, PoolOutcome, SegmentBoard, TransferOptions};
use crate::probe::{probe_with_retry, ProbeResult};
use crate::progress::{ProgressSink, ProgressTracker};
use crate::retry::SegmentError;
use crate::safe_resume::validate_for_resume;
use crate::segmenter::{effective_connections, plan_segments, PlanLimits};
use crate::storage::{self, StorageWriter, StorageWriterBuilder};
use crate::task::{DownloadTask, SegmentRecord, SegmentStatus, TaskStatus};
use crate::url_model::derive_filename;

fn limits(cfg: &MergenConfig) -> PlanLimits {
    PlanLimits {
        max_connections: cfg.connection_limit(),
        min_segment_size: cfg.min_segment_size,
    }
}

/// Ranged transfers need both a known size and server support.
fn is_ranged(task: &DownloadTask) -> bool {
    task.range_supported == Some(true) && task.total_size.is_some()
}

fn plan(task: &DownloadTask, cfg: &MergenConfig) -> Vec<SegmentRecord> {
    let requested = if is_ranged(task) { task.connections } else { 1 };
    plan_segments(task.total_size, requested, limits(cfg))
        .into_iter()
        .enumerate()
        .map(|(i, r)| SegmentRecord::new(task.id, i, r))
        .collect()
}

pub(super) async fn run_direct(
    engine: &Engine,
    task: &mut DownloadTask,
    mut segments: Vec<SegmentRecord>,
    stop: &StopToken,
    progress: &ProgressSink,
) -> Result<TaskStatus, TaskError> {
    let cfg = engine.cfg.clone();
    let opts = TransferOptions::from_config(&cfg);
    let policy = cfg.retry_policy();

    // A paused task with known geometry resumes straight into Downloading.
    let resume_directly = task.status == TaskStatus::Paused
        && task.range_supported.is_some()
        && !task.destination_is_dir
        && !segments.is_empty();

    if !resume_directly {
        engine.transition(task, TaskStatus::Probing, None).await?;
        let probed = {
            let url = task.url.clone();
            let opts = opts.clone();
            let stop = stop.clone();
            tokio::task::spawn_blocking(move || probe_with_retry(&url, &opts, &policy, Some(&stop)))
                .await
                .map_err(|e| anyhow!("probe task join: {}", e))?
        };
        let probe = match probed {
            Ok(p) => p,
            Err(SegmentError::Cancelled) => {
                let reason = stop.reason().unwrap_or(StopReason::Pause);
                return engine.settle_stop(task, reason, &segments).await;
            }
            Err(e) => return Err(TaskError::from_probe_error(&e)),
        };
        tracing::debug!(
            total_size = ?probe.total_size,
            range_supported = probe.range_supported,
            "probe complete"
        );
        apply_probe(engine, task, &mut segments, &probe).await?;
    }

    if !is_ranged(task) && (segments.len() > 1 || segments.iter().any(|s| s.end.is_some() != task.total_size.is_some())) {
        tracing::info!("server no longer honours ranges, restarting as one connection");
        segments.clear();
    }
    if segments.is_empty() {
        segments = plan(task, &cfg);
    }

    let storage = open_storage(task, &mut segments)?;
    engine.db.save(task, &segments).await?;

    if let Some(reason) = stop.reason() {
        return engine.settle_stop(task, reason, &segments).await;
    }
    engine.transition(task, TaskStatus::Downloading, None).await?;

    loop {
        let board = SegmentBoard::from_records(task.id, &segments);
        let outcome = run_transfer(engine, task, &board, &storage, stop, progress, &opts).await?;
        segments = board.snapshot();

        match outcome {
            PoolOutcome::Completed => return finish(engine, task, segments, storage).await,
            PoolOutcome::RangeFallback => {
                stop.clear_abort();
                task.range_supported = Some(false);
                segments = plan(task, &cfg);
                engine.db.save(task, &segments).await?;
                tracing::info!("re-planned as a single unranged transfer");
            }
            PoolOutcome::Stopped(StopReason::Cancel) => {
                drop(storage);
                engine.discard_partial(task).await?;
                engine.transition(task, TaskStatus::Cancelled, None).await?;
                return Ok(TaskStatus::Cancelled);
            }
            PoolOutcome::Stopped(StopReason::Pause) => {
                persist_partial(engine, task, &segments, &storage).await;
                engine.transition(task, TaskStatus::Paused, None).await?;
                return Ok(TaskStatus::Paused);
            }
            PoolOutcome::Stopped(StopReason::Abort) => {
                persist_partial(engine, task, &segments, &storage).await;
                return Err(TaskError::Request("transfer stopped before every segment finished".into()));
            }
            PoolOutcome::Failed(f) => {
                persist_partial(engine, task, &segments, &storage).await;
                return Err(TaskError::from_segment_failure(&f));
            }
        }
    }
}

/// Record what the probe learned. A changed remote invalidates stored
/// progress; a directory destination gets its filename here.
async fn apply_probe(
    engine: &Engine,
    task: &mut DownloadTask,
    segments: &mut Vec<SegmentRecord>,
    probe: &ProbeResult,
) -> Result<(), TaskError> {
    if !segments.is_empty() {
        if let Err(changed) = validate_for_resume(task, probe) {
            tracing::warn!("{}, discarding partial progress", changed);
            segments.clear();
            engine.discard_partial(task).await?;
        }
    }
    if segments.is_empty() {
        task.total_size = probe.total_size;
    } else if !task.learn_size(probe.total_size) {
        return Err(TaskError::Protocol("server reported a different size".into()));
    }
    task.range_supported = Some(probe.range_supported);
    task.etag = probe.etag.clone();
    task.last_modified = probe.last_modified.clone();

    if task.destination_is_dir {
        let name_url = probe.effective_url.as_deref().unwrap_or(&task.url);
        let name = derive_filename(
            name_url,
            probe.content_disposition.as_deref(),
            task.suggested_filename.as_deref(),
        );
        task.destination = engine.destinations.reserve_unique(&task.destination, &name);
        task.destination_is_dir = false;
        tracing::info!(path = %task.destination.display(), "derived destination");
    }
    Ok(())
}

/// Open the `.part` file for resumed progress, or create and preallocate it.
/// A missing or truncated partial resets every segment to zero.
fn open_storage(task: &DownloadTask, segments: &mut [SegmentRecord]) -> Result<StorageWriter, TaskError> {
    let temp = storage::temp_path(&task.destination);
    if segments.iter().any(|s| s.downloaded > 0) {
        match StorageWriter::open_existing(&temp) {
            Ok(w) if task.total_size.map_or(true, |t| w.len().ok() == Some(t)) => return Ok(w),
            _ => {
                tracing::warn!(path = %temp.display(), "partial file missing or truncated, restarting from zero");
                for s in segments.iter_mut() {
                    s.downloaded = 0;
                    s.status = SegmentStatus::Pending;
                }
            }
        }
    }
    let mut builder = StorageWriterBuilder::create(&temp).map_err(TaskError::storage)?;
    builder
        .preallocate(task.total_size.unwrap_or(0))
        .map_err(TaskError::storage)?;
    Ok(builder.build())
}

/// One pool run with the checkpoint and progress loops alongside it.
async fn run_transfer(
    engine: &Engine,
    task: &DownloadTask,
    board: &SegmentBoard,
    storage: &StorageWriter,
    stop: &StopToken,
    progress: &ProgressSink,
    opts: &TransferOptions,
) -> Result<PoolOutcome, TaskError> {
    let cfg = &engine.cfg;
    let ranged = is_ranged(task);
    let requested = if ranged { task.connections } else { 1 };
    let pool_cfg = PoolConfig {
        url: task.url.clone(),
        connections: effective_connections(task.total_size, requested, limits(cfg)),
        ranged,
        transfer: opts.clone(),
        retry: cfg.retry_policy(),
        task_retry_limit: cfg.task_retry_limit,
    };
    tracing::info!(
        segments = board.len(),
        connections = pool_cfg.connections,
        ranged,
        "starting transfer"
    );

    let (completed_tx, completed_rx) = tokio::sync::mpsc::channel::<usize>(board.len().max(1));
    let checkpointer = tokio::spawn(checkpoint_loop(
        Checkpointer {
            db: engine.db.clone(),
            events: engine.events.clone(),
            task: task.clone(),
            board: board.clone(),
            storage: storage.clone(),
        },
        completed_rx,
        cfg.checkpoint_interval(),
    ));
    let reporter = tokio::spawn(progress_loop(
        ProgressTracker::new(board.clone(), task.total_size, cfg.speed_window),
        progress.clone(),
        cfg.progress_interval(),
    ));

    let outcome = {
        let board = board.clone();
        let storage = storage.clone();
        let stop = stop.clone();
        tokio::task::spawn_blocking(move || {
            run_pool(pool_cfg, &board, &storage, &stop, Some(&completed_tx))
        })
        .await
    };
    reporter.abort();
    let _ = checkpointer.await;
    progress.publish(ProgressTracker::new(board.clone(), task.total_size, cfg.speed_window).sample());

    outcome.map_err(|e| TaskError::Store(anyhow!("segment pool join: {}", e)))
}

/// Flush and persist progress after a pause or failure. A failed flush keeps
/// the previous checkpoint; the caller's outcome stands either way.
async fn persist_partial(engine: &Engine, task: &DownloadTask, segments: &[SegmentRecord], storage: &StorageWriter) {
    let synced = storage.sync();
    save_if_synced(&engine.db, &engine.events, task, segments, synced).await;
}

/// Verify the byte count, rename `.part` into place and drop segment state.
async fn finish(
    engine: &Engine,
    task: &mut DownloadTask,
    segments: Vec<SegmentRecord>,
    storage: StorageWriter,
) -> Result<TaskStatus, TaskError> {
    engine.transition(task, TaskStatus::Completing, None).await?;

    let written: u64 = segments.iter().map(|s| s.downloaded).sum();
    let expected = task.total_size.unwrap_or(written);
    let on_disk = storage.len().map_err(TaskError::storage)?;
    if written != expected || on_disk != expected {
        drop(storage);
        engine.discard_partial(task).await?;
        let actual = if written != expected { written } else { on_disk };
        return Err(TaskError::SizeMismatch { expected, actual });
    }

    storage.sync().map_err(TaskError::storage)?;
    storage.finalize(&task.destination).map_err(TaskError::storage)?;
    task.total_size = Some(expected);
    engine.db.save(task, &[]).await?;
    engine.transition(task, TaskStatus::Completed, None).await?;
    tracing::info!(path = %task.destination.display(), bytes = expected, "download complete");
    Ok(TaskStatus::Completed)
}
