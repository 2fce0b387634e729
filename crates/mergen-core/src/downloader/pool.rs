//! Bounded worker pool over the incomplete segments of one task.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::board::SegmentBoard;
use super::segment::{fetch_segment_with_retry, SegmentJob};
use super::TransferOptions;
use crate::control::{StopReason, StopToken};
use crate::retry::{classify, ErrorKind, RetryPolicy, SegmentError};
use crate::storage::StorageWriter;
use crate::task::SegmentStatus;

/// How often the collector wakes without a result to notice stops and dead workers.
const COLLECT_TICK: Duration = Duration::from_millis(200);

/// Inputs for one pool run.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub url: String,
    /// Maximum workers transferring at once.
    pub connections: usize,
    pub ranged: bool,
    pub transfer: TransferOptions,
    pub retry: RetryPolicy,
    /// Re-queues allowed across the whole task once a segment exhausts its retries.
    pub task_retry_limit: u32,
}

/// A segment failure the pool could not absorb.
#[derive(Debug)]
pub struct SegmentFailure {
    pub index: usize,
    pub kind: ErrorKind,
    pub error: SegmentError,
}

/// How a pool run ended.
#[derive(Debug)]
pub enum PoolOutcome {
    /// Every segment is complete.
    Completed,
    /// The stop token was raised by the user; segments keep their progress.
    Stopped(StopReason),
    /// The first segment got `200 OK` to a ranged request: re-plan as one unranged transfer.
    RangeFallback,
    /// A fatal error (resource failure, or retries exhausted).
    Failed(SegmentFailure),
}

struct Queue {
    pending: VecDeque<usize>,
    alive: usize,
}

fn lock(q: &Mutex<Queue>) -> MutexGuard<'_, Queue> {
    q.lock().unwrap_or_else(|e| e.into_inner())
}

/// Decrements the live-worker count when a worker thread exits, even by panic.
struct AliveGuard(Arc<Mutex<Queue>>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        lock(&self.0).alive -= 1;
    }
}

struct Shared {
    cfg: PoolConfig,
    board: SegmentBoard,
    storage: StorageWriter,
    stop: StopToken,
}

fn spawn_worker(
    shared: &Arc<Shared>,
    queue: &Arc<Mutex<Queue>>,
    tx: &mpsc::Sender<WorkerResult>,
) -> std::thread::JoinHandle<()> {
    let shared = Arc::clone(shared);
    let queue = Arc::clone(queue);
    let guard = AliveGuard(Arc::clone(&queue));
    let tx = tx.clone();
    std::thread::spawn(move || {
        let _guard = guard;
        loop {
            if shared.stop.is_raised() {
                break;
            }
            let index = match lock(&queue).pending.pop_front() {
                Some(i) => i,
                None => break,
            };
            let slot = shared.board.slot(index);
            slot.set_status(SegmentStatus::Active);
            shared.board.worker_started();
            let job = SegmentJob {
                url: &shared.cfg.url,
                slot,
                ranged: shared.cfg.ranged,
                storage: &shared.storage,
                opts: &shared.cfg.transfer,
                stop: &shared.stop,
            };
            let res = fetch_segment_with_retry(&job, &shared.cfg.retry);
            shared.board.worker_finished();
            if tx.send((index, res)).is_err() {
                break;
            }
        }
    })
}

type WorkerResult = (usize, Result<(), SegmentError>);

/// What the collector does after a tick with no result.
enum Idle {
    /// A result arrived after the tick fired.
    Ready(WorkerResult),
    /// Workers are still running, or nothing is outstanding.
    Wait,
    /// Every worker is gone but segments are pending; one slot was reserved for a new worker.
    Respawn,
    /// Every worker is gone and an outstanding result will never come.
    Lost,
}

fn after_idle_tick(queue: &Mutex<Queue>, rx: &mpsc::Receiver<WorkerResult>, to_receive: usize) -> Idle {
    let mut q = lock(queue);
    if q.alive > 0 || to_receive == 0 {
        return Idle::Wait;
    }
    if !q.pending.is_empty() {
        q.alive += 1;
        return Idle::Respawn;
    }
    drop(q);
    // Workers send before they exit, so anything sent before `alive` hit zero is visible here.
    match rx.try_recv() {
        Ok(pair) => Idle::Ready(pair),
        Err(_) => Idle::Lost,
    }
}

/// Downloads every incomplete segment on `board` with at most
/// `cfg.connections` workers. Blocking; run it from `spawn_blocking`.
///
/// A segment that fails after its own retries is re-queued (same range, from
/// its last offset) while the task's re-queue budget lasts. When
/// `checkpoint_tx` is set, the index of each completed segment is sent so the
/// caller can persist progress; a full channel drops the notice.
pub fn run_pool(
    cfg: PoolConfig,
    board: &SegmentBoard,
    storage: &StorageWriter,
    stop: &StopToken,
    checkpoint_tx: Option<&tokio::sync::mpsc::Sender<usize>>,
) -> PoolOutcome {
    let incomplete = board.incomplete();
    if incomplete.is_empty() {
        return PoolOutcome::Completed;
    }
    let num_workers = cfg.connections.max(1).min(incomplete.len());
    let task_retry_limit = cfg.task_retry_limit;
    let mut to_receive = incomplete.len();

    let shared = Arc::new(Shared {
        cfg,
        board: board.clone(),
        storage: storage.clone(),
        stop: stop.clone(),
    });
    let queue = Arc::new(Mutex::new(Queue {
        pending: incomplete.into_iter().collect(),
        alive: num_workers,
    }));
    let (tx, rx) = mpsc::channel();
    let mut handles = Vec::with_capacity(num_workers);
    for _ in 0..num_workers {
        handles.push(spawn_worker(&shared, &queue, &tx));
    }

    let mut requeues = 0u32;
    let mut fatal: Option<SegmentFailure> = None;
    let mut fallback = false;

    while to_receive > 0 {
        let (index, res) = match rx.recv_timeout(COLLECT_TICK) {
            Ok(pair) => pair,
            Err(mpsc::RecvTimeoutError::Timeout) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                if stop.is_raised() {
                    let mut q = lock(&queue);
                    to_receive = to_receive.saturating_sub(q.pending.len());
                    q.pending.clear();
                }
                match after_idle_tick(&queue, &rx, to_receive) {
                    Idle::Ready(pair) => pair,
                    Idle::Wait => continue,
                    Idle::Respawn => {
                        handles.push(spawn_worker(&shared, &queue, &tx));
                        continue;
                    }
                    Idle::Lost => {
                        tracing::error!(task_id = board.task_id(), "segment worker exited without a result");
                        fatal.get_or_insert(SegmentFailure {
                            index: usize::MAX,
                            kind: ErrorKind::Other,
                            error: SegmentError::WorkerLost,
                        });
                        break;
                    }
                }
            }
        };
        to_receive -= 1;
        let slot = board.slot(index);

        match res {
            Ok(()) => {
                slot.set_status(SegmentStatus::Complete);
                tracing::debug!(task_id = board.task_id(), segment = index, "segment complete");
                if let Some(ctx) = checkpoint_tx {
                    let _ = ctx.try_send(index);
                }
            }
            Err(SegmentError::Cancelled) => {
                slot.set_status(SegmentStatus::Pending);
            }
            Err(e) => {
                let kind = classify(&e);
                let first_untouched = index == 0 && slot.downloaded() == 0;
                if matches!(e, SegmentError::RangeIgnored) && first_untouched && shared.cfg.ranged {
                    tracing::info!(task_id = board.task_id(), "server ignored Range; falling back to one connection");
                    slot.set_status(SegmentStatus::Pending);
                    fallback = true;
                } else if kind != ErrorKind::Resource && requeues < task_retry_limit {
                    requeues += 1;
                    let n = slot.bump_retries();
                    tracing::warn!(
                        task_id = board.task_id(),
                        segment = index,
                        retries = n,
                        offset = slot.next_offset(),
                        "segment failed, re-queueing: {}",
                        e
                    );
                    slot.set_status(SegmentStatus::Pending);
                    let mut q = lock(&queue);
                    q.pending.push_back(index);
                    to_receive += 1;
                    if q.alive < num_workers {
                        q.alive += 1;
                        drop(q);
                        handles.push(spawn_worker(&shared, &queue, &tx));
                    }
                    continue;
                } else {
                    tracing::warn!(task_id = board.task_id(), segment = index, "segment failed: {}", e);
                    slot.set_status(SegmentStatus::Failed);
                    fatal.get_or_insert(SegmentFailure { index, kind, error: e });
                }
                stop.raise(StopReason::Abort);
                let mut q = lock(&queue);
                to_receive = to_receive.saturating_sub(q.pending.len());
                q.pending.clear();
            }
        }

        if stop.is_raised() {
            let mut q = lock(&queue);
            to_receive = to_receive.saturating_sub(q.pending.len());
            q.pending.clear();
        }
    }
    drop(tx);

    for h in handles {
        if h.join().is_err() && fatal.is_none() {
            tracing::error!(task_id = board.task_id(), "segment worker panicked");
        }
    }

    if let Some(f) = fatal {
        return PoolOutcome::Failed(f);
    }
    if fallback {
        return PoolOutcome::RangeFallback;
    }
    match stop.reason() {
        Some(StopReason::Pause) => return PoolOutcome::Stopped(StopReason::Pause),
        Some(StopReason::Cancel) => return PoolOutcome::Stopped(StopReason::Cancel),
        _ => {}
    }
    if board.all_complete() {
        PoolOutcome::Completed
    } else {
        PoolOutcome::Stopped(StopReason::Abort)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(pending: &[usize], alive: usize) -> Mutex<Queue> {
        Mutex::new(Queue {
            pending: pending.iter().copied().collect(),
            alive,
        })
    }

    #[test]
    fn late_result_is_collected_not_reported_lost() {
        let (tx, rx) = mpsc::channel();
        let q = queue(&[], 0);
        // The last worker reported and exited after the collector timed out.
        tx.send((2, Ok(()))).unwrap();
        match after_idle_tick(&q, &rx, 1) {
            Idle::Ready((index, res)) => {
                assert_eq!(index, 2);
                assert!(res.is_ok());
            }
            _ => panic!("expected the queued result"),
        }
    }

    #[test]
    fn missing_result_with_no_workers_is_lost() {
        let (_tx, rx) = mpsc::channel::<WorkerResult>();
        assert!(matches!(after_idle_tick(&queue(&[], 0), &rx, 1), Idle::Lost));
    }

    #[test]
    fn pending_work_without_workers_respawns() {
        let (_tx, rx) = mpsc::channel::<WorkerResult>();
        let q = queue(&[3], 0);
        assert!(matches!(after_idle_tick(&q, &rx, 1), Idle::Respawn));
        assert_eq!(lock(&q).alive, 1);
    }

    #[test]
    fn running_workers_mean_wait() {
        let (_tx, rx) = mpsc::channel::<WorkerResult>();
        assert!(matches!(after_idle_tick(&queue(&[], 2), &rx, 1), Idle::Wait));
        assert!(matches!(after_idle_tick(&queue(&[], 0), &rx, 0), Idle::Wait));
    }
}
