//! Queue and scheduler: admits tasks up to a global ceiling and starts an
//! engine for each admitted task.
//!
//! Owned by the front end (`init` at startup, `teardown` at exit). Tasks over
//! the ceiling are held in FIFO order and admitted as running tasks settle.

mod queue;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};

use crate::config::MergenConfig;
use crate::control::{JobControl, StopReason};
use crate::engine::{DestinationLocks, Engine};
use crate::progress::{ProgressSink, ProgressSnapshot};
use crate::task::{DownloadRequest, DownloadTask, TaskId, TaskKind, TaskStatus};
use crate::url_model::classify_url;

use self::queue::{ActiveEntry, State};

/// Whether a submitted task started immediately or is waiting for a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Started,
    Held,
}

struct Inner {
    engine: Engine,
    control: JobControl,
    destinations: Arc<DestinationLocks>,
    state: Mutex<State>,
    progress_tx: Option<mpsc::Sender<ProgressSnapshot>>,
    /// Count of active plus held tasks, for `wait_idle`.
    outstanding: watch::Sender<usize>,
}

/// How a request is stored: its kind, connection count and whether the
/// destination is a directory awaiting a derived filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub kind: TaskKind,
    pub connections: usize,
    pub destination_is_dir: bool,
}

impl Submission {
    /// Validate the URL and resolve defaults from `cfg`.
    pub fn prepare(cfg: &MergenConfig, request: &DownloadRequest) -> Result<Self> {
        url::Url::parse(&request.url).with_context(|| format!("invalid URL: {}", request.url))?;
        Ok(Self {
            kind: classify_url(&request.url),
            connections: request
                .connections
                .unwrap_or(cfg.default_connections)
                .clamp(1, cfg.connection_limit()),
            destination_is_dir: request.destination.is_dir(),
        })
    }
}

/// Cheap to clone; every clone drives the same queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(engine: Engine) -> Self {
        Self::build(engine, None)
    }

    /// Like `new`, also pushing every progress snapshot into `tx`.
    pub fn with_progress_channel(engine: Engine, tx: mpsc::Sender<ProgressSnapshot>) -> Self {
        Self::build(engine, Some(tx))
    }

    fn build(engine: Engine, progress_tx: Option<mpsc::Sender<ProgressSnapshot>>) -> Self {
        let destinations = Arc::new(DestinationLocks::new());
        let ceiling = engine.config().max_active_downloads;
        let (outstanding, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                engine: engine.with_destinations(Arc::clone(&destinations)),
                control: JobControl::new(),
                destinations,
                state: Mutex::new(State::new(ceiling)),
                progress_tx,
                outstanding,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish_outstanding(&self, state: &State) {
        self.inner.outstanding.send_replace(state.outstanding());
    }

    /// Startup: reset tasks a crash left mid-flight, queue every `Queued`
    /// task in submission order, and return the paused and failed tasks the
    /// front end may offer to resume. A queued task whose destination is
    /// already claimed by an earlier one is marked Failed instead.
    pub async fn init(&self) -> Result<Vec<DownloadTask>> {
        let db = self.inner.engine.db();
        let recovered = db.recover_interrupted().await?;
        if recovered > 0 {
            tracing::info!(recovered, "recovered interrupted tasks");
        }
        let mut offered = Vec::new();
        for task in db.list_resumable().await? {
            if task.status == TaskStatus::Queued {
                if let Err(e) = self.enqueue(task.id, explicit_destination(&task)) {
                    let cause = format!("{:#}", e);
                    tracing::warn!(task_id = task.id, "not queued at startup: {}", cause);
                    db.set_status_with_error(task.id, TaskStatus::Failed, Some(&cause))
                        .await?;
                    offered.push(DownloadTask {
                        status: TaskStatus::Failed,
                        last_error: Some(cause),
                        ..task
                    });
                }
            } else {
                offered.push(task);
            }
        }
        Ok(offered)
    }

    /// Create a task for `request` and start it if a slot is free.
    pub async fn submit(&self, request: DownloadRequest) -> Result<(TaskId, Admission)> {
        let sub = Submission::prepare(self.inner.engine.config(), &request)?;
        if !sub.destination_is_dir && !self.inner.destinations.try_reserve(&request.destination) {
            anyhow::bail!(
                "destination {} is already used by another task",
                request.destination.display()
            );
        }
        let added = self
            .inner
            .engine
            .db()
            .add_task(&request, sub.kind, sub.connections, sub.destination_is_dir)
            .await;
        let id = match added {
            Ok(id) => id,
            Err(e) => {
                if !sub.destination_is_dir {
                    self.inner.destinations.release(&request.destination);
                }
                return Err(e);
            }
        };
        tracing::info!(task_id = id, url = %request.url, kind = sub.kind.as_str(), "task submitted");
        let reserved = (!sub.destination_is_dir).then(|| request.destination.clone());
        let admission = self.admit(id, reserved);
        Ok((id, admission))
    }

    /// Queue an existing task; the destination is already reserved by the caller.
    fn admit(&self, id: TaskId, reserved: Option<PathBuf>) -> Admission {
        let mut state = self.state();
        if let Some(path) = reserved {
            state.reserved.insert(id, path);
        }
        let admission = if state.has_slot() && state.pending.is_empty() {
            self.start_locked(&mut state, id);
            Admission::Started
        } else {
            state.pending.push_back(id);
            tracing::debug!(task_id = id, held = state.pending.len(), "task held");
            Admission::Held
        };
        self.publish_outstanding(&state);
        admission
    }

    /// Reserve the task's explicit destination (if any) and queue it.
    fn enqueue(&self, id: TaskId, destination: Option<PathBuf>) -> Result<Admission> {
        if let Some(path) = &destination {
            if !self.inner.destinations.try_reserve(path) {
                anyhow::bail!("destination {} is already used by another task", path.display());
            }
        }
        Ok(self.admit(id, destination))
    }

    fn start_locked(&self, state: &mut State, id: TaskId) {
        let stop = self.inner.control.register(id);
        let mut progress = ProgressSink::new();
        if let Some(tx) = &self.inner.progress_tx {
            progress = progress.with_channel(tx.clone());
        }
        let this = self.clone();
        let sink = progress.clone();
        tokio::spawn(async move {
            match this.inner.engine.run(id, stop, sink).await {
                Ok(status) => tracing::debug!(task_id = id, %status, "engine finished"),
                Err(e) => tracing::error!(task_id = id, "engine error: {:#}", e),
            }
            this.on_complete(id).await;
        });
        state.active.insert(id, ActiveEntry { progress });
        tracing::debug!(task_id = id, active = state.active.len(), "task started");
    }

    /// Free the slot held by `task_id` and admit held tasks in FIFO order.
    /// Called automatically when an engine settles.
    pub async fn on_complete(&self, task_id: TaskId) {
        let derived = match self.inner.engine.db().get_task(task_id).await {
            Ok(Some(task)) => Some(task.destination),
            _ => None,
        };
        self.inner.control.unregister(task_id);

        let mut state = self.state();
        state.active.remove(&task_id);
        if let Some(path) = state.reserved.remove(&task_id) {
            self.inner.destinations.release(&path);
        }
        if let Some(path) = derived {
            self.inner.destinations.release(&path);
        }
        while state.has_slot() {
            let Some(next) = state.pending.pop_front() else {
                break;
            };
            self.start_locked(&mut state, next);
        }
        self.publish_outstanding(&state);
    }

    /// Pause a running or held task. Returns false if the task is neither.
    pub async fn pause(&self, task_id: TaskId) -> Result<bool> {
        if self.inner.control.request(task_id, StopReason::Pause) {
            return Ok(true);
        }
        if !self.take_held(task_id) {
            return Ok(false);
        }
        self.settle_held(task_id, TaskStatus::Paused).await?;
        Ok(true)
    }

    /// Re-admit a paused task. Returns `None` if the task is not paused.
    pub async fn resume(&self, task_id: TaskId) -> Result<Option<Admission>> {
        self.requeue(task_id, TaskStatus::Paused).await
    }

    /// Re-admit a failed task; it re-probes and reuses valid progress.
    pub async fn retry(&self, task_id: TaskId) -> Result<Option<Admission>> {
        self.requeue(task_id, TaskStatus::Failed).await
    }

    async fn requeue(&self, task_id: TaskId, from: TaskStatus) -> Result<Option<Admission>> {
        if self.state().is_known(task_id) {
            return Ok(None);
        }
        let Some(task) = self.inner.engine.db().get_task(task_id).await? else {
            return Ok(None);
        };
        if task.status != from {
            return Ok(None);
        }
        self.enqueue(task_id, explicit_destination(&task)).map(Some)
    }

    /// Cancel a task in any non-terminal state. Running tasks stop within one
    /// chunk; held and paused tasks are settled here.
    pub async fn cancel(&self, task_id: TaskId) -> Result<bool> {
        if self.inner.control.request(task_id, StopReason::Cancel) {
            return Ok(true);
        }
        if self.take_held(task_id) {
            self.settle_held(task_id, TaskStatus::Cancelled).await?;
            return Ok(true);
        }
        let Some(mut task) = self.inner.engine.db().get_task(task_id).await? else {
            return Ok(false);
        };
        if !task.status.can_transition_to(TaskStatus::Cancelled) || task.status.is_active() {
            return Ok(false);
        }
        self.inner.engine.discard_partial(&task).await?;
        self.inner
            .engine
            .transition(&mut task, TaskStatus::Cancelled, None)
            .await?;
        Ok(true)
    }

    fn take_held(&self, task_id: TaskId) -> bool {
        let mut state = self.state();
        let held = state.unqueue(task_id);
        if held {
            if let Some(path) = state.reserved.remove(&task_id) {
                self.inner.destinations.release(&path);
            }
            self.publish_outstanding(&state);
        }
        held
    }

    async fn settle_held(&self, task_id: TaskId, next: TaskStatus) -> Result<()> {
        let engine = &self.inner.engine;
        let Some(mut task) = engine.db().get_task(task_id).await? else {
            return Ok(());
        };
        if next == TaskStatus::Cancelled {
            engine.discard_partial(&task).await?;
        }
        if task.status.can_transition_to(next) {
            engine.transition(&mut task, next, None).await?;
        }
        Ok(())
    }

    /// Latest progress snapshot of a running task.
    pub fn progress(&self, task_id: TaskId) -> Option<ProgressSnapshot> {
        self.state()
            .active
            .get(&task_id)
            .and_then(|entry| entry.progress.latest())
    }

    pub fn active_count(&self) -> usize {
        self.state().active.len()
    }

    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    pub fn active_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<_> = self.state().active.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Resolve once no task is running or held.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.outstanding.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Shutdown: stop admitting, return held tasks to the store as `Queued`,
    /// pause every running engine and wait until their state is flushed.
    pub async fn teardown(&self) {
        let running = {
            let mut state = self.state();
            state.closed = true;
            let held: Vec<_> = state.pending.drain(..).collect();
            for id in held {
                if let Some(path) = state.reserved.remove(&id) {
                    self.inner.destinations.release(&path);
                }
            }
            self.publish_outstanding(&state);
            state.active.len()
        };
        let n = self.inner.control.request_all(StopReason::Pause);
        tracing::info!(running = n, "teardown: pausing running tasks");
        if running > 0 {
            self.wait_idle().await;
        }
    }
}

fn explicit_destination(task: &DownloadTask) -> Option<PathBuf> {
    (!task.destination_is_dir).then(|| task.destination.clone())
}

#[cfg(test)]
mod tests;
