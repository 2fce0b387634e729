//! Task control for pause/cancel: shared stop tokens and a registry keyed by task id.
//!
//! Each running engine holds a `StopToken`. Workers poll it once per chunk and
//! during backoff sleeps; the engine reads the reason to decide between
//! `Paused` and `Cancelled`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use crate::task::TaskId;

/// Why a stop was requested. User requests outrank the internal abort, and
/// cancel outranks pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Pause,
    Cancel,
    /// Internal: the engine is abandoning the current worker pool (range fallback, fatal error).
    Abort,
}

const NONE: u8 = 0;
const ABORT: u8 = 1;
const PAUSE: u8 = 2;
const CANCEL: u8 = 3;

/// Cheap clonable stop flag shared between an engine and its workers.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    state: Arc<AtomicU8>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the token. A stronger reason replaces a weaker one, never the reverse.
    pub fn raise(&self, reason: StopReason) {
        let value = match reason {
            StopReason::Pause => PAUSE,
            StopReason::Abort => ABORT,
            StopReason::Cancel => CANCEL,
        };
        self.state.fetch_max(value, Ordering::AcqRel);
    }

    pub fn is_raised(&self) -> bool {
        self.state.load(Ordering::Acquire) != NONE
    }

    pub fn reason(&self) -> Option<StopReason> {
        match self.state.load(Ordering::Acquire) {
            PAUSE => Some(StopReason::Pause),
            ABORT => Some(StopReason::Abort),
            CANCEL => Some(StopReason::Cancel),
            _ => None,
        }
    }

    /// Clear an internal abort so the next worker pool can run. User requests are kept.
    pub(crate) fn clear_abort(&self) {
        let _ = self
            .state
            .compare_exchange(ABORT, NONE, Ordering::AcqRel, Ordering::Acquire);
    }
}

/// Shared registry of task id -> stop token. The scheduler registers each
/// running engine; front ends (control socket, GUI) request pause/cancel by id.
#[derive(Default)]
pub struct JobControl {
    tasks: RwLock<HashMap<TaskId, StopToken>>,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running task; returns the token to hand to its engine.
    pub fn register(&self, task_id: TaskId) -> StopToken {
        let token = StopToken::new();
        self.tasks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(task_id, token.clone());
        token
    }

    /// Unregister a task (call when the engine finishes, whatever the outcome).
    pub fn unregister(&self, task_id: TaskId) {
        self.tasks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&task_id);
    }

    /// Raise the stop token of a running task. Returns false if the task is not running.
    pub fn request(&self, task_id: TaskId, reason: StopReason) -> bool {
        match self
            .tasks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&task_id)
        {
            Some(token) => {
                token.raise(reason);
                true
            }
            None => false,
        }
    }

    /// Raise `reason` on every registered task (used at teardown).
    pub fn request_all(&self, reason: StopReason) -> usize {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        for token in tasks.values() {
            token.raise(reason);
        }
        tasks.len()
    }
}

/// Default path for the control socket (same XDG state dir as the DB).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("mergen")?.get_state_home();
    Ok(dir.join("control.sock"))
}
