//! Admission state: running tasks, held tasks in FIFO order, and the ceiling.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use crate::progress::ProgressSink;
use crate::task::TaskId;

pub(super) struct ActiveEntry {
    pub(super) progress: ProgressSink,
}

pub(super) struct State {
    pub(super) active: HashMap<TaskId, ActiveEntry>,
    pub(super) pending: VecDeque<TaskId>,
    /// Explicit destinations claimed at submission, released when the task settles.
    pub(super) reserved: HashMap<TaskId, PathBuf>,
    pub(super) ceiling: usize,
    /// Set by teardown; nothing new is admitted afterwards.
    pub(super) closed: bool,
}

impl State {
    pub(super) fn new(ceiling: usize) -> Self {
        Self {
            active: HashMap::new(),
            pending: VecDeque::new(),
            reserved: HashMap::new(),
            ceiling: ceiling.max(1),
            closed: false,
        }
    }

    pub(super) fn has_slot(&self) -> bool {
        !self.closed && self.active.len() < self.ceiling
    }

    pub(super) fn is_known(&self, id: TaskId) -> bool {
        self.active.contains_key(&id) || self.pending.contains(&id)
    }

    /// Remove `id` from the held queue. Returns whether it was held.
    pub(super) fn unqueue(&mut self, id: TaskId) -> bool {
        match self.pending.iter().position(|&p| p == id) {
            Some(pos) => {
                self.pending.remove(pos);
                true
            }
            None => false,
        }
    }

    pub(super) fn outstanding(&self) -> usize {
        self.active.len() + self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unqueue_keeps_fifo_order() {
        let mut s = State::new(2);
        s.pending.extend([1, 2, 3]);
        assert!(s.unqueue(2));
        assert!(!s.unqueue(2));
        assert_eq!(s.pending.iter().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert!(s.is_known(3));
        assert!(!s.is_known(2));
    }

    #[test]
    fn closed_state_has_no_slot() {
        let mut s = State::new(0);
        assert_eq!(s.ceiling, 1);
        assert!(s.has_slot());
        s.closed = true;
        assert!(!s.has_slot());
    }
}
