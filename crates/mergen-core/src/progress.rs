//! Progress aggregation: combines per-segment counters into speed, percent and ETA.
//!
//! The tracker only loads the segment board's atomics; it never blocks a
//! worker. Speed is averaged over a sliding window of samples.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::downloader::SegmentBoard;
use crate::task::{SegmentStatus, TaskId};

/// Progress of one segment inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentProgress {
    pub index: usize,
    pub downloaded: u64,
    pub len: Option<u64>,
    pub status: SegmentStatus,
}

/// Point-in-time view of a running task. Not persisted.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub task_id: TaskId,
    pub downloaded: u64,
    pub total: Option<u64>,
    /// Average over the sliding window.
    pub bytes_per_sec: f64,
    /// `None` when the total size is unknown.
    pub percent: Option<f64>,
    /// `None` when the total is unknown or speed is zero.
    pub eta: Option<Duration>,
    pub segments: Vec<SegmentProgress>,
}

pub struct ProgressTracker {
    board: SegmentBoard,
    total: Option<u64>,
    window: VecDeque<(Instant, u64)>,
    capacity: usize,
}

impl ProgressTracker {
    /// `window` is the number of samples averaged for speed (at least 2).
    pub fn new(board: SegmentBoard, total: Option<u64>, window: usize) -> Self {
        let capacity = window.max(2);
        Self {
            board,
            total,
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn sample(&mut self) -> ProgressSnapshot {
        self.sample_at(Instant::now())
    }

    fn sample_at(&mut self, now: Instant) -> ProgressSnapshot {
        let downloaded = self.board.total_downloaded();
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back((now, downloaded));

        let bytes_per_sec = match (self.window.front(), self.window.back()) {
            (Some(&(t0, b0)), Some(&(t1, b1))) if t1 > t0 => {
                b1.saturating_sub(b0) as f64 / (t1 - t0).as_secs_f64()
            }
            _ => 0.0,
        };

        let percent = self.total.map(|total| {
            if total == 0 {
                100.0
            } else {
                (downloaded.min(total) as f64 / total as f64) * 100.0
            }
        });

        let eta = match self.total {
            Some(total) if bytes_per_sec > f64::EPSILON => {
                let remaining = total.saturating_sub(downloaded);
                Some(Duration::from_secs_f64(remaining as f64 / bytes_per_sec))
            }
            _ => None,
        };

        let segments = self
            .board
            .slots()
            .iter()
            .map(|s| SegmentProgress {
                index: s.index,
                downloaded: s.downloaded(),
                len: s.range.len(),
                status: s.status(),
            })
            .collect();

        ProgressSnapshot {
            task_id: self.board.task_id(),
            downloaded,
            total: self.total,
            bytes_per_sec,
            percent,
            eta,
            segments,
        }
    }
}

/// Where snapshots go: a latest-value cell for pull readers and an optional
/// bounded channel for push readers. A full channel drops the snapshot.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    latest: Arc<Mutex<Option<ProgressSnapshot>>>,
    tx: Option<mpsc::Sender<ProgressSnapshot>>,
}

impl ProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, tx: mpsc::Sender<ProgressSnapshot>) -> Self {
        self.tx = Some(tx);
        self
    }

    pub fn publish(&self, snapshot: ProgressSnapshot) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(snapshot.clone());
        }
        *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(snapshot);
    }

    /// Most recent snapshot, if the task has produced one.
    pub fn latest(&self) -> Option<ProgressSnapshot> {
        self.latest.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
