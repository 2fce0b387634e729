//! Per-segment progress counters shared between workers and readers.
//!
//! Each slot is written by the one worker that owns the segment at a time;
//! the progress tracker and checkpoint loop only load.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::segmenter::SegmentRange;
use crate::task::{SegmentRecord, SegmentStatus, TaskId};

/// Live state of one segment.
#[derive(Debug)]
pub struct SegmentSlot {
    pub index: usize,
    pub range: SegmentRange,
    downloaded: AtomicU64,
    status: AtomicU8,
    retries: AtomicU32,
}

impl SegmentSlot {
    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Acquire)
    }

    pub(crate) fn add_downloaded(&self, n: u64) {
        self.downloaded.fetch_add(n, Ordering::AcqRel);
    }

    pub(crate) fn reset_downloaded(&self) {
        self.downloaded.store(0, Ordering::Release);
    }

    pub fn status(&self) -> SegmentStatus {
        SegmentStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: SegmentStatus) {
        self.status.store(status.to_u8(), Ordering::Release);
    }

    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::Acquire)
    }

    pub(crate) fn bump_retries(&self) -> u32 {
        self.retries.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Absolute offset of the next byte this segment needs.
    pub fn next_offset(&self) -> u64 {
        self.range.start + self.downloaded()
    }

    /// Bytes left, if the range is bounded.
    pub fn remaining(&self) -> Option<u64> {
        self.range.len().map(|len| len.saturating_sub(self.downloaded()))
    }
}

/// All segments of one task plus worker concurrency counters.
#[derive(Debug, Clone)]
pub struct SegmentBoard {
    task_id: TaskId,
    slots: Arc<Vec<SegmentSlot>>,
    active_workers: Arc<AtomicUsize>,
    peak_workers: Arc<AtomicUsize>,
}

impl SegmentBoard {
    pub fn from_records(task_id: TaskId, records: &[SegmentRecord]) -> Self {
        let slots = records
            .iter()
            .map(|r| {
                let status = if r.status == SegmentStatus::Active {
                    SegmentStatus::Pending
                } else {
                    r.status
                };
                SegmentSlot {
                    index: r.index,
                    range: r.range(),
                    downloaded: AtomicU64::new(r.downloaded),
                    status: AtomicU8::new(status.to_u8()),
                    retries: AtomicU32::new(r.retries),
                }
            })
            .collect();
        Self {
            task_id,
            slots: Arc::new(slots),
            active_workers: Arc::new(AtomicUsize::new(0)),
            peak_workers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> &SegmentSlot {
        &self.slots[index]
    }

    pub fn slots(&self) -> &[SegmentSlot] {
        &self.slots
    }

    pub fn total_downloaded(&self) -> u64 {
        self.slots.iter().map(SegmentSlot::downloaded).sum()
    }

    pub fn all_complete(&self) -> bool {
        self.slots
            .iter()
            .all(|s| s.status() == SegmentStatus::Complete)
    }

    pub fn incomplete(&self) -> Vec<usize> {
        self.slots
            .iter()
            .filter(|s| s.status() != SegmentStatus::Complete)
            .map(|s| s.index)
            .collect()
    }

    /// Copy of every slot as plain records, for the store and progress snapshots.
    pub fn snapshot(&self) -> Vec<SegmentRecord> {
        self.slots
            .iter()
            .map(|s| SegmentRecord {
                task_id: self.task_id,
                index: s.index,
                start: s.range.start,
                end: s.range.end,
                downloaded: s.downloaded(),
                status: s.status(),
                retries: s.retries(),
            })
            .collect()
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::Acquire)
    }

    /// Highest number of workers that were transferring at the same time.
    pub fn peak_workers(&self) -> usize {
        self.peak_workers.load(Ordering::Acquire)
    }

    pub(crate) fn worker_started(&self) {
        let now = self.active_workers.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_workers.fetch_max(now, Ordering::AcqRel);
    }

    pub(crate) fn worker_finished(&self) {
        self.active_workers.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmenter::{plan_segments, PlanLimits};

    fn board(total: u64, n: usize) -> SegmentBoard {
        let limits = PlanLimits {
            max_connections: 64,
            min_segment_size: 1,
        };
        let records: Vec<_> = plan_segments(Some(total), n, limits)
            .into_iter()
            .enumerate()
            .map(|(i, r)| SegmentRecord::new(9, i, r))
            .collect();
        SegmentBoard::from_records(9, &records)
    }

    #[test]
    fn snapshot_reflects_counters() {
        let b = board(1000, 4);
        b.slot(1).add_downloaded(100);
        b.slot(3).add_downloaded(250);
        b.slot(3).set_status(SegmentStatus::Complete);
        assert_eq!(b.total_downloaded(), 350);
        assert_eq!(b.incomplete(), vec![0, 1, 2]);
        let snap = b.snapshot();
        assert_eq!(snap[1].downloaded, 100);
        assert_eq!(snap[1].next_offset(), 350);
        assert_eq!(snap[3].status, SegmentStatus::Complete);
        assert!(snap.iter().all(|r| r.task_id == 9));
    }

    #[test]
    fn active_records_load_as_pending() {
        let mut rec = SegmentRecord::new(1, 0, SegmentRange { start: 0, end: Some(9) });
        rec.status = SegmentStatus::Active;
        let b = SegmentBoard::from_records(1, &[rec]);
        assert_eq!(b.slot(0).status(), SegmentStatus::Pending);
    }

    #[test]
    fn peak_workers_is_a_high_water_mark() {
        let b = board(100, 2);
        b.worker_started();
        b.worker_started();
        b.worker_finished();
        b.worker_started();
        b.worker_finished();
        b.worker_finished();
        assert_eq!(b.active_workers(), 0);
        assert_eq!(b.peak_workers(), 2);
    }
}
