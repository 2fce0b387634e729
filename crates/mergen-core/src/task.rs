//! Download task and segment records shared by the engine, store and scheduler.

use std::path::PathBuf;

use serde::Serialize;

use crate::segmenter::SegmentRange;

/// Task identifier (SQLite rowid; unique across restarts).
pub type TaskId = i64;

/// Lifecycle state of a download task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Probing,
    Downloading,
    Paused,
    Completing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Probing => "probing",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Paused => "paused",
            TaskStatus::Completing => "completing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Unknown strings map to `Failed` so a corrupt row is never silently resumed.
    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => TaskStatus::Queued,
            "probing" => TaskStatus::Probing,
            "downloading" => TaskStatus::Downloading,
            "paused" => TaskStatus::Paused,
            "completing" => TaskStatus::Completing,
            "completed" => TaskStatus::Completed,
            "cancelled" => TaskStatus::Cancelled,
            _ => TaskStatus::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    /// States in which an engine is (or should be) running.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TaskStatus::Probing | TaskStatus::Downloading | TaskStatus::Completing
        )
    }

    /// Legal edges of the task state machine.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Queued, Probing)
                | (Queued, Paused)
                | (Queued, Cancelled)
                | (Probing, Downloading)
                | (Probing, Paused)
                | (Probing, Failed)
                | (Probing, Cancelled)
                | (Downloading, Paused)
                | (Downloading, Completing)
                | (Downloading, Failed)
                | (Downloading, Cancelled)
                | (Paused, Downloading)
                | (Paused, Probing)
                | (Paused, Failed)
                | (Paused, Cancelled)
                | (Completing, Completed)
                | (Completing, Failed)
                | (Failed, Probing)
                | (Failed, Cancelled)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External process a delegated task is handed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalTool {
    /// Platform video pages (yt-dlp).
    Extractor,
    /// HLS/DASH manifests remuxed into one file (ffmpeg).
    StreamMuxer,
}

/// How a task is fetched. Chosen once when the task is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    DirectSegmented,
    ExternalDelegated(ExternalTool),
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::DirectSegmented => "direct",
            TaskKind::ExternalDelegated(ExternalTool::Extractor) => "extractor",
            TaskKind::ExternalDelegated(ExternalTool::StreamMuxer) => "muxer",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "extractor" => TaskKind::ExternalDelegated(ExternalTool::Extractor),
            "muxer" => TaskKind::ExternalDelegated(ExternalTool::StreamMuxer),
            _ => TaskKind::DirectSegmented,
        }
    }
}

/// Inbound submission from any front end (GUI, browser bridge, CLI, resumed task).
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    /// File path, or an existing directory in which the filename is derived at probe time.
    pub destination: PathBuf,
    pub connections: Option<usize>,
    pub suggested_filename: Option<String>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            connections: None,
            suggested_filename: None,
        }
    }

    pub fn with_connections(mut self, n: usize) -> Self {
        self.connections = Some(n);
        self
    }
}

/// One user-requested download.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub id: TaskId,
    pub url: String,
    pub destination: PathBuf,
    /// True while `destination` is a directory awaiting a derived filename.
    pub destination_is_dir: bool,
    pub suggested_filename: Option<String>,
    pub total_size: Option<u64>,
    pub connections: usize,
    pub range_supported: Option<bool>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_error: Option<String>,
}

impl DownloadTask {
    /// Records the size learned at probe time. A size never changes once known.
    pub fn learn_size(&mut self, size: Option<u64>) -> bool {
        match (self.total_size, size) {
            (Some(a), Some(b)) if a != b => false,
            (None, s) => {
                self.total_size = s;
                true
            }
            _ => true,
        }
    }
}

/// Status of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentStatus {
    Pending,
    Active,
    Complete,
    Failed,
}

impl SegmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SegmentStatus::Pending => "pending",
            SegmentStatus::Active => "active",
            SegmentStatus::Complete => "complete",
            SegmentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "active" => SegmentStatus::Active,
            "complete" => SegmentStatus::Complete,
            "failed" => SegmentStatus::Failed,
            _ => SegmentStatus::Pending,
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            SegmentStatus::Pending => 0,
            SegmentStatus::Active => 1,
            SegmentStatus::Complete => 2,
            SegmentStatus::Failed => 3,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => SegmentStatus::Active,
            2 => SegmentStatus::Complete,
            3 => SegmentStatus::Failed,
            _ => SegmentStatus::Pending,
        }
    }
}

/// One contiguous byte range of a task with its progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRecord {
    pub task_id: TaskId,
    pub index: usize,
    pub start: u64,
    /// Inclusive end; `None` for the single open-ended segment of an unknown-size download.
    pub end: Option<u64>,
    pub downloaded: u64,
    pub status: SegmentStatus,
    pub retries: u32,
}

impl SegmentRecord {
    pub fn new(task_id: TaskId, index: usize, range: SegmentRange) -> Self {
        Self {
            task_id,
            index,
            start: range.start,
            end: range.end,
            downloaded: 0,
            status: SegmentStatus::Pending,
            retries: 0,
        }
    }

    pub fn range(&self) -> SegmentRange {
        SegmentRange {
            start: self.start,
            end: self.end,
        }
    }

    /// Segment length in bytes, if bounded.
    pub fn len(&self) -> Option<u64> {
        self.range().len()
    }

    pub fn is_complete(&self) -> bool {
        self.status == SegmentStatus::Complete
    }

    /// Absolute file offset of the next byte to fetch.
    pub fn next_offset(&self) -> u64 {
        self.start + self.downloaded
    }

    /// Clamp persisted progress to what the range can hold and demote a
    /// `Complete` segment whose bytes are not all accounted for.
    pub fn sanitize(&mut self) {
        if let Some(len) = self.len() {
            if self.downloaded > len {
                self.downloaded = len;
            }
            if self.downloaded == len {
                self.status = SegmentStatus::Complete;
                return;
            }
        }
        if self.status != SegmentStatus::Pending && self.end.is_some() {
            self.status = SegmentStatus::Pending;
        }
        if self.end.is_none() && self.status == SegmentStatus::Active {
            self.status = SegmentStatus::Pending;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_roundtrip() {
        for s in [
            TaskStatus::Queued,
            TaskStatus::Probing,
            TaskStatus::Downloading,
            TaskStatus::Paused,
            TaskStatus::Completing,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::parse(s.as_str()), s);
        }
        assert_eq!(TaskStatus::parse("garbage"), TaskStatus::Failed);
    }

    #[test]
    fn state_machine_edges() {
        use TaskStatus::*;
        assert!(Queued.can_transition_to(Probing));
        assert!(Probing.can_transition_to(Downloading));
        assert!(Downloading.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Downloading));
        assert!(Downloading.can_transition_to(Completing));
        assert!(Completing.can_transition_to(Completed));
        assert!(Failed.can_transition_to(Probing));

        assert!(!Completed.can_transition_to(Downloading));
        assert!(!Cancelled.can_transition_to(Probing));
        assert!(!Queued.can_transition_to(Completed));
        assert!(!Paused.can_transition_to(Completing));
    }

    #[test]
    fn size_is_learned_once() {
        let mut t = DownloadTask {
            id: 1,
            url: "https://example.com/a".into(),
            destination: PathBuf::from("/tmp/a"),
            destination_is_dir: false,
            suggested_filename: None,
            total_size: None,
            connections: 4,
            range_supported: None,
            etag: None,
            last_modified: None,
            kind: TaskKind::DirectSegmented,
            status: TaskStatus::Queued,
            created_at: 0,
            updated_at: 0,
            last_error: None,
        };
        assert!(t.learn_size(Some(100)));
        assert!(t.learn_size(Some(100)));
        assert!(!t.learn_size(Some(200)));
        assert_eq!(t.total_size, Some(100));
    }

    #[test]
    fn sanitize_clips_and_demotes() {
        let mut over = SegmentRecord::new(1, 0, SegmentRange { start: 0, end: Some(99) });
        over.downloaded = 150;
        over.sanitize();
        assert_eq!(over.downloaded, 100);
        assert_eq!(over.status, SegmentStatus::Complete);

        let mut lying = SegmentRecord::new(1, 1, SegmentRange { start: 100, end: Some(199) });
        lying.downloaded = 40;
        lying.status = SegmentStatus::Complete;
        lying.sanitize();
        assert_eq!(lying.status, SegmentStatus::Pending);
        assert_eq!(lying.next_offset(), 140);
    }
}
