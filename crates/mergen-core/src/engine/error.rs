//! Task-level failure causes surfaced to front ends.

use crate::downloader::SegmentFailure;
use crate::external::ExternalError;
use crate::retry::{is_disk_full, ErrorKind, SegmentError};

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Disk full, permission denied or any other local write failure.
    #[error("storage failure: {0}")]
    Resource(String),
    /// Server behaved in a way the engine cannot work with.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A transient failure that outlasted every retry and re-queue.
    #[error("giving up after retries: {0}")]
    RetriesExhausted(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("downloaded {actual} bytes but the server announced {expected}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("external tool failed: {0}")]
    External(#[from] ExternalError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl TaskError {
    pub(crate) fn from_segment_failure(f: &SegmentFailure) -> Self {
        let msg = if f.index == usize::MAX {
            f.error.to_string()
        } else {
            format!("segment {}: {}", f.index, f.error)
        };
        Self::from_kind(f.kind, &f.error, msg)
    }

    pub(crate) fn from_probe_error(e: &SegmentError) -> Self {
        Self::from_kind(crate::retry::classify(e), e, e.to_string())
    }

    fn from_kind(kind: ErrorKind, e: &SegmentError, msg: String) -> Self {
        if let SegmentError::Storage(io) = e {
            if is_disk_full(io) {
                return TaskError::Resource(format!("disk full ({})", msg));
            }
        }
        match kind {
            ErrorKind::Resource => TaskError::Resource(msg),
            ErrorKind::Protocol => TaskError::Protocol(msg),
            k if k.is_transient() => TaskError::RetriesExhausted(msg),
            _ => TaskError::Request(msg),
        }
    }

    /// Storage errors from file setup (`anyhow` chains from the storage layer).
    pub(crate) fn storage(e: anyhow::Error) -> Self {
        TaskError::Resource(format!("{:#}", e))
    }
}
