//! Segment download error type for retry classification.

use std::fmt;

/// Error returned by a single transfer attempt (probe or segment).
/// Kept separate from anyhow so callers can classify and decide retries first.
#[derive(Debug)]
pub enum SegmentError {
    /// Curl reported an error (timeout, connection, TLS, etc.).
    Curl(curl::Error),
    /// HTTP response had a non-2xx status.
    Http(u32),
    /// Server answered `200 OK` to a ranged request.
    RangeIgnored,
    /// `206` whose Content-Range does not start at the requested offset.
    ContentRangeMismatch { requested: u64, got: Option<u64> },
    /// Transfer completed but fewer bytes were written than the segment length
    /// (e.g. server closed early).
    PartialTransfer { expected: u64, received: u64 },
    /// Disk/storage write failed (e.g. disk full, permission denied). Not retried.
    Storage(std::io::Error),
    /// The stop token was raised (pause or cancel).
    Cancelled,
    /// A worker thread died before reporting its segment.
    WorkerLost,
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentError::Curl(e) => write!(f, "{}", e),
            SegmentError::Http(code) => write!(f, "HTTP {}", code),
            SegmentError::RangeIgnored => write!(f, "server ignored the Range header (200 OK)"),
            SegmentError::ContentRangeMismatch { requested, got } => match got {
                Some(start) => write!(
                    f,
                    "Content-Range starts at {}, requested {}",
                    start, requested
                ),
                None => write!(f, "missing Content-Range for offset {}", requested),
            },
            SegmentError::PartialTransfer { expected, received } => {
                write!(f, "partial transfer: expected {} bytes, got {}", expected, received)
            }
            SegmentError::Storage(e) => {
                if is_disk_full(e) {
                    write!(f, "disk full: {}", e)
                } else {
                    write!(f, "storage: {}", e)
                }
            }
            SegmentError::Cancelled => write!(f, "stopped by user"),
            SegmentError::WorkerLost => write!(f, "segment worker exited without a result"),
        }
    }
}

impl std::error::Error for SegmentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SegmentError::Curl(e) => Some(e),
            SegmentError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

/// True for ENOSPC / EDQUOT style failures.
pub(crate) fn is_disk_full(e: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        matches!(e.raw_os_error(), Some(code) if code == libc::ENOSPC || code == libc::EDQUOT)
    }
    #[cfg(not(unix))]
    {
        let _ = e;
        false
    }
}
