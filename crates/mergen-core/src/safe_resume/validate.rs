//! Compares stored task metadata with a fresh probe.

use std::fmt;

use crate::probe::ProbeResult;
use crate::task::DownloadTask;

/// Which validators differ between the stored task and the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteChanged {
    pub etag: bool,
    pub last_modified: bool,
    pub size: bool,
}

impl fmt::Display for RemoteChanged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut what = Vec::new();
        if self.etag {
            what.push("ETag");
        }
        if self.last_modified {
            what.push("Last-Modified");
        }
        if self.size {
            what.push("size");
        }
        write!(f, "remote resource changed ({})", what.join(", "))
    }
}

impl std::error::Error for RemoteChanged {}

fn differs<T: PartialEq>(stored: &Option<T>, current: &Option<T>) -> bool {
    match (stored, current) {
        (None, _) => false,
        (Some(a), Some(b)) => a != b,
        (Some(_), None) => true,
    }
}

/// Ok if persisted progress for `task` can be reused against `probe`.
///
/// Only validators that were recorded are compared; one that was recorded
/// but is now missing counts as a change.
pub fn validate_for_resume(task: &DownloadTask, probe: &ProbeResult) -> Result<(), RemoteChanged> {
    let changed = RemoteChanged {
        etag: differs(&task.etag, &probe.etag),
        last_modified: differs(&task.last_modified, &probe.last_modified),
        size: differs(&task.total_size, &probe.total_size),
    };
    if changed.etag || changed.last_modified || changed.size {
        Err(changed)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskKind, TaskStatus};
    use std::path::PathBuf;

    const LM: &str = "Wed, 21 Oct 2015 07:28:00 GMT";

    fn task(size: Option<u64>, etag: Option<&str>, lm: Option<&str>) -> DownloadTask {
        DownloadTask {
            id: 1,
            url: "https://example.com/file.bin".into(),
            destination: PathBuf::from("/tmp/file.bin"),
            destination_is_dir: false,
            suggested_filename: None,
            total_size: size,
            connections: 4,
            range_supported: Some(true),
            etag: etag.map(String::from),
            last_modified: lm.map(String::from),
            kind: TaskKind::DirectSegmented,
            status: TaskStatus::Paused,
            created_at: 0,
            updated_at: 0,
            last_error: None,
        }
    }

    fn probe(size: Option<u64>, etag: Option<&str>, lm: Option<&str>) -> ProbeResult {
        ProbeResult {
            total_size: size,
            range_supported: true,
            etag: etag.map(String::from),
            last_modified: lm.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn nothing_recorded_is_ok() {
        assert!(validate_for_resume(&task(None, None, None), &probe(Some(10), Some("e"), Some(LM))).is_ok());
    }

    #[test]
    fn unchanged_is_ok() {
        let t = task(Some(1000), Some("e1"), Some(LM));
        assert!(validate_for_resume(&t, &probe(Some(1000), Some("e1"), Some(LM))).is_ok());
    }

    #[test]
    fn etag_change_detected() {
        let t = task(Some(1000), Some("e1"), None);
        let err = validate_for_resume(&t, &probe(Some(1000), Some("e2"), None)).unwrap_err();
        assert!(err.etag && !err.size && !err.last_modified);
        assert_eq!(err.to_string(), "remote resource changed (ETag)");
    }

    #[test]
    fn size_and_last_modified_change_detected() {
        let t = task(Some(1000), None, Some(LM));
        let err = validate_for_resume(&t, &probe(Some(2000), None, Some("Thu, 22 Oct 2015"))).unwrap_err();
        assert!(err.size && err.last_modified);
        assert_eq!(err.to_string(), "remote resource changed (Last-Modified, size)");
    }

    #[test]
    fn validator_that_disappeared_counts_as_change() {
        let t = task(Some(1000), Some("e1"), None);
        assert!(validate_for_resume(&t, &probe(Some(1000), None, None)).is_err());
    }
}
