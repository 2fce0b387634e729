//! Destination path reservations shared by the scheduler and its engines.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::storage::temp_path;

/// Set of final paths currently claimed by a live task.
#[derive(Debug, Default)]
pub struct DestinationLocks {
    held: Mutex<HashSet<PathBuf>>,
}

impl DestinationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `path`. Returns false if another task holds it.
    pub fn try_reserve(&self, path: &Path) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_path_buf())
    }

    pub fn release(&self, path: &Path) {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path);
    }

    pub fn is_reserved(&self, path: &Path) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(path)
    }

    /// Reserve a free name in `dir` based on `name`: `name`, then
    /// `stem (1).ext`, `stem (2).ext`, ... A name is free when neither it
    /// nor its `.part` exists on disk and no live task holds it.
    pub fn reserve_unique(&self, dir: &Path, name: &str) -> PathBuf {
        let (stem, ext) = match name.rsplit_once('.') {
            Some((s, e)) if !s.is_empty() => (s, Some(e)),
            _ => (name, None),
        };
        let mut n = 0u32;
        loop {
            let candidate = match (n, ext) {
                (0, _) => dir.join(name),
                (_, Some(ext)) => dir.join(format!("{} ({}).{}", stem, n, ext)),
                (_, None) => dir.join(format!("{} ({})", stem, n)),
            };
            if !candidate.exists() && !temp_path(&candidate).exists() && self.try_reserve(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}
