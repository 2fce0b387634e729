//! Concurrent offset writer for temp download files.

use anyhow::{Context, Result};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
#[cfg(unix)]
use std::os::unix::fs::FileExt;

/// Writer for a temp download file. Safe to clone and use from multiple
/// workers on Unix and Windows; each `write_at` is positional (pwrite-style),
/// so workers writing disjoint ranges never need a lock.
#[derive(Clone)]
pub struct StorageWriter {
    file: Arc<File>,
    temp_path: PathBuf,
}

impl StorageWriter {
    pub(crate) fn from_file_and_path(file: File, temp_path: PathBuf) -> Self {
        Self {
            file: Arc::new(file),
            temp_path,
        }
    }

    /// Open an existing temp file for resume (read+write, no truncation).
    pub fn open_existing(temp_path: &Path) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .open(temp_path)
            .with_context(|| format!("failed to open existing temp file: {}", temp_path.display()))?;
        Ok(StorageWriter {
            file: Arc::new(file),
            temp_path: temp_path.to_path_buf(),
        })
    }

    /// Write all of `data` at `offset`. Does not move the file cursor.
    /// Errors keep their OS code so callers can tell a full disk apart.
    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.write_all_at(data, offset)
    }

    /// Windows: positional `seek_write`, looped until all of `data` is written.
    #[cfg(windows)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        let mut done = 0usize;
        while done < data.len() {
            let n = self.file.seek_write(&data[done..], offset + done as u64)?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "short write"));
            }
            done += n;
        }
        Ok(())
    }

    /// Other platforms: seek + write on a cloned handle. Not safe for concurrent use.
    #[cfg(not(any(unix, windows)))]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = (*self.file).try_clone()?;
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(data)
    }

    /// Flush file data to disk. Called before every checkpoint so persisted
    /// progress never runs ahead of what is on disk.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_data().context("storage sync failed")?;
        Ok(())
    }

    /// Current length of the temp file.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata().context("storage stat failed")?.len())
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Atomically rename the temp file onto `final_path`, replacing it if present.
    /// Consumes the writer. Fails if `final_path` is on a different filesystem.
    pub fn finalize(self, final_path: &Path) -> Result<()> {
        let temp_path = self.temp_path.clone();
        drop(self.file);

        std::fs::rename(&temp_path, final_path).with_context(|| {
            format!(
                "failed to rename {} to {}",
                temp_path.display(),
                final_path.display()
            )
        })?;
        Ok(())
    }
}
