//! Disk I/O and file lifecycle.
//!
//! Preallocates the `.part` file (fallocate on Linux when available, else
//! set_len), supports concurrent offset writes (pwrite) from segment workers,
//! and finalizes with an atomic rename onto the destination.

mod builder;
mod writer;

use std::io;
use std::path::{Path, PathBuf};

pub use builder::StorageWriterBuilder;
pub use writer::StorageWriter;

/// Temporary file suffix used before atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the temp file: appends `.part` to the final path (e.g. `file.iso` → `file.iso.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

/// Delete a partial file. A missing file is not an error.
pub fn remove_partial(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn temp_path_appends_part() {
        let p = temp_path(Path::new("file.iso"));
        assert_eq!(p.to_string_lossy(), "file.iso.part");
        let p2 = temp_path(Path::new("/tmp/archive.zip"));
        assert_eq!(p2.to_string_lossy(), "/tmp/archive.zip.part");
    }

    #[test]
    fn create_preallocate_write_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("output.bin");
        let tp = temp_path(&final_path);

        let mut builder = StorageWriterBuilder::create(&tp).unwrap();
        builder.preallocate(100).unwrap();
        let writer = builder.build();

        writer.write_at(0, b"hello").unwrap();
        writer.write_at(50, b"world").unwrap();
        writer.write_at(95, b"xy").unwrap();
        writer.sync().unwrap();
        assert_eq!(writer.len().unwrap(), 100);
        writer.finalize(&final_path).unwrap();

        assert!(!tp.exists());
        let mut buf = Vec::new();
        std::fs::File::open(&final_path)
            .unwrap()
            .read_to_end(&mut buf)
            .unwrap();
        assert_eq!(buf.len(), 100);
        assert_eq!(&buf[0..5], b"hello");
        assert_eq!(&buf[50..55], b"world");
        assert_eq!(&buf[95..97], b"xy");
    }

    #[test]
    fn finalize_replaces_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("out.bin");
        std::fs::write(&final_path, b"stale contents").unwrap();
        let writer = StorageWriterBuilder::create(&temp_path(&final_path))
            .unwrap()
            .build();
        writer.write_at(0, b"new").unwrap();
        writer.finalize(&final_path).unwrap();
        assert_eq!(std::fs::read(&final_path).unwrap(), b"new");
    }

    #[test]
    fn reopen_keeps_existing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let tp = dir.path().join("resume.part");
        {
            let mut b = StorageWriterBuilder::create(&tp).unwrap();
            b.preallocate(8).unwrap();
            b.build().write_at(0, b"abcd").unwrap();
        }
        let w = StorageWriter::open_existing(&tp).unwrap();
        w.write_at(4, b"efgh").unwrap();
        assert_eq!(std::fs::read(&tp).unwrap(), b"abcdefgh");
    }

    #[test]
    fn concurrent_disjoint_writes_land_at_their_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let tp = dir.path().join("parallel.part");
        let mut b = StorageWriterBuilder::create(&tp).unwrap();
        b.preallocate(8 * 4096).unwrap();
        let writer = b.build();

        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let w = writer.clone();
                std::thread::spawn(move || {
                    for chunk in 0..64u64 {
                        let offset = i as u64 * 4096 + chunk * 64;
                        w.write_at(offset, &[i; 64]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        writer.sync().unwrap();

        let data = std::fs::read(&tp).unwrap();
        for (i, block) in data.chunks(4096).enumerate() {
            assert!(block.iter().all(|&b| b == i as u8), "block {} was interleaved", i);
        }
    }

    #[test]
    fn remove_partial_ignores_missing() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("gone.part");
        remove_partial(&p).unwrap();
        std::fs::write(&p, b"x").unwrap();
        remove_partial(&p).unwrap();
        assert!(!p.exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn full_device_reports_disk_full() {
        let w = StorageWriter::open_existing(Path::new("/dev/full")).unwrap();
        let err = w.write_at(0, b"data").unwrap_err();
        assert!(crate::retry::is_disk_full(&err));
    }
}
