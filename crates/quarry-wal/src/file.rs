//! A single append-only WAL file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use quarry_common::config::SyncMode;

use crate::error::WalResult;

/// One pooled log file.
///
/// A file is `active` while it is part of the pool and accepting appends.
/// Once rotated out it stays on disk until every page it recorded has been
/// confirmed flushed to its owning component file, tracked by the
/// pending-page counter.
pub struct WalFile {
    /// File sequence number (also the source of the file name).
    seq: u64,
    /// Path to the file.
    path: PathBuf,
    /// File handle.
    file: Mutex<File>,
    /// Current size in bytes.
    size: AtomicU64,
    /// Pages recorded but not yet confirmed flushed.
    pending_pages: AtomicU64,
    /// Whether the file is still part of the active pool.
    active: AtomicBool,
}

impl WalFile {
    /// Creates a new, empty log file.
    pub fn create(seq: u64, path: impl AsRef<Path>) -> WalResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        Ok(Self {
            seq,
            path,
            file: Mutex::new(file),
            size: AtomicU64::new(0),
            pending_pages: AtomicU64::new(0),
            active: AtomicBool::new(true),
        })
    }

    /// Returns the file sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current size in bytes.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Returns true if this file is part of the active pool.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Marks the file as rotated out of the pool.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Records `count` pages as pending flush.
    pub fn add_pending_pages(&self, count: u64) {
        self.pending_pages.fetch_add(count, Ordering::AcqRel);
    }

    /// Confirms `count` pages as flushed to their component files.
    pub fn complete_pages(&self, count: u64) {
        self.pending_pages.fetch_sub(count, Ordering::AcqRel);
    }

    /// Returns the number of pages still pending flush.
    pub fn pending_pages(&self) -> u64 {
        self.pending_pages.load(Ordering::Acquire)
    }

    /// Returns true if the file is rotated out and fully drained, and can be
    /// physically deleted.
    pub fn is_reapable(&self) -> bool {
        !self.is_active() && self.pending_pages() == 0
    }

    /// Appends an encoded entry, honoring the durability mode.
    ///
    /// The append and the flush happen under the file mutex, so entries from
    /// concurrent commits on the same pool slot never interleave.
    pub fn append(&self, frame: &[u8], sync: SyncMode) -> WalResult<()> {
        let mut file = self.file.lock();
        file.write_all(frame)?;
        match sync {
            SyncMode::Buffered => {}
            SyncMode::Data => file.sync_data()?,
            SyncMode::Full => file.sync_all()?,
        }
        self.size.fetch_add(frame.len() as u64, Ordering::AcqRel);
        Ok(())
    }

    /// Deletes the file from disk. The in-memory handle must be dropped
    /// afterwards.
    pub fn delete(&self) -> WalResult<()> {
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}

impl std::fmt::Debug for WalFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalFile")
            .field("seq", &self.seq)
            .field("path", &self.path)
            .field("size", &self.size())
            .field("pending_pages", &self.pending_pages())
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_append() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wal_0000000000000000.wal");

        let file = WalFile::create(0, &path).unwrap();
        assert_eq!(file.size(), 0);
        assert!(file.is_active());

        file.append(b"hello", SyncMode::Full).unwrap();
        assert_eq!(file.size(), 5);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn test_pending_pages() {
        let tmp = TempDir::new().unwrap();
        let file = WalFile::create(0, tmp.path().join("a.wal")).unwrap();

        file.add_pending_pages(3);
        assert_eq!(file.pending_pages(), 3);
        assert!(!file.is_reapable()); // still active

        file.deactivate();
        assert!(!file.is_reapable()); // still pending

        file.complete_pages(3);
        assert!(file.is_reapable());
    }

    #[test]
    fn test_delete() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("b.wal");
        let file = WalFile::create(1, &path).unwrap();
        assert!(path.exists());
        file.delete().unwrap();
        assert!(!path.exists());
    }
}
