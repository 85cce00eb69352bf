//! WAL replay reader.
//!
//! Recovery opens every residual log file in the database directory and
//! replays entries in strict transaction-id order. Entries within one file
//! are already ascending (the id counter is global and appends are ordered
//! per file), so a k-way merge over the per-file heads yields the global
//! order.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use quarry_common::constants::WAL_FILE_EXT;

use crate::error::{WalError, WalResult};
use crate::record::WalEntry;

/// Upper bound on a single entry frame; anything larger is treated as a
/// corrupt length field rather than allocated.
const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Returns the residual WAL file paths in a directory, sorted by name.
pub fn wal_file_paths(dir: impl AsRef<Path>) -> WalResult<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir.as_ref())? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some(WAL_FILE_EXT) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// A sequential reader over one log file, stopping at the first torn or
/// invalid frame.
struct FileReader {
    path: PathBuf,
    file: BufReader<File>,
    peeked: Option<WalEntry>,
}

impl FileReader {
    fn open(path: PathBuf) -> WalResult<Self> {
        let file = BufReader::new(File::open(&path)?);
        let mut reader = Self {
            path,
            file,
            peeked: None,
        };
        reader.advance()?;
        Ok(reader)
    }

    /// Reads the next entry into `peeked`, or leaves it `None` at the end of
    /// the valid prefix.
    fn advance(&mut self) -> WalResult<()> {
        self.peeked = self.read_entry()?;
        Ok(())
    }

    fn read_entry(&mut self) -> WalResult<Option<WalEntry>> {
        let mut len_buf = [0u8; 4];
        match self.file.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        }

        let frame_len = u32::from_le_bytes(len_buf) as usize;
        if frame_len == 0 || frame_len > MAX_FRAME_LEN {
            // Zeroed tail or garbage framing: end of the valid prefix.
            return Ok(None);
        }
        let mut frame = vec![0u8; 4 + frame_len];
        frame[0..4].copy_from_slice(&len_buf);
        match self.file.read_exact(&mut frame[4..]) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                warn!(path = %self.path.display(), "torn WAL entry at end of file");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        }

        match WalEntry::decode(&frame) {
            Ok(Some((entry, _))) => Ok(Some(entry)),
            // A zeroed or short tail inside the buffer we just framed.
            Ok(None) => Ok(None),
            Err(WalError::Corrupted { reason }) => {
                warn!(path = %self.path.display(), %reason, "invalid WAL entry, ending replay of file");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

/// Streams entries from a set of log files in ascending transaction-id order.
pub struct RecoveryStream {
    readers: Vec<FileReader>,
}

impl RecoveryStream {
    /// Opens every WAL file in the directory.
    pub fn open(dir: impl AsRef<Path>) -> WalResult<Self> {
        let paths = wal_file_paths(dir)?;
        let mut readers = Vec::with_capacity(paths.len());
        for path in paths {
            debug!(path = %path.display(), "opening WAL file for replay");
            readers.push(FileReader::open(path)?);
        }
        Ok(Self { readers })
    }

    /// Returns the number of files being replayed.
    pub fn file_count(&self) -> usize {
        self.readers.len()
    }

    /// Pops the entry with the lowest not-yet-applied transaction id across
    /// all files, or `None` when every file is exhausted.
    pub fn next_entry(&mut self) -> WalResult<Option<WalEntry>> {
        let mut min_index: Option<usize> = None;
        for (i, reader) in self.readers.iter().enumerate() {
            if let Some(ref entry) = reader.peeked {
                let is_lower = match min_index {
                    None => true,
                    Some(j) => {
                        entry.txn_id < self.readers[j].peeked.as_ref().map(|e| e.txn_id).unwrap()
                    }
                };
                if is_lower {
                    min_index = Some(i);
                }
            }
        }

        match min_index {
            None => Ok(None),
            Some(i) => {
                let entry = self.readers[i].peeked.take();
                self.readers[i].advance()?;
                Ok(entry)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalConfig;
    use crate::file::WalFile;
    use crate::record::PageDelta;
    use quarry_common::config::SyncMode;
    use quarry_common::types::{FileId, PageId, PageNumber, TxnId};
    use tempfile::TempDir;

    fn entry(txn: u64) -> WalEntry {
        WalEntry::new(
            TxnId::new(txn),
            vec![PageDelta {
                page_id: PageId::new(FileId::new(1), PageNumber::new(0)),
                prev_version: txn - 1,
                new_version: txn,
                content_size: 32,
                range_offset: 0,
                data: vec![txn as u8; 16],
            }],
        )
    }

    fn write_entries(path: &Path, seq: u64, txns: &[u64]) {
        let file = WalFile::create(seq, path).unwrap();
        for &txn in txns {
            file.append(&entry(txn).encode(), SyncMode::Buffered).unwrap();
        }
    }

    #[test]
    fn test_k_way_merge_order() {
        let tmp = TempDir::new().unwrap();
        let config = WalConfig::new(tmp.path());

        // Interleaved ids across two files, ascending within each.
        write_entries(&config.file_path(0), 0, &[1, 4, 5]);
        write_entries(&config.file_path(1), 1, &[2, 3, 6]);

        let mut stream = RecoveryStream::open(tmp.path()).unwrap();
        assert_eq!(stream.file_count(), 2);

        let mut order = Vec::new();
        while let Some(e) = stream.next_entry().unwrap() {
            order.push(e.txn_id.as_u64());
        }
        assert_eq!(order, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_torn_tail_stops_file() {
        let tmp = TempDir::new().unwrap();
        let config = WalConfig::new(tmp.path());

        write_entries(&config.file_path(0), 0, &[1, 2]);
        // Truncate mid-frame to simulate a crash during the append.
        let path = config.file_path(0);
        let len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 5).unwrap();

        let mut stream = RecoveryStream::open(tmp.path()).unwrap();
        let first = stream.next_entry().unwrap().unwrap();
        assert_eq!(first.txn_id.as_u64(), 1);
        assert!(stream.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_empty_dir() {
        let tmp = TempDir::new().unwrap();
        let mut stream = RecoveryStream::open(tmp.path()).unwrap();
        assert_eq!(stream.file_count(), 0);
        assert!(stream.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_wal_file_paths_filter() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.wal"), b"").unwrap();
        std::fs::write(tmp.path().join("b.bkt"), b"").unwrap();
        let paths = wal_file_paths(tmp.path()).unwrap();
        assert_eq!(paths.len(), 1);
    }
}
