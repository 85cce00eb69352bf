//! Startup WAL replay.
//!
//! Recovery runs once at open, before any component is touched, when the
//! previous process left its lock file behind. It replays every residual WAL
//! entry in transaction-id order; replay is idempotent, so entries whose
//! pages already reached their component files are skipped by the version
//! comparison.

use std::path::Path;

use tracing::{debug, info, warn};

use quarry_common::constants::{PAGE_CONTENT_SIZE_OFFSET, PAGE_VERSION_OFFSET};
use quarry_common::error::QuarryResult;
use quarry_common::types::TxnId;
use quarry_wal::recovery::{wal_file_paths, RecoveryStream};

use crate::file::FileManager;

/// Summary of a completed replay.
#[derive(Debug)]
pub(crate) struct RecoveryReport {
    /// WAL entries applied or skipped.
    pub entries: u64,
    /// Page deltas physically applied.
    pub pages_applied: u64,
    /// Highest transaction id seen; the global counter starts past it.
    pub highest_txn: TxnId,
}

impl Default for RecoveryReport {
    fn default() -> Self {
        Self {
            entries: 0,
            pages_applied: 0,
            highest_txn: TxnId::INVALID,
        }
    }
}

/// Replays every residual WAL file in `dir` against the component files,
/// then deletes the files.
pub(crate) fn recover(
    dir: &Path,
    files: &FileManager,
    page_size: usize,
) -> QuarryResult<RecoveryReport> {
    let mut stream = RecoveryStream::open(dir)?;
    info!(files = stream.file_count(), "starting WAL recovery");

    let mut report = RecoveryReport::default();
    while let Some(entry) = stream.next_entry()? {
        for delta in &entry.deltas {
            let Some(file) = files.get(delta.page_id.file_id()) else {
                // The component was dropped after the entry was written.
                warn!(
                    page = %delta.page_id,
                    txn = %entry.txn_id,
                    "WAL delta references a missing file, skipping"
                );
                continue;
            };

            let page_number = delta.page_id.page_number();
            let disk_version = file.read_page_version(page_number)?;
            if disk_version >= delta.new_version {
                debug!(page = %delta.page_id, disk_version, "delta already applied, skipping");
                continue;
            }
            if delta.new_version > disk_version + 1 {
                warn!(
                    page = %delta.page_id,
                    disk_version,
                    new_version = delta.new_version,
                    "page version gap during replay, applying anyway"
                );
            }

            let mut data = if page_number.as_u64() < file.page_count() {
                file.read_page(page_number)?
            } else {
                vec![0u8; page_size]
            };
            let lo = delta.range_offset as usize;
            data[lo..lo + delta.data.len()].copy_from_slice(&delta.data);
            data[PAGE_VERSION_OFFSET..PAGE_VERSION_OFFSET + 8]
                .copy_from_slice(&delta.new_version.to_le_bytes());
            data[PAGE_CONTENT_SIZE_OFFSET..PAGE_CONTENT_SIZE_OFFSET + 4]
                .copy_from_slice(&delta.content_size.to_le_bytes());
            file.write_page(page_number, &data)?;
            report.pages_applied += 1;
        }
        report.highest_txn = report.highest_txn.max(entry.txn_id);
        report.entries += 1;
    }

    files.sync_all()?;
    for path in wal_file_paths(dir)? {
        std::fs::remove_file(&path)?;
    }

    info!(
        entries = report.entries,
        pages = report.pages_applied,
        highest_txn = %report.highest_txn,
        "WAL recovery complete"
    );
    Ok(report)
}
