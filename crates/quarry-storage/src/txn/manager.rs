//! Commit protocol and file locking.
//!
//! State machine per transaction:
//!
//! ```text
//! begun ──commit()──▶ committing ──▶ committed
//!   │
//!   └───rollback()──▶ rolling-back ──▶ rolled-back
//! ```
//!
//! A commit locks the involved file ids in ascending numeric order with a
//! bounded wait (global deadlock avoidance across concurrent transactions),
//! applies the buffered index changes, appends the dirty-page set to the WAL
//! pool, and only after the append is durable writes the pages to their
//! component files and publishes them to the shared cache.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::{FileId, TxnId};
use quarry_wal::record::{PageDelta, WalEntry};

use crate::file::ComponentKind;
use crate::txn::context::TransactionContext;

/// The state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Accepting operations.
    Begun,
    /// Commit in progress.
    Committing,
    /// Durably committed.
    Committed,
    /// Rollback in progress.
    RollingBack,
    /// Rolled back.
    RolledBack,
}

impl TxnState {
    /// Returns the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Begun => "begun",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::RollingBack => "rolling-back",
            Self::RolledBack => "rolled-back",
        }
    }
}

impl std::fmt::Display for TxnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file's commit lock.
struct FileLock {
    locked: Mutex<bool>,
    cv: Condvar,
}

impl FileLock {
    fn new() -> Self {
        Self {
            locked: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    /// Acquires the lock, waiting at most `timeout`.
    fn try_lock_for(&self, timeout: Duration) -> bool {
        let mut locked = self.locked.lock();
        let deadline = Instant::now() + timeout;
        while *locked {
            if self.cv.wait_until(&mut locked, deadline).timed_out() {
                if *locked {
                    return false;
                }
                break;
            }
        }
        *locked = true;
        true
    }

    fn unlock(&self) {
        *self.locked.lock() = false;
        self.cv.notify_one();
    }
}

/// The table of per-file commit locks.
pub(crate) struct LockTable {
    locks: Mutex<HashMap<FileId, Arc<FileLock>>>,
}

impl LockTable {
    pub(crate) fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_of(&self, file_id: FileId) -> Arc<FileLock> {
        Arc::clone(
            self.locks
                .lock()
                .entry(file_id)
                .or_insert_with(|| Arc::new(FileLock::new())),
        )
    }

    /// Acquires the locks for `file_ids` (which must be ascending), failing
    /// with the contended file id on timeout.
    pub(crate) fn acquire(
        &self,
        file_ids: &[FileId],
        timeout: Duration,
    ) -> Result<LockSet, FileId> {
        let mut held: Vec<Arc<FileLock>> = Vec::with_capacity(file_ids.len());
        for &file_id in file_ids {
            let lock = self.lock_of(file_id);
            if !lock.try_lock_for(timeout) {
                for prior in held.iter().rev() {
                    prior.unlock();
                }
                return Err(file_id);
            }
            held.push(lock);
        }
        Ok(LockSet { held })
    }
}

/// Held commit locks, released in reverse order on drop.
pub(crate) struct LockSet {
    held: Vec<Arc<FileLock>>,
}

impl Drop for LockSet {
    fn drop(&mut self) {
        for lock in self.held.iter().rev() {
            lock.unlock();
        }
    }
}

/// Commits a transaction.
pub(crate) fn commit(ctx: &mut TransactionContext) -> QuarryResult<()> {
    ctx.expect_active()?;
    let inner = Arc::clone(&ctx.inner);
    inner.check_open()?;
    ctx.set_state(TxnState::Committing);

    // Involved files: dirty pages plus indexes with buffered changes,
    // ascending. The ascending order is the global deadlock-avoidance rule.
    let mut file_ids: BTreeSet<FileId> = ctx.dirty_file_ids().into_iter().collect();
    file_ids.extend(ctx.pending_file_ids());
    if file_ids.is_empty() {
        ctx.set_state(TxnState::Committed);
        return Ok(());
    }
    let ordered: Vec<FileId> = file_ids.into_iter().collect();

    let _locks = match inner.locks.acquire(&ordered, inner.config.lock_timeout) {
        Ok(locks) => locks,
        Err(file_id) => {
            rollback(ctx);
            return Err(QuarryError::LockTimeout {
                file_id,
                timeout_ms: inner.config.lock_timeout.as_millis() as u64,
            });
        }
    };

    // Materialize buffered index changes; they only add dirty pages on the
    // already-locked index files.
    let pending = ctx.take_pending_index();
    for (file_id, changes) in &pending {
        let unique = match inner.files.get(*file_id).map(|f| f.kind()) {
            Some(ComponentKind::MutableIndex { unique }) => unique,
            _ => {
                rollback(ctx);
                return Err(QuarryError::internal(format!(
                    "pending index changes target non-index file {}",
                    file_id
                )));
            }
        };
        if let Err(err) = crate::index::apply_pending(ctx, *file_id, unique, changes) {
            rollback(ctx);
            return Err(err);
        }
    }

    // Serialize the dirty-page set into one WAL entry under a freshly
    // assigned, strictly increasing transaction id.
    let txn_id = TxnId::new(inner.txn_counter.fetch_add(1, Ordering::AcqRel) + 1);
    let mut deltas = Vec::new();
    for (page_id, page) in ctx.dirty_pages() {
        let Some((lo, hi)) = page.dirty_range() else {
            continue;
        };
        deltas.push(PageDelta {
            page_id: *page_id,
            prev_version: page.base_version(),
            new_version: page.base_version() + 1,
            content_size: page.content_size() as u32,
            range_offset: lo as u32,
            data: page.data()[lo..hi].to_vec(),
        });
    }
    if deltas.is_empty() {
        ctx.clear();
        ctx.set_state(TxnState::Committed);
        return Ok(());
    }
    let delta_count = deltas.len() as u64;
    let entry = WalEntry::new(txn_id, deltas);

    let wal_file = match inner.wal.append(&entry) {
        Ok(file) => file,
        Err(err) => {
            rollback(ctx);
            return Err(err.into());
        }
    };

    // The entry is durable; apply the pages to their component files, bump
    // each page's version, and publish the new content to the shared cache.
    let dirty = ctx.take_dirty();
    for (page_id, mut page) in dirty {
        if !page.is_dirty() {
            continue;
        }
        page.stamp_version(page.base_version() + 1);
        let Some(file) = inner.files.get(page_id.file_id()) else {
            rollback(ctx);
            return Err(QuarryError::internal(format!(
                "dirty page {} belongs to an unknown file",
                page_id
            )));
        };
        if let Err(err) = file.write_page(page_id.page_number(), page.data()) {
            // Page-cache consistency can no longer be guaranteed.
            error!(%page_id, %err, "page flush failed, closing database");
            inner.closed.store(true, Ordering::Release);
            return Err(err);
        }
        inner.cache.put(Arc::new(page.freeze()));
        inner.stats.pages_written.fetch_add(1, Ordering::Relaxed);
        inner
            .stats
            .bytes_written
            .fetch_add(inner.config.page_size as u64, Ordering::Relaxed);
    }
    wal_file.complete_pages(delta_count);

    inner.stats.commits.fetch_add(1, Ordering::Relaxed);
    debug!(%txn_id, pages = delta_count, "transaction committed");
    ctx.set_state(TxnState::Committed);
    Ok(())
}

/// Rolls back a transaction, discarding its private pages and buffered
/// index changes.
pub(crate) fn rollback(ctx: &mut TransactionContext) {
    ctx.set_state(TxnState::RollingBack);
    ctx.clear();
    ctx.inner.stats.rollbacks.fetch_add(1, Ordering::Relaxed);
    ctx.set_state(TxnState::RolledBack);
}
