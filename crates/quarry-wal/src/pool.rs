//! The rotating, thread-sharded WAL file pool.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::WalConfig;
use crate::error::{WalError, WalResult};
use crate::file::WalFile;
use crate::record::WalEntry;

/// Monotonic source of per-thread pool slots.
static NEXT_THREAD_SLOT: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static THREAD_SLOT: usize = NEXT_THREAD_SLOT.fetch_add(1, Ordering::Relaxed);
}

fn thread_slot() -> usize {
    THREAD_SLOT.with(|slot| *slot)
}

/// WAL statistics.
#[derive(Debug, Default)]
pub struct WalStats {
    /// Total entries appended.
    pub entries_written: AtomicU64,
    /// Total bytes appended.
    pub bytes_written: AtomicU64,
    /// Number of file rotations.
    pub rotations: AtomicU64,
    /// Number of drained files deleted.
    pub files_reaped: AtomicU64,
}

/// A pool of active log files, one append target per thread slot.
///
/// Each committing thread appends to the file at `thread-slot mod pool-size`,
/// which partitions contention: two threads only share a file mutex when
/// they hash to the same slot. The total order of transactions is the txn id
/// recorded inside each entry, not the physical file position.
pub struct WalPool {
    config: WalConfig,
    /// Active files, indexed by pool slot.
    slots: RwLock<Vec<Arc<WalFile>>>,
    /// Rotated-out files awaiting drain.
    inactive: Mutex<Vec<Arc<WalFile>>>,
    /// Next file sequence number.
    next_seq: AtomicU64,
    closed: AtomicBool,
    stats: WalStats,
}

impl WalPool {
    /// Creates a fresh pool of empty log files.
    pub fn new(config: WalConfig) -> WalResult<Self> {
        config.validate().map_err(WalError::config)?;
        std::fs::create_dir_all(&config.dir)?;

        let mut slots = Vec::with_capacity(config.pool_size);
        for seq in 0..config.pool_size as u64 {
            slots.push(Arc::new(WalFile::create(seq, config.file_path(seq))?));
        }

        Ok(Self {
            next_seq: AtomicU64::new(config.pool_size as u64),
            config,
            slots: RwLock::new(slots),
            inactive: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            stats: WalStats::default(),
        })
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    /// Returns pool statistics.
    pub fn stats(&self) -> &WalStats {
        &self.stats
    }

    /// Appends an entry to this thread's pool file, honoring the configured
    /// durability mode.
    ///
    /// Returns the file the entry landed in; the committer confirms the
    /// entry's pages against it once they are flushed to their component
    /// files.
    pub fn append(&self, entry: &WalEntry) -> WalResult<Arc<WalFile>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WalError::Closed);
        }

        let slot = thread_slot() % self.config.pool_size;
        let file = self.slots.read()[slot].clone();

        let frame = entry.encode();
        file.add_pending_pages(entry.deltas.len() as u64);
        if let Err(err) = file.append(&frame, self.config.sync) {
            file.complete_pages(entry.deltas.len() as u64);
            return Err(err);
        }

        self.stats.entries_written.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_written
            .fetch_add(frame.len() as u64, Ordering::Relaxed);

        if file.size() > self.config.max_file_size {
            self.rotate_slot(slot)?;
        }

        Ok(file)
    }

    /// Swaps the file at `slot` for a fresh one and parks the old file until
    /// it drains.
    fn rotate_slot(&self, slot: usize) -> WalResult<()> {
        let mut slots = self.slots.write();
        let old = slots[slot].clone();
        // Another thread may have rotated this slot already.
        if old.size() <= self.config.max_file_size {
            return Ok(());
        }

        let seq = self.next_seq.fetch_add(1, Ordering::AcqRel);
        let fresh = Arc::new(WalFile::create(seq, self.config.file_path(seq))?);
        slots[slot] = fresh;
        drop(slots);

        old.deactivate();
        debug!(seq = old.seq(), size = old.size(), "rotated WAL file");
        self.inactive.lock().push(old);
        self.stats.rotations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Background maintenance: rotates oversized active files and deletes
    /// drained inactive ones.
    pub fn maintain(&self) -> WalResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }

        let oversized: Vec<usize> = {
            let slots = self.slots.read();
            slots
                .iter()
                .enumerate()
                .filter(|(_, f)| f.size() > self.config.max_file_size)
                .map(|(i, _)| i)
                .collect()
        };
        for slot in oversized {
            self.rotate_slot(slot)?;
        }

        let mut inactive = self.inactive.lock();
        inactive.retain(|file| {
            if !file.is_reapable() {
                return true;
            }
            match file.delete() {
                Ok(()) => {
                    debug!(seq = file.seq(), "reaped drained WAL file");
                    self.stats.files_reaped.fetch_add(1, Ordering::Relaxed);
                    false
                }
                Err(err) => {
                    warn!(seq = file.seq(), %err, "failed to reap WAL file");
                    true
                }
            }
        });

        Ok(())
    }

    /// Closes the pool and deletes every log file.
    ///
    /// Called on clean shutdown, after all recorded pages have been flushed
    /// to their component files.
    pub fn close_and_delete(&self) -> WalResult<()> {
        self.closed.store(true, Ordering::Release);

        let slots = std::mem::take(&mut *self.slots.write());
        let inactive = std::mem::take(&mut *self.inactive.lock());
        for file in slots.into_iter().chain(inactive) {
            if let Err(err) = file.delete() {
                warn!(seq = file.seq(), %err, "failed to delete WAL file on close");
            }
        }
        Ok(())
    }

    /// Returns true if the pool is closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for WalPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalPool")
            .field("pool_size", &self.config.pool_size)
            .field("next_seq", &self.next_seq.load(Ordering::Relaxed))
            .field("closed", &self.is_closed())
            .finish()
    }
}
