//! Index compaction.
//!
//! Compaction merges the mutable component's pages below a snapshot point
//! with the old compacted component into a brand-new, globally sorted
//! compacted file, carries the post-snapshot mutable pages into a fresh
//! mutable file as raw page copies, and atomically swaps the component pair.
//!
//! The scheduler-facing state is a tri-state cell driven purely by
//! compare-and-swap, so scheduling never blocks:
//!
//! ```text
//! No ──schedule()──▶ Scheduled ──begin()──▶ InProgress ──finish()──▶ No
//! ```
//!
//! The bulk merge runs against the old components without blocking readers;
//! only the reference swap takes the index write lock, and it requires that
//! no transaction is active. When that precondition fails the work is
//! discarded and the state resets to `No`, to be rescheduled later.
//!
//! The new files are written under a `.tmp` suffix and renamed into place
//! only when complete; discovery at open deletes `.tmp` leftovers and, for
//! duplicate component files of one index, keeps the lowest-id mutable file
//! and the highest-id compacted file. Either surviving pair is consistent,
//! so a crash anywhere in the swap loses nothing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use quarry_common::error::QuarryResult;
use quarry_common::types::{PageId, PageNumber, Rid};

use crate::database::DbInner;
use crate::file::{ComponentKind, PagedFile};
use crate::index::{page, IndexComponents, LsmIndex};
use crate::page::MutablePage;

/// The compaction phase of one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionPhase {
    /// Nothing scheduled.
    No,
    /// A compaction run is requested.
    Scheduled,
    /// A worker is compacting now.
    InProgress,
}

const NO: u8 = 0;
const SCHEDULED: u8 = 1;
const IN_PROGRESS: u8 = 2;

/// Atomic tri-state compaction cell.
pub(crate) struct CompactionState(AtomicU8);

impl CompactionState {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(NO))
    }

    /// Returns the current phase.
    pub(crate) fn phase(&self) -> CompactionPhase {
        match self.0.load(Ordering::Acquire) {
            SCHEDULED => CompactionPhase::Scheduled,
            IN_PROGRESS => CompactionPhase::InProgress,
            _ => CompactionPhase::No,
        }
    }

    /// `No → Scheduled`. Returns false if a run is already pending.
    pub(crate) fn schedule(&self) -> bool {
        self.0
            .compare_exchange(NO, SCHEDULED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `Scheduled → InProgress`. Returns false unless a run was scheduled.
    pub(crate) fn begin(&self) -> bool {
        self.0
            .compare_exchange(SCHEDULED, IN_PROGRESS, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `InProgress → No`, whether the run succeeded or failed.
    pub(crate) fn finish(&self) {
        let _ = self
            .0
            .compare_exchange(IN_PROGRESS, NO, Ordering::AcqRel, Ordering::Acquire);
    }
}

/// Runs one scheduled compaction for the index.
///
/// Returns true if the component pair was swapped; false when no run was
/// scheduled or the exclusive swap precondition failed (retryable).
pub(crate) fn compact(inner: &Arc<DbInner>, index: &Arc<LsmIndex>) -> QuarryResult<bool> {
    if !index.compaction_state().begin() {
        return Ok(false);
    }
    let result = run(inner, index);
    index.compaction_state().finish();
    if let Err(ref err) = result {
        warn!(index = index.name(), %err, "compaction failed");
    }
    result
}

fn run(inner: &Arc<DbInner>, index: &Arc<LsmIndex>) -> QuarryResult<bool> {
    let old = index.components();
    let snapshot_pages = old.mutable.page_count();
    if snapshot_pages == 0 {
        return Ok(false);
    }
    let page_size = inner.config.page_size;

    // Merge the snapshot prefix of the mutable component with the old
    // compacted component, newest tier first. Keys whose visible rid set
    // resolves empty are dropped for good.
    let mut merged: BTreeMap<Vec<u8>, super::RidAccumulator> = BTreeMap::new();
    for number in (0..snapshot_pages).rev() {
        let page_id = PageId::new(old.mutable.id(), PageNumber::new(number));
        let data = inner.read_committed_page(page_id)?;
        for (key, rids) in page::read_all_entries(data.data())? {
            merged.entry(key).or_default().feed(&rids);
        }
    }
    if let Some(compacted) = &old.compacted {
        for number in 0..compacted.page_count() {
            let page_id = PageId::new(compacted.id(), PageNumber::new(number));
            let data = inner.read_committed_page(page_id)?;
            for (key, rids) in page::read_all_entries(data.data())? {
                merged.entry(key).or_default().feed(&rids);
            }
        }
    }

    // Write the new compacted component, fully sorted, tombstone-free.
    let compacted_kind = ComponentKind::CompactedIndex {
        unique: index.is_unique(),
    };
    let new_compacted_id = inner.files.allocate_file_id();
    let compacted_final = inner
        .files
        .component_path(index.name(), new_compacted_id, compacted_kind);
    let compacted_tmp = tmp_path(&compacted_final);
    {
        let writer = PagedFile::create(
            new_compacted_id,
            index.name(),
            compacted_kind,
            &compacted_tmp,
            page_size,
        )?;
        let mut page_number = 0u64;
        let mut current = new_index_page(&writer, page_number, page_size);
        for (key, acc) in &merged {
            if acc.rids.is_empty() {
                continue;
            }
            if !page::insert_entry(&mut current, key, &acc.rids)? {
                flush_index_page(&writer, current)?;
                page_number += 1;
                current = new_index_page(&writer, page_number, page_size);
                if !page::insert_entry(&mut current, key, &acc.rids)? {
                    return Err(quarry_common::error::QuarryError::internal(
                        "index entry exceeds an empty compacted page",
                    ));
                }
            }
        }
        flush_index_page(&writer, current)?;
        writer.sync()?;
    }

    // The swap is exclusive: no transaction may be active, and readers are
    // held off only for the reference exchange itself.
    let swapped = {
        let _guard = inner.compaction_swap_lock.lock();
        if inner.active_txns.load(Ordering::Acquire) != 0 {
            debug!(index = index.name(), "active transactions, deferring compaction swap");
            std::fs::remove_file(&compacted_tmp).ok();
            return Ok(false);
        }

        // Carry the pages appended after the snapshot into a fresh mutable
        // component as raw page copies.
        let mutable_kind = ComponentKind::MutableIndex {
            unique: index.is_unique(),
        };
        let new_mutable_id = inner.files.allocate_file_id();
        let mutable_final =
            inner
                .files
                .component_path(index.name(), new_mutable_id, mutable_kind);
        let mutable_tmp = tmp_path(&mutable_final);
        {
            let writer = PagedFile::create(
                new_mutable_id,
                index.name(),
                mutable_kind,
                &mutable_tmp,
                page_size,
            )?;
            let tail = old.mutable.page_count();
            for (target, source) in (snapshot_pages..tail).enumerate() {
                let raw = old.mutable.read_page(PageNumber::new(source))?;
                writer.write_page(PageNumber::new(target as u64), &raw)?;
            }
            writer.sync()?;
        }

        std::fs::rename(&compacted_tmp, &compacted_final)?;
        std::fs::rename(&mutable_tmp, &mutable_final)?;

        let new_compacted = Arc::new(PagedFile::open(
            new_compacted_id,
            index.name(),
            compacted_kind,
            &compacted_final,
            page_size,
        )?);
        let new_mutable = Arc::new(PagedFile::open(
            new_mutable_id,
            index.name(),
            mutable_kind,
            &mutable_final,
            page_size,
        )?);
        inner.files.register(Arc::clone(&new_compacted));
        inner.files.register(Arc::clone(&new_mutable));

        index.swap_components(IndexComponents {
            mutable: new_mutable,
            compacted: Some(new_compacted),
        });
        true
    };

    if swapped {
        // The old pair is unreachable now; drop it, old compacted first so
        // that any surviving pair on disk stays consistent.
        if let Some(compacted) = &old.compacted {
            inner.cache.remove_file(compacted.id());
            inner.files.drop_file(compacted.id())?;
        }
        inner.cache.remove_file(old.mutable.id());
        inner.files.drop_file(old.mutable.id())?;

        inner
            .stats
            .compactions
            .fetch_add(1, Ordering::Relaxed);
        info!(
            index = index.name(),
            merged_keys = merged.len(),
            "index compaction complete"
        );
    }
    Ok(swapped)
}

fn tmp_path(path: &std::path::Path) -> std::path::PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".tmp");
    std::path::PathBuf::from(s)
}

fn new_index_page(file: &PagedFile, number: u64, page_size: usize) -> MutablePage {
    let mut page = MutablePage::new_empty(
        PageId::new(file.id(), PageNumber::new(number)),
        page_size,
    );
    page::init_page(&mut page);
    page.stamp_version(1);
    page
}

fn flush_index_page(file: &PagedFile, page: MutablePage) -> QuarryResult<()> {
    let number = page.id().page_number();
    file.write_page(number, page.data())
}
