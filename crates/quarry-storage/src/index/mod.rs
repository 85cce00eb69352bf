//! Two-tier LSM index.
//!
//! An index is a pair of paginated components transacting through the same
//! WAL/page machinery as buckets:
//!
//! - the **mutable** component takes every write: an append-only sequence of
//!   pages, each individually sorted;
//! - the optional **compacted** component is the read-only, globally sorted
//!   output of the last compaction.
//!
//! Inside a transaction, mutations are buffered in the context's
//! pending-changes map (keyed by the order-preserving key encoding) and only
//! reach the physical mutable component at commit, under the commit file
//! lock. Lookups overlay the pending changes on the durable tiers, newest
//! tier first; a tombstone rid in a newer tier masks every older entry with
//! the same key.

pub mod key;

pub(crate) mod compaction;
pub(crate) mod page;

pub use compaction::CompactionPhase;
pub use key::{decode_key, encode_key, KeyValue};

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;

use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::{FileId, PageId, PageNumber, Rid};

use crate::file::PagedFile;
use crate::txn::context::{PendingIndexChanges, PendingKeyOp};
use crate::txn::TransactionContext;
use compaction::CompactionState;

/// The key-derivation path shared by live indexing and rebuild.
pub trait KeyExtractor: Send + Sync {
    /// Derives the index key tuple from a serialized record, or `None` when
    /// the record should not be indexed.
    fn extract(&self, record: &[u8]) -> Option<Vec<KeyValue>>;
}

impl<F> KeyExtractor for F
where
    F: Fn(&[u8]) -> Option<Vec<KeyValue>> + Send + Sync,
{
    fn extract(&self, record: &[u8]) -> Option<Vec<KeyValue>> {
        self(record)
    }
}

/// The current component pair of an index.
#[derive(Clone)]
pub(crate) struct IndexComponents {
    pub mutable: Arc<PagedFile>,
    pub compacted: Option<Arc<PagedFile>>,
}

/// Resolves a key's visible rids across tiers, newest first.
///
/// Rid lists are stored oldest-to-newest, so each list is walked backwards;
/// the first tombstone encountered masks everything older, in the same list
/// and in every older tier.
#[derive(Default)]
struct RidAccumulator {
    rids: Vec<Rid>,
    masked: bool,
    excluded: BTreeSet<Rid>,
}

impl RidAccumulator {
    fn feed(&mut self, list: &[Rid]) {
        if self.masked {
            return;
        }
        for rid in list.iter().rev() {
            if rid.is_tombstone() {
                self.masked = true;
                break;
            }
            if !self.excluded.contains(rid) && !self.rids.contains(rid) {
                self.rids.push(*rid);
            }
        }
    }

    fn feed_pending(&mut self, op: &PendingKeyOp) {
        for rid in op.added.iter().rev() {
            if !self.rids.contains(rid) {
                self.rids.push(*rid);
            }
        }
        if op.removed_all {
            self.masked = true;
        }
        self.excluded.extend(op.removed.iter().copied());
    }

    fn is_empty(&self) -> bool {
        self.rids.is_empty()
    }
}

/// An ordered key-to-rid index.
pub struct LsmIndex {
    name: String,
    unique: bool,
    components: RwLock<IndexComponents>,
    compaction: CompactionState,
    extractor: RwLock<Option<Arc<dyn KeyExtractor>>>,
}

impl LsmIndex {
    pub(crate) fn new(
        name: impl Into<String>,
        unique: bool,
        mutable: Arc<PagedFile>,
        compacted: Option<Arc<PagedFile>>,
        extractor: Option<Arc<dyn KeyExtractor>>,
    ) -> Self {
        Self {
            name: name.into(),
            unique,
            components: RwLock::new(IndexComponents { mutable, compacted }),
            compaction: CompactionState::new(),
            extractor: RwLock::new(extractor),
        }
    }

    /// Returns the index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if the index enforces one live rid per key.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Returns the current compaction phase.
    #[must_use]
    pub fn compaction_phase(&self) -> CompactionPhase {
        self.compaction.phase()
    }

    pub(crate) fn compaction_state(&self) -> &CompactionState {
        &self.compaction
    }

    pub(crate) fn components(&self) -> IndexComponents {
        self.components.read().clone()
    }

    pub(crate) fn swap_components(&self, components: IndexComponents) {
        *self.components.write() = components;
    }

    pub(crate) fn mutable_file_id(&self) -> FileId {
        self.components.read().mutable.id()
    }

    pub(crate) fn extractor(&self) -> Option<Arc<dyn KeyExtractor>> {
        self.extractor.read().clone()
    }

    pub(crate) fn set_extractor(&self, extractor: Arc<dyn KeyExtractor>) {
        *self.extractor.write() = Some(extractor);
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Point lookup: every rid visible for the key, newest first.
    ///
    /// An empty result means the key is absent.
    pub fn get(&self, ctx: &TransactionContext, keys: &[KeyValue]) -> QuarryResult<Vec<Rid>> {
        let encoded = encode_key(keys);
        let comps = self.components();
        let mut acc = RidAccumulator::default();

        if let Some(op) = ctx.pending_op(comps.mutable.id(), &encoded) {
            acc.feed_pending(op);
        }
        self.feed_durable(ctx, &comps, &encoded, &mut acc)?;
        Ok(acc.rids)
    }

    /// Ordered scan over the inclusive key range, tombstone-masked.
    ///
    /// `None` bounds are open ends.
    pub fn range(
        &self,
        ctx: &TransactionContext,
        from: Option<&[KeyValue]>,
        to: Option<&[KeyValue]>,
    ) -> QuarryResult<Vec<(Vec<KeyValue>, Vec<Rid>)>> {
        let lo = from.map(encode_key);
        let hi = to.map(encode_key);
        let within = |key: &[u8]| {
            lo.as_deref().map_or(true, |l| key >= l) && hi.as_deref().map_or(true, |h| key <= h)
        };

        let comps = self.components();
        let mut per_key: BTreeMap<Vec<u8>, RidAccumulator> = BTreeMap::new();

        // Tier 0: the transaction's pending changes.
        if let Some(pending) = ctx.pending_range(comps.mutable.id()) {
            for (key, op) in pending {
                if within(key) {
                    per_key.entry(key.clone()).or_default().feed_pending(op);
                }
            }
        }

        // Mutable pages, newest to oldest, then the compacted component.
        let mutable_pages = ctx.page_count(comps.mutable.id())?;
        for number in (0..mutable_pages).rev() {
            let view =
                ctx.read_page(PageId::new(comps.mutable.id(), PageNumber::new(number)))?;
            for (key, rids) in page::read_all_entries(view.data())? {
                if within(&key) {
                    per_key.entry(key).or_default().feed(&rids);
                }
            }
        }
        if let Some(compacted) = &comps.compacted {
            for number in 0..ctx.page_count(compacted.id())? {
                let view = ctx.read_page(PageId::new(compacted.id(), PageNumber::new(number)))?;
                for (key, rids) in page::read_all_entries(view.data())? {
                    if within(&key) {
                        per_key.entry(key).or_default().feed(&rids);
                    }
                }
            }
        }

        let mut result = Vec::new();
        for (key, acc) in per_key {
            if !acc.is_empty() {
                result.push((decode_key(&key)?, acc.rids));
            }
        }
        Ok(result)
    }

    /// Feeds the durable tiers (mutable pages newest-first, then compacted)
    /// into the accumulator.
    fn feed_durable(
        &self,
        ctx: &TransactionContext,
        comps: &IndexComponents,
        encoded: &[u8],
        acc: &mut RidAccumulator,
    ) -> QuarryResult<()> {
        let mutable_pages = ctx.page_count(comps.mutable.id())?;
        for number in (0..mutable_pages).rev() {
            if acc.masked {
                return Ok(());
            }
            let view =
                ctx.read_page(PageId::new(comps.mutable.id(), PageNumber::new(number)))?;
            if let Ok(slot) = page::search(view.data(), encoded)? {
                let (_, rids) = page::entry_at(view.data(), slot)?;
                acc.feed(&rids);
            }
        }
        if let Some(compacted) = &comps.compacted {
            for number in 0..ctx.page_count(compacted.id())? {
                if acc.masked {
                    return Ok(());
                }
                let view = ctx.read_page(PageId::new(compacted.id(), PageNumber::new(number)))?;
                if let Ok(slot) = page::search(view.data(), encoded)? {
                    let (_, rids) = page::entry_at(view.data(), slot)?;
                    acc.feed(&rids);
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Associates a rid with a key. Buffered until commit.
    pub fn put(
        &self,
        ctx: &mut TransactionContext,
        keys: &[KeyValue],
        rid: Rid,
    ) -> QuarryResult<()> {
        ctx.expect_active()?;
        let encoded = encode_key(keys);
        let file_id = self.mutable_file_id();
        ctx.pending_op_mut(file_id, encoded).put(rid);
        Ok(())
    }

    /// Removes every rid for a key. Buffered until commit.
    pub fn remove(&self, ctx: &mut TransactionContext, keys: &[KeyValue]) -> QuarryResult<()> {
        ctx.expect_active()?;
        let encoded = encode_key(keys);
        let file_id = self.mutable_file_id();
        ctx.pending_op_mut(file_id, encoded).remove_all();
        Ok(())
    }

    /// Removes one specific rid for a key. Buffered until commit.
    pub fn remove_rid(
        &self,
        ctx: &mut TransactionContext,
        keys: &[KeyValue],
        rid: Rid,
    ) -> QuarryResult<()> {
        ctx.expect_active()?;
        let encoded = encode_key(keys);
        let file_id = self.mutable_file_id();
        ctx.pending_op_mut(file_id, encoded).remove_rid(rid);
        Ok(())
    }

    // =========================================================================
    // Commit-time materialization
    // =========================================================================

    /// Applies a transaction's buffered changes to the physical mutable
    /// component. Runs under the commit file lock, so there is a single
    /// authoritative writer.
    pub(crate) fn apply_changes(
        &self,
        ctx: &mut TransactionContext,
        changes: &PendingIndexChanges,
    ) -> QuarryResult<()> {
        let comps = self.components();
        for (key, op) in &changes.ops {
            let has_removal = op.removed_all || !op.removed.is_empty();
            let list: Vec<Rid> = if has_removal {
                // A tombstone masks every older tier, so the durable rids
                // that survive the removal are re-recorded after it.
                let mut durable = RidAccumulator::default();
                self.feed_durable(ctx, &comps, key, &mut durable)?;
                let survivors = durable
                    .rids
                    .into_iter()
                    .filter(|rid| !op.removed_all && !op.removed.contains(rid));
                let mut list = vec![Rid::TOMBSTONE];
                list.extend(survivors);
                list.extend(op.added.iter().copied());
                list
            } else if op.added.is_empty() {
                continue;
            } else {
                op.added.clone()
            };

            if self.unique {
                let mut visible = RidAccumulator::default();
                visible.feed(&list);
                if !visible.masked {
                    self.feed_durable(ctx, &comps, key, &mut visible)?;
                }
                if visible.rids.len() > 1 {
                    return Err(QuarryError::DuplicateKey {
                        index: self.name.clone(),
                    });
                }
            }

            self.append_entry(ctx, comps.mutable.id(), key, &list)?;
        }
        Ok(())
    }

    /// Inserts one entry into the mutable component's last page, opening a
    /// new page when it is full.
    fn append_entry(
        &self,
        ctx: &mut TransactionContext,
        file_id: FileId,
        key: &[u8],
        rids: &[Rid],
    ) -> QuarryResult<()> {
        let pages = ctx.page_count(file_id)?;
        if pages > 0 {
            let page_id = PageId::new(file_id, PageNumber::new(pages - 1));
            let mpage = ctx.page_for_modify(page_id)?;
            if page::insert_entry(mpage, key, rids)? {
                return Ok(());
            }
        }

        let page_id = ctx.add_page(file_id)?;
        let fresh = ctx.page_for_modify(page_id)?;
        page::init_page(fresh);
        if page::insert_entry(fresh, key, rids)? {
            Ok(())
        } else {
            Err(QuarryError::RecordTooLarge {
                size: page::encode_entry(key, rids).len(),
                max: fresh.page_size(),
            })
        }
    }
}

/// Materializes one transaction's buffered changes for one index, resolved
/// by the mutable component's file id.
pub(crate) fn apply_pending(
    ctx: &mut TransactionContext,
    file_id: FileId,
    _unique: bool,
    changes: &PendingIndexChanges,
) -> QuarryResult<()> {
    let inner = Arc::clone(&ctx.inner);
    let index = inner
        .index_by_file(file_id)
        .ok_or_else(|| QuarryError::internal(format!("no index owns file {}", file_id)))?;
    index.apply_changes(ctx, changes)
}

impl std::fmt::Debug for LsmIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let comps = self.components();
        f.debug_struct("LsmIndex")
            .field("name", &self.name)
            .field("unique", &self.unique)
            .field("mutable_file", &comps.mutable.id())
            .field("compacted_file", &comps.compacted.as_ref().map(|c| c.id()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use quarry_common::config::DatabaseConfig;
    use tempfile::TempDir;

    fn open_db() -> (TempDir, Database) {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(tmp.path(), DatabaseConfig::default()).unwrap();
        (tmp, db)
    }

    fn rid(n: u64) -> Rid {
        Rid::new(FileId::new(1), n)
    }

    fn key(s: &str) -> Vec<KeyValue> {
        vec![KeyValue::String(s.into())]
    }

    #[test]
    fn test_put_get() {
        let (_tmp, db) = open_db();
        let index = db.create_index("by_name", false, None).unwrap();
        let mut session = db.session();

        session.begin().unwrap();
        {
            let ctx = session.ctx().unwrap();
            index.put(ctx, &key("alice"), rid(1)).unwrap();
            // Visible inside the transaction before commit.
            assert_eq!(index.get(ctx, &key("alice")).unwrap(), vec![rid(1)]);
            assert!(index.get(ctx, &key("bob")).unwrap().is_empty());
        }
        session.commit().unwrap();

        session.begin().unwrap();
        assert_eq!(
            index.get(session.ctx().unwrap(), &key("alice")).unwrap(),
            vec![rid(1)]
        );
        session.rollback().unwrap();
    }

    #[test]
    fn test_non_unique_collects_rids() {
        let (_tmp, db) = open_db();
        let index = db.create_index("multi", false, None).unwrap();
        let mut session = db.session();

        session.begin().unwrap();
        index.put(session.ctx().unwrap(), &key("k"), rid(1)).unwrap();
        session.commit().unwrap();

        session.begin().unwrap();
        index.put(session.ctx().unwrap(), &key("k"), rid(2)).unwrap();
        session.commit().unwrap();

        session.begin().unwrap();
        let mut rids = index.get(session.ctx().unwrap(), &key("k")).unwrap();
        rids.sort();
        session.rollback().unwrap();
        assert_eq!(rids, vec![rid(1), rid(2)]);
    }

    #[test]
    fn test_remove_masks_older_entries() {
        let (_tmp, db) = open_db();
        let index = db.create_index("mask", false, None).unwrap();
        let mut session = db.session();

        session.begin().unwrap();
        index.put(session.ctx().unwrap(), &key("k"), rid(1)).unwrap();
        session.commit().unwrap();

        session.begin().unwrap();
        {
            let ctx = session.ctx().unwrap();
            index.remove(ctx, &key("k")).unwrap();
            // The pending removal masks the durable entry immediately.
            assert!(index.get(ctx, &key("k")).unwrap().is_empty());
        }
        session.commit().unwrap();

        session.begin().unwrap();
        assert!(index
            .get(session.ctx().unwrap(), &key("k"))
            .unwrap()
            .is_empty());
        session.rollback().unwrap();
    }

    #[test]
    fn test_remove_specific_rid() {
        let (_tmp, db) = open_db();
        let index = db.create_index("one_of", false, None).unwrap();
        let mut session = db.session();

        session.begin().unwrap();
        {
            let ctx = session.ctx().unwrap();
            index.put(ctx, &key("k"), rid(1)).unwrap();
            index.put(ctx, &key("k"), rid(2)).unwrap();
        }
        session.commit().unwrap();

        session.begin().unwrap();
        index
            .remove_rid(session.ctx().unwrap(), &key("k"), rid(1))
            .unwrap();
        session.commit().unwrap();

        session.begin().unwrap();
        assert_eq!(
            index.get(session.ctx().unwrap(), &key("k")).unwrap(),
            vec![rid(2)]
        );
        session.rollback().unwrap();
    }

    #[test]
    fn test_unique_index_rejects_second_rid() {
        let (_tmp, db) = open_db();
        let index = db.create_index("uniq", true, None).unwrap();
        let mut session = db.session();

        session.begin().unwrap();
        index.put(session.ctx().unwrap(), &key("k"), rid(1)).unwrap();
        session.commit().unwrap();

        session.begin().unwrap();
        index.put(session.ctx().unwrap(), &key("k"), rid(2)).unwrap();
        let err = session.commit().unwrap_err();
        assert!(matches!(err, QuarryError::DuplicateKey { .. }));

        // Replacing after a removal is allowed.
        session.begin().unwrap();
        {
            let ctx = session.ctx().unwrap();
            index.remove(ctx, &key("k")).unwrap();
            index.put(ctx, &key("k"), rid(2)).unwrap();
        }
        session.commit().unwrap();

        session.begin().unwrap();
        assert_eq!(
            index.get(session.ctx().unwrap(), &key("k")).unwrap(),
            vec![rid(2)]
        );
        session.rollback().unwrap();
    }

    #[test]
    fn test_range_is_ordered() {
        let (_tmp, db) = open_db();
        let index = db.create_index("ordered", false, None).unwrap();
        let mut session = db.session();

        session.begin().unwrap();
        {
            let ctx = session.ctx().unwrap();
            for (i, name) in ["delta", "alpha", "echo", "bravo", "charlie"]
                .iter()
                .enumerate()
            {
                index.put(ctx, &key(name), rid(i as u64)).unwrap();
            }
        }
        session.commit().unwrap();

        session.begin().unwrap();
        let all = index.range(session.ctx().unwrap(), None, None).unwrap();
        let names: Vec<String> = all
            .iter()
            .map(|(k, _)| match &k[0] {
                KeyValue::String(s) => s.clone(),
                other => panic!("unexpected key {:?}", other),
            })
            .collect();
        assert_eq!(names, vec!["alpha", "bravo", "charlie", "delta", "echo"]);

        let bounded = index
            .range(
                session.ctx().unwrap(),
                Some(&key("bravo")),
                Some(&key("delta")),
            )
            .unwrap();
        assert_eq!(bounded.len(), 3);
        session.rollback().unwrap();
    }

    #[test]
    fn test_entries_spill_across_pages() {
        let (_tmp, db) = open_db();
        let index = db.create_index("spill", false, None).unwrap();
        let mut session = db.session();

        // Enough entries to overflow one page.
        for chunk in 0..8 {
            session.begin().unwrap();
            {
                let ctx = session.ctx().unwrap();
                for i in 0..500u64 {
                    let n = chunk * 500 + i;
                    index
                        .put(ctx, &[KeyValue::Int(n as i64)], rid(n))
                        .unwrap();
                }
            }
            session.commit().unwrap();
        }

        session.begin().unwrap();
        {
            let ctx = session.ctx().unwrap();
            assert!(ctx.page_count(index.mutable_file_id()).unwrap() > 1);
            for n in [0i64, 777, 1999, 3999] {
                assert_eq!(
                    index.get(ctx, &[KeyValue::Int(n)]).unwrap(),
                    vec![rid(n as u64)],
                    "key {} lost",
                    n
                );
            }
        }
        session.rollback().unwrap();
    }
}
