//! The per-transaction context.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::{FileId, PageId, PageNumber, Rid};

use crate::database::DbInner;
use crate::page::{MutablePage, Page};
use crate::txn::manager::TxnState;

/// A read view of one page inside a transaction: the transaction's own
/// private copy when it has one, else the committed page.
pub enum PageView<'a> {
    /// The transaction's private copy.
    Dirty(&'a MutablePage),
    /// The shared committed page.
    Committed(Arc<Page>),
}

impl PageView<'_> {
    /// Returns the full page buffer.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        match self {
            Self::Dirty(page) => page.data(),
            Self::Committed(page) => page.data(),
        }
    }

    /// Returns the content-size header field.
    #[must_use]
    pub fn content_size(&self) -> usize {
        match self {
            Self::Dirty(page) => page.content_size(),
            Self::Committed(page) => page.content_size(),
        }
    }
}

/// Buffered mutations for one index key within a transaction.
#[derive(Debug, Default, Clone)]
pub(crate) struct PendingKeyOp {
    /// Every durable rid for the key is masked.
    pub removed_all: bool,
    /// Specific durable rids masked.
    pub removed: BTreeSet<Rid>,
    /// Rids added by this transaction.
    pub added: Vec<Rid>,
}

impl PendingKeyOp {
    pub(crate) fn put(&mut self, rid: Rid) {
        if !self.added.contains(&rid) {
            self.added.push(rid);
        }
        self.removed.remove(&rid);
    }

    pub(crate) fn remove_all(&mut self) {
        self.removed_all = true;
        self.removed.clear();
        self.added.clear();
    }

    pub(crate) fn remove_rid(&mut self, rid: Rid) {
        if let Some(pos) = self.added.iter().position(|r| *r == rid) {
            self.added.remove(pos);
        } else {
            self.removed.insert(rid);
        }
    }
}

/// Buffered mutations for one index within a transaction, keyed by the
/// order-preserving key encoding.
#[derive(Debug, Default, Clone)]
pub(crate) struct PendingIndexChanges {
    pub ops: BTreeMap<Vec<u8>, PendingKeyOp>,
}

/// One transaction's private state.
///
/// The context is the explicit object every storage-layer call receives; it
/// owns the dirty-page set (copy-on-write clones keyed by page id) and the
/// per-index pending-changes map. Side effects stay confined here until
/// commit publishes them.
pub struct TransactionContext {
    pub(crate) inner: Arc<DbInner>,
    state: TxnState,
    dirty: BTreeMap<PageId, MutablePage>,
    added_pages: HashMap<FileId, u64>,
    pending_index: BTreeMap<FileId, PendingIndexChanges>,
}

impl TransactionContext {
    pub(crate) fn new(inner: Arc<DbInner>) -> Self {
        {
            // Serializes transaction begin against an in-flight compaction
            // swap: once the swap saw zero active transactions, none may
            // start until the component references are exchanged.
            let _swap = inner.compaction_swap_lock.lock();
            inner.active_txns.fetch_add(1, Ordering::AcqRel);
        }
        Self {
            inner,
            state: TxnState::Begun,
            dirty: BTreeMap::new(),
            added_pages: HashMap::new(),
            pending_index: BTreeMap::new(),
        }
    }

    /// Returns the transaction state.
    #[must_use]
    pub fn state(&self) -> TxnState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: TxnState) {
        self.state = state;
    }

    pub(crate) fn expect_active(&self) -> QuarryResult<()> {
        if self.state == TxnState::Begun {
            Ok(())
        } else {
            Err(QuarryError::InvalidState {
                current: self.state.as_str(),
                expected: TxnState::Begun.as_str(),
            })
        }
    }

    /// Pages may be mutated while operations run and while the commit
    /// materializes buffered index changes.
    fn expect_mutable(&self) -> QuarryResult<()> {
        if matches!(self.state, TxnState::Begun | TxnState::Committing) {
            Ok(())
        } else {
            Err(QuarryError::InvalidState {
                current: self.state.as_str(),
                expected: TxnState::Begun.as_str(),
            })
        }
    }

    /// Returns the file's logical page count as seen by this transaction
    /// (committed pages plus pages added here).
    pub fn page_count(&self, file_id: FileId) -> QuarryResult<u64> {
        let file = self
            .inner
            .files
            .get(file_id)
            .ok_or_else(|| QuarryError::ComponentNotFound {
                name: format!("file {}", file_id),
            })?;
        Ok(file.page_count() + self.added_pages.get(&file_id).copied().unwrap_or(0))
    }

    /// Returns the committed page content, overlaid by this transaction's
    /// private copy if it has one.
    pub fn read_page(&self, page_id: PageId) -> QuarryResult<PageView<'_>> {
        if let Some(page) = self.dirty.get(&page_id) {
            return Ok(PageView::Dirty(page));
        }
        Ok(PageView::Committed(self.inner.read_committed_page(page_id)?))
    }

    /// Returns this transaction's private mutable copy of a page, cloning
    /// the committed page on first touch.
    pub fn page_for_modify(&mut self, page_id: PageId) -> QuarryResult<&mut MutablePage> {
        self.expect_mutable()?;
        if !self.dirty.contains_key(&page_id) {
            let committed = self.inner.read_committed_page(page_id)?;
            self.dirty
                .insert(page_id, MutablePage::from_page(&committed));
        }
        Ok(self.dirty.get_mut(&page_id).expect("just inserted"))
    }

    /// Allocates a zero-filled page at the end of the file, visible only to
    /// this transaction until commit.
    pub fn add_page(&mut self, file_id: FileId) -> QuarryResult<PageId> {
        self.expect_mutable()?;
        let number = self.page_count(file_id)?;
        let page_id = PageId::new(file_id, PageNumber::new(number));
        let page = MutablePage::new_empty(page_id, self.inner.config.page_size);
        self.dirty.insert(page_id, page);
        *self.added_pages.entry(file_id).or_insert(0) += 1;
        Ok(page_id)
    }

    /// Returns the number of private page copies held.
    #[must_use]
    pub fn dirty_page_count(&self) -> usize {
        self.dirty.len()
    }

    pub(crate) fn pending_op_mut(&mut self, file_id: FileId, key: Vec<u8>) -> &mut PendingKeyOp {
        self.pending_index
            .entry(file_id)
            .or_default()
            .ops
            .entry(key)
            .or_default()
    }

    pub(crate) fn pending_op(&self, file_id: FileId, key: &[u8]) -> Option<&PendingKeyOp> {
        self.pending_index.get(&file_id)?.ops.get(key)
    }

    pub(crate) fn pending_range(
        &self,
        file_id: FileId,
    ) -> Option<&BTreeMap<Vec<u8>, PendingKeyOp>> {
        self.pending_index.get(&file_id).map(|c| &c.ops)
    }

    pub(crate) fn pending_file_ids(&self) -> Vec<FileId> {
        self.pending_index.keys().copied().collect()
    }

    pub(crate) fn dirty_file_ids(&self) -> Vec<FileId> {
        let mut ids: Vec<FileId> = self.dirty.keys().map(|p| p.file_id()).collect();
        ids.dedup();
        ids
    }

    pub(crate) fn take_pending_index(&mut self) -> BTreeMap<FileId, PendingIndexChanges> {
        std::mem::take(&mut self.pending_index)
    }

    pub(crate) fn dirty_pages(&self) -> impl Iterator<Item = (&PageId, &MutablePage)> {
        self.dirty.iter()
    }

    pub(crate) fn take_dirty(&mut self) -> BTreeMap<PageId, MutablePage> {
        self.added_pages.clear();
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn clear(&mut self) {
        self.dirty.clear();
        self.added_pages.clear();
        self.pending_index.clear();
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        self.inner.active_txns.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("state", &self.state)
            .field("dirty_pages", &self.dirty.len())
            .field("pending_indexes", &self.pending_index.len())
            .finish()
    }
}
