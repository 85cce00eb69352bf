//! The database handle.
//!
//! `Database::open` discovers the component files, replays the WAL when the
//! previous process did not close cleanly (detected by the residual lock
//! file), creates a fresh WAL pool, and starts the background maintenance
//! thread (WAL rotation/reaping and scheduled index compactions).
//!
//! All data access goes through a [`Session`], which owns the connection's
//! transaction-context stack: one transaction is never advanced by two
//! threads, while any number of sessions run in parallel.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{info, warn};

use quarry_common::config::DatabaseConfig;
use quarry_common::constants::LOCK_FILE_NAME;
use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::{FileId, PageId, TxnId};
use quarry_wal::config::WalConfig;
use quarry_wal::pool::WalPool;

use crate::bucket::Bucket;
use crate::dictionary::Dictionary;
use crate::file::{ComponentKind, FileManager, PagedFile};
use crate::index::{compaction, IndexComponents, KeyExtractor, LsmIndex};
use crate::page::{Page, PageCache};
use crate::stats::EngineStats;
use crate::txn::context::TransactionContext;
use crate::txn::manager::{self, LockTable};
use crate::txn::recovery;

/// Shared engine state.
pub(crate) struct DbInner {
    pub(crate) config: DatabaseConfig,
    pub(crate) files: FileManager,
    pub(crate) cache: PageCache,
    pub(crate) wal: WalPool,
    pub(crate) locks: LockTable,
    /// Serializes transaction begin against compaction's reference swap.
    pub(crate) compaction_swap_lock: Mutex<()>,
    /// Last assigned transaction id.
    pub(crate) txn_counter: AtomicU64,
    pub(crate) active_txns: AtomicU64,
    pub(crate) stats: EngineStats,
    pub(crate) closed: AtomicBool,
    pub(crate) buckets: RwLock<HashMap<String, Arc<Bucket>>>,
    pub(crate) indexes: RwLock<HashMap<String, Arc<LsmIndex>>>,
}

impl DbInner {
    pub(crate) fn check_open(&self) -> QuarryResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(QuarryError::Closed)
        } else {
            Ok(())
        }
    }

    /// Reads a committed page through the shared cache.
    pub(crate) fn read_committed_page(&self, page_id: PageId) -> QuarryResult<Arc<Page>> {
        let file = self
            .files
            .get(page_id.file_id())
            .ok_or(QuarryError::PageNotFound { page_id })?;
        if page_id.page_number().as_u64() >= file.page_count() {
            return Err(QuarryError::PageNotFound { page_id });
        }
        if let Some(page) = self.cache.get(page_id) {
            return Ok(page);
        }
        let data = file.read_page(page_id.page_number())?;
        let page = Arc::new(Page::new(page_id, Bytes::from(data)));
        self.cache.put(Arc::clone(&page));
        Ok(page)
    }

    /// Finds the index whose mutable component owns a file.
    pub(crate) fn index_by_file(&self, file_id: FileId) -> Option<Arc<LsmIndex>> {
        self.indexes
            .read()
            .values()
            .find(|index| index.mutable_file_id() == file_id)
            .cloned()
    }
}

type ShutdownSignal = Arc<(Mutex<bool>, Condvar)>;

/// An embedded QuarryDB database.
pub struct Database {
    inner: Arc<DbInner>,
    dictionary: Arc<Dictionary>,
    intern_lock: Mutex<()>,
    lock_path: PathBuf,
    shutdown: ShutdownSignal,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl Database {
    /// Opens (or creates) a database in `dir`.
    ///
    /// A residual lock file means the previous process did not close
    /// cleanly: the WAL is replayed before anything else touches the
    /// component files.
    pub fn open(dir: impl AsRef<Path>, config: DatabaseConfig) -> QuarryResult<Self> {
        config
            .validate()
            .map_err(|message| QuarryError::InvalidConfig { message })?;
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let lock_path = dir.join(LOCK_FILE_NAME);
        let dirty_shutdown = lock_path.exists();

        let files = FileManager::open_dir(&dir, config.page_size)?;
        resolve_duplicate_index_files(&files)?;

        let mut txn_counter = 0u64;
        if dirty_shutdown {
            info!(dir = %dir.display(), "unclean shutdown detected");
            let report = recovery::recover(&dir, &files, config.page_size)?;
            txn_counter = report.highest_txn.as_u64();
        } else {
            for path in quarry_wal::recovery::wal_file_paths(&dir)? {
                warn!(path = %path.display(), "removing stale WAL file");
                std::fs::remove_file(&path)?;
            }
        }

        std::fs::write(&lock_path, b"quarrydb\n")?;

        let wal_config = WalConfig::new(&dir)
            .with_pool_size(config.wal_pool_size)
            .with_max_file_size(config.wal_file_max_size)
            .with_sync(config.wal_sync);
        let wal = WalPool::new(wal_config)?;

        let cache = PageCache::new(config.cache_size, config.page_size);

        let inner = Arc::new(DbInner {
            files,
            cache,
            wal,
            locks: LockTable::new(),
            compaction_swap_lock: Mutex::new(()),
            txn_counter: AtomicU64::new(txn_counter),
            active_txns: AtomicU64::new(0),
            stats: EngineStats::default(),
            closed: AtomicBool::new(false),
            buckets: RwLock::new(HashMap::new()),
            indexes: RwLock::new(HashMap::new()),
            config,
        });

        // Build the component registries from the discovered files.
        for file in inner.files.all() {
            match file.kind() {
                ComponentKind::Bucket => {
                    inner.buckets.write().insert(
                        file.name().to_string(),
                        Arc::new(Bucket::new(
                            file.name(),
                            file.id(),
                            inner.config.page_size,
                            inner.config.slots_per_page,
                        )),
                    );
                }
                ComponentKind::MutableIndex { unique } => {
                    let compacted = inner
                        .files
                        .find(file.name(), ComponentKind::CompactedIndex { unique });
                    inner.indexes.write().insert(
                        file.name().to_string(),
                        Arc::new(LsmIndex::new(
                            file.name(),
                            unique,
                            Arc::clone(&file),
                            compacted,
                            None,
                        )),
                    );
                }
                ComponentKind::CompactedIndex { .. } | ComponentKind::Dictionary => {}
            }
        }

        let dict_file = match inner
            .files
            .all()
            .into_iter()
            .find(|f| f.kind() == ComponentKind::Dictionary)
        {
            Some(file) => file,
            None => inner.files.create("dictionary", ComponentKind::Dictionary)?,
        };
        let dictionary = Arc::new(Dictionary::load(&dict_file)?);

        let shutdown: ShutdownSignal = Arc::new((Mutex::new(false), Condvar::new()));
        let maintenance = {
            let inner = Arc::clone(&inner);
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("quarry-maintenance".to_string())
                .spawn(move || maintenance_loop(&inner, &shutdown))?
        };

        info!(dir = %dir.display(), "database open");
        Ok(Self {
            inner,
            dictionary,
            intern_lock: Mutex::new(()),
            lock_path,
            shutdown,
            maintenance: Mutex::new(Some(maintenance)),
        })
    }

    /// Opens a new session (connection) on this database.
    #[must_use]
    pub fn session(&self) -> Session {
        Session {
            inner: Arc::clone(&self.inner),
            stack: Vec::new(),
        }
    }

    // =========================================================================
    // Components
    // =========================================================================

    /// Creates a new bucket.
    pub fn create_bucket(&self, name: &str) -> QuarryResult<Arc<Bucket>> {
        self.inner.check_open()?;
        let mut buckets = self.inner.buckets.write();
        if buckets.contains_key(name) {
            return Err(QuarryError::invalid_argument(format!(
                "bucket '{}' already exists",
                name
            )));
        }
        let file = self.inner.files.create(name, ComponentKind::Bucket)?;
        let bucket = Arc::new(Bucket::new(
            name,
            file.id(),
            self.inner.config.page_size,
            self.inner.config.slots_per_page,
        ));
        buckets.insert(name.to_string(), Arc::clone(&bucket));
        Ok(bucket)
    }

    /// Looks up a bucket by name.
    pub fn bucket(&self, name: &str) -> QuarryResult<Arc<Bucket>> {
        self.inner
            .buckets
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| QuarryError::ComponentNotFound {
                name: name.to_string(),
            })
    }

    /// Drops a bucket and deletes its file.
    pub fn drop_bucket(&self, name: &str) -> QuarryResult<()> {
        self.inner.check_open()?;
        let bucket = self
            .inner
            .buckets
            .write()
            .remove(name)
            .ok_or_else(|| QuarryError::ComponentNotFound {
                name: name.to_string(),
            })?;
        self.inner.cache.remove_file(bucket.file_id());
        self.inner.files.drop_file(bucket.file_id())
    }

    /// Creates a new index. The extractor is the key-derivation path shared
    /// by live indexing and [`rebuild_index`](Self::rebuild_index).
    pub fn create_index(
        &self,
        name: &str,
        unique: bool,
        extractor: Option<Arc<dyn KeyExtractor>>,
    ) -> QuarryResult<Arc<LsmIndex>> {
        self.inner.check_open()?;
        let mut indexes = self.inner.indexes.write();
        if indexes.contains_key(name) {
            return Err(QuarryError::invalid_argument(format!(
                "index '{}' already exists",
                name
            )));
        }
        let file = self
            .inner
            .files
            .create(name, ComponentKind::MutableIndex { unique })?;
        let index = Arc::new(LsmIndex::new(name, unique, file, None, extractor));
        indexes.insert(name.to_string(), Arc::clone(&index));
        Ok(index)
    }

    /// Attaches (or replaces) an index's key extractor.
    ///
    /// Indexes rediscovered from disk carry no extractor; callers re-attach
    /// theirs before relying on [`rebuild_index`](Self::rebuild_index).
    pub fn set_index_extractor(
        &self,
        name: &str,
        extractor: Arc<dyn KeyExtractor>,
    ) -> QuarryResult<()> {
        self.index(name)?.set_extractor(extractor);
        Ok(())
    }

    /// Looks up an index by name.
    pub fn index(&self, name: &str) -> QuarryResult<Arc<LsmIndex>> {
        self.inner
            .indexes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| QuarryError::ComponentNotFound {
                name: name.to_string(),
            })
    }

    /// Drops an index and deletes both component files.
    pub fn drop_index(&self, name: &str) -> QuarryResult<()> {
        self.inner.check_open()?;
        let index = self
            .inner
            .indexes
            .write()
            .remove(name)
            .ok_or_else(|| QuarryError::ComponentNotFound {
                name: name.to_string(),
            })?;
        let comps = index.components();
        if let Some(compacted) = comps.compacted {
            self.inner.cache.remove_file(compacted.id());
            self.inner.files.drop_file(compacted.id())?;
        }
        self.inner.cache.remove_file(comps.mutable.id());
        self.inner.files.drop_file(comps.mutable.id())
    }

    /// Schedules and immediately runs a compaction of the named index.
    ///
    /// Returns true if the component pair was swapped.
    pub fn compact_index(&self, name: &str) -> QuarryResult<bool> {
        self.inner.check_open()?;
        let index = self.index(name)?;
        index.compaction_state().schedule();
        compaction::compact(&self.inner, &index)
    }

    /// Rebuilds an index from scratch by streaming every record of the
    /// bucket through the index's key-extraction path.
    ///
    /// Returns the number of records indexed.
    pub fn rebuild_index(&self, index_name: &str, bucket_name: &str) -> QuarryResult<u64> {
        self.inner.check_open()?;
        let index = self.index(index_name)?;
        let bucket = self.bucket(bucket_name)?;
        let extractor = index.extractor().ok_or_else(|| {
            QuarryError::invalid_argument(format!("index '{}' has no key extractor", index_name))
        })?;

        // Swap in a fresh, empty component pair.
        {
            let _guard = self.inner.compaction_swap_lock.lock();
            if self.inner.active_txns.load(Ordering::Acquire) != 0 {
                return Err(QuarryError::TxnConflict {
                    txn_id: TxnId::INVALID,
                    reason: "index rebuild requires no active transactions".to_string(),
                });
            }
            let old = index.components();
            let fresh = self.inner.files.create(
                index_name,
                ComponentKind::MutableIndex {
                    unique: index.is_unique(),
                },
            )?;
            index.swap_components(IndexComponents {
                mutable: fresh,
                compacted: None,
            });
            if let Some(compacted) = old.compacted {
                self.inner.cache.remove_file(compacted.id());
                self.inner.files.drop_file(compacted.id())?;
            }
            self.inner.cache.remove_file(old.mutable.id());
            self.inner.files.drop_file(old.mutable.id())?;
        }

        // Re-derive every key with the same extraction path live indexing
        // uses.
        let mut session = self.session();
        session.begin()?;
        let mut pairs = Vec::new();
        {
            let ctx = session.ctx()?;
            bucket.scan(ctx, |rid, record| {
                if let Some(keys) = extractor.extract(record) {
                    pairs.push((rid, keys));
                }
                Ok(true)
            })?;
        }
        let mut indexed = 0u64;
        for (rid, keys) in &pairs {
            index.put(session.ctx()?, keys, *rid)?;
            indexed += 1;
            if indexed % 1024 == 0 {
                session.commit()?;
                session.begin()?;
            }
        }
        session.commit()?;
        info!(index = index_name, bucket = bucket_name, indexed, "index rebuilt");
        Ok(indexed)
    }

    // =========================================================================
    // Dictionary
    // =========================================================================

    /// Interns a type or property name, returning its dense id.
    pub fn intern_name(&self, name: &str) -> QuarryResult<u32> {
        self.inner.check_open()?;
        let _guard = self.intern_lock.lock();
        if let Some(id) = self.dictionary.lookup(name) {
            return Ok(id);
        }
        let mut session = self.session();
        session.begin()?;
        let id = match self.dictionary.intern(session.ctx()?, name) {
            Ok(id) => id,
            Err(err) => {
                session.rollback()?;
                return Err(err);
            }
        };
        session.commit()?;
        self.dictionary.publish(name, id);
        Ok(id)
    }

    /// Resolves an interned id back to its name.
    #[must_use]
    pub fn name_by_id(&self, id: u32) -> Option<String> {
        self.dictionary.name_by_id(id)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Returns a snapshot of the engine counters.
    #[must_use]
    pub fn stats(&self) -> BTreeMap<String, u64> {
        let stats = &self.inner.stats;
        let wal = self.inner.wal.stats();
        let cache = self.inner.cache.stats();
        let mut map = BTreeMap::new();
        map.insert("pages_written".into(), stats.pages_written.load(Ordering::Relaxed));
        map.insert("bytes_written".into(), stats.bytes_written.load(Ordering::Relaxed));
        map.insert("txn_commits".into(), stats.commits.load(Ordering::Relaxed));
        map.insert("txn_rollbacks".into(), stats.rollbacks.load(Ordering::Relaxed));
        map.insert("txn_retries".into(), stats.txn_retries.load(Ordering::Relaxed));
        map.insert("index_compactions".into(), stats.compactions.load(Ordering::Relaxed));
        map.insert("wal_entries".into(), wal.entries_written.load(Ordering::Relaxed));
        map.insert("wal_bytes".into(), wal.bytes_written.load(Ordering::Relaxed));
        map.insert("wal_rotations".into(), wal.rotations.load(Ordering::Relaxed));
        map.insert("wal_files_reaped".into(), wal.files_reaped.load(Ordering::Relaxed));
        map.insert("cache_hits".into(), cache.hits.load(Ordering::Relaxed));
        map.insert("cache_misses".into(), cache.misses.load(Ordering::Relaxed));
        map.insert("cache_evictions".into(), cache.evictions.load(Ordering::Relaxed));
        map.insert("cached_pages".into(), self.inner.cache.len() as u64);
        map.insert("last_txn_id".into(), self.inner.txn_counter.load(Ordering::Relaxed));
        map
    }

    /// Closes the database cleanly: stops maintenance, flushes component
    /// files, deletes the drained WAL files and removes the lock file.
    pub fn close(&self) -> QuarryResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        {
            let (lock, cv) = &*self.shutdown;
            *lock.lock() = true;
            cv.notify_all();
        }
        if let Some(handle) = self.maintenance.lock().take() {
            let _ = handle.join();
        }

        self.inner.files.sync_all()?;
        self.inner.wal.close_and_delete()?;
        std::fs::remove_file(&self.lock_path)?;
        info!("database closed");
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(%err, "error while closing database");
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("buckets", &self.inner.buckets.read().len())
            .field("indexes", &self.inner.indexes.read().len())
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Keeps only one file per index tier after an interrupted compaction swap:
/// the lowest-id mutable file and the highest-id compacted file. Either
/// surviving combination is consistent (see the compaction module).
fn resolve_duplicate_index_files(files: &FileManager) -> QuarryResult<()> {
    let mut mutables: HashMap<String, Vec<Arc<PagedFile>>> = HashMap::new();
    let mut compacteds: HashMap<String, Vec<Arc<PagedFile>>> = HashMap::new();
    for file in files.all() {
        match file.kind() {
            ComponentKind::MutableIndex { .. } => {
                mutables.entry(file.name().to_string()).or_default().push(file);
            }
            ComponentKind::CompactedIndex { .. } => {
                compacteds.entry(file.name().to_string()).or_default().push(file);
            }
            _ => {}
        }
    }

    for (name, mut list) in mutables {
        if list.len() > 1 {
            list.sort_by_key(|f| f.id());
            for orphan in &list[1..] {
                warn!(index = %name, id = %orphan.id(), "dropping orphan mutable index file");
                files.drop_file(orphan.id())?;
            }
        }
    }
    for (name, mut list) in compacteds {
        if list.len() > 1 {
            list.sort_by_key(|f| std::cmp::Reverse(f.id()));
            for orphan in &list[1..] {
                warn!(index = %name, id = %orphan.id(), "dropping orphan compacted index file");
                files.drop_file(orphan.id())?;
            }
        }
    }
    Ok(())
}

/// Background maintenance: WAL rotation/reaping and scheduled compactions.
fn maintenance_loop(inner: &Arc<DbInner>, shutdown: &ShutdownSignal) {
    loop {
        {
            let (lock, cv) = &**shutdown;
            let mut stop = lock.lock();
            if *stop {
                return;
            }
            cv.wait_for(&mut stop, inner.config.maintenance_interval);
            if *stop {
                return;
            }
        }

        if let Err(err) = inner.wal.maintain() {
            warn!(%err, "WAL maintenance failed");
        }

        let indexes: Vec<Arc<LsmIndex>> = inner.indexes.read().values().cloned().collect();
        for index in indexes {
            let mutable_pages = index.components().mutable.page_count();
            if mutable_pages >= inner.config.compaction_page_threshold {
                index.compaction_state().schedule();
            }
            if index.compaction_phase() == crate::index::CompactionPhase::Scheduled {
                if let Err(err) = compaction::compact(inner, &index) {
                    warn!(index = index.name(), %err, "scheduled compaction failed");
                }
            }
        }
    }
}

/// A database connection owning its transaction-context stack.
///
/// `begin` pushes a fresh context, `commit`/`rollback` pop the innermost
/// one, and `rollback_all` drains the stack. The context itself is handed to
/// every bucket and index operation explicitly.
pub struct Session {
    inner: Arc<DbInner>,
    stack: Vec<TransactionContext>,
}

impl Session {
    /// Begins a transaction, nesting if one is already active.
    pub fn begin(&mut self) -> QuarryResult<()> {
        self.inner.check_open()?;
        self.stack
            .push(TransactionContext::new(Arc::clone(&self.inner)));
        Ok(())
    }

    /// Returns the active (innermost) transaction context.
    pub fn ctx(&mut self) -> QuarryResult<&mut TransactionContext> {
        self.stack
            .last_mut()
            .ok_or(QuarryError::NoActiveTransaction)
    }

    /// Returns the transaction nesting depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Commits the innermost transaction.
    pub fn commit(&mut self) -> QuarryResult<()> {
        let mut ctx = self.stack.pop().ok_or(QuarryError::NoActiveTransaction)?;
        manager::commit(&mut ctx)
    }

    /// Rolls back the innermost transaction.
    pub fn rollback(&mut self) -> QuarryResult<()> {
        let mut ctx = self.stack.pop().ok_or(QuarryError::NoActiveTransaction)?;
        manager::rollback(&mut ctx);
        Ok(())
    }

    /// Rolls back every transaction on the stack.
    pub fn rollback_all(&mut self) {
        while let Some(mut ctx) = self.stack.pop() {
            manager::rollback(&mut ctx);
        }
    }

    /// Runs `body` inside a transaction, committing on success and retrying
    /// (up to the configured attempt count) on retryable failures such as a
    /// commit lock timeout.
    pub fn with_transaction<T, F>(&mut self, mut body: F) -> QuarryResult<T>
    where
        F: FnMut(&mut TransactionContext) -> QuarryResult<T>,
    {
        let attempts = self.inner.config.txn_retries.max(1);
        let mut last_err = None;
        for attempt in 0..attempts {
            self.begin()?;
            let outcome = body(self.ctx()?);
            match outcome {
                Ok(value) => match self.commit() {
                    Ok(()) => return Ok(value),
                    Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                        self.inner.stats.txn_retries.fetch_add(1, Ordering::Relaxed);
                        last_err = Some(err);
                    }
                    Err(err) => return Err(err),
                },
                Err(err) => {
                    self.rollback()?;
                    if err.is_retryable() && attempt + 1 < attempts {
                        self.inner.stats.txn_retries.fetch_add(1, Ordering::Relaxed);
                        last_err = Some(err);
                    } else {
                        return Err(err);
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| QuarryError::internal("transaction retry loop exhausted")))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("depth", &self.stack.len())
            .finish()
    }
}
