//! Shared page cache.
//!
//! Process-wide map from `PageId` to committed page, bounded by a byte
//! budget. Any thread may read a cached page; mutation happens on
//! transaction-private copies that are published here at commit. Eviction is
//! least-recently-touched and only ever drops clean committed pages, so
//! evicted content is always re-readable from disk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use quarry_common::types::{FileId, PageId};

use super::Page;

/// Page cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Lookups that found the page cached.
    pub hits: AtomicU64,
    /// Lookups that missed.
    pub misses: AtomicU64,
    /// Pages dropped under memory pressure.
    pub evictions: AtomicU64,
}

struct CacheEntry {
    page: Arc<Page>,
    last_touch: AtomicU64,
}

/// Process-wide cache of committed pages.
pub struct PageCache {
    max_pages: usize,
    tick: AtomicU64,
    entries: RwLock<HashMap<PageId, CacheEntry>>,
    stats: CacheStats,
}

impl PageCache {
    /// Creates a cache holding at most `max_bytes` worth of pages.
    #[must_use]
    pub fn new(max_bytes: usize, page_size: usize) -> Self {
        let max_pages = (max_bytes / page_size).max(8);
        Self {
            max_pages,
            tick: AtomicU64::new(0),
            entries: RwLock::new(HashMap::new()),
            stats: CacheStats::default(),
        }
    }

    /// Looks up a page, marking it recently used.
    pub fn get(&self, page_id: PageId) -> Option<Arc<Page>> {
        let entries = self.entries.read();
        match entries.get(&page_id) {
            Some(entry) => {
                let now = self.tick.fetch_add(1, Ordering::Relaxed);
                entry.last_touch.store(now, Ordering::Relaxed);
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(&entry.page))
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts or replaces a committed page, evicting if over budget.
    pub fn put(&self, page: Arc<Page>) {
        let now = self.tick.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.write();
        entries.insert(
            page.id(),
            CacheEntry {
                page,
                last_touch: AtomicU64::new(now),
            },
        );

        while entries.len() > self.max_pages {
            let victim = entries
                .iter()
                .min_by_key(|(_, e)| e.last_touch.load(Ordering::Relaxed))
                .map(|(id, _)| *id);
            match victim {
                Some(id) => {
                    entries.remove(&id);
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
    }

    /// Drops every cached page of a file (component dropped or swapped).
    pub fn remove_file(&self, file_id: FileId) {
        self.entries
            .write()
            .retain(|id, _| id.file_id() != file_id);
    }

    /// Returns the number of cached pages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns cache statistics.
    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

impl std::fmt::Debug for PageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCache")
            .field("pages", &self.len())
            .field("max_pages", &self.max_pages)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use quarry_common::types::PageNumber;

    const PAGE_SIZE: usize = 16 * 1024;

    fn page(file: u32, number: u64) -> Arc<Page> {
        let id = PageId::new(FileId::new(file), PageNumber::new(number));
        Arc::new(Page::new(id, Bytes::from(vec![0u8; PAGE_SIZE])))
    }

    #[test]
    fn test_get_put() {
        let cache = PageCache::new(PAGE_SIZE * 16, PAGE_SIZE);
        let p = page(1, 0);
        assert!(cache.get(p.id()).is_none());

        cache.put(Arc::clone(&p));
        let hit = cache.get(p.id()).unwrap();
        assert_eq!(hit.id(), p.id());
        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_eviction_prefers_cold_pages() {
        let cache = PageCache::new(PAGE_SIZE * 8, PAGE_SIZE);
        for i in 0..8 {
            cache.put(page(1, i));
        }
        // Touch everything except page 3.
        for i in 0..8 {
            if i != 3 {
                cache.get(PageId::new(FileId::new(1), PageNumber::new(i)));
            }
        }
        cache.put(page(1, 100));
        assert!(cache
            .get(PageId::new(FileId::new(1), PageNumber::new(3)))
            .is_none());
        assert_eq!(cache.stats().evictions.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_remove_file() {
        let cache = PageCache::new(PAGE_SIZE * 16, PAGE_SIZE);
        cache.put(page(1, 0));
        cache.put(page(2, 0));
        cache.remove_file(FileId::new(1));
        assert!(cache
            .get(PageId::new(FileId::new(1), PageNumber::new(0)))
            .is_none());
        assert!(cache
            .get(PageId::new(FileId::new(2), PageNumber::new(0)))
            .is_some());
    }
}
