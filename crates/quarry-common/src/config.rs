//! Database configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DEFAULT_CACHE_SIZE, DEFAULT_COMPACTION_PAGE_THRESHOLD, DEFAULT_LOCK_TIMEOUT_MS,
    DEFAULT_MAINTENANCE_INTERVAL_MS, DEFAULT_PAGE_SIZE, DEFAULT_SLOTS_PER_PAGE,
    DEFAULT_TXN_RETRIES, DEFAULT_WAL_FILE_MAX_SIZE, DEFAULT_WAL_POOL_SIZE, MAX_PAGE_SIZE,
    MIN_PAGE_SIZE, PAGE_HEADER_SIZE, SLOT_ENTRY_SIZE,
};

/// Durability mode for WAL appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Buffered writes, no explicit flush (fastest; survives a process kill
    /// but not an OS crash).
    Buffered,
    /// Flush file data without metadata (fdatasync).
    Data,
    /// Flush file data and metadata (fsync).
    Full,
}

impl Default for SyncMode {
    fn default() -> Self {
        Self::Data
    }
}

/// Configuration for a QuarryDB database.
///
/// # Example
///
/// ```rust
/// use quarry_common::config::{DatabaseConfig, SyncMode};
///
/// let config = DatabaseConfig::default()
///     .with_wal_sync(SyncMode::Buffered)
///     .with_txn_retries(5);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Page size in bytes for every component file.
    pub page_size: usize,

    /// Number of record slots reserved per bucket page.
    pub slots_per_page: u16,

    /// Page cache budget in bytes.
    pub cache_size: usize,

    /// Commit file-lock acquisition timeout.
    pub lock_timeout: Duration,

    /// Attempts for retry-wrapped transactions.
    pub txn_retries: u32,

    /// Number of pooled WAL files.
    pub wal_pool_size: usize,

    /// Maximum WAL file size before rotation.
    pub wal_file_max_size: u64,

    /// Durability mode for WAL appends.
    pub wal_sync: SyncMode,

    /// Interval of the background maintenance task (WAL rotation/reaping and
    /// scheduled index compactions).
    pub maintenance_interval: Duration,

    /// Mutable-component page count above which an index compaction is
    /// scheduled by the maintenance task.
    pub compaction_page_threshold: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            slots_per_page: DEFAULT_SLOTS_PER_PAGE,
            cache_size: DEFAULT_CACHE_SIZE,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            txn_retries: DEFAULT_TXN_RETRIES,
            wal_pool_size: DEFAULT_WAL_POOL_SIZE,
            wal_file_max_size: DEFAULT_WAL_FILE_MAX_SIZE,
            wal_sync: SyncMode::default(),
            maintenance_interval: Duration::from_millis(DEFAULT_MAINTENANCE_INTERVAL_MS),
            compaction_page_threshold: DEFAULT_COMPACTION_PAGE_THRESHOLD,
        }
    }
}

impl DatabaseConfig {
    /// Sets the page size.
    #[must_use]
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the number of slots per bucket page.
    #[must_use]
    pub fn with_slots_per_page(mut self, slots: u16) -> Self {
        self.slots_per_page = slots;
        self
    }

    /// Sets the page cache budget.
    #[must_use]
    pub fn with_cache_size(mut self, bytes: usize) -> Self {
        self.cache_size = bytes;
        self
    }

    /// Sets the commit lock timeout.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the retry-wrapped transaction attempt count.
    #[must_use]
    pub fn with_txn_retries(mut self, retries: u32) -> Self {
        self.txn_retries = retries;
        self
    }

    /// Sets the WAL pool size.
    #[must_use]
    pub fn with_wal_pool_size(mut self, size: usize) -> Self {
        self.wal_pool_size = size;
        self
    }

    /// Sets the WAL file rotation cap.
    #[must_use]
    pub fn with_wal_file_max_size(mut self, size: u64) -> Self {
        self.wal_file_max_size = size;
        self
    }

    /// Sets the WAL durability mode.
    #[must_use]
    pub fn with_wal_sync(mut self, mode: SyncMode) -> Self {
        self.wal_sync = mode;
        self
    }

    /// Sets the background maintenance interval.
    #[must_use]
    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    /// Sets the index compaction scheduling threshold.
    #[must_use]
    pub fn with_compaction_page_threshold(mut self, pages: u64) -> Self {
        self.compaction_page_threshold = pages;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.page_size < MIN_PAGE_SIZE || self.page_size > MAX_PAGE_SIZE {
            return Err(format!(
                "page size must be between {} and {} bytes",
                MIN_PAGE_SIZE, MAX_PAGE_SIZE
            ));
        }

        if self.slots_per_page == 0 {
            return Err("slots per page must be positive".to_string());
        }

        let fixed = PAGE_HEADER_SIZE + 2 + self.slots_per_page as usize * SLOT_ENTRY_SIZE;
        if fixed + 64 > self.page_size {
            return Err("slot table leaves no usable record space in a page".to_string());
        }

        if self.wal_pool_size == 0 {
            return Err("WAL pool size must be positive".to_string());
        }

        if self.wal_file_max_size < 1024 * 1024 {
            return Err("WAL file size cap must be at least 1 MiB".to_string());
        }

        if self.txn_retries == 0 {
            return Err("transaction retries must be positive".to_string());
        }

        Ok(())
    }

    /// Returns the usable record area of a bucket page: page size minus the
    /// generic header, the record count field, and the slot table.
    #[must_use]
    pub fn bucket_usable_space(&self) -> usize {
        self.page_size - PAGE_HEADER_SIZE - 2 - self.slots_per_page as usize * SLOT_ENTRY_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DatabaseConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.bucket_usable_space() > 32 * 1024);
    }

    #[test]
    fn test_builder() {
        let config = DatabaseConfig::default()
            .with_page_size(32 * 1024)
            .with_wal_sync(SyncMode::Full)
            .with_wal_pool_size(2);
        assert_eq!(config.page_size, 32 * 1024);
        assert_eq!(config.wal_sync, SyncMode::Full);
        assert_eq!(config.wal_pool_size, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        // Page too small for the default slot table.
        let config = DatabaseConfig::default().with_page_size(1024);
        assert!(config.validate().is_err());

        let config = DatabaseConfig::default().with_wal_pool_size(0);
        assert!(config.validate().is_err());

        let config = DatabaseConfig::default().with_wal_file_max_size(1024);
        assert!(config.validate().is_err());

        let config = DatabaseConfig::default().with_txn_retries(0);
        assert!(config.validate().is_err());
    }
}
