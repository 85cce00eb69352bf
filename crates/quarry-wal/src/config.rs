//! WAL configuration.

use std::path::PathBuf;

use quarry_common::config::SyncMode;
use quarry_common::constants::{
    DEFAULT_WAL_FILE_MAX_SIZE, DEFAULT_WAL_POOL_SIZE, WAL_FILE_EXT,
};

/// Configuration for the write-ahead log.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Directory where log files are stored.
    pub dir: PathBuf,

    /// Number of pooled active log files.
    pub pool_size: usize,

    /// Maximum size of a single log file before rotation.
    pub max_file_size: u64,

    /// Durability mode for appends.
    pub sync: SyncMode,
}

impl WalConfig {
    /// Creates a new WAL configuration for the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pool_size: DEFAULT_WAL_POOL_SIZE,
            max_file_size: DEFAULT_WAL_FILE_MAX_SIZE,
            sync: SyncMode::default(),
        }
    }

    /// Sets the pool size.
    #[must_use]
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Sets the rotation cap.
    #[must_use]
    pub fn with_max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Sets the durability mode.
    #[must_use]
    pub fn with_sync(mut self, sync: SyncMode) -> Self {
        self.sync = sync;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.pool_size == 0 {
            return Err("pool size must be positive".to_string());
        }
        if self.max_file_size < 1024 * 1024 {
            return Err("file size cap must be at least 1 MiB".to_string());
        }
        Ok(())
    }

    /// Returns the log file path for a given file sequence number.
    pub fn file_path(&self, seq: u64) -> PathBuf {
        self.dir.join(format!("wal_{:016x}.{}", seq, WAL_FILE_EXT))
    }
}
