//! Engine statistics.

use std::sync::atomic::AtomicU64;

/// Counters maintained by the storage engine.
///
/// The full stats snapshot exposed by `Database::stats` merges these with
/// the WAL pool and page cache counters.
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Pages flushed to component files.
    pub pages_written: AtomicU64,
    /// Bytes flushed to component files.
    pub bytes_written: AtomicU64,
    /// Committed transactions.
    pub commits: AtomicU64,
    /// Rolled-back transactions.
    pub rollbacks: AtomicU64,
    /// Retry-wrapper re-executions.
    pub txn_retries: AtomicU64,
    /// Completed index compactions.
    pub compactions: AtomicU64,
}
