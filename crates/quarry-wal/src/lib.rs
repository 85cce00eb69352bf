//! # quarry-wal
//!
//! Write-ahead log for QuarryDB.
//!
//! A commit serializes its dirty-page set into a single log entry and
//! appends it to one of a pool of log files, sharded by thread to minimize
//! contention. The entry is made durable according to the configured
//! [`SyncMode`](quarry_common::config::SyncMode) before the pages themselves
//! are written to their component files; a crash in between leaves the entry
//! for startup recovery, which replays entries across all residual files in
//! strict transaction-id order.
//!
//! Modules:
//!
//! - [`record`] - the binary entry format (page deltas, checksum, magic)
//! - [`file`] - a single append-only log file
//! - [`pool`] - the rotating, thread-sharded file pool
//! - [`recovery`] - the k-way merge replay reader

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod file;
pub mod pool;
pub mod record;
pub mod recovery;

pub use config::WalConfig;
pub use error::{WalError, WalResult};
pub use file::WalFile;
pub use pool::{WalPool, WalStats};
pub use record::{PageDelta, WalEntry};
pub use recovery::RecoveryStream;
