//! # quarry-storage
//!
//! The QuarryDB storage engine: an embedded, transactional, page-oriented
//! store for variable-length records with an LSM secondary index.
//!
//! The engine is built from four tightly coupled pieces:
//!
//! - the **page/file model** ([`page`], [`file`]): fixed-size versioned
//!   pages addressed by (file id, page number), read through a shared cache
//!   and mutated only via transaction-private copy-on-write copies;
//! - the **bucket record store** ([`bucket`]): page-local slot tables with
//!   placeholder/surrogate indirection, so a record's RID survives any
//!   relocation;
//! - the **transaction layer** ([`txn`], backed by the `quarry-wal` crate):
//!   dirty-page sets committed atomically through pooled write-ahead-log
//!   files, with crash recovery replaying entries in transaction-id order;
//! - the **LSM index** ([`index`]): a mutable tier and a compacted tier over
//!   the same page machinery, with non-blocking scheduled compaction.
//!
//! ## Example
//!
//! ```rust
//! use quarry_common::config::DatabaseConfig;
//! use quarry_storage::Database;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let db = Database::open(dir.path(), DatabaseConfig::default()).unwrap();
//! let bucket = db.create_bucket("events").unwrap();
//!
//! let mut session = db.session();
//! let rid = session
//!     .with_transaction(|ctx| bucket.create_record(ctx, b"hello"))
//!     .unwrap();
//!
//! session.begin().unwrap();
//! let bytes = bucket.read_record(session.ctx().unwrap(), rid).unwrap();
//! assert_eq!(bytes, b"hello");
//! session.rollback().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bucket;
pub mod dictionary;
pub mod file;
pub mod index;
pub mod page;
pub mod serializer;
pub mod stats;
pub mod txn;

mod database;

pub use bucket::{Bucket, SlotState};
pub use database::{Database, Session};
pub use dictionary::Dictionary;
pub use file::{ComponentKind, FileManager, PagedFile};
pub use index::{CompactionPhase, KeyExtractor, KeyValue, LsmIndex};
pub use page::{MutablePage, Page, PageCache};
pub use serializer::{BinarySerializer, Document, MapSchemaRegistry, RecordSerializer, SchemaRegistry};
pub use txn::{PageView, TransactionContext, TxnState};
