//! Transactions.
//!
//! A [`TransactionContext`] is the explicit context object passed through
//! every storage-layer call. It owns the transaction's private copy-on-write
//! pages and its buffered index changes; nothing escapes it until commit.
//! The commit protocol (file locks, WAL append, page flush) lives in
//! [`manager`], and startup replay in [`recovery`].

pub(crate) mod context;
pub(crate) mod manager;
pub(crate) mod recovery;

pub use context::{PageView, TransactionContext};
pub use manager::TxnState;
