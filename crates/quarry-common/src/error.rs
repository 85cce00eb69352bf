//! Database error types.
//!
//! One `QuarryError` enum covers the whole storage core. The taxonomy is
//! designed so that the immediate caller can pattern-match instead of
//! downcasting: not-found conditions convert into API-level absence, the
//! retryable kinds drive the transaction retry wrapper, and I/O or
//! consistency failures escalate to closing the database handle.

use std::fmt;
use thiserror::Error;

use crate::types::{FileId, PageId, Rid, TxnId};

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and are stable
/// across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Internal error (bug).
    Internal = 0x0001,
    /// Invalid argument provided.
    InvalidArgument = 0x0002,
    /// Invalid configuration.
    InvalidConfig = 0x0003,
    /// Database handle is closed.
    Closed = 0x0004,

    // I/O errors (0x0100 - 0x01FF)
    /// General I/O error.
    Io = 0x0100,
    /// Data corruption detected.
    Corruption = 0x0101,

    // Storage errors (0x0200 - 0x02FF)
    /// Page not found.
    PageNotFound = 0x0200,
    /// Record not found.
    RecordNotFound = 0x0201,
    /// Record too large for a page.
    RecordTooLarge = 0x0202,
    /// Component not found.
    ComponentNotFound = 0x0203,

    // Transaction errors (0x0300 - 0x03FF)
    /// Commit file-lock acquisition timed out.
    LockTimeout = 0x0300,
    /// Concurrent modification detected.
    TxnConflict = 0x0301,
    /// No transaction is active.
    NoActiveTransaction = 0x0302,
    /// Transaction is in the wrong state for the operation.
    InvalidState = 0x0303,

    // Index errors (0x0400 - 0x04FF)
    /// Key not found.
    KeyNotFound = 0x0400,
    /// Duplicate key on a unique index.
    DuplicateKey = 0x0401,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "I/O",
            0x02 => "Storage",
            0x03 => "Transaction",
            0x04 => "Index",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for QuarryDB.
#[derive(Debug, Error)]
pub enum QuarryError {
    /// Internal error - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    /// The database handle is closed.
    #[error("database is closed")]
    Closed,

    /// I/O error from the underlying system.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Data corruption detected.
    #[error("data corruption detected: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// Page not found.
    #[error("page {page_id} not found")]
    PageNotFound {
        /// The missing page.
        page_id: PageId,
    },

    /// Record not found, deleted, or resolving to a deleted surrogate.
    #[error("record {rid} not found")]
    RecordNotFound {
        /// The missing record.
        rid: Rid,
    },

    /// Record payload exceeds a page's usable content area.
    #[error("record of {size} bytes is too big to store (max {max})")]
    RecordTooLarge {
        /// Serialized record size.
        size: usize,
        /// Maximum storable size.
        max: usize,
    },

    /// Component (bucket or index) not found.
    #[error("component '{name}' not found")]
    ComponentNotFound {
        /// The missing component name.
        name: String,
    },

    /// Commit file-lock acquisition timed out.
    #[error("timed out after {timeout_ms}ms acquiring lock on file {file_id}")]
    LockTimeout {
        /// The contended file.
        file_id: FileId,
        /// The configured timeout.
        timeout_ms: u64,
    },

    /// Concurrent modification detected.
    #[error("transaction {txn_id} hit a concurrent modification: {reason}")]
    TxnConflict {
        /// The losing transaction.
        txn_id: TxnId,
        /// What conflicted.
        reason: String,
    },

    /// No transaction is active on the session.
    #[error("no active transaction")]
    NoActiveTransaction,

    /// Transaction is in the wrong state for the operation.
    #[error("invalid transaction state: {current}, expected {expected}")]
    InvalidState {
        /// The current state.
        current: &'static str,
        /// The expected state.
        expected: &'static str,
    },

    /// Key not found in an index.
    #[error("key not found")]
    KeyNotFound,

    /// A unique index already holds a different rid for the key.
    #[error("duplicate key on unique index '{index}'")]
    DuplicateKey {
        /// The index name.
        index: String,
    },
}

/// Result type for QuarryDB operations.
pub type QuarryResult<T> = Result<T, QuarryError>;

impl QuarryError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Internal { .. } => ErrorCode::Internal,
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            Self::Closed => ErrorCode::Closed,
            Self::Io { .. } => ErrorCode::Io,
            Self::Corruption { .. } => ErrorCode::Corruption,
            Self::PageNotFound { .. } => ErrorCode::PageNotFound,
            Self::RecordNotFound { .. } => ErrorCode::RecordNotFound,
            Self::RecordTooLarge { .. } => ErrorCode::RecordTooLarge,
            Self::ComponentNotFound { .. } => ErrorCode::ComponentNotFound,
            Self::LockTimeout { .. } => ErrorCode::LockTimeout,
            Self::TxnConflict { .. } => ErrorCode::TxnConflict,
            Self::NoActiveTransaction => ErrorCode::NoActiveTransaction,
            Self::InvalidState { .. } => ErrorCode::InvalidState,
            Self::KeyNotFound => ErrorCode::KeyNotFound,
            Self::DuplicateKey { .. } => ErrorCode::DuplicateKey,
        }
    }

    /// Returns true if the failed operation may succeed when re-executed.
    ///
    /// The transaction retry wrapper re-runs the transaction body on these.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::TxnConflict { .. })
    }

    /// Returns true if this error signals absence rather than failure.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::RecordNotFound { .. }
                | Self::KeyNotFound
                | Self::PageNotFound { .. }
                | Self::ComponentNotFound { .. }
        )
    }

    /// Returns true if this error must close the database handle.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Corruption { .. })
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    #[must_use]
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }
}
