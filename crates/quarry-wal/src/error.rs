//! WAL error types.

use std::io;
use thiserror::Error;

use quarry_common::error::QuarryError;

/// Result type for WAL operations.
pub type WalResult<T> = Result<T, WalError>;

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// I/O error during WAL operations.
    #[error("WAL I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: io::Error,
    },

    /// A log entry failed validation (checksum, magic, or framing).
    #[error("WAL entry corrupted: {reason}")]
    Corrupted {
        /// What failed to validate.
        reason: String,
    },

    /// The pool is closed.
    #[error("WAL is closed")]
    Closed,

    /// Configuration error.
    #[error("WAL configuration error: {reason}")]
    Config {
        /// What is wrong.
        reason: String,
    },
}

impl WalError {
    /// Creates a corruption error.
    pub fn corrupted(reason: impl Into<String>) -> Self {
        Self::Corrupted {
            reason: reason.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}

impl From<WalError> for QuarryError {
    fn from(err: WalError) -> Self {
        match err {
            WalError::Io { source } => QuarryError::Io { source },
            WalError::Corrupted { reason } => QuarryError::Corruption { message: reason },
            WalError::Closed => QuarryError::Closed,
            WalError::Config { reason } => QuarryError::InvalidConfig { message: reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion() {
        let err: QuarryError = WalError::corrupted("bad magic").into();
        assert!(matches!(err, QuarryError::Corruption { .. }));

        let err: QuarryError = WalError::Closed.into();
        assert!(matches!(err, QuarryError::Closed));
    }
}
