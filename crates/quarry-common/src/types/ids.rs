//! Core identifier types for QuarryDB.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of different ID kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// File identifier - uniquely identifies a component file in a database.
///
/// Every paginated component (bucket, index tier, dictionary) owns exactly
/// one file, and the file id doubles as the component id.
///
/// # Example
///
/// ```rust
/// use quarry_common::types::FileId;
///
/// let file = FileId::new(7);
/// assert_eq!(file.as_u32(), 7);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FileId(u32);

impl FileId {
    /// Invalid file ID, used as a sentinel value.
    pub const INVALID: Self = Self(u32::MAX);

    /// Creates a new `FileId` from a raw u32 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Checks if this is a valid file ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "FileId(INVALID)")
        } else {
            write!(f, "FileId({})", self.0)
        }
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for FileId {
    #[inline]
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

impl From<FileId> for u32 {
    #[inline]
    fn from(id: FileId) -> Self {
        id.0
    }
}

/// Page number - the zero-based position of a page within its file.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PageNumber(u64);

impl PageNumber {
    /// The first page of a file.
    pub const FIRST: Self = Self(0);

    /// Creates a new `PageNumber` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(number: u64) -> Self {
        Self(number)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next page number.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Debug for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageNumber({})", self.0)
    }
}

impl fmt::Display for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PageNumber {
    #[inline]
    fn from(number: u64) -> Self {
        Self::new(number)
    }
}

/// Page identifier - uniquely identifies a page in the database.
///
/// A page is addressed by the pair (file id, page number). `PageId` orders by
/// file first and page second, which is the order commits list their dirty
/// pages in.
///
/// # Example
///
/// ```rust
/// use quarry_common::types::{FileId, PageId, PageNumber};
///
/// let page = PageId::new(FileId::new(1), PageNumber::new(9));
/// assert_eq!(page.file_id().as_u32(), 1);
/// assert_eq!(page.page_number().as_u64(), 9);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId {
    file_id: FileId,
    page_number: PageNumber,
}

impl PageId {
    /// Creates a new `PageId`.
    #[inline]
    #[must_use]
    pub const fn new(file_id: FileId, page_number: PageNumber) -> Self {
        Self {
            file_id,
            page_number,
        }
    }

    /// Returns the file id.
    #[inline]
    #[must_use]
    pub const fn file_id(self) -> FileId {
        self.file_id
    }

    /// Returns the page number within the file.
    #[inline]
    #[must_use]
    pub const fn page_number(self) -> PageNumber {
        self.page_number
    }
}

impl fmt::Debug for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageId({}:{})", self.file_id, self.page_number)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file_id, self.page_number)
    }
}

/// Transaction identifier - uniquely identifies a committed transaction.
///
/// Transaction IDs are strictly increasing and assigned by a single atomic
/// counter at commit time; WAL replay applies entries in this order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TxnId(u64);

impl TxnId {
    /// Invalid transaction ID, used as a sentinel value.
    pub const INVALID: Self = Self(0);

    /// Minimum valid transaction ID.
    pub const MIN: Self = Self(1);

    /// Creates a new `TxnId` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next transaction ID.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Checks if this is a valid transaction ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "TxnId(INVALID)")
        } else {
            write!(f, "TxnId({})", self.0)
        }
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TxnId {
    #[inline]
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

impl From<TxnId> for u64 {
    #[inline]
    fn from(id: TxnId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_id() {
        let file = FileId::new(42);
        assert_eq!(file.as_u32(), 42);
        assert!(file.is_valid());
        assert!(!FileId::INVALID.is_valid());
    }

    #[test]
    fn test_page_number() {
        let number = PageNumber::new(7);
        assert_eq!(number.next().as_u64(), 8);
        assert_eq!(PageNumber::FIRST.as_u64(), 0);
    }

    #[test]
    fn test_page_id_ordering() {
        // File id dominates, page number breaks ties.
        let a = PageId::new(FileId::new(1), PageNumber::new(100));
        let b = PageId::new(FileId::new(2), PageNumber::new(0));
        let c = PageId::new(FileId::new(2), PageNumber::new(1));
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_txn_id() {
        let txn = TxnId::new(100);
        assert_eq!(txn.as_u64(), 100);
        assert!(txn.is_valid());
        assert!(!TxnId::INVALID.is_valid());
        assert_eq!(txn.next().as_u64(), 101);
    }

    #[test]
    fn test_display() {
        let page = PageId::new(FileId::new(3), PageNumber::new(12));
        assert_eq!(page.to_string(), "3:12");
    }
}
