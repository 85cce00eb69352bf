//! Record identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::FileId;

/// Record identifier - the stable logical address of a record.
///
/// A `Rid` is the pair (bucket file id, logical position), where the position
/// is `page_number * slots_per_page + in_page_slot`. It never changes once
/// assigned, even when the record payload is relocated to another page via a
/// placeholder. A `Rid` resolves to a record only through a bucket lookup; it
/// embeds no pointer.
///
/// # Example
///
/// ```rust
/// use quarry_common::types::{FileId, Rid};
///
/// let rid = Rid::new(FileId::new(5), 4096);
/// assert_eq!(rid.bucket_id().as_u32(), 5);
/// assert_eq!(rid.position(), 4096);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rid {
    bucket_id: FileId,
    position: u64,
}

impl Rid {
    /// Sentinel rid used as an index tombstone: an entry carrying this rid
    /// masks all older entries with the same key in lower index tiers.
    pub const TOMBSTONE: Self = Self {
        bucket_id: FileId::INVALID,
        position: u64::MAX,
    };

    /// Creates a new `Rid`.
    #[inline]
    #[must_use]
    pub const fn new(bucket_id: FileId, position: u64) -> Self {
        Self {
            bucket_id,
            position,
        }
    }

    /// Returns the bucket file id.
    #[inline]
    #[must_use]
    pub const fn bucket_id(self) -> FileId {
        self.bucket_id
    }

    /// Returns the logical position within the bucket.
    #[inline]
    #[must_use]
    pub const fn position(self) -> u64 {
        self.position
    }

    /// Returns true if this is the tombstone sentinel.
    #[inline]
    #[must_use]
    pub fn is_tombstone(self) -> bool {
        self == Self::TOMBSTONE
    }
}

impl fmt::Debug for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_tombstone() {
            write!(f, "Rid(TOMBSTONE)")
        } else {
            write!(f, "Rid(#{}:{})", self.bucket_id, self.position)
        }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.bucket_id, self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rid_fields() {
        let rid = Rid::new(FileId::new(3), 2048);
        assert_eq!(rid.bucket_id(), FileId::new(3));
        assert_eq!(rid.position(), 2048);
        assert!(!rid.is_tombstone());
    }

    #[test]
    fn test_rid_ordering() {
        let a = Rid::new(FileId::new(1), 100);
        let b = Rid::new(FileId::new(1), 101);
        let c = Rid::new(FileId::new(2), 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_tombstone() {
        assert!(Rid::TOMBSTONE.is_tombstone());
        assert_eq!(format!("{:?}", Rid::TOMBSTONE), "Rid(TOMBSTONE)");
    }

    #[test]
    fn test_display() {
        let rid = Rid::new(FileId::new(7), 12);
        assert_eq!(rid.to_string(), "#7:12");
    }
}
