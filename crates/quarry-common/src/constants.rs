//! System-wide constants for QuarryDB.

// =============================================================================
// Page Constants
// =============================================================================

/// Default page size in bytes (64 KiB).
///
/// Bucket pages reserve a fixed slot table large enough for
/// [`DEFAULT_SLOTS_PER_PAGE`] records, so pages need to be large enough to
/// leave a useful payload area after the table.
pub const DEFAULT_PAGE_SIZE: usize = 64 * 1024;

/// Minimum page size in bytes (16 KiB).
pub const MIN_PAGE_SIZE: usize = 16 * 1024;

/// Maximum page size in bytes (256 KiB).
pub const MAX_PAGE_SIZE: usize = 256 * 1024;

/// Size of the generic page header in bytes.
///
/// The header contains: version (8), content_size (4) = 12 bytes. Every
/// paginated component lays its own data out after this header.
pub const PAGE_HEADER_SIZE: usize = 12;

/// Byte offset of the page version field within a page.
pub const PAGE_VERSION_OFFSET: usize = 0;

/// Byte offset of the content-size field within a page.
pub const PAGE_CONTENT_SIZE_OFFSET: usize = 8;

// =============================================================================
// Bucket Constants
// =============================================================================

/// Default number of record slots per bucket page.
pub const DEFAULT_SLOTS_PER_PAGE: u16 = 2048;

/// Size of one slot-table entry in bytes (a u32 page-local offset).
pub const SLOT_ENTRY_SIZE: usize = 4;

/// Minimum record content size in bytes.
///
/// Records are zero-padded up to this size so that any slot can later be
/// overwritten in place by a placeholder forwarding pointer (a 5-byte
/// varint-encoded position).
pub const MIN_RECORD_CONTENT: usize = 5;

/// Size of a placeholder's forwarding pointer in bytes.
pub const PLACEHOLDER_POINTER_SIZE: usize = 5;

// =============================================================================
// WAL Constants
// =============================================================================

/// Default maximum size of a single WAL file before rotation (64 MiB).
pub const DEFAULT_WAL_FILE_MAX_SIZE: u64 = 64 * 1024 * 1024;

/// Default number of pooled WAL files.
pub const DEFAULT_WAL_POOL_SIZE: usize = 4;

/// Magic number terminating every WAL entry ("QRYWALEN").
pub const WAL_ENTRY_MAGIC: u64 = 0x5152_5957_414C_454E;

// =============================================================================
// Transaction Constants
// =============================================================================

/// Default commit file-lock acquisition timeout in milliseconds.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

/// Default number of attempts for retry-wrapped transactions.
pub const DEFAULT_TXN_RETRIES: u32 = 3;

// =============================================================================
// Cache and Maintenance
// =============================================================================

/// Default page cache budget in bytes (256 MiB).
pub const DEFAULT_CACHE_SIZE: usize = 256 * 1024 * 1024;

/// Default background maintenance interval in milliseconds.
pub const DEFAULT_MAINTENANCE_INTERVAL_MS: u64 = 1_000;

/// Default mutable-component page count that schedules an index compaction.
pub const DEFAULT_COMPACTION_PAGE_THRESHOLD: u64 = 256;

// =============================================================================
// File Names
// =============================================================================

/// Name of the lock file marking a database as open.
pub const LOCK_FILE_NAME: &str = "database.lck";

/// Extension of WAL files.
pub const WAL_FILE_EXT: &str = "wal";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_constants() {
        assert!(DEFAULT_PAGE_SIZE.is_power_of_two());
        assert!(MIN_PAGE_SIZE.is_power_of_two());
        assert!(PAGE_HEADER_SIZE < MIN_PAGE_SIZE);
    }

    #[test]
    fn test_bucket_constants() {
        // Header + full slot table must leave payload room in the smallest page.
        let fixed = PAGE_HEADER_SIZE + 2 + DEFAULT_SLOTS_PER_PAGE as usize * SLOT_ENTRY_SIZE;
        assert!(fixed < MIN_PAGE_SIZE);
        // A placeholder (1-byte length varint + pointer) fits in the minimum
        // record footprint (1-byte length varint + padded content).
        assert!(1 + PLACEHOLDER_POINTER_SIZE <= 1 + MIN_RECORD_CONTENT);
    }
}
