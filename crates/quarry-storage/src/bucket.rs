//! Bucket record store.
//!
//! A bucket stores variable-length byte records in page-local slot tables.
//!
//! # Page Layout
//!
//! ```text
//! +------------------------+
//! |  generic header        |  12 bytes (version, content_size)
//! +------------------------+
//! |  record_count: u16     |  slots allocated in this page
//! +------------------------+
//! |  slot table            |  slots_per_page x 4-byte offsets
//! +------------------------+
//! |  record area           |  records packed in slot order,
//! |   [len varint][bytes]  |  growing toward the page end
//! +------------------------+
//! ```
//!
//! A slot's stored length is a zig-zag varint whose sign carries the state:
//! positive for a live record, zero for a tombstone, -1 for a placeholder
//! (content is the surrogate's position), any other negative for a surrogate
//! whose true length is the absolute value. Content is padded to a 5-byte
//! minimum so that every slot can later hold a placeholder in place, which
//! is what keeps a record's RID stable across any relocation.
//!
//! Slot offsets within a page are strictly ascending in slot order. Deletes
//! leave tombstones (no compaction), so later offsets never move; only the
//! update-shift path rewrites offsets, and only for slots after the target.

use quarry_common::constants::{
    MIN_RECORD_CONTENT, PAGE_HEADER_SIZE, PLACEHOLDER_POINTER_SIZE, SLOT_ENTRY_SIZE,
};
use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::{varint, FileId, PageId, PageNumber, Rid};

use crate::page::{read_u16, read_u32};
use crate::txn::TransactionContext;

/// Offset of the per-page record count.
const RECORD_COUNT_OFFSET: usize = PAGE_HEADER_SIZE;

/// Offset of the slot table.
const SLOT_TABLE_OFFSET: usize = RECORD_COUNT_OFFSET + 2;

/// The decoded state of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// A live record.
    Live {
        /// Offset of the length varint within the page.
        offset: usize,
        /// Length of the length varint.
        varint_len: usize,
        /// Stored (padded) content length.
        length: usize,
    },
    /// A deleted record; the slot is a tombstone.
    Deleted,
    /// A forwarding pointer to a relocated record.
    Placeholder {
        /// Logical position of the surrogate within the same bucket.
        position: u64,
    },
    /// A relocated record, reachable through its placeholder.
    Surrogate {
        /// Offset of the length varint within the page.
        offset: usize,
        /// Length of the length varint.
        varint_len: usize,
        /// Stored (padded) content length.
        length: usize,
    },
}

/// A paginated record store.
pub struct Bucket {
    name: String,
    file_id: FileId,
    page_size: usize,
    slots_per_page: u16,
    /// First byte of the record area.
    data_begin: usize,
}

impl Bucket {
    pub(crate) fn new(
        name: impl Into<String>,
        file_id: FileId,
        page_size: usize,
        slots_per_page: u16,
    ) -> Self {
        Self {
            name: name.into(),
            file_id,
            page_size,
            slots_per_page,
            data_begin: SLOT_TABLE_OFFSET + slots_per_page as usize * SLOT_ENTRY_SIZE,
        }
    }

    /// Returns the bucket name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the bucket's file id.
    #[must_use]
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Returns the usable record area of one page.
    #[must_use]
    pub fn usable_space(&self) -> usize {
        self.page_size - self.data_begin
    }

    /// Returns the largest content size a single record may have.
    #[must_use]
    pub fn max_record_size(&self) -> usize {
        // Leave room for the largest length varint.
        self.usable_space() - varint::MAX_VARINT_LEN
    }

    fn location(&self, position: u64) -> (PageNumber, u16) {
        let slots = u64::from(self.slots_per_page);
        (
            PageNumber::new(position / slots),
            (position % slots) as u16,
        )
    }

    fn position(&self, page: PageNumber, slot: u16) -> u64 {
        page.as_u64() * u64::from(self.slots_per_page) + u64::from(slot)
    }

    fn page_id(&self, page: PageNumber) -> PageId {
        PageId::new(self.file_id, page)
    }

    fn slot_entry(data: &[u8], slot: u16) -> usize {
        read_u32(data, SLOT_TABLE_OFFSET + slot as usize * SLOT_ENTRY_SIZE) as usize
    }

    fn record_count(data: &[u8]) -> u16 {
        read_u16(data, RECORD_COUNT_OFFSET)
    }

    /// Decodes the state of one slot from a page buffer.
    fn decode_slot(&self, data: &[u8], slot: u16) -> QuarryResult<SlotState> {
        let offset = Self::slot_entry(data, slot);
        if offset < self.data_begin || offset >= self.page_size {
            return Err(QuarryError::corruption(format!(
                "slot {} of bucket '{}' has offset {} outside the record area",
                slot, self.name, offset
            )));
        }
        let (stored, varint_len) = varint::read_i64(&data[offset..])
            .ok_or_else(|| QuarryError::corruption("truncated record length varint"))?;

        Ok(match stored {
            0 => SlotState::Deleted,
            -1 => {
                let (position, _) = varint::read_u64(&data[offset + varint_len..])
                    .ok_or_else(|| QuarryError::corruption("truncated placeholder pointer"))?;
                SlotState::Placeholder { position }
            }
            length if length > 0 => SlotState::Live {
                offset,
                varint_len,
                length: length as usize,
            },
            length => SlotState::Surrogate {
                offset,
                varint_len,
                length: length.unsigned_abs() as usize,
            },
        })
    }

    /// End of the slot's allocated region: the next slot's offset, or the
    /// page's content watermark for the last slot.
    fn region_end(data: &[u8], slot: u16, count: u16, content_size: usize) -> usize {
        if slot + 1 < count {
            Self::slot_entry(data, slot + 1)
        } else {
            content_size
        }
    }

    // =========================================================================
    // Public operations
    // =========================================================================

    /// Stores a record and returns its stable address.
    pub fn create_record(&self, ctx: &mut TransactionContext, content: &[u8]) -> QuarryResult<Rid> {
        self.create_internal(ctx, content, false)
    }

    /// Reads a record, transparently following a placeholder.
    pub fn read_record(&self, ctx: &TransactionContext, rid: Rid) -> QuarryResult<Vec<u8>> {
        let not_found = || QuarryError::RecordNotFound { rid };
        let (page, slot) = self.locate(ctx, rid)?;
        let view = ctx.read_page(self.page_id(page))?;
        let data = view.data();
        if slot >= Self::record_count(data) {
            return Err(not_found());
        }

        match self.decode_slot(data, slot)? {
            SlotState::Live {
                offset,
                varint_len,
                length,
            }
            | SlotState::Surrogate {
                offset,
                varint_len,
                length,
            } => Ok(data[offset + varint_len..offset + varint_len + length].to_vec()),
            SlotState::Deleted => Err(not_found()),
            SlotState::Placeholder { position } => {
                let (spage, sslot) = self.location(position);
                let sview = ctx.read_page(self.page_id(spage))?;
                let sdata = sview.data();
                match self.decode_slot(sdata, sslot)? {
                    SlotState::Surrogate {
                        offset,
                        varint_len,
                        length,
                    } => Ok(sdata[offset + varint_len..offset + varint_len + length].to_vec()),
                    SlotState::Deleted => Err(not_found()),
                    other => Err(QuarryError::corruption(format!(
                        "placeholder {} points at a {:?} slot",
                        rid, other
                    ))),
                }
            }
        }
    }

    /// Replaces a record's content. The RID never changes, even when the
    /// payload is relocated out of the page.
    pub fn update_record(
        &self,
        ctx: &mut TransactionContext,
        rid: Rid,
        content: &[u8],
    ) -> QuarryResult<()> {
        self.check_size(content)?;
        let (page, slot) = self.locate(ctx, rid)?;
        let page_id = self.page_id(page);

        let state = {
            let view = ctx.read_page(page_id)?;
            let data = view.data();
            if slot >= Self::record_count(data) {
                return Err(QuarryError::RecordNotFound { rid });
            }
            self.decode_slot(data, slot)?
        };

        match state {
            SlotState::Deleted => Err(QuarryError::RecordNotFound { rid }),
            SlotState::Live { .. } => {
                if !self.try_write_slot(ctx, page_id, slot, content, false)? {
                    // The page cannot absorb the growth: relocate the payload
                    // into a surrogate and leave a forwarding pointer behind.
                    let surrogate = self.create_internal(ctx, content, true)?;
                    self.write_placeholder(ctx, page_id, slot, surrogate.position())?;
                }
                Ok(())
            }
            SlotState::Surrogate { .. } => {
                if !self.try_write_slot(ctx, page_id, slot, content, true)? {
                    return Err(QuarryError::internal(
                        "surrogate record cannot be relocated without its placeholder",
                    ));
                }
                Ok(())
            }
            SlotState::Placeholder { position } => {
                let (spage, sslot) = self.location(position);
                let spage_id = self.page_id(spage);
                let sstate = {
                    let view = ctx.read_page(spage_id)?;
                    self.decode_slot(view.data(), sslot)?
                };
                match sstate {
                    SlotState::Surrogate { .. } => {
                        if !self.try_write_slot(ctx, spage_id, sslot, content, true)? {
                            // The surrogate itself cannot grow: allocate a new
                            // one, repoint the placeholder, drop the old.
                            let fresh = self.create_internal(ctx, content, true)?;
                            self.write_placeholder(ctx, page_id, slot, fresh.position())?;
                            self.write_tombstone(ctx, spage_id, sslot)?;
                        }
                        Ok(())
                    }
                    SlotState::Deleted => Err(QuarryError::RecordNotFound { rid }),
                    other => Err(QuarryError::corruption(format!(
                        "placeholder {} points at a {:?} slot",
                        rid, other
                    ))),
                }
            }
        }
    }

    /// Deletes a record. The slot becomes a tombstone; no compaction runs,
    /// so later slots keep their offsets. Deleting a placeholder also
    /// deletes its surrogate.
    pub fn delete_record(&self, ctx: &mut TransactionContext, rid: Rid) -> QuarryResult<()> {
        let (page, slot) = self.locate(ctx, rid)?;
        let page_id = self.page_id(page);

        let state = {
            let view = ctx.read_page(page_id)?;
            let data = view.data();
            if slot >= Self::record_count(data) {
                return Err(QuarryError::RecordNotFound { rid });
            }
            self.decode_slot(data, slot)?
        };

        match state {
            SlotState::Deleted => Err(QuarryError::RecordNotFound { rid }),
            SlotState::Live { .. } | SlotState::Surrogate { .. } => {
                self.write_tombstone(ctx, page_id, slot)
            }
            SlotState::Placeholder { position } => {
                let (spage, sslot) = self.location(position);
                self.write_tombstone(ctx, self.page_id(spage), sslot)?;
                self.write_tombstone(ctx, page_id, slot)
            }
        }
    }

    /// Scans the bucket forward, page by page and slot by slot.
    ///
    /// Placeholders are resolved through their surrogate and reported under
    /// the placeholder's RID; tombstones and surrogate slots are skipped
    /// silently. The callback returns `false` to stop the scan.
    pub fn scan<F>(&self, ctx: &TransactionContext, mut callback: F) -> QuarryResult<()>
    where
        F: FnMut(Rid, &[u8]) -> QuarryResult<bool>,
    {
        let pages = ctx.page_count(self.file_id)?;
        for page_number in 0..pages {
            let page = PageNumber::new(page_number);
            let view = ctx.read_page(self.page_id(page))?;
            let data = view.data();
            let count = Self::record_count(data);
            for slot in 0..count {
                let rid = Rid::new(self.file_id, self.position(page, slot));
                let keep_going = match self.decode_slot(data, slot)? {
                    SlotState::Live {
                        offset,
                        varint_len,
                        length,
                    } => callback(rid, &data[offset + varint_len..offset + varint_len + length])?,
                    SlotState::Placeholder { position } => {
                        let (spage, sslot) = self.location(position);
                        let sview = ctx.read_page(self.page_id(spage))?;
                        let sdata = sview.data();
                        match self.decode_slot(sdata, sslot)? {
                            SlotState::Surrogate {
                                offset,
                                varint_len,
                                length,
                            } => callback(
                                rid,
                                &sdata[offset + varint_len..offset + varint_len + length],
                            )?,
                            _ => true,
                        }
                    }
                    SlotState::Deleted | SlotState::Surrogate { .. } => true,
                };
                if !keep_going {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Counts live logical records (live slots plus placeholders).
    pub fn count(&self, ctx: &TransactionContext) -> QuarryResult<u64> {
        let mut total = 0u64;
        let pages = ctx.page_count(self.file_id)?;
        for page_number in 0..pages {
            let view = ctx.read_page(self.page_id(PageNumber::new(page_number)))?;
            let data = view.data();
            for slot in 0..Self::record_count(data) {
                if matches!(
                    self.decode_slot(data, slot)?,
                    SlotState::Live { .. } | SlotState::Placeholder { .. }
                ) {
                    total += 1;
                }
            }
        }
        Ok(total)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn locate(&self, ctx: &TransactionContext, rid: Rid) -> QuarryResult<(PageNumber, u16)> {
        let (page, slot) = self.location(rid.position());
        if rid.bucket_id() != self.file_id || page.as_u64() >= ctx.page_count(self.file_id)? {
            return Err(QuarryError::RecordNotFound { rid });
        }
        Ok((page, slot))
    }

    fn check_size(&self, content: &[u8]) -> QuarryResult<()> {
        let padded = content.len().max(MIN_RECORD_CONTENT);
        if varint::len_i64(padded as i64) + padded > self.usable_space() {
            return Err(QuarryError::RecordTooLarge {
                size: content.len(),
                max: self.max_record_size(),
            });
        }
        Ok(())
    }

    fn create_internal(
        &self,
        ctx: &mut TransactionContext,
        content: &[u8],
        surrogate: bool,
    ) -> QuarryResult<Rid> {
        self.check_size(content)?;
        let padded = content.len().max(MIN_RECORD_CONTENT);
        let stored = if surrogate {
            -(padded as i64)
        } else {
            padded as i64
        };
        let footprint = varint::len_i64(stored) + padded;

        // Append to the last page when it has a free slot and free byte
        // space; otherwise open a new page.
        let pages = ctx.page_count(self.file_id)?;
        let mut target: Option<PageNumber> = None;
        if pages > 0 {
            let page = PageNumber::new(pages - 1);
            let view = ctx.read_page(self.page_id(page))?;
            let data = view.data();
            if Self::record_count(data) < self.slots_per_page
                && view.content_size() + footprint <= self.page_size
            {
                target = Some(page);
            }
        }
        let page = match target {
            Some(page) => page,
            None => {
                let page_id = ctx.add_page(self.file_id)?;
                let fresh = ctx.page_for_modify(page_id)?;
                fresh.set_content_size(self.data_begin);
                page_id.page_number()
            }
        };

        let mpage = ctx.page_for_modify(self.page_id(page))?;
        let slot = read_u16(mpage.data(), RECORD_COUNT_OFFSET);
        let offset = mpage.content_size();

        let mut buf = Vec::with_capacity(footprint);
        varint::write_i64(&mut buf, stored);
        buf.extend_from_slice(content);
        buf.resize(footprint, 0);

        mpage.write(offset, &buf);
        mpage.write_u32(
            SLOT_TABLE_OFFSET + slot as usize * SLOT_ENTRY_SIZE,
            offset as u32,
        );
        mpage.write_u16(RECORD_COUNT_OFFSET, slot + 1);
        mpage.set_content_size(offset + footprint);

        Ok(Rid::new(self.file_id, self.position(page, slot)))
    }

    /// Rewrites a slot's content in place or by shifting subsequent records
    /// right within the page. Returns `false` when the page cannot absorb
    /// the growth; the target record itself is never moved.
    fn try_write_slot(
        &self,
        ctx: &mut TransactionContext,
        page_id: PageId,
        slot: u16,
        content: &[u8],
        surrogate: bool,
    ) -> QuarryResult<bool> {
        let padded = content.len().max(MIN_RECORD_CONTENT);
        let stored = if surrogate {
            -(padded as i64)
        } else {
            padded as i64
        };
        let need = varint::len_i64(stored) + padded;

        let page = ctx.page_for_modify(page_id)?;
        let count = read_u16(page.data(), RECORD_COUNT_OFFSET);
        let content_size = page.content_size();
        let offset = Self::slot_entry(page.data(), slot);
        let region_end = Self::region_end(page.data(), slot, count, content_size);
        let available = region_end - offset;

        if need > available {
            let growth = need - available;
            if growth > self.page_size - content_size {
                return Ok(false);
            }
            // Shift every subsequent record right and rewrite the offsets of
            // the shifted slots.
            page.copy_within(region_end..content_size, region_end + growth);
            for next in slot + 1..count {
                let entry = SLOT_TABLE_OFFSET + next as usize * SLOT_ENTRY_SIZE;
                let old = read_u32(page.data(), entry);
                page.write_u32(entry, old + growth as u32);
            }
            page.set_content_size(content_size + growth);
        }

        let mut buf = Vec::with_capacity(need);
        varint::write_i64(&mut buf, stored);
        buf.extend_from_slice(content);
        buf.resize(need, 0);
        page.write(offset, &buf);
        Ok(true)
    }

    /// Overwrites a slot in place with a placeholder. The minimum record
    /// footprint guarantees the placeholder always fits.
    fn write_placeholder(
        &self,
        ctx: &mut TransactionContext,
        page_id: PageId,
        slot: u16,
        position: u64,
    ) -> QuarryResult<()> {
        if varint::len_u64(position) > PLACEHOLDER_POINTER_SIZE {
            return Err(QuarryError::internal(format!(
                "surrogate position {} exceeds the forwarding pointer range",
                position
            )));
        }
        let page = ctx.page_for_modify(page_id)?;
        let offset = Self::slot_entry(page.data(), slot);

        let mut buf = Vec::with_capacity(1 + PLACEHOLDER_POINTER_SIZE);
        varint::write_i64(&mut buf, -1);
        let mut pointer = [0u8; PLACEHOLDER_POINTER_SIZE];
        varint::write_u64_into(&mut pointer, position);
        buf.extend_from_slice(&pointer);
        page.write(offset, &buf);
        Ok(())
    }

    fn write_tombstone(
        &self,
        ctx: &mut TransactionContext,
        page_id: PageId,
        slot: u16,
    ) -> QuarryResult<()> {
        let page = ctx.page_for_modify(page_id)?;
        let offset = Self::slot_entry(page.data(), slot);
        let mut buf = Vec::with_capacity(1);
        varint::write_i64(&mut buf, 0);
        page.write(offset, &buf);
        Ok(())
    }
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("name", &self.name)
            .field("file_id", &self.file_id)
            .field("slots_per_page", &self.slots_per_page)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use quarry_common::config::DatabaseConfig;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn open_db() -> (TempDir, Database) {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(tmp.path(), DatabaseConfig::default()).unwrap();
        (tmp, db)
    }

    #[test]
    fn test_create_and_read() {
        let (_tmp, db) = open_db();
        let bucket = db.create_bucket("records").unwrap();
        let mut session = db.session();

        session.begin().unwrap();
        let rid = {
            let ctx = session.ctx().unwrap();
            bucket.create_record(ctx, b"hello bucket").unwrap()
        };
        session.commit().unwrap();

        session.begin().unwrap();
        let read = bucket.read_record(session.ctx().unwrap(), rid).unwrap();
        session.rollback().unwrap();
        assert_eq!(read, b"hello bucket");
    }

    #[test]
    fn test_small_records_are_padded() {
        let (_tmp, db) = open_db();
        let bucket = db.create_bucket("pad").unwrap();
        let mut session = db.session();

        session.begin().unwrap();
        let rid = bucket.create_record(session.ctx().unwrap(), b"ab").unwrap();
        let read = bucket.read_record(session.ctx().unwrap(), rid).unwrap();
        session.commit().unwrap();

        // Padded up to the placeholder-pointer minimum.
        assert_eq!(read.len(), MIN_RECORD_CONTENT);
        assert_eq!(&read[..2], b"ab");
        assert!(read[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_rid_positions_are_sequential() {
        let (_tmp, db) = open_db();
        let bucket = db.create_bucket("seq").unwrap();
        let mut session = db.session();

        session.begin().unwrap();
        for i in 0..10u64 {
            let rid = bucket
                .create_record(session.ctx().unwrap(), format!("rec{}", i).as_bytes())
                .unwrap();
            assert_eq!(rid.position(), i);
        }
        session.commit().unwrap();
    }

    #[test]
    fn test_delete_leaves_tombstone() {
        let (_tmp, db) = open_db();
        let bucket = db.create_bucket("del").unwrap();
        let mut session = db.session();

        session.begin().unwrap();
        let a = bucket.create_record(session.ctx().unwrap(), b"first").unwrap();
        let b = bucket.create_record(session.ctx().unwrap(), b"second").unwrap();
        session.commit().unwrap();

        session.begin().unwrap();
        bucket.delete_record(session.ctx().unwrap(), a).unwrap();
        session.commit().unwrap();

        session.begin().unwrap();
        {
            let ctx = session.ctx().unwrap();
            let err = bucket.read_record(ctx, a).unwrap_err();
            assert!(err.is_not_found());
            // Deleting again reports absence too.
            assert!(bucket.delete_record(ctx, a).unwrap_err().is_not_found());
            // The neighbor is untouched.
            assert_eq!(bucket.read_record(ctx, b).unwrap(), b"second");
            assert_eq!(bucket.count(ctx).unwrap(), 1);
        }
        session.rollback().unwrap();
    }

    #[test]
    fn test_update_in_place() {
        let (_tmp, db) = open_db();
        let bucket = db.create_bucket("upd").unwrap();
        let mut session = db.session();

        session.begin().unwrap();
        let rid = bucket
            .create_record(session.ctx().unwrap(), b"0123456789")
            .unwrap();
        bucket
            .update_record(session.ctx().unwrap(), rid, b"abcdefghij")
            .unwrap();
        assert_eq!(
            bucket.read_record(session.ctx().unwrap(), rid).unwrap(),
            b"abcdefghij"
        );
        session.commit().unwrap();
    }

    #[test]
    fn test_update_grows_by_shifting() {
        let (_tmp, db) = open_db();
        let bucket = db.create_bucket("shift").unwrap();
        let mut session = db.session();

        session.begin().unwrap();
        let first = bucket.create_record(session.ctx().unwrap(), b"short").unwrap();
        let second = bucket.create_record(session.ctx().unwrap(), b"neighbor-1").unwrap();
        let third = bucket.create_record(session.ctx().unwrap(), b"neighbor-2").unwrap();

        // Growing the first record shifts the two neighbors right.
        let grown = vec![b'x'; 300];
        bucket
            .update_record(session.ctx().unwrap(), first, &grown)
            .unwrap();

        let ctx = session.ctx().unwrap();
        assert_eq!(bucket.read_record(ctx, first).unwrap(), grown);
        assert_eq!(bucket.read_record(ctx, second).unwrap(), b"neighbor-1");
        assert_eq!(bucket.read_record(ctx, third).unwrap(), b"neighbor-2");
        session.commit().unwrap();
    }

    #[test]
    fn test_update_relocates_via_placeholder() {
        let (_tmp, db) = open_db();
        let bucket = db.create_bucket("reloc").unwrap();
        let mut session = db.session();

        // Fill the first page almost completely so the target record cannot
        // grow there.
        session.begin().unwrap();
        let target = bucket.create_record(session.ctx().unwrap(), b"tiny").unwrap();
        let filler = vec![0u8; 8 * 1024];
        while session.ctx().unwrap().page_count(bucket.file_id()).unwrap() == 1 {
            bucket.create_record(session.ctx().unwrap(), &filler).unwrap();
        }
        session.commit().unwrap();

        // Now grow the target beyond what page 0 can absorb.
        let grown = vec![b'q'; 16 * 1024];
        session.begin().unwrap();
        bucket
            .update_record(session.ctx().unwrap(), target, &grown)
            .unwrap();
        session.commit().unwrap();

        session.begin().unwrap();
        {
            let ctx = session.ctx().unwrap();
            // Same RID, new content, byte for byte.
            assert_eq!(bucket.read_record(ctx, target).unwrap(), grown);

            // The slot itself is now a placeholder pointing elsewhere.
            let view = ctx.read_page(PageId::new(bucket.file_id(), PageNumber::new(0))).unwrap();
            let state = bucket.decode_slot(view.data(), 0).unwrap();
            assert!(matches!(state, SlotState::Placeholder { .. }));
        }
        session.rollback().unwrap();

        // Deleting the placeholder also deletes the surrogate.
        session.begin().unwrap();
        bucket.delete_record(session.ctx().unwrap(), target).unwrap();
        session.commit().unwrap();

        session.begin().unwrap();
        {
            let ctx = session.ctx().unwrap();
            assert!(bucket.read_record(ctx, target).unwrap_err().is_not_found());
            // No surrogate slot survives anywhere.
            let pages = ctx.page_count(bucket.file_id()).unwrap();
            for pn in 0..pages {
                let view = ctx
                    .read_page(PageId::new(bucket.file_id(), PageNumber::new(pn)))
                    .unwrap();
                let data = view.data();
                for slot in 0..Bucket::record_count(data) {
                    assert!(!matches!(
                        bucket.decode_slot(data, slot).unwrap(),
                        SlotState::Surrogate { .. }
                    ));
                }
            }
        }
        session.rollback().unwrap();
    }

    #[test]
    fn test_update_placeholder_updates_surrogate() {
        let (_tmp, db) = open_db();
        let bucket = db.create_bucket("reup").unwrap();
        let mut session = db.session();

        session.begin().unwrap();
        let target = bucket.create_record(session.ctx().unwrap(), b"tiny").unwrap();
        let filler = vec![0u8; 8 * 1024];
        while session.ctx().unwrap().page_count(bucket.file_id()).unwrap() == 1 {
            bucket.create_record(session.ctx().unwrap(), &filler).unwrap();
        }
        // Force relocation, then update through the placeholder twice.
        bucket
            .update_record(session.ctx().unwrap(), target, &vec![b'a'; 16 * 1024])
            .unwrap();
        bucket
            .update_record(session.ctx().unwrap(), target, &vec![b'b'; 12 * 1024])
            .unwrap();
        bucket
            .update_record(session.ctx().unwrap(), target, &vec![b'c'; 20 * 1024])
            .unwrap();
        session.commit().unwrap();

        session.begin().unwrap();
        assert_eq!(
            bucket.read_record(session.ctx().unwrap(), target).unwrap(),
            vec![b'c'; 20 * 1024]
        );
        session.rollback().unwrap();
    }

    #[test]
    fn test_oversized_record_rejected() {
        let (_tmp, db) = open_db();
        let bucket = db.create_bucket("big").unwrap();
        let mut session = db.session();

        session.begin().unwrap();
        {
            let ctx = session.ctx().unwrap();
            let oversized = vec![0u8; bucket.usable_space() + 1];
            let err = bucket.create_record(ctx, &oversized).unwrap_err();
            assert!(matches!(err, QuarryError::RecordTooLarge { .. }));
            // No slot was written.
            assert_eq!(bucket.count(ctx).unwrap(), 0);
        }
        session.rollback().unwrap();
    }

    #[test]
    fn test_scan_skips_tombstones_and_surrogates() {
        let (_tmp, db) = open_db();
        let bucket = db.create_bucket("scan").unwrap();
        let mut session = db.session();

        session.begin().unwrap();
        let a = bucket.create_record(session.ctx().unwrap(), b"aaaaa").unwrap();
        let b = bucket.create_record(session.ctx().unwrap(), b"bbbbb").unwrap();
        let c = bucket.create_record(session.ctx().unwrap(), b"ccccc").unwrap();
        bucket.delete_record(session.ctx().unwrap(), b).unwrap();
        session.commit().unwrap();

        session.begin().unwrap();
        let mut seen = Vec::new();
        bucket
            .scan(session.ctx().unwrap(), |rid, content| {
                seen.push((rid, content.to_vec()));
                Ok(true)
            })
            .unwrap();
        session.rollback().unwrap();

        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (a, b"aaaaa".to_vec()));
        assert_eq!(seen[1], (c, b"ccccc".to_vec()));
    }

    #[test]
    fn test_scan_early_stop() {
        let (_tmp, db) = open_db();
        let bucket = db.create_bucket("stop").unwrap();
        let mut session = db.session();

        session.begin().unwrap();
        for i in 0..5u8 {
            bucket.create_record(session.ctx().unwrap(), &[i; 8]).unwrap();
        }
        let mut visited = 0;
        bucket
            .scan(session.ctx().unwrap(), |_, _| {
                visited += 1;
                Ok(visited < 2)
            })
            .unwrap();
        session.rollback().unwrap();
        assert_eq!(visited, 2);
    }

    #[test]
    fn test_records_spill_to_new_pages() {
        let (_tmp, db) = open_db();
        let bucket = db.create_bucket("spill").unwrap();
        let mut session = db.session();

        session.begin().unwrap();
        let payload = vec![7u8; 10 * 1024];
        let mut rids = Vec::new();
        for _ in 0..12 {
            rids.push(bucket.create_record(session.ctx().unwrap(), &payload).unwrap());
        }
        let pages = session
            .ctx()
            .unwrap()
            .page_count(bucket.file_id())
            .unwrap();
        assert!(pages > 1);
        session.commit().unwrap();

        session.begin().unwrap();
        for rid in &rids {
            assert_eq!(
                bucket.read_record(session.ctx().unwrap(), *rid).unwrap(),
                payload
            );
        }
        assert_eq!(
            bucket.count(session.ctx().unwrap()).unwrap(),
            rids.len() as u64
        );
        session.rollback().unwrap();
    }

    #[test]
    fn test_rid_stable_across_many_updates() {
        let (_tmp, db) = open_db();
        let bucket = Arc::new(db.create_bucket("stable").unwrap());
        let mut session = db.session();

        session.begin().unwrap();
        let rid = bucket.create_record(session.ctx().unwrap(), b"v0").unwrap();
        session.commit().unwrap();

        for round in 1..30usize {
            let content = vec![round as u8; round * 700];
            session.begin().unwrap();
            bucket
                .update_record(session.ctx().unwrap(), rid, &content)
                .unwrap();
            session.commit().unwrap();

            session.begin().unwrap();
            assert_eq!(
                bucket.read_record(session.ctx().unwrap(), rid).unwrap(),
                content
            );
            session.rollback().unwrap();
        }
    }
}
