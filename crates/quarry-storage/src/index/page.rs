//! Index page layout.
//!
//! Index pages are slotted: an offset array grows down from the header, the
//! entry bytes grow up from the page end, and the generic `content_size`
//! header field holds the entry-area watermark (the lowest entry offset).
//!
//! ```text
//! +------------------------+
//! |  generic header        |  12 bytes (version, entry-area watermark)
//! +------------------------+
//! |  entry_count: u16      |
//! +------------------------+
//! |  offset array          |  4 bytes per entry, sorted by key
//! +------------------------+
//! |  free space            |
//! +------------------------+
//! |  entry bytes           |  [key varint+bytes][rid list]
//! +------------------------+
//! ```
//!
//! Entries within a page are kept sorted by their encoded key, so a point
//! lookup binary-searches the offset array. Rewriting an entry (merging rid
//! lists) leaks the old entry bytes; the page is append-only garbage-wise
//! until compaction rewrites the whole component.

use quarry_common::constants::PAGE_HEADER_SIZE;
use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::{varint, FileId, Rid};

use crate::page::{read_u16, read_u32, MutablePage};

/// Offset of the per-page entry count.
const ENTRY_COUNT_OFFSET: usize = PAGE_HEADER_SIZE;

/// Offset of the entry-offset array.
const OFFSETS_OFFSET: usize = ENTRY_COUNT_OFFSET + 2;

/// Size of one offset-array element.
const OFFSET_ENTRY_SIZE: usize = 4;

/// Initializes a fresh index page: no entries, the entry area watermark at
/// the page end.
pub(crate) fn init_page(page: &mut MutablePage) {
    let size = page.page_size();
    page.set_content_size(size);
}

/// Returns the number of entries in a page.
pub(crate) fn entry_count(data: &[u8]) -> u16 {
    read_u16(data, ENTRY_COUNT_OFFSET)
}

/// Returns the entry-area watermark (lowest entry offset).
fn entries_start(data: &[u8]) -> usize {
    let watermark = read_u32(data, 8) as usize;
    if watermark == 0 {
        data.len()
    } else {
        watermark
    }
}

fn offset_of(data: &[u8], index: u16) -> usize {
    read_u32(data, OFFSETS_OFFSET + index as usize * OFFSET_ENTRY_SIZE) as usize
}

/// Returns the free byte count of a page.
pub(crate) fn free_space(data: &[u8]) -> usize {
    let used_low = OFFSETS_OFFSET + entry_count(data) as usize * OFFSET_ENTRY_SIZE;
    entries_start(data).saturating_sub(used_low)
}

/// Decodes the entry at a slot into its key bytes and rid list.
pub(crate) fn entry_at(data: &[u8], index: u16) -> QuarryResult<(&[u8], Vec<Rid>)> {
    let offset = offset_of(data, index);
    let corrupted = || QuarryError::corruption("truncated index entry");
    if offset >= data.len() {
        return Err(corrupted());
    }

    let (key_len, n) = varint::read_u64(&data[offset..]).ok_or_else(corrupted)?;
    let key_start = offset + n;
    let key_end = key_start + key_len as usize;
    if key_end > data.len() {
        return Err(corrupted());
    }
    let key = &data[key_start..key_end];

    let (rid_count, n) = varint::read_u64(&data[key_end..]).ok_or_else(corrupted)?;
    let mut pos = key_end + n;
    let mut rids = Vec::with_capacity(rid_count as usize);
    for _ in 0..rid_count {
        let (bucket, n) = varint::read_u64(&data[pos..]).ok_or_else(corrupted)?;
        pos += n;
        let (position, n) = varint::read_u64(&data[pos..]).ok_or_else(corrupted)?;
        pos += n;
        rids.push(Rid::new(FileId::new(bucket as u32), position));
    }
    Ok((key, rids))
}

/// Binary-searches a page for an encoded key.
///
/// Returns `Ok(slot)` on an exact match, `Err(insertion_point)` otherwise.
pub(crate) fn search(data: &[u8], key: &[u8]) -> QuarryResult<Result<u16, u16>> {
    let mut low = 0u16;
    let mut high = entry_count(data);
    while low < high {
        let mid = (low + high) / 2;
        let (mid_key, _) = entry_at(data, mid)?;
        match mid_key.cmp(key) {
            std::cmp::Ordering::Equal => return Ok(Ok(mid)),
            std::cmp::Ordering::Less => low = mid + 1,
            std::cmp::Ordering::Greater => high = mid,
        }
    }
    Ok(Err(low))
}

/// Encodes an entry's bytes.
pub(crate) fn encode_entry(key: &[u8], rids: &[Rid]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + 8 + rids.len() * 6);
    varint::write_u64(&mut out, key.len() as u64);
    out.extend_from_slice(key);
    varint::write_u64(&mut out, rids.len() as u64);
    for rid in rids {
        varint::write_u64(&mut out, u64::from(rid.bucket_id().as_u32()));
        varint::write_u64(&mut out, rid.position());
    }
    out
}

/// Inserts an entry into a page, keeping the offset array sorted by key.
///
/// An exact key match merges: the existing rid list is extended with the new
/// rids and the entry is rewritten. Returns `false` when the page has no
/// room; the caller opens a new page.
pub(crate) fn insert_entry(
    page: &mut MutablePage,
    key: &[u8],
    rids: &[Rid],
) -> QuarryResult<bool> {
    match search(page.data(), key)? {
        Ok(slot) => {
            let (_, mut existing) = entry_at(page.data(), slot)?;
            existing.extend(rids.iter().copied());
            let bytes = encode_entry(key, &existing);
            // The old entry bytes are leaked; only the offset moves.
            if free_space(page.data()) < bytes.len() {
                return Ok(false);
            }
            let new_start = entries_start(page.data()) - bytes.len();
            page.write(new_start, &bytes);
            page.write_u32(
                OFFSETS_OFFSET + slot as usize * OFFSET_ENTRY_SIZE,
                new_start as u32,
            );
            page.set_content_size(new_start);
            Ok(true)
        }
        Err(insertion) => {
            let bytes = encode_entry(key, rids);
            if free_space(page.data()) < bytes.len() + OFFSET_ENTRY_SIZE {
                return Ok(false);
            }
            let count = entry_count(page.data());
            let new_start = entries_start(page.data()) - bytes.len();
            page.write(new_start, &bytes);

            // Open a hole in the offset array.
            let hole = OFFSETS_OFFSET + insertion as usize * OFFSET_ENTRY_SIZE;
            let tail_end = OFFSETS_OFFSET + count as usize * OFFSET_ENTRY_SIZE;
            page.copy_within(hole..tail_end, hole + OFFSET_ENTRY_SIZE);
            page.write_u32(hole, new_start as u32);
            page.write_u16(ENTRY_COUNT_OFFSET, count + 1);
            page.set_content_size(new_start);
            Ok(true)
        }
    }
}

/// Reads every entry of a page in key order.
pub(crate) fn read_all_entries(data: &[u8]) -> QuarryResult<Vec<(Vec<u8>, Vec<Rid>)>> {
    let count = entry_count(data);
    let mut entries = Vec::with_capacity(count as usize);
    for i in 0..count {
        let (key, rids) = entry_at(data, i)?;
        entries.push((key.to_vec(), rids));
    }
    Ok(entries)
}
