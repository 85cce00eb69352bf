//! WAL entry binary format.
//!
//! One entry holds the complete dirty-page set of one committed transaction:
//!
//! ```text
//! +-------------------+
//! | entry_len: u32    |  length of body + trailer
//! +-------------------+
//! | txn_id: u64       |  body
//! | page_count: u16   |
//! | delta 0..n        |
//! +-------------------+
//! | crc32(body): u32  |  trailer
//! | magic: u64        |
//! +-------------------+
//! ```
//!
//! Each delta is `[file_id: u32][page_number: u64][prev_version: u64]`
//! `[new_version: u64][content_size: u32][range_offset: u32][range_len: u32]`
//! followed by the changed bytes. All fields are little-endian. The checksum
//! and trailing magic let recovery distinguish a torn tail from a valid
//! entry.

use quarry_common::constants::WAL_ENTRY_MAGIC;
use quarry_common::types::{FileId, PageId, PageNumber, TxnId};

use crate::error::{WalError, WalResult};

/// Fixed size of the per-entry body header (txn_id + page_count).
const BODY_HEADER_SIZE: usize = 8 + 2;

/// Fixed size of the per-delta header, excluding the changed bytes.
const DELTA_HEADER_SIZE: usize = 4 + 8 + 8 + 8 + 4 + 4 + 4;

/// Fixed size of the entry trailer (crc + magic).
const TRAILER_SIZE: usize = 4 + 8;

/// A single page's change within a WAL entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDelta {
    /// The page this delta applies to.
    pub page_id: PageId,
    /// The page version the delta was produced against.
    pub prev_version: u64,
    /// The page version after applying the delta.
    pub new_version: u64,
    /// The page content size after applying the delta.
    pub content_size: u32,
    /// Page-local offset of the changed byte range.
    pub range_offset: u32,
    /// The changed bytes.
    pub data: Vec<u8>,
}

impl PageDelta {
    /// Returns the encoded size of this delta.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        DELTA_HEADER_SIZE + self.data.len()
    }
}

/// One committed transaction's dirty-page set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    /// The transaction id, strictly increasing across all entries.
    pub txn_id: TxnId,
    /// Per-page deltas, in the order the commit recorded them.
    pub deltas: Vec<PageDelta>,
}

impl WalEntry {
    /// Creates a new entry.
    #[must_use]
    pub fn new(txn_id: TxnId, deltas: Vec<PageDelta>) -> Self {
        Self { txn_id, deltas }
    }

    /// Returns the full encoded frame size, including the length prefix.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        4 + BODY_HEADER_SIZE
            + self.deltas.iter().map(PageDelta::encoded_size).sum::<usize>()
            + TRAILER_SIZE
    }

    /// Encodes the entry into a self-delimiting frame.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let body_len = BODY_HEADER_SIZE
            + self.deltas.iter().map(PageDelta::encoded_size).sum::<usize>();
        let mut buf = Vec::with_capacity(4 + body_len + TRAILER_SIZE);

        buf.extend_from_slice(&((body_len + TRAILER_SIZE) as u32).to_le_bytes());

        let body_start = buf.len();
        buf.extend_from_slice(&self.txn_id.as_u64().to_le_bytes());
        buf.extend_from_slice(&(self.deltas.len() as u16).to_le_bytes());

        for delta in &self.deltas {
            buf.extend_from_slice(&delta.page_id.file_id().as_u32().to_le_bytes());
            buf.extend_from_slice(&delta.page_id.page_number().as_u64().to_le_bytes());
            buf.extend_from_slice(&delta.prev_version.to_le_bytes());
            buf.extend_from_slice(&delta.new_version.to_le_bytes());
            buf.extend_from_slice(&delta.content_size.to_le_bytes());
            buf.extend_from_slice(&delta.range_offset.to_le_bytes());
            buf.extend_from_slice(&(delta.data.len() as u32).to_le_bytes());
            buf.extend_from_slice(&delta.data);
        }

        let crc = crc32fast::hash(&buf[body_start..]);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&WAL_ENTRY_MAGIC.to_le_bytes());

        buf
    }

    /// Decodes one frame from the start of `buf`.
    ///
    /// Returns the entry and the number of bytes consumed. `Ok(None)` means
    /// the buffer holds no complete frame (clean end of log); a frame that is
    /// present but fails checksum or magic validation is a torn write and
    /// returns [`WalError::Corrupted`].
    pub fn decode(buf: &[u8]) -> WalResult<Option<(Self, usize)>> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let frame_len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        if frame_len < BODY_HEADER_SIZE + TRAILER_SIZE {
            // Zeroed or garbage length: nothing valid past this point.
            return Ok(None);
        }
        if buf.len() < 4 + frame_len {
            return Ok(None);
        }

        let frame = &buf[4..4 + frame_len];
        let (body, trailer) = frame.split_at(frame_len - TRAILER_SIZE);

        let magic = u64::from_le_bytes(trailer[4..12].try_into().unwrap());
        if magic != WAL_ENTRY_MAGIC {
            return Err(WalError::corrupted("entry magic mismatch"));
        }
        let stored_crc = u32::from_le_bytes(trailer[0..4].try_into().unwrap());
        let computed_crc = crc32fast::hash(body);
        if stored_crc != computed_crc {
            return Err(WalError::corrupted(format!(
                "entry checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored_crc, computed_crc
            )));
        }

        let txn_id = TxnId::new(u64::from_le_bytes(body[0..8].try_into().unwrap()));
        let page_count = u16::from_le_bytes(body[8..10].try_into().unwrap()) as usize;

        let mut deltas = Vec::with_capacity(page_count);
        let mut pos = BODY_HEADER_SIZE;
        for _ in 0..page_count {
            if pos + DELTA_HEADER_SIZE > body.len() {
                return Err(WalError::corrupted("truncated delta header"));
            }
            let file_id = FileId::new(u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap()));
            let page_number = PageNumber::new(u64::from_le_bytes(
                body[pos + 4..pos + 12].try_into().unwrap(),
            ));
            let prev_version = u64::from_le_bytes(body[pos + 12..pos + 20].try_into().unwrap());
            let new_version = u64::from_le_bytes(body[pos + 20..pos + 28].try_into().unwrap());
            let content_size = u32::from_le_bytes(body[pos + 28..pos + 32].try_into().unwrap());
            let range_offset = u32::from_le_bytes(body[pos + 32..pos + 36].try_into().unwrap());
            let range_len =
                u32::from_le_bytes(body[pos + 36..pos + 40].try_into().unwrap()) as usize;
            pos += DELTA_HEADER_SIZE;

            if pos + range_len > body.len() {
                return Err(WalError::corrupted("truncated delta payload"));
            }
            let data = body[pos..pos + range_len].to_vec();
            pos += range_len;

            deltas.push(PageDelta {
                page_id: PageId::new(file_id, page_number),
                prev_version,
                new_version,
                content_size,
                range_offset,
                data,
            });
        }

        Ok(Some((Self { txn_id, deltas }, 4 + frame_len)))
    }
}
