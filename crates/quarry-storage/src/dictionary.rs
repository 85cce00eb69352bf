//! Name dictionary.
//!
//! A single paginated component interning type and property names to dense
//! integer ids. Entries are append-only; an id is the name's ordinal across
//! all pages. The full dictionary is loaded into memory at open.
//!
//! Page layout after the generic header: `[entry_count: u16]` at offset 12,
//! then length-prefixed UTF-8 names packed from offset 14; the content-size
//! header field is the end-of-used-bytes watermark.

use std::collections::HashMap;

use parking_lot::RwLock;

use quarry_common::constants::PAGE_HEADER_SIZE;
use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::{varint, FileId, PageId, PageNumber};

use crate::file::PagedFile;
use crate::page::read_u16;
use crate::txn::TransactionContext;

const ENTRY_COUNT_OFFSET: usize = PAGE_HEADER_SIZE;
const ENTRIES_OFFSET: usize = ENTRY_COUNT_OFFSET + 2;

struct DictState {
    names: Vec<String>,
    ids: HashMap<String, u32>,
}

/// The interned-name dictionary.
pub struct Dictionary {
    file_id: FileId,
    page_size: usize,
    state: RwLock<DictState>,
}

impl Dictionary {
    /// Loads the dictionary from its component file.
    pub(crate) fn load(file: &PagedFile) -> QuarryResult<Self> {
        let mut names = Vec::new();
        for number in 0..file.page_count() {
            let data = file.read_page(PageNumber::new(number))?;
            let count = read_u16(&data, ENTRY_COUNT_OFFSET);
            let mut pos = ENTRIES_OFFSET;
            for _ in 0..count {
                let (len, n) = varint::read_u64(&data[pos..])
                    .ok_or_else(|| QuarryError::corruption("truncated dictionary entry"))?;
                pos += n;
                let name = std::str::from_utf8(&data[pos..pos + len as usize])
                    .map_err(|_| QuarryError::corruption("dictionary entry holds invalid UTF-8"))?
                    .to_string();
                pos += len as usize;
                names.push(name);
            }
        }

        let ids = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i as u32))
            .collect();
        Ok(Self {
            file_id: file.id(),
            page_size: file.page_size(),
            state: RwLock::new(DictState { names, ids }),
        })
    }

    /// Returns the dictionary's file id.
    #[must_use]
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Looks up an already-interned name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.state.read().ids.get(name).copied()
    }

    /// Resolves an id back to its name.
    #[must_use]
    pub fn name_by_id(&self, id: u32) -> Option<String> {
        self.state.read().names.get(id as usize).cloned()
    }

    /// Returns the number of interned names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().names.len()
    }

    /// Returns true if no names are interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a name to the component file and returns its id.
    ///
    /// The caller owns the transaction; the in-memory maps are only updated
    /// by [`publish`](Self::publish) after the transaction commits.
    pub(crate) fn intern(&self, ctx: &mut TransactionContext, name: &str) -> QuarryResult<u32> {
        let id = self.state.read().names.len() as u32;

        let mut entry = Vec::with_capacity(name.len() + 2);
        varint::write_u64(&mut entry, name.len() as u64);
        entry.extend_from_slice(name.as_bytes());

        let pages = ctx.page_count(self.file_id)?;
        let mut target = None;
        if pages > 0 {
            let page_id = PageId::new(self.file_id, PageNumber::new(pages - 1));
            let view = ctx.read_page(page_id)?;
            let count = read_u16(view.data(), ENTRY_COUNT_OFFSET);
            if count < u16::MAX && view.content_size() + entry.len() <= self.page_size {
                target = Some(page_id);
            }
        }
        let page_id = match target {
            Some(page_id) => page_id,
            None => {
                let page_id = ctx.add_page(self.file_id)?;
                ctx.page_for_modify(page_id)?.set_content_size(ENTRIES_OFFSET);
                page_id
            }
        };

        let page = ctx.page_for_modify(page_id)?;
        let offset = page.content_size();
        let count = read_u16(page.data(), ENTRY_COUNT_OFFSET);
        page.write(offset, &entry);
        page.write_u16(ENTRY_COUNT_OFFSET, count + 1);
        page.set_content_size(offset + entry.len());
        Ok(id)
    }

    /// Publishes an interned name to the in-memory maps once durable.
    pub(crate) fn publish(&self, name: &str, id: u32) {
        let mut state = self.state.write();
        debug_assert_eq!(state.names.len() as u32, id);
        state.names.push(name.to_string());
        state.ids.insert(name.to_string(), id);
    }
}

impl std::fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dictionary")
            .field("file_id", &self.file_id)
            .field("names", &self.len())
            .finish()
    }
}
