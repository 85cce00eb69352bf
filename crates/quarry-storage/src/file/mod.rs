//! Component files.
//!
//! Every paginated component (bucket, index tier, dictionary) owns exactly
//! one file of fixed-size pages, named `<component>.<file-id>.<ext>`. The
//! extension is parsed once, at discovery, into the closed [`ComponentKind`]
//! enum; everything past that boundary dispatches on the enum.

mod manager;

pub use manager::FileManager;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use quarry_common::constants::PAGE_VERSION_OFFSET;
use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::{FileId, PageNumber};

/// The closed set of component kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// Record store.
    Bucket,
    /// Mutable LSM index tier.
    MutableIndex {
        /// Whether the index enforces one live rid per key.
        unique: bool,
    },
    /// Compacted (read-only) LSM index tier.
    CompactedIndex {
        /// Whether the index enforces one live rid per key.
        unique: bool,
    },
    /// Name dictionary.
    Dictionary,
}

impl ComponentKind {
    /// Returns the on-disk file extension for this kind.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Bucket => "bkt",
            Self::MutableIndex { unique: false } => "nidx",
            Self::MutableIndex { unique: true } => "uidx",
            Self::CompactedIndex { unique: false } => "cnidx",
            Self::CompactedIndex { unique: true } => "cuidx",
            Self::Dictionary => "dict",
        }
    }

    /// Parses a file extension into a kind.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "bkt" => Some(Self::Bucket),
            "nidx" => Some(Self::MutableIndex { unique: false }),
            "uidx" => Some(Self::MutableIndex { unique: true }),
            "cnidx" => Some(Self::CompactedIndex { unique: false }),
            "cuidx" => Some(Self::CompactedIndex { unique: true }),
            "dict" => Some(Self::Dictionary),
            _ => None,
        }
    }

    /// Returns true for either index tier.
    #[must_use]
    pub const fn is_index(self) -> bool {
        matches!(
            self,
            Self::MutableIndex { .. } | Self::CompactedIndex { .. }
        )
    }
}

/// A component file of fixed-size pages.
pub struct PagedFile {
    id: FileId,
    name: String,
    kind: ComponentKind,
    path: PathBuf,
    page_size: usize,
    file: Mutex<File>,
    page_count: AtomicU64,
}

impl PagedFile {
    /// Creates a new, empty component file.
    pub fn create(
        id: FileId,
        name: impl Into<String>,
        kind: ComponentKind,
        path: impl AsRef<Path>,
        page_size: usize,
    ) -> QuarryResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            id,
            name: name.into(),
            kind,
            path,
            page_size,
            file: Mutex::new(file),
            page_count: AtomicU64::new(0),
        })
    }

    /// Opens an existing component file, deriving the page count from the
    /// file length.
    pub fn open(
        id: FileId,
        name: impl Into<String>,
        kind: ComponentKind,
        path: impl AsRef<Path>,
        page_size: usize,
    ) -> QuarryResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        if len % page_size as u64 != 0 {
            return Err(QuarryError::corruption(format!(
                "file {} has length {} not a multiple of the page size {}",
                path.display(),
                len,
                page_size
            )));
        }
        Ok(Self {
            id,
            name: name.into(),
            kind,
            path,
            page_size,
            file: Mutex::new(file),
            page_count: AtomicU64::new(len / page_size as u64),
        })
    }

    /// Returns the file id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> FileId {
        self.id
    }

    /// Returns the component name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the component kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    /// Returns the file path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the page size.
    #[inline]
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns the committed page count.
    #[inline]
    #[must_use]
    pub fn page_count(&self) -> u64 {
        self.page_count.load(Ordering::Acquire)
    }

    /// Reads a full page.
    pub fn read_page(&self, page_number: PageNumber) -> QuarryResult<Vec<u8>> {
        let mut buf = vec![0u8; self.page_size];
        let offset = page_number.as_u64() * self.page_size as u64;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Reads only a page's on-disk version field.
    ///
    /// Pages beyond the current file length report version 0, which is what
    /// replay expects for a page the crash prevented from being written.
    pub fn read_page_version(&self, page_number: PageNumber) -> QuarryResult<u64> {
        if page_number.as_u64() >= self.page_count() {
            return Ok(0);
        }
        let mut buf = [0u8; 8];
        let offset = page_number.as_u64() * self.page_size as u64 + PAGE_VERSION_OFFSET as u64;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Writes a full page, extending the file's page count if it grew.
    pub fn write_page(&self, page_number: PageNumber, data: &[u8]) -> QuarryResult<()> {
        debug_assert_eq!(data.len(), self.page_size);
        let offset = page_number.as_u64() * self.page_size as u64;
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(data)?;
        }
        self.page_count
            .fetch_max(page_number.as_u64() + 1, Ordering::AcqRel);
        Ok(())
    }

    /// Flushes file data and metadata to disk.
    pub fn sync(&self) -> QuarryResult<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    /// Deletes the file from disk. The in-memory handle must be dropped
    /// afterwards.
    pub fn delete(&self) -> QuarryResult<()> {
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}

impl std::fmt::Debug for PagedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedFile")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("page_count", &self.page_count())
            .finish()
    }
}
