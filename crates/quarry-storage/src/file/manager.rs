//! Component file discovery and lifecycle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::FileId;

use super::{ComponentKind, PagedFile};

/// Owns the data directory: discovers component files at open, hands out
/// fresh file ids, and creates/opens/drops component files.
pub struct FileManager {
    dir: PathBuf,
    page_size: usize,
    files: RwLock<HashMap<FileId, Arc<PagedFile>>>,
    next_file_id: AtomicU32,
}

/// Parses `<name>.<file-id>.<ext>` into its parts.
fn parse_file_name(path: &Path) -> Option<(String, FileId, ComponentKind)> {
    let file_name = path.file_name()?.to_str()?;
    let mut parts = file_name.rsplitn(3, '.');
    let ext = parts.next()?;
    let id: u32 = parts.next()?.parse().ok()?;
    let name = parts.next()?;
    let kind = ComponentKind::from_extension(ext)?;
    Some((name.to_string(), FileId::new(id), kind))
}

impl FileManager {
    /// Opens the data directory, discovering every component file in it.
    pub fn open_dir(dir: impl Into<PathBuf>, page_size: usize) -> QuarryResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut files = HashMap::new();
        let mut max_id = 0u32;
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            // Unfinished compaction output is discarded wholesale.
            if path.extension().and_then(|e| e.to_str()) == Some("tmp") {
                warn!(path = %path.display(), "removing incomplete component file");
                std::fs::remove_file(&path)?;
                continue;
            }
            let Some((name, id, kind)) = parse_file_name(&path) else {
                continue;
            };
            debug!(%id, name = %name, ?kind, "discovered component file");
            let file = PagedFile::open(id, name, kind, &path, page_size)?;
            files.insert(id, Arc::new(file));
            max_id = max_id.max(id.as_u32());
        }

        Ok(Self {
            dir,
            page_size,
            files: RwLock::new(files),
            next_file_id: AtomicU32::new(max_id + 1),
        })
    }

    /// Returns the data directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path a component file of the given identity would use.
    #[must_use]
    pub fn component_path(&self, name: &str, id: FileId, kind: ComponentKind) -> PathBuf {
        self.dir
            .join(format!("{}.{}.{}", name, id.as_u32(), kind.extension()))
    }

    /// Allocates a fresh file id.
    pub fn allocate_file_id(&self) -> FileId {
        FileId::new(self.next_file_id.fetch_add(1, Ordering::AcqRel))
    }

    /// Creates a new component file with a fresh id and registers it.
    pub fn create(&self, name: &str, kind: ComponentKind) -> QuarryResult<Arc<PagedFile>> {
        let id = self.allocate_file_id();
        let path = self.component_path(name, id, kind);
        let file = Arc::new(PagedFile::create(id, name, kind, &path, self.page_size)?);
        self.files.write().insert(id, Arc::clone(&file));
        Ok(file)
    }

    /// Registers an externally created file (compaction output after its
    /// rename to the final name).
    pub fn register(&self, file: Arc<PagedFile>) {
        self.files.write().insert(file.id(), file);
    }

    /// Looks up a file by id.
    #[must_use]
    pub fn get(&self, id: FileId) -> Option<Arc<PagedFile>> {
        self.files.read().get(&id).cloned()
    }

    /// Returns every registered file.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<PagedFile>> {
        self.files.read().values().cloned().collect()
    }

    /// Looks up a file by component name and kind.
    #[must_use]
    pub fn find(&self, name: &str, kind: ComponentKind) -> Option<Arc<PagedFile>> {
        self.files
            .read()
            .values()
            .find(|f| f.kind() == kind && f.name() == name)
            .cloned()
    }

    /// Unregisters a file and deletes it from disk.
    pub fn drop_file(&self, id: FileId) -> QuarryResult<()> {
        let file = self
            .files
            .write()
            .remove(&id)
            .ok_or_else(|| QuarryError::ComponentNotFound {
                name: format!("file {}", id),
            })?;
        file.delete()?;
        Ok(())
    }

    /// Flushes every registered file to disk.
    pub fn sync_all(&self) -> QuarryResult<()> {
        for file in self.all() {
            file.sync()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for FileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileManager")
            .field("dir", &self.dir)
            .field("files", &self.files.read().len())
            .finish()
    }
}
