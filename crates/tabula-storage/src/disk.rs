//! Page-level file I/O for a single table or index file.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tabula_common::page::{PageHeader, PageNo, PageType, NO_PAGE, PAGE_SIZE};
use tabula_common::{Result, StorageConfig, TabulaError};
use tracing::{debug, trace, warn};

/// Options for opening a page file.
#[derive(Debug, Clone, Copy)]
pub struct PageFileOptions {
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
    /// Remember the discovered root between tree accesses.
    pub cache_root: bool,
}

impl Default for PageFileOptions {
    fn default() -> Self {
        Self {
            fsync_enabled: true,
            cache_root: true,
        }
    }
}

impl From<&StorageConfig> for PageFileOptions {
    fn from(config: &StorageConfig) -> Self {
        Self {
            fsync_enabled: config.fsync_enabled,
            cache_root: config.cache_root,
        }
    }
}

/// A file of fixed-size pages.
///
/// Pages are read and written whole. Nothing is cached except the page
/// count and, optionally, the root page number.
pub struct PageFile {
    path: PathBuf,
    options: PageFileOptions,
    inner: Mutex<FileHandle>,
}

struct FileHandle {
    file: File,
    num_pages: u32,
    /// First page with no parent, if known.
    root: Option<PageNo>,
}

impl PageFile {
    /// Creates a new file holding a single empty page of `root_type`.
    ///
    /// Fails if the file already exists.
    pub fn create(path: impl AsRef<Path>, root_type: PageType, options: PageFileOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        let page_file = Self {
            path,
            options,
            inner: Mutex::new(FileHandle {
                file,
                num_pages: 0,
                root: None,
            }),
        };
        page_file.allocate_page(root_type, NO_PAGE, NO_PAGE)?;
        debug!(path = %page_file.path.display(), ?root_type, "created page file");
        Ok(page_file)
    }

    /// Opens an existing page file.
    pub fn open(path: impl AsRef<Path>, options: PageFileOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let file_size = file.metadata()?.len();
        if file_size % PAGE_SIZE as u64 != 0 {
            warn!(
                path = %path.display(),
                file_size,
                "page file has a partial trailing page, ignoring it"
            );
        }
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self {
            path,
            options,
            inner: Mutex::new(FileHandle {
                file,
                num_pages,
                root: None,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of pages in the file.
    pub fn num_pages(&self) -> u32 {
        self.inner.lock().num_pages
    }

    /// Reads a page.
    pub fn read_page(&self, page_no: PageNo) -> Result<Box<[u8; PAGE_SIZE]>> {
        let mut handle = self.inner.lock();
        if page_no >= handle.num_pages {
            return Err(TabulaError::PageOutOfRange {
                page_no,
                num_pages: handle.num_pages,
            });
        }

        let offset = (page_no as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;

        let mut buffer = Box::new([0u8; PAGE_SIZE]);
        handle.file.read_exact(&mut buffer[..])?;
        trace!(page_no, "read page");

        Ok(buffer)
    }

    /// Writes a page that already exists in the file.
    pub fn write_page(&self, page_no: PageNo, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut handle = self.inner.lock();
        if page_no >= handle.num_pages {
            return Err(TabulaError::PageOutOfRange {
                page_no,
                num_pages: handle.num_pages,
            });
        }

        let offset = (page_no as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(data)?;

        if self.options.fsync_enabled {
            handle.file.sync_all()?;
        }

        let parent = u32::from_be_bytes([data[10], data[11], data[12], data[13]]);
        match handle.root {
            // The cached root gained a parent: a new root was created above it.
            Some(root) if root == page_no && parent != NO_PAGE => handle.root = None,
            Some(root) if page_no < root && parent == NO_PAGE => handle.root = Some(page_no),
            _ => {}
        }
        trace!(page_no, "wrote page");

        Ok(())
    }

    /// Appends an empty page with the given header fields.
    pub fn allocate_page(&self, page_type: PageType, right_page: PageNo, parent_page: PageNo) -> Result<PageNo> {
        let mut handle = self.inner.lock();
        let page_no = handle.num_pages;

        let mut data = [0u8; PAGE_SIZE];
        let header = PageHeader::new(page_type, right_page, parent_page);
        data[..PageHeader::SIZE].copy_from_slice(&header.to_bytes());

        let offset = (page_no as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(&data)?;

        if self.options.fsync_enabled {
            handle.file.sync_all()?;
        }

        handle.num_pages = page_no + 1;
        handle.root = None;
        trace!(page_no, ?page_type, "allocated page");

        Ok(page_no)
    }

    /// Returns the root: the lowest-numbered page whose parent is none.
    pub fn root(&self) -> Result<PageNo> {
        if self.options.cache_root {
            if let Some(root) = self.inner.lock().root {
                return Ok(root);
            }
        }

        let num_pages = self.num_pages();
        for page_no in 0..num_pages {
            let data = self.read_page(page_no)?;
            let header = PageHeader::from_bytes(page_no, &data[..])?;
            if header.parent_page == NO_PAGE {
                if self.options.cache_root {
                    self.inner.lock().root = Some(page_no);
                }
                trace!(page_no, path = %self.path.display(), "discovered root");
                return Ok(page_no);
            }
        }

        Err(TabulaError::PageCorrupted {
            page_no: 0,
            reason: format!("no root page in {}", self.path.display()),
        })
    }

    /// Flushes pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

impl std::fmt::Debug for PageFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageFile")
            .field("path", &self.path)
            .field("num_pages", &self.num_pages())
            .finish()
    }
}
