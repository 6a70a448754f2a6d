//! Disk manager implementation.
//!
//! The disk manager is responsible for reading and writing pages of the
//! volume file, allocating and freeing pages, and keeping the volume header
//! (allocation state and file catalog). It abstracts the file I/O behind a
//! trait so that the rest of the system can be tested with other backends.

use crate::error::{Result, StorageError};
use crate::page::PageBuf;
use crate::storage::{CatalogEntry, FreeList, VolumeHeader};
use crate::types::{FileId, PageId, PageType, EXTENT_SIZE, PAGE_SIZE};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::debug;

/// Trait for disk I/O operations
pub trait DiskManager: Send + Sync {
    /// Read a page from disk
    fn read_page(&self, page_id: PageId) -> Result<PageBuf>;

    /// Write a page to disk
    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()>;

    /// Allocate a page, preferably in the extent of `near`
    ///
    /// `fill_factor` is the percentage of an extent's pages near allocation
    /// may occupy before falling back to any free page.
    fn allocate_page(&self, near: Option<PageId>, fill_factor: u8) -> Result<PageId>;

    /// Deallocate a page (add to free list)
    fn deallocate_page(&self, page_id: PageId) -> Result<()>;

    /// Sync the header and all data to disk
    fn sync(&self) -> Result<()>;

    /// Get a copy of the volume header
    fn header(&self) -> VolumeHeader;

    /// Look up a file's catalog entry
    fn catalog_entry(&self, file_id: FileId) -> Result<CatalogEntry>;

    /// Register a new file anchored at `first_page`
    fn create_catalog_entry(&self, first_page: PageId, fill_factor: u8) -> Result<CatalogEntry>;

    /// Replace a file's catalog entry
    fn put_catalog_entry(&self, entry: CatalogEntry) -> Result<()>;

    /// Hand out a unique stamp for a newly filled slot
    fn next_unique(&self) -> u32;
}

/// File-based disk manager implementation
pub struct DiskManagerImpl {
    /// The volume file
    file: RwLock<File>,
    /// The volume header (cached; written back by `flush_header`)
    header: RwLock<VolumeHeader>,
    /// Free list for page reuse
    free_list: RwLock<FreeList>,
    /// Whether to sync on each write
    sync_on_write: bool,
}

impl DiskManagerImpl {
    /// Open or create a volume file
    ///
    /// `volume_id` is recorded when a new volume is created; an existing
    /// volume keeps the number stored in its header.
    pub fn open(path: &Path, sync_on_write: bool, volume_id: u16) -> Result<Self> {
        let exists = path.exists();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let header = if exists && file.metadata()?.len() >= PAGE_SIZE as u64 {
            let mut file_ref = &file;
            let mut buf = vec![0u8; PAGE_SIZE];
            file_ref.read_exact(&mut buf)?;
            VolumeHeader::read(&buf)?
        } else {
            let header = VolumeHeader::new(volume_id);
            let mut buf = vec![0u8; PAGE_SIZE];
            header.write(&mut buf);

            let mut file_ref = &file;
            file_ref.seek(SeekFrom::Start(0))?;
            file_ref.write_all(&buf)?;
            file_ref.sync_all()?;

            header
        };

        let manager = Self {
            file: RwLock::new(file),
            header: RwLock::new(header),
            free_list: RwLock::new(FreeList::new()),
            sync_on_write,
        };
        manager.rebuild_free_list()?;
        Ok(manager)
    }

    /// Collect pages marked free on disk into the in-memory free list
    fn rebuild_free_list(&self) -> Result<()> {
        let page_count = self.header.read().page_count;
        let mut free_list = self.free_list.write();
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut file = self.file.write();

        for raw in 1..page_count {
            let page_id = PageId::new(raw);
            file.seek(SeekFrom::Start(page_id.file_offset(PAGE_SIZE)))?;
            file.read_exact(&mut buf)?;
            if PageType::from_byte(buf[0]) == Some(PageType::Free) {
                free_list.push(page_id);
            }
        }

        if !free_list.is_empty() {
            debug!(free_pages = free_list.len(), "rebuilt free list");
        }
        self.header.write().free_page_count = free_list.len() as u32;
        Ok(())
    }

    /// Flush the header to disk
    fn flush_header(&self) -> Result<()> {
        let mut buf = vec![0u8; PAGE_SIZE];
        self.header.read().write(&mut buf);

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&buf)?;

        if self.sync_on_write {
            file.sync_data()?;
        }

        Ok(())
    }

    /// Write a zero-filled page at `page_id`
    fn write_zero_page(&self, page_id: PageId) -> Result<()> {
        let zeros = vec![0u8; PAGE_SIZE];
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(page_id.file_offset(PAGE_SIZE)))?;
        file.write_all(&zeros)?;
        Ok(())
    }

    /// Whether near allocation may still place pages in `extent`
    fn extent_has_room(&self, extent: u32, fill_factor: u8, free_list: &FreeList) -> bool {
        let page_count = self.header.read().page_count;
        let start = (extent * EXTENT_SIZE).max(1);
        let end = ((extent + 1) * EXTENT_SIZE).min(page_count);
        let allocated = end.saturating_sub(start) as usize;
        let in_use = allocated - free_list.count_in_extent(extent).min(allocated);

        let fill = fill_factor.clamp(1, 100) as usize;
        let limit = (EXTENT_SIZE as usize * fill).div_ceil(100);
        in_use < limit
    }

    /// Pick a page for allocation; `None` means the file must grow
    fn choose_page(&self, near: Option<PageId>, fill_factor: u8) -> Option<PageId> {
        let mut free_list = self.free_list.write();

        if let Some(near) = near {
            let extent = near.extent();
            if self.extent_has_room(extent, fill_factor, &free_list) {
                if let Some(page_id) = free_list.take_in_extent(extent) {
                    return Some(page_id);
                }
                let tail = PageId::new(self.header.read().page_count);
                if tail.extent() == extent {
                    return None;
                }
            }
        }

        free_list.pop()
    }
}

impl DiskManager for DiskManagerImpl {
    fn read_page(&self, page_id: PageId) -> Result<PageBuf> {
        if page_id == PageId::HEADER {
            return Err(StorageError::invalid_operation(
                "cannot read header page directly",
            ));
        }

        if !page_id.is_valid() || page_id.value() >= self.header.read().page_count {
            return Err(StorageError::PageNotFound(page_id));
        }

        let offset = page_id.file_offset(PAGE_SIZE);
        let mut buf = vec![0u8; PAGE_SIZE];

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;

        Ok(PageBuf::from_bytes(&buf))
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        if page_id == PageId::HEADER {
            return Err(StorageError::invalid_operation(
                "cannot write header page directly",
            ));
        }

        if data.len() != PAGE_SIZE {
            return Err(StorageError::invalid_operation(format!(
                "page data must be {} bytes, got {}",
                PAGE_SIZE,
                data.len()
            )));
        }

        let offset = page_id.file_offset(PAGE_SIZE);

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;

        if self.sync_on_write {
            file.sync_data()?;
        }

        Ok(())
    }

    fn allocate_page(&self, near: Option<PageId>, fill_factor: u8) -> Result<PageId> {
        if let Some(page_id) = self.choose_page(near, fill_factor) {
            let mut header = self.header.write();
            header.free_page_count = header.free_page_count.saturating_sub(1);
            drop(header);
            debug!(page = %page_id, "reusing free page");
            return Ok(page_id);
        }

        let page_id = self.header.write().allocate_page();

        // Extend the file
        self.write_zero_page(page_id)?;
        self.flush_header()?;

        debug!(page = %page_id, "extended volume");
        Ok(page_id)
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        if page_id == PageId::HEADER {
            return Err(StorageError::invalid_operation(
                "cannot deallocate header page",
            ));
        }
        if !page_id.is_valid() || page_id.value() >= self.header.read().page_count {
            return Err(StorageError::PageNotFound(page_id));
        }

        // A zeroed page reads back as `PageType::Free`.
        self.write_zero_page(page_id)?;

        let mut free_list = self.free_list.write();
        free_list.push(page_id);
        self.header.write().free_page_count = free_list.len() as u32;
        drop(free_list);

        self.flush_header()
    }

    fn sync(&self) -> Result<()> {
        self.flush_header()?;
        let file = self.file.write();
        file.sync_all()?;
        Ok(())
    }

    fn header(&self) -> VolumeHeader {
        self.header.read().clone()
    }

    fn catalog_entry(&self, file_id: FileId) -> Result<CatalogEntry> {
        self.header
            .read()
            .catalog_entry(file_id)
            .copied()
            .ok_or(StorageError::BadCatalogObject(file_id))
    }

    fn create_catalog_entry(&self, first_page: PageId, fill_factor: u8) -> Result<CatalogEntry> {
        let entry = self.header.write().add_catalog_entry(first_page, fill_factor)?;
        self.flush_header()?;
        Ok(entry)
    }

    fn put_catalog_entry(&self, entry: CatalogEntry) -> Result<()> {
        let mut header = self.header.write();
        let slot = header
            .catalog_entry_mut(entry.file_id)
            .ok_or(StorageError::BadCatalogObject(entry.file_id))?;
        *slot = entry;
        Ok(())
    }

    fn next_unique(&self) -> u32 {
        self.header.write().take_unique()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_new_volume() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.vol");

        let dm = DiskManagerImpl::open(&path, false, 7)?;
        let header = dm.header();

        assert_eq!(header.page_count, 1);
        assert_eq!(header.volume_id, 7);
        assert_eq!(header.page_size, PAGE_SIZE as u32);
        assert!(header.catalog.is_empty());

        Ok(())
    }

    #[test]
    fn test_allocate_and_write_page() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.vol");

        let dm = DiskManagerImpl::open(&path, false, 1)?;

        let page_id = dm.allocate_page(None, 100)?;
        assert_eq!(page_id, PageId::new(1));

        let mut data = vec![0u8; PAGE_SIZE];
        data[0..5].copy_from_slice(b"hello");
        dm.write_page(page_id, &data)?;

        let read_data = dm.read_page(page_id)?;
        assert_eq!(&read_data[0..5], b"hello");
        assert!(matches!(
            dm.read_page(PageId::new(9)),
            Err(StorageError::PageNotFound(_))
        ));

        Ok(())
    }

    #[test]
    fn test_reopen_volume() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.vol");

        let file_id = {
            let dm = DiskManagerImpl::open(&path, true, 1)?;
            let page_id = dm.allocate_page(None, 100)?;
            let mut data = vec![0u8; PAGE_SIZE];
            data[0] = PageType::Data as u8;
            dm.write_page(page_id, &data)?;
            let entry = dm.create_catalog_entry(page_id, 100)?;
            dm.next_unique();
            dm.sync()?;
            entry.file_id
        };

        {
            let dm = DiskManagerImpl::open(&path, false, 9)?;
            let header = dm.header();
            assert_eq!(header.page_count, 2);
            assert_eq!(header.volume_id, 1);
            assert_eq!(header.next_unique, 2);
            assert_eq!(dm.catalog_entry(file_id)?.first_page, PageId::new(1));
        }

        Ok(())
    }

    #[test]
    fn test_free_list_reuse_and_rebuild() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.vol");

        {
            let dm = DiskManagerImpl::open(&path, false, 1)?;
            let mut data = vec![0u8; PAGE_SIZE];
            data[0] = PageType::Data as u8;
            for _ in 0..3 {
                let page_id = dm.allocate_page(None, 100)?;
                dm.write_page(page_id, &data)?;
            }

            dm.deallocate_page(PageId::new(2))?;
            assert_eq!(dm.header().free_page_count, 1);
            dm.sync()?;
        }

        let dm = DiskManagerImpl::open(&path, false, 1)?;
        assert_eq!(dm.header().free_page_count, 1);
        assert_eq!(dm.allocate_page(None, 100)?, PageId::new(2));
        assert_eq!(dm.allocate_page(None, 100)?, PageId::new(4));

        Ok(())
    }

    #[test]
    fn test_near_allocation_respects_fill_factor() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.vol");
        let dm = DiskManagerImpl::open(&path, false, 1)?;

        // Fill the first extent (pages 1..=15) and a few pages of the next.
        for _ in 0..20 {
            dm.allocate_page(None, 100)?;
        }
        dm.deallocate_page(PageId::new(18))?;
        dm.deallocate_page(PageId::new(3))?;

        // Extent 0 has 14 of its 15 data pages in use: a 50% fill factor
        // sends allocation elsewhere, 100% reuses the local hole.
        assert_eq!(dm.allocate_page(Some(PageId::new(5)), 50)?, PageId::new(18));
        assert_eq!(dm.allocate_page(Some(PageId::new(5)), 100)?, PageId::new(3));

        Ok(())
    }

    #[test]
    fn test_catalog_errors() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.vol");
        let dm = DiskManagerImpl::open(&path, false, 1)?;

        assert!(matches!(
            dm.catalog_entry(FileId::new(42)),
            Err(StorageError::BadCatalogObject(_))
        ));
        let entry = CatalogEntry::new(FileId::new(42), PageId::new(1), 100);
        assert!(matches!(
            dm.put_catalog_entry(entry),
            Err(StorageError::BadCatalogObject(_))
        ));

        Ok(())
    }
}
