//! Buffer pool implementation.
//!
//! The buffer pool manages a fixed number of in-memory page frames,
//! caching pages read from disk and writing dirty pages back. Every guard
//! handed out pins its frame until it is dropped; pinned frames are never
//! evicted or freed.

use crate::buffer::lru::LruCache;
use crate::error::{Result, StorageError};
use crate::page::SlottedPage;
use crate::storage::{CatalogEntry, DiskManager, VolumeHeader};
use crate::types::{FileId, PageId};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Trait for buffer pool operations
pub trait BufferPool: Send + Sync {
    /// Fetch a page for reading
    fn fetch_page(&self, page_id: PageId) -> Result<PageGuard<'_>>;

    /// Fetch a page for writing
    ///
    /// The page is only marked dirty once the guard's `write()` is taken.
    fn fetch_page_mut(&self, page_id: PageId) -> Result<PageGuardMut<'_>>;

    /// Allocate a zero-filled page, preferably near `near`
    fn new_page(&self, near: Option<PageId>, fill_factor: u8) -> Result<PageGuardMut<'_>>;

    /// Flush a specific page to disk
    fn flush_page(&self, page_id: PageId) -> Result<()>;

    /// Flush all dirty pages and the volume header to disk
    fn flush_all(&self) -> Result<()>;

    /// Drop a page from the pool and return it to the volume's free pages
    fn free_page(&self, page_id: PageId) -> Result<()>;

    /// Number of frames currently pinned by a live guard
    fn pinned_pages(&self) -> usize;

    /// Get the total number of pages in the volume
    fn page_count(&self) -> usize;

    /// Get the buffer pool capacity
    fn capacity(&self) -> usize;

    /// Snapshot of the volume header
    fn volume_header(&self) -> VolumeHeader;

    /// Look up a file's catalog entry
    fn catalog_entry(&self, file_id: FileId) -> Result<CatalogEntry>;

    /// Register a new file anchored at `first_page`
    fn create_catalog_entry(&self, first_page: PageId, fill_factor: u8) -> Result<CatalogEntry>;

    /// Replace a file's catalog entry
    fn put_catalog_entry(&self, entry: CatalogEntry) -> Result<()>;

    /// Hand out a unique stamp for a newly filled slot
    fn next_unique(&self) -> u32;
}

/// A frame in the buffer pool
///
/// The pin count sits outside the page lock so eviction can tell a pinned
/// frame from an unpinned one even while a guard holds the page locked.
struct BufferFrame {
    /// Pin count (number of active guards)
    pin_count: AtomicU32,
    state: RwLock<FrameState>,
}

struct FrameState {
    /// The page data
    page: SlottedPage,
    /// Whether the page has been modified
    dirty: bool,
}

impl BufferFrame {
    fn is_pinned(&self) -> bool {
        self.pin_count.load(Ordering::Acquire) > 0
    }
}

/// Buffer pool implementation
pub struct BufferPoolImpl {
    /// The disk manager for I/O
    disk_manager: Arc<dyn DiskManager>,
    /// Cached frames indexed by page ID
    frames: RwLock<HashMap<PageId, Arc<BufferFrame>>>,
    /// Replacement order
    lru: RwLock<LruCache>,
    /// Maximum number of frames
    capacity: usize,
}

impl BufferPoolImpl {
    /// Create a new buffer pool
    pub fn new(disk_manager: Arc<dyn DiskManager>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            disk_manager,
            frames: RwLock::new(HashMap::with_capacity(capacity)),
            lru: RwLock::new(LruCache::new(capacity)),
            capacity,
        }
    }

    /// Get or load a frame for a page, pinning it
    fn pin_frame(&self, page_id: PageId) -> Result<Arc<BufferFrame>> {
        // Check if already in buffer
        {
            let frames = self.frames.read();
            if let Some(frame) = frames.get(&page_id) {
                frame.pin_count.fetch_add(1, Ordering::AcqRel);
                let frame = Arc::clone(frame);
                drop(frames);
                self.lru.write().touch(page_id);
                return Ok(frame);
            }
        }

        // Need to load from disk
        let page_buf = self.disk_manager.read_page(page_id)?;
        let page = SlottedPage::from_bytes(page_buf.as_bytes())?;
        self.install(page_id, page, false)
    }

    /// Place a pinned frame in the pool, evicting if the pool is full
    fn install(
        &self,
        page_id: PageId,
        page: SlottedPage,
        dirty: bool,
    ) -> Result<Arc<BufferFrame>> {
        if self.frames.read().len() >= self.capacity {
            self.evict_one()?;
        }

        let mut frames = self.frames.write();
        // Another thread may have loaded the page meanwhile.
        if let Some(frame) = frames.get(&page_id) {
            frame.pin_count.fetch_add(1, Ordering::AcqRel);
            let frame = Arc::clone(frame);
            drop(frames);
            self.lru.write().touch(page_id);
            return Ok(frame);
        }

        let frame = Arc::new(BufferFrame {
            pin_count: AtomicU32::new(1),
            state: RwLock::new(FrameState { page, dirty }),
        });
        frames.insert(page_id, Arc::clone(&frame));
        drop(frames);
        self.lru.write().touch(page_id);

        Ok(frame)
    }

    /// Evict the least recently used unpinned page
    ///
    /// Pins are only taken under the frames lock, so a frame seen unpinned
    /// here stays unpinned, and no guard holds its page lock.
    fn evict_one(&self) -> Result<()> {
        let mut frames = self.frames.write();
        let mut lru = self.lru.write();

        let page_id = lru
            .victim(|page_id| frames.get(&page_id).map_or(true, |frame| !frame.is_pinned()))
            .ok_or(StorageError::BufferPoolExhausted)?;

        if let Some(frame) = frames.get(&page_id) {
            let mut state = frame.state.write();
            if state.dirty {
                self.disk_manager.write_page(page_id, state.page.as_bytes())?;
                state.dirty = false;
            }
        }

        frames.remove(&page_id);
        lru.remove(page_id);
        trace!(page = %page_id, "evicted page");
        Ok(())
    }

    fn write_back(&self, page_id: PageId, frame: &BufferFrame) -> Result<()> {
        let mut state = frame.state.write();
        if state.dirty {
            self.disk_manager.write_page(page_id, state.page.as_bytes())?;
            state.dirty = false;
        }
        Ok(())
    }

    fn unpin(&self, page_id: PageId, frame: &BufferFrame) {
        let _ = frame
            .pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));
        self.lru.write().touch(page_id);
    }
}

impl BufferPool for BufferPoolImpl {
    fn fetch_page(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        let frame = self.pin_frame(page_id)?;
        Ok(PageGuard {
            page_id,
            frame,
            pool: self,
        })
    }

    fn fetch_page_mut(&self, page_id: PageId) -> Result<PageGuardMut<'_>> {
        let frame = self.pin_frame(page_id)?;
        Ok(PageGuardMut {
            page_id,
            frame,
            pool: self,
        })
    }

    fn new_page(&self, near: Option<PageId>, fill_factor: u8) -> Result<PageGuardMut<'_>> {
        let page_id = self.disk_manager.allocate_page(near, fill_factor)?;
        let frame = match self.install(page_id, SlottedPage::zeroed(), true) {
            Ok(frame) => frame,
            Err(e) => {
                // Hand the page back so a full pool does not leak it.
                self.disk_manager.deallocate_page(page_id)?;
                return Err(e);
            }
        };

        Ok(PageGuardMut {
            page_id,
            frame,
            pool: self,
        })
    }

    fn flush_page(&self, page_id: PageId) -> Result<()> {
        let frame = self.frames.read().get(&page_id).cloned();
        match frame {
            Some(frame) => self.write_back(page_id, &frame),
            None => Ok(()),
        }
    }

    fn flush_all(&self) -> Result<()> {
        let frames: Vec<_> = self
            .frames
            .read()
            .iter()
            .map(|(&page_id, frame)| (page_id, Arc::clone(frame)))
            .collect();
        for (page_id, frame) in frames {
            self.write_back(page_id, &frame)?;
        }
        self.disk_manager.sync()
    }

    fn free_page(&self, page_id: PageId) -> Result<()> {
        {
            let mut frames = self.frames.write();
            if let Some(frame) = frames.get(&page_id) {
                if frame.is_pinned() {
                    return Err(StorageError::invalid_operation(format!(
                        "cannot free pinned page {}",
                        page_id
                    )));
                }
            }
            frames.remove(&page_id);
        }
        self.lru.write().remove(page_id);

        self.disk_manager.deallocate_page(page_id)
    }

    fn pinned_pages(&self) -> usize {
        self.frames
            .read()
            .values()
            .filter(|frame| frame.is_pinned())
            .count()
    }

    fn page_count(&self) -> usize {
        self.disk_manager.header().page_count as usize
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn volume_header(&self) -> VolumeHeader {
        self.disk_manager.header()
    }

    fn catalog_entry(&self, file_id: FileId) -> Result<CatalogEntry> {
        self.disk_manager.catalog_entry(file_id)
    }

    fn create_catalog_entry(&self, first_page: PageId, fill_factor: u8) -> Result<CatalogEntry> {
        self.disk_manager.create_catalog_entry(first_page, fill_factor)
    }

    fn put_catalog_entry(&self, entry: CatalogEntry) -> Result<()> {
        self.disk_manager.put_catalog_entry(entry)
    }

    fn next_unique(&self) -> u32 {
        self.disk_manager.next_unique()
    }
}

/// RAII guard for read access to a page
pub struct PageGuard<'a> {
    page_id: PageId,
    frame: Arc<BufferFrame>,
    pool: &'a BufferPoolImpl,
}

impl<'a> PageGuard<'a> {
    /// Get the page ID
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Get a read lock on the page
    pub fn read(&self) -> PageRef<'_> {
        PageRef {
            guard: self.frame.state.read(),
        }
    }
}

impl<'a> Drop for PageGuard<'a> {
    fn drop(&mut self) {
        self.pool.unpin(self.page_id, &self.frame);
    }
}

/// Reference to a page (through a read lock)
pub struct PageRef<'a> {
    guard: RwLockReadGuard<'a, FrameState>,
}

impl<'a> std::ops::Deref for PageRef<'a> {
    type Target = SlottedPage;

    fn deref(&self) -> &Self::Target {
        &self.guard.page
    }
}

/// RAII guard for write access to a page
pub struct PageGuardMut<'a> {
    page_id: PageId,
    frame: Arc<BufferFrame>,
    pool: &'a BufferPoolImpl,
}

impl<'a> PageGuardMut<'a> {
    /// Get the page ID
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Get a write lock on the page, marking it dirty
    pub fn write(&self) -> PageRefMut<'_> {
        let mut guard = self.frame.state.write();
        guard.dirty = true;
        PageRefMut { guard }
    }

    /// Get a read lock on the page
    pub fn read(&self) -> PageRef<'_> {
        PageRef {
            guard: self.frame.state.read(),
        }
    }
}

impl<'a> Drop for PageGuardMut<'a> {
    fn drop(&mut self) {
        self.pool.unpin(self.page_id, &self.frame);
    }
}

/// Mutable reference to a page (through a write lock)
pub struct PageRefMut<'a> {
    guard: RwLockWriteGuard<'a, FrameState>,
}

impl<'a> std::ops::Deref for PageRefMut<'a> {
    type Target = SlottedPage;

    fn deref(&self) -> &Self::Target {
        &self.guard.page
    }
}

impl<'a> std::ops::DerefMut for PageRefMut<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard.page
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::ObjectHeader;
    use crate::storage::DiskManagerImpl;
    use tempfile::tempdir;

    fn pool_at(path: &std::path::Path, capacity: usize) -> Result<BufferPoolImpl> {
        let dm = Arc::new(DiskManagerImpl::open(path, false, 1)?);
        Ok(BufferPoolImpl::new(dm, capacity))
    }

    #[test]
    fn test_buffer_pool_new_page() -> Result<()> {
        let dir = tempdir().unwrap();
        let pool = pool_at(&dir.path().join("test.vol"), 10)?;

        let guard = pool.new_page(None, 100)?;
        assert_eq!(guard.page_id(), PageId::new(1));
        assert!(!guard.read().is_data());
        assert_eq!(pool.pinned_pages(), 1);

        {
            let mut page = guard.write();
            *page = SlottedPage::new_data(guard.page_id(), FileId::new(1));
            page.insert_object(&ObjectHeader::with_tag(1), b"value", 1)?;
        }
        drop(guard);
        assert_eq!(pool.pinned_pages(), 0);

        pool.flush_all()?;

        Ok(())
    }

    #[test]
    fn test_buffer_pool_fetch_after_reopen() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.vol");

        let page_id = {
            let pool = pool_at(&path, 10)?;
            let guard = pool.new_page(None, 100)?;
            {
                let mut page = guard.write();
                *page = SlottedPage::new_data(guard.page_id(), FileId::new(1));
                page.insert_object(&ObjectHeader::with_tag(2), b"hello", 1)?;
            }
            let page_id = guard.page_id();
            drop(guard);
            pool.flush_all()?;
            page_id
        };

        let pool = pool_at(&path, 10)?;
        let guard = pool.fetch_page(page_id)?;
        let page = guard.read();
        assert_eq!(page.object_data(0)?, b"hello");
        assert_eq!(page.object_header(0)?.tag, 2);

        Ok(())
    }

    #[test]
    fn test_eviction_writes_back_dirty_pages() -> Result<()> {
        let dir = tempdir().unwrap();
        let pool = pool_at(&dir.path().join("test.vol"), 2)?;

        let mut ids = Vec::new();
        for i in 0..5u8 {
            let guard = pool.new_page(None, 100)?;
            let mut page = guard.write();
            *page = SlottedPage::new_data(guard.page_id(), FileId::new(1));
            page.insert_object(&ObjectHeader::default(), &[i; 16], i as u32)?;
            ids.push(guard.page_id());
        }

        for (i, &page_id) in ids.iter().enumerate() {
            let guard = pool.fetch_page(page_id)?;
            assert_eq!(guard.read().object_data(0)?, &[i as u8; 16][..]);
        }

        Ok(())
    }

    #[test]
    fn test_exhausted_when_all_pinned() -> Result<()> {
        let dir = tempdir().unwrap();
        let pool = pool_at(&dir.path().join("test.vol"), 2)?;

        let a = pool.new_page(None, 100)?;
        let b = pool.new_page(None, 100)?;
        assert!(matches!(
            pool.new_page(None, 100),
            Err(StorageError::BufferPoolExhausted)
        ));
        assert_eq!(pool.pinned_pages(), 2);
        // The page allocated for the failed request went back to the free list.
        assert_eq!(pool.volume_header().free_page_count, 1);

        drop((a, b));
        assert_eq!(pool.pinned_pages(), 0);

        Ok(())
    }

    #[test]
    fn test_eviction_skips_page_locked_by_caller() -> Result<()> {
        let dir = tempdir().unwrap();
        let pool = pool_at(&dir.path().join("test.vol"), 2)?;
        let ids: Vec<PageId> = (0..3)
            .map(|_| pool.new_page(None, 100).map(|guard| guard.page_id()))
            .collect::<Result<_>>()?;

        let target = pool.fetch_page_mut(ids[0])?;
        {
            let mut page = target.write();
            *page = SlottedPage::new_data(ids[0], FileId::new(1));
            // The locked page turns coldest; every fetch must evict around it.
            for &page_id in &[ids[1], ids[2], ids[1], ids[2]] {
                pool.fetch_page(page_id)?;
            }
            assert!(page.is_data());
        }
        assert_eq!(pool.pinned_pages(), 1);
        drop(target);

        pool.fetch_page(ids[1])?;
        pool.fetch_page(ids[2])?;
        assert!(pool.fetch_page(ids[0])?.read().is_data());
        assert_eq!(pool.pinned_pages(), 0);

        Ok(())
    }

    #[test]
    fn test_free_pinned_page_rejected() -> Result<()> {
        let dir = tempdir().unwrap();
        let pool = pool_at(&dir.path().join("test.vol"), 4)?;

        let guard = pool.new_page(None, 100)?;
        let page_id = guard.page_id();
        assert!(pool.free_page(page_id).is_err());

        drop(guard);
        pool.free_page(page_id)?;
        assert_eq!(pool.volume_header().free_page_count, 1);
        assert_eq!(pool.new_page(None, 100)?.page_id(), page_id);

        Ok(())
    }

    #[test]
    fn test_fetch_mut_does_not_dirty_until_write() -> Result<()> {
        let dir = tempdir().unwrap();
        let pool = pool_at(&dir.path().join("test.vol"), 4)?;
        let page_id = pool.new_page(None, 100)?.page_id();
        pool.flush_all()?;

        let guard = pool.fetch_page_mut(page_id)?;
        assert!(!guard.frame.state.read().dirty);
        guard.write();
        assert!(guard.frame.state.read().dirty);

        Ok(())
    }
}
