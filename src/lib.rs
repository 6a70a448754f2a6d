//! # Object Storage
//!
//! A disk-based object store that keeps variable-length objects in slotted
//! pages, the storage layer underneath a relational engine's tables.
//!
//! ## Architecture
//!
//! The store is composed of modular, swappable components:
//!
//! - **Page Layer** (`page`): Slotted page format, object headers, compaction
//! - **Storage Layer** (`storage`): Volume file I/O, page allocation, file catalog
//! - **Buffer Pool** (`buffer`): LRU page cache with pinning and dirty tracking
//! - **Object Manager** (`om`): Object placement, destruction and traversal
//!
//! ## Usage
//!
//! ```rust,ignore
//! use object_storage::{Config, DeallocList, ObjectStore, ScanDirection};
//!
//! let store = ObjectStore::open(Config::new("my_volume.vol"))?;
//! let file = store.create_file(None)?;
//!
//! // Store an object, and another one close to it
//! let a = store.create_object(file, None, None, 5, Some(b"hello"))?;
//! let b = store.create_object(file, Some(&a), None, 5, Some(b"world"))?;
//!
//! // Read it back
//! let (header, data) = store.read_object(file, &a)?;
//!
//! // Walk the file in order
//! for (oid, header) in store.scan(file, ScanDirection::Forward)? {
//!     println!("{} -> {} bytes", oid, header.length);
//! }
//!
//! // Destroy, then release any pages that became empty
//! let mut dealloc = DeallocList::new();
//! store.destroy_object(file, &b, &mut dealloc)?;
//! store.commit_deallocs(&mut dealloc)?;
//! store.flush()?;
//! ```

pub mod buffer;
pub mod error;
pub mod om;
pub mod page;
pub mod storage;
pub mod types;

pub use error::{Result, StorageError};
pub use types::{FileId, ObjectId, PageId, DEFAULT_FILL_FACTOR, PAGE_SIZE};

// Re-export main public API
pub use buffer::{BufferPool, BufferPoolImpl};
pub use om::{AvailBucket, DeallocList, ObjectManager, ScanDirection};
pub use page::{ObjectHeader, MAX_OBJECT_LENGTH};
pub use storage::{DiskManager, DiskManagerImpl};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Path to the volume file
    pub path: PathBuf,
    /// Buffer pool size in number of pages (default: 256)
    pub buffer_pool_size: usize,
    /// Whether to sync writes immediately (default: false for performance)
    pub sync_on_write: bool,
    /// Extent fill factor, in percent, for files created without one
    /// (default: 100)
    pub fill_factor: u8,
    /// Volume number recorded when a new volume file is created (default: 1)
    pub volume_id: u16,
}

impl Config {
    /// Create a new configuration with default settings
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            buffer_pool_size: 256,
            sync_on_write: false,
            fill_factor: DEFAULT_FILL_FACTOR,
            volume_id: 1,
        }
    }

    /// Set buffer pool size
    pub fn buffer_pool_size(mut self, size: usize) -> Self {
        self.buffer_pool_size = size;
        self
    }

    /// Enable sync on write for durability
    pub fn sync_on_write(mut self, enabled: bool) -> Self {
        self.sync_on_write = enabled;
        self
    }

    /// Set the default extent fill factor for new files
    pub fn fill_factor(mut self, percent: u8) -> Self {
        self.fill_factor = percent;
        self
    }

    /// Set the volume number used for a new volume
    pub fn volume_id(mut self, volume_id: u16) -> Self {
        self.volume_id = volume_id;
        self
    }
}

/// Layout of one slot, for inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotLayout {
    pub slot: u16,
    /// Data-area offset; `None` for an empty slot
    pub offset: Option<u16>,
    pub unique: u32,
    pub length: Option<u32>,
    pub tag: Option<u16>,
}

/// Layout of one data page, for inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLayout {
    pub page_id: PageId,
    pub n_slots: usize,
    pub free: usize,
    pub unused: usize,
    pub free_bytes: usize,
    pub contiguous_free_bytes: usize,
    pub bucket: Option<AvailBucket>,
    pub slots: Vec<SlotLayout>,
}

/// Layout of a whole file in chain order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileLayout {
    pub file_id: FileId,
    pub first_page: PageId,
    pub last_page: PageId,
    pub fill_factor: u8,
    /// Heads of the available-space lists, 50% down to 10%
    pub avail_heads: Vec<Option<PageId>>,
    pub pages: Vec<PageLayout>,
}

/// Main store handle
///
/// This is the primary public interface of the object store. Operations
/// that change objects are serialized; reads may run side by side.
pub struct ObjectStore {
    manager: Arc<RwLock<ObjectManager>>,
    buffer_pool: Arc<BufferPoolImpl>,
    config: Config,
}

impl ObjectStore {
    /// Open or create a volume at the configured path
    pub fn open(config: Config) -> Result<Self> {
        let disk_manager = Arc::new(DiskManagerImpl::open(
            &config.path,
            config.sync_on_write,
            config.volume_id,
        )?);
        let buffer_pool = Arc::new(BufferPoolImpl::new(
            disk_manager,
            config.buffer_pool_size,
        ));
        let manager = Arc::new(RwLock::new(ObjectManager::new(buffer_pool.clone())));

        Ok(Self {
            manager,
            buffer_pool,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Create a new, empty file
    ///
    /// `fill_factor` defaults to the configured one.
    pub fn create_file(&self, fill_factor: Option<u8>) -> Result<FileId> {
        let manager = self.manager.write();
        manager.create_file(fill_factor.unwrap_or(self.config.fill_factor))
    }

    /// Store a new object; see [`ObjectManager::create_object`]
    pub fn create_object(
        &self,
        file: FileId,
        near: Option<&ObjectId>,
        header: Option<&ObjectHeader>,
        length: usize,
        data: Option<&[u8]>,
    ) -> Result<ObjectId> {
        let manager = self.manager.write();
        manager.create_object(file, near, header, length, data)
    }

    /// Destroy an object, queueing its page in `dealloc` if it became empty
    pub fn destroy_object(&self, file: FileId, oid: &ObjectId, dealloc: &mut DeallocList) -> Result<()> {
        let manager = self.manager.write();
        manager.destroy_object(file, oid, dealloc)
    }

    /// Read an object's header and payload
    pub fn read_object(&self, file: FileId, oid: &ObjectId) -> Result<(ObjectHeader, Vec<u8>)> {
        let manager = self.manager.read();
        manager.read_object(file, oid)
    }

    /// The object after `current` (or the first one), `None` at the end
    pub fn next_object(
        &self,
        file: FileId,
        current: Option<&ObjectId>,
    ) -> Result<Option<(ObjectId, ObjectHeader)>> {
        let manager = self.manager.read();
        manager.next_object(file, current)
    }

    /// The object before `current` (or the last one), `None` at the start
    pub fn prev_object(
        &self,
        file: FileId,
        current: Option<&ObjectId>,
    ) -> Result<Option<(ObjectId, ObjectHeader)>> {
        let manager = self.manager.read();
        manager.prev_object(file, current)
    }

    /// Every object of a file in scan order
    pub fn scan(&self, file: FileId, direction: ScanDirection) -> Result<Vec<(ObjectId, ObjectHeader)>> {
        let manager = self.manager.read();
        let objects: Result<Vec<_>> = manager.cursor(file, direction).collect();
        objects
    }

    /// Free the pages queued by earlier destroys
    pub fn commit_deallocs(&self, dealloc: &mut DeallocList) -> Result<usize> {
        let manager = self.manager.write();
        manager.commit_deallocs(dealloc)
    }

    /// Check a file's pages, chain and available-space lists
    pub fn verify_file(&self, file: FileId) -> Result<()> {
        let manager = self.manager.read();
        manager.verify_file(file)
    }

    /// Flush all dirty pages and the volume header to disk
    pub fn flush(&self) -> Result<()> {
        self.buffer_pool.flush_all()
    }

    /// Get statistics about the store
    pub fn stats(&self) -> StoreStats {
        let header = self.buffer_pool.volume_header();
        StoreStats {
            volume_id: header.volume_id,
            page_count: header.page_count as usize,
            free_page_count: header.free_page_count as usize,
            file_count: header.catalog.len(),
            buffer_pool_size: self.buffer_pool.capacity(),
            pinned_pages: self.buffer_pool.pinned_pages(),
        }
    }

    /// Export a file's page layout for inspection
    pub fn export_file(&self, file: FileId) -> Result<FileLayout> {
        let manager = self.manager.read();
        let catalog = self.buffer_pool.catalog_entry(file)?;

        let mut pages = Vec::new();
        let mut cursor = Some(catalog.first_page);
        while let Some(page_id) = cursor {
            if pages.len() > self.buffer_pool.page_count() {
                return Err(StorageError::corruption(format!(
                    "file {} chain does not terminate",
                    file
                )));
            }
            let guard = manager.fetch_file_page(file, page_id)?;
            let page = guard.read();

            let mut slots = Vec::with_capacity(page.slot_count());
            for index in 0..page.slot_count() {
                let slot = match page.slot(index) {
                    Some(slot) => slot,
                    None => continue,
                };
                let header = if slot.is_empty() {
                    None
                } else {
                    Some(page.object_header(index)?)
                };
                slots.push(SlotLayout {
                    slot: index as u16,
                    offset: (!slot.is_empty()).then_some(slot.offset),
                    unique: slot.unique,
                    length: header.map(|h| h.length),
                    tag: header.map(|h| h.tag),
                });
            }

            pages.push(PageLayout {
                page_id,
                n_slots: page.slot_count(),
                free: page.free_offset(),
                unused: page.unused(),
                free_bytes: page.free_bytes(),
                contiguous_free_bytes: page.contiguous_free_bytes(),
                bucket: AvailBucket::from_index(page.avail_tag() as usize),
                slots,
            });
            cursor = page.next_page();
        }

        Ok(FileLayout {
            file_id: catalog.file_id,
            first_page: catalog.first_page,
            last_page: catalog.last_page,
            fill_factor: catalog.fill_factor,
            avail_heads: catalog
                .avail_heads
                .iter()
                .map(|head| PageId::link(head.value()))
                .collect(),
            pages,
        })
    }
}

/// Store statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub volume_id: u16,
    /// Total number of pages in the volume, header page included
    pub page_count: usize,
    pub free_page_count: usize,
    pub file_count: usize,
    /// Buffer pool capacity
    pub buffer_pool_size: usize,
    pub pinned_pages: usize,
}
