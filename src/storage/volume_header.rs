//! Volume header.
//!
//! The first page (page 0) of the volume file holds allocation state and the
//! catalog of files stored on the volume.

use crate::error::{Result, StorageError};
use crate::storage::catalog::{CatalogEntry, CATALOG_ENTRY_SIZE};
use crate::types::{FileId, PageId, PAGE_SIZE};

/// Magic bytes to identify a valid volume file
pub const MAGIC: &[u8; 16] = b"ObjStoreVolV01\0\0";

/// Volume header size (uses first page)
pub const VOLUME_HEADER_SIZE: usize = PAGE_SIZE;

/// Offset of the first catalog entry
const CATALOG_OFFSET: usize = 44;

/// Offset of the trailing checksum
const CHECKSUM_OFFSET: usize = PAGE_SIZE - 4;

/// Maximum number of files one volume can catalog
pub const MAX_CATALOG_ENTRIES: usize = (CHECKSUM_OFFSET - CATALOG_OFFSET) / CATALOG_ENTRY_SIZE;

/// Volume header
///
/// Layout:
/// ```text
/// Offset  Size  Description
/// 0       16    Magic string "ObjStoreVolV01\0\0"
/// 16      4     Page size (currently always 4096)
/// 20      4     Total page count
/// 24      4     Free page count
/// 28      2     Volume number
/// 30      2     Catalog entry count
/// 32      4     Next unique stamp
/// 36      4     Next file ID
/// 40      4     Reserved
/// 44      36*n  Catalog entries
/// 4092    4     Checksum of bytes 0..4092 (CRC32)
/// ```
#[derive(Debug, Clone)]
pub struct VolumeHeader {
    pub page_size: u32,
    /// Total number of pages in the file (including header page)
    pub page_count: u32,
    pub free_page_count: u32,
    pub volume_id: u16,
    /// Next stamp handed to a slot; never reused within the volume
    pub next_unique: u32,
    pub next_file_id: u32,
    pub catalog: Vec<CatalogEntry>,
}

impl VolumeHeader {
    /// Create a new header for an empty volume
    pub fn new(volume_id: u16) -> Self {
        Self {
            page_size: PAGE_SIZE as u32,
            page_count: 1, // Just the header page initially
            free_page_count: 0,
            volume_id,
            next_unique: 1,
            next_file_id: 1,
            catalog: Vec::new(),
        }
    }

    /// Read a volume header from bytes
    pub fn read(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < VOLUME_HEADER_SIZE {
            return Err(StorageError::invalid_db("header too short"));
        }

        if &bytes[0..16] != MAGIC {
            return Err(StorageError::invalid_db("invalid magic bytes"));
        }

        let stored_checksum = u32::from_be_bytes([
            bytes[CHECKSUM_OFFSET],
            bytes[CHECKSUM_OFFSET + 1],
            bytes[CHECKSUM_OFFSET + 2],
            bytes[CHECKSUM_OFFSET + 3],
        ]);
        if stored_checksum != crc32fast::hash(&bytes[0..CHECKSUM_OFFSET]) {
            return Err(StorageError::corruption("header checksum mismatch"));
        }

        let u32_at = |at: usize| {
            u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let page_size = u32_at(16);
        if page_size != PAGE_SIZE as u32 {
            return Err(StorageError::invalid_db(format!(
                "unsupported page size: {} (expected {})",
                page_size, PAGE_SIZE
            )));
        }

        let catalog_count = u16::from_be_bytes([bytes[30], bytes[31]]) as usize;
        if catalog_count > MAX_CATALOG_ENTRIES {
            return Err(StorageError::invalid_db(format!(
                "catalog count {} exceeds {}",
                catalog_count, MAX_CATALOG_ENTRIES
            )));
        }
        let catalog = (0..catalog_count)
            .map(|i| {
                let at = CATALOG_OFFSET + i * CATALOG_ENTRY_SIZE;
                CatalogEntry::read(&bytes[at..at + CATALOG_ENTRY_SIZE])
            })
            .collect();

        Ok(Self {
            page_size,
            page_count: u32_at(20),
            free_page_count: u32_at(24),
            volume_id: u16::from_be_bytes([bytes[28], bytes[29]]),
            next_unique: u32_at(32),
            next_file_id: u32_at(36),
            catalog,
        })
    }

    /// Write this header to bytes
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[..VOLUME_HEADER_SIZE].fill(0);

        bytes[0..16].copy_from_slice(MAGIC);
        bytes[16..20].copy_from_slice(&self.page_size.to_be_bytes());
        bytes[20..24].copy_from_slice(&self.page_count.to_be_bytes());
        bytes[24..28].copy_from_slice(&self.free_page_count.to_be_bytes());
        bytes[28..30].copy_from_slice(&self.volume_id.to_be_bytes());
        bytes[30..32].copy_from_slice(&(self.catalog.len() as u16).to_be_bytes());
        bytes[32..36].copy_from_slice(&self.next_unique.to_be_bytes());
        bytes[36..40].copy_from_slice(&self.next_file_id.to_be_bytes());

        for (i, entry) in self.catalog.iter().enumerate() {
            let at = CATALOG_OFFSET + i * CATALOG_ENTRY_SIZE;
            entry.write(&mut bytes[at..at + CATALOG_ENTRY_SIZE]);
        }

        let checksum = crc32fast::hash(&bytes[0..CHECKSUM_OFFSET]);
        bytes[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_be_bytes());
    }

    /// Allocate a new page ID at the end of the file
    pub fn allocate_page(&mut self) -> PageId {
        let page_id = PageId::new(self.page_count);
        self.page_count += 1;
        page_id
    }

    /// Hand out the next unique stamp
    pub fn take_unique(&mut self) -> u32 {
        let unique = self.next_unique;
        self.next_unique = self.next_unique.wrapping_add(1).max(1);
        unique
    }

    pub fn catalog_entry(&self, file_id: FileId) -> Option<&CatalogEntry> {
        self.catalog.iter().find(|entry| entry.file_id == file_id)
    }

    pub fn catalog_entry_mut(&mut self, file_id: FileId) -> Option<&mut CatalogEntry> {
        self.catalog.iter_mut().find(|entry| entry.file_id == file_id)
    }

    /// Register a new file whose chain starts at `first_page`
    pub fn add_catalog_entry(&mut self, first_page: PageId, fill_factor: u8) -> Result<CatalogEntry> {
        if self.catalog.len() >= MAX_CATALOG_ENTRIES {
            return Err(StorageError::CatalogFull(MAX_CATALOG_ENTRIES));
        }
        let entry = CatalogEntry::new(FileId::new(self.next_file_id), first_page, fill_factor);
        self.next_file_id += 1;
        self.catalog.push(entry);
        Ok(entry)
    }
}
