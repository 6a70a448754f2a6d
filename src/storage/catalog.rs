//! Per-file catalog entries.
//!
//! Each file stored on a volume has one catalog entry recording the ends of
//! its page chain, the extent fill factor used when allocating its pages,
//! and the heads of its five available-space lists.

use serde::{Deserialize, Serialize};

use crate::types::{FileId, PageId};

/// Number of available-space lists per file
pub const AVAIL_LIST_COUNT: usize = 5;

/// Encoded size of one catalog entry
pub const CATALOG_ENTRY_SIZE: usize = 36;

/// Catalog entry for one file
///
/// Layout (36 bytes):
/// ```text
/// Offset  Size  Description
/// 0       4     File ID
/// 4       4     First page of the file chain
/// 8       4     Last page of the file chain
/// 12      1     Extent fill factor (percent)
/// 13      3     Reserved
/// 16      20    Available-space list heads, 50% down to 10%
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub file_id: FileId,
    pub first_page: PageId,
    pub last_page: PageId,
    pub fill_factor: u8,
    /// List heads indexed by `AvailBucket::index()`; `INVALID` when empty
    pub avail_heads: [PageId; AVAIL_LIST_COUNT],
}

impl CatalogEntry {
    /// Entry for a file consisting of a single (anchor) page
    pub fn new(file_id: FileId, first_page: PageId, fill_factor: u8) -> Self {
        Self {
            file_id,
            first_page,
            last_page: first_page,
            fill_factor,
            avail_heads: [PageId::INVALID; AVAIL_LIST_COUNT],
        }
    }

    pub fn read(bytes: &[u8]) -> Self {
        let u32_at = |at: usize| {
            u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let mut avail_heads = [PageId::INVALID; AVAIL_LIST_COUNT];
        for (i, head) in avail_heads.iter_mut().enumerate() {
            *head = PageId::new(u32_at(16 + i * 4));
        }
        Self {
            file_id: FileId::new(u32_at(0)),
            first_page: PageId::new(u32_at(4)),
            last_page: PageId::new(u32_at(8)),
            fill_factor: bytes[12],
            avail_heads,
        }
    }

    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0..4].copy_from_slice(&self.file_id.value().to_be_bytes());
        bytes[4..8].copy_from_slice(&self.first_page.value().to_be_bytes());
        bytes[8..12].copy_from_slice(&self.last_page.value().to_be_bytes());
        bytes[12] = self.fill_factor;
        bytes[13..16].fill(0);
        for (i, head) in self.avail_heads.iter().enumerate() {
            let at = 16 + i * 4;
            bytes[at..at + 4].copy_from_slice(&head.value().to_be_bytes());
        }
    }
}
