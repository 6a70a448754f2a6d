//! Page header structure.
//!
//! The page header occupies the first bytes of each data page and carries
//! the space accounting for the data area plus the links threading the page
//! into its file's page chain and into one available-space list.

use crate::types::{FileId, PageId, PageType};

/// Size of the page header
pub const HEADER_SIZE: usize = 32;

/// Available-space tag of a page that is on no list
pub const NO_BUCKET: u8 = 0xFF;

/// Page header structure
///
/// Layout (32 bytes):
/// ```text
/// Offset  Size  Description
/// 0       1     Page type flag
/// 1       1     Available-space list the page is on (0xFF if none)
/// 2       2     Number of slots (including empty ones)
/// 4       4     Page ID
/// 8       4     Owning file ID
/// 12      4     Next page in the available-space list
/// 16      4     Previous page in the file chain
/// 20      4     Next page in the file chain
/// 24      2     Free: end of used bytes in the data area
/// 26      2     Unused: bytes of holes left by destroyed objects
/// 28      4     Reserved
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PageHeader {
    pub page_type: PageType,
    pub avail_tag: u8,
    pub n_slots: u16,
    pub page_id: PageId,
    pub file_id: FileId,
    pub avail_next: PageId,
    pub prev_page: PageId,
    pub next_page: PageId,
    pub free: u16,
    pub unused: u16,
}

impl PageHeader {
    /// Create a header for an empty data page of `file_id`
    pub fn new_data(page_id: PageId, file_id: FileId) -> Self {
        Self {
            page_type: PageType::Data,
            avail_tag: NO_BUCKET,
            n_slots: 0,
            page_id,
            file_id,
            avail_next: PageId::INVALID,
            prev_page: PageId::INVALID,
            next_page: PageId::INVALID,
            free: 0,
            unused: 0,
        }
    }

    /// Read a page header from bytes
    pub fn read(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }

        let u16_at = |at: usize| u16::from_be_bytes([bytes[at], bytes[at + 1]]);
        let u32_at = |at: usize| {
            u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };

        Some(Self {
            page_type: PageType::from_byte(bytes[0])?,
            avail_tag: bytes[1],
            n_slots: u16_at(2),
            page_id: PageId::new(u32_at(4)),
            file_id: FileId::new(u32_at(8)),
            avail_next: PageId::new(u32_at(12)),
            prev_page: PageId::new(u32_at(16)),
            next_page: PageId::new(u32_at(20)),
            free: u16_at(24),
            unused: u16_at(26),
        })
    }

    /// Write this header to bytes
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0] = self.page_type as u8;
        bytes[1] = self.avail_tag;
        bytes[2..4].copy_from_slice(&self.n_slots.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.page_id.value().to_be_bytes());
        bytes[8..12].copy_from_slice(&self.file_id.value().to_be_bytes());
        bytes[12..16].copy_from_slice(&self.avail_next.value().to_be_bytes());
        bytes[16..20].copy_from_slice(&self.prev_page.value().to_be_bytes());
        bytes[20..24].copy_from_slice(&self.next_page.value().to_be_bytes());
        bytes[24..26].copy_from_slice(&self.free.to_be_bytes());
        bytes[26..28].copy_from_slice(&self.unused.to_be_bytes());
        bytes[28..32].fill(0);
    }
}
