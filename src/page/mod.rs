//! Page layer: slotted page format for variable-length objects.
//!
//! Data pages use a slotted format where:
//! - A fixed header contains metadata and chain links
//! - Object bytes grow from the end of the header toward the page end
//! - The slot array grows from the page end toward the header
//! - Free space is in the middle

mod compact;
mod header;
mod object;
mod slotted;

pub use header::{PageHeader, HEADER_SIZE, NO_BUCKET};
pub use object::{ObjectHeader, OBJECT_HEADER_SIZE};
pub use slotted::{Slot, SlottedPage, EMPTY_SLOT, SLOT_SIZE};

use crate::types::PAGE_SIZE;

/// Size of the data area shared by object bytes and the slot array
pub const DATA_AREA_SIZE: usize = PAGE_SIZE - HEADER_SIZE;

/// Largest aligned payload that fits on a single page together with its
/// object header and one slot
pub const MAX_OBJECT_LENGTH: usize = DATA_AREA_SIZE - OBJECT_HEADER_SIZE - SLOT_SIZE;

/// A raw page buffer
#[derive(Clone)]
pub struct PageBuf {
    data: [u8; PAGE_SIZE],
}

impl PageBuf {
    /// Create a new zeroed page buffer
    pub fn new() -> Self {
        Self {
            data: [0u8; PAGE_SIZE],
        }
    }

    /// Create a page buffer from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut data = [0u8; PAGE_SIZE];
        let len = bytes.len().min(PAGE_SIZE);
        data[..len].copy_from_slice(&bytes[..len]);
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Default for PageBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for PageBuf {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl std::ops::DerefMut for PageBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}
