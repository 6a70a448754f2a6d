//! Common types used throughout the storage layer.

mod object_id;
mod page_id;

pub use object_id::{FileId, ObjectId};
pub use page_id::PageId;

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Alignment boundary for object payloads
pub const ALIGNMENT: usize = 4;

/// Number of consecutive pages forming one extent
pub const EXTENT_SIZE: u32 = 16;

/// Default extent fill factor (percent) for new files
pub const DEFAULT_FILL_FACTOR: u8 = 100;

/// Round a payload length up to the alignment boundary
pub const fn aligned_length(length: usize) -> usize {
    (length + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Page types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    /// Free/unallocated page (zero-initialized)
    Free = 0x00,
    /// Slotted data page holding objects
    Data = 0x02,
}

impl PageType {
    /// Check if this page holds objects
    pub fn is_data(self) -> bool {
        matches!(self, Self::Data)
    }

    /// Convert from byte value
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Free),
            0x02 => Some(Self::Data),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_type_conversions() {
        assert!(PageType::Data.is_data());
        assert!(!PageType::Free.is_data());

        assert_eq!(PageType::from_byte(0x02), Some(PageType::Data));
        assert_eq!(PageType::from_byte(0x00), Some(PageType::Free));
        assert_eq!(PageType::from_byte(0xFF), None);
    }

    #[test]
    fn test_aligned_length() {
        assert_eq!(aligned_length(0), 0);
        assert_eq!(aligned_length(1), 4);
        assert_eq!(aligned_length(4), 4);
        assert_eq!(aligned_length(5), 8);
        assert_eq!(aligned_length(199), 200);
    }
}
