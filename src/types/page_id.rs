//! Page identifier type.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::EXTENT_SIZE;

/// Identifier of a page within a volume file.
///
/// Page 0 holds the volume header and catalog; object pages start at 1.
/// `PageId::INVALID` terminates page chains and available-space lists.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PageId(pub u32);

impl PageId {
    /// Sentinel for "no page"
    pub const INVALID: PageId = PageId(u32::MAX);

    /// The volume header page
    pub const HEADER: PageId = PageId(0);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }

    /// Extent number this page falls in
    pub const fn extent(self) -> u32 {
        self.0 / EXTENT_SIZE
    }

    /// Byte offset of this page in the volume file
    pub const fn file_offset(self, page_size: usize) -> u64 {
        self.0 as u64 * page_size as u64
    }

    /// Decode a page link, mapping the on-disk sentinel to `None`
    pub fn link(raw: u32) -> Option<PageId> {
        let id = PageId(raw);
        id.is_valid().then_some(id)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "INVALID")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<u32> for PageId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<PageId> for u32 {
    fn from(id: PageId) -> Self {
        id.0
    }
}
