//! Deferred page deallocation.
//!
//! Destroying the last object on a page unlinks the page from its file but
//! does not free it. The page is recorded here instead, and the owner of
//! the list decides when the pages go back to the volume.

use crate::types::PageId;
use serde::{Deserialize, Serialize};

/// One page waiting to be freed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeallocEntry {
    pub page_id: PageId,
}

/// Pages emptied by destroy operations, in the order they were emptied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeallocList {
    entries: Vec<DeallocEntry>,
}

impl DeallocList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, page_id: PageId) {
        self.entries.push(DeallocEntry { page_id });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeallocEntry> {
        self.entries.iter()
    }

    /// Take every entry, leaving the list empty
    pub fn drain(&mut self) -> impl Iterator<Item = DeallocEntry> + '_ {
        self.entries.drain(..)
    }
}
