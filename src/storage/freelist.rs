//! Free list management.
//!
//! Tracks deallocated pages that can be reused for new allocations. The list
//! lives in memory; it is rebuilt when a volume is opened by scanning for
//! pages whose type is `Free`.

use crate::types::PageId;
use std::collections::VecDeque;

/// Manages free pages for reuse
#[derive(Debug, Default)]
pub struct FreeList {
    /// Queue of free page IDs
    pages: VecDeque<PageId>,
}

impl FreeList {
    pub fn new() -> Self {
        Self {
            pages: VecDeque::new(),
        }
    }

    /// Add a page to the free list
    pub fn push(&mut self, page_id: PageId) {
        if !self.contains(page_id) {
            self.pages.push_back(page_id);
        }
    }

    /// Get the oldest free page, if any
    pub fn pop(&mut self) -> Option<PageId> {
        self.pages.pop_front()
    }

    /// Take a free page lying in the given extent
    pub fn take_in_extent(&mut self, extent: u32) -> Option<PageId> {
        let pos = self.pages.iter().position(|p| p.extent() == extent)?;
        self.pages.remove(pos)
    }

    /// Number of free pages in the given extent
    pub fn count_in_extent(&self, extent: u32) -> usize {
        self.pages.iter().filter(|p| p.extent() == extent).count()
    }

    pub fn contains(&self, page_id: PageId) -> bool {
        self.pages.contains(&page_id)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn page_ids(&self) -> impl Iterator<Item = PageId> + '_ {
        self.pages.iter().copied()
    }
}
