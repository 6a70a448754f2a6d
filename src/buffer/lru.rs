//! LRU (Least Recently Used) replacement order for buffer frames.

use crate::types::PageId;
use std::collections::HashMap;

/// Tracks the access order of cached pages
///
/// Nodes live in a vector and are linked by index, so touching and removing
/// a page are O(1). Finding a victim walks from the cold end and skips pages
/// the caller reports as pinned.
pub struct LruCache {
    positions: HashMap<PageId, usize>,
    nodes: Vec<LruNode>,
    /// Most recently used
    head: Option<usize>,
    /// Least recently used
    tail: Option<usize>,
    /// Node indexes available for reuse
    vacant: Vec<usize>,
}

#[derive(Clone, Copy)]
struct LruNode {
    page_id: PageId,
    prev: Option<usize>,
    next: Option<usize>,
}

impl LruCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            positions: HashMap::with_capacity(capacity),
            nodes: Vec::with_capacity(capacity),
            head: None,
            tail: None,
            vacant: Vec::new(),
        }
    }

    /// Record access to a page (moves it to the hot end)
    pub fn touch(&mut self, page_id: PageId) {
        match self.positions.get(&page_id) {
            Some(&pos) => {
                if self.head != Some(pos) {
                    self.unlink(pos);
                    self.push_front(pos);
                }
            }
            None => {
                let node = LruNode {
                    page_id,
                    prev: None,
                    next: None,
                };
                let pos = match self.vacant.pop() {
                    Some(pos) => {
                        self.nodes[pos] = node;
                        pos
                    }
                    None => {
                        self.nodes.push(node);
                        self.nodes.len() - 1
                    }
                };
                self.positions.insert(page_id, pos);
                self.push_front(pos);
            }
        }
    }

    /// Forget a page
    pub fn remove(&mut self, page_id: PageId) {
        if let Some(pos) = self.positions.remove(&page_id) {
            self.unlink(pos);
            self.vacant.push(pos);
        }
    }

    /// The coldest page for which `evictable` holds
    pub fn victim(&self, mut evictable: impl FnMut(PageId) -> bool) -> Option<PageId> {
        let mut cursor = self.tail;
        while let Some(pos) = cursor {
            let node = self.nodes[pos];
            if evictable(node.page_id) {
                return Some(node.page_id);
            }
            cursor = node.prev;
        }
        None
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    fn push_front(&mut self, pos: usize) {
        self.nodes[pos].prev = None;
        self.nodes[pos].next = self.head;
        if let Some(old_head) = self.head {
            self.nodes[old_head].prev = Some(pos);
        }
        self.head = Some(pos);
        if self.tail.is_none() {
            self.tail = Some(pos);
        }
    }

    fn unlink(&mut self, pos: usize) {
        let node = self.nodes[pos];

        match node.prev {
            Some(prev) => self.nodes[prev].next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.nodes[next].prev = node.prev,
            None => self.tail = node.prev,
        }
    }
}
