//! Slotted page implementation.
//!
//! A slotted data page uses the following layout:
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │                    Page Header                      │
//! ├────────────────────────────────────────────────────┤
//! │                   Data Area                         │
//! │  [obj0][obj1][hole][obj3]...   →                   │
//! ├──────────────────────────── free ──────────────────┤
//! │                                                    │
//! │                   Free Space                        │
//! │                                                    │
//! ├────────────────────────────────────────────────────┤
//! │                   Slot Array                        │
//! │                    ←   ...[slot2][slot1][slot0]    │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! Objects are appended at `free`. Destroying an object either pulls `free`
//! back (when it was the physically last object) or leaves a hole counted in
//! `unused`, reclaimed later by compaction. Slot indexes never move; only
//! their offsets do.

use crate::error::{Result, StorageError};
use crate::page::{
    ObjectHeader, PageBuf, PageHeader, DATA_AREA_SIZE, HEADER_SIZE, OBJECT_HEADER_SIZE,
};
use crate::types::{aligned_length, FileId, PageId, PageType, PAGE_SIZE};

/// Size of one slot array entry
pub const SLOT_SIZE: usize = 8;

/// Offset marking a slot whose object has been destroyed
pub const EMPTY_SLOT: u16 = 0xFFFF;

/// Slot array entry
///
/// Layout (8 bytes): offset u16, 2 reserved bytes, unique u32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Offset of the object within the data area, or `EMPTY_SLOT`
    pub offset: u16,
    /// Stamp of the slot's current (or last) occupant
    pub unique: u32,
}

impl Slot {
    pub fn is_empty(&self) -> bool {
        self.offset == EMPTY_SLOT
    }
}

/// A slotted page providing object storage
pub struct SlottedPage {
    /// The raw page data
    data: PageBuf,
    /// Cached header (kept in sync with data)
    header: PageHeader,
}

impl SlottedPage {
    /// Create a new empty data page owned by `file_id`
    pub fn new_data(page_id: PageId, file_id: FileId) -> Self {
        let mut data = PageBuf::new();
        let header = PageHeader::new_data(page_id, file_id);
        header.write(&mut data);
        Self { data, header }
    }

    /// A zero-initialized page, as handed out by the allocator
    pub fn zeroed() -> Self {
        let data = PageBuf::new();
        let header = PageHeader {
            page_type: PageType::Free,
            avail_tag: 0,
            n_slots: 0,
            page_id: PageId::new(0),
            file_id: FileId::new(0),
            avail_next: PageId::new(0),
            prev_page: PageId::new(0),
            next_page: PageId::new(0),
            free: 0,
            unused: 0,
        };
        Self { data, header }
    }

    /// Load a page from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let data = PageBuf::from_bytes(bytes);
        let header = PageHeader::read(&data)
            .ok_or_else(|| StorageError::invalid_page("invalid page header"))?;
        Ok(Self { data, header })
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    pub fn header(&self) -> &PageHeader {
        &self.header
    }

    pub fn page_type(&self) -> PageType {
        self.header.page_type
    }

    pub fn is_data(&self) -> bool {
        self.header.page_type.is_data()
    }

    pub fn page_id(&self) -> PageId {
        self.header.page_id
    }

    pub fn file_id(&self) -> FileId {
        self.header.file_id
    }

    /// Number of slot array entries, including empty ones
    pub fn slot_count(&self) -> usize {
        self.header.n_slots as usize
    }

    /// End of the used part of the data area
    pub fn free_offset(&self) -> usize {
        self.header.free as usize
    }

    /// Bytes held by holes of destroyed objects
    pub fn unused(&self) -> usize {
        self.header.unused as usize
    }

    pub fn prev_page(&self) -> Option<PageId> {
        PageId::link(self.header.prev_page.value())
    }

    pub fn set_prev_page(&mut self, page_id: Option<PageId>) {
        self.header.prev_page = page_id.unwrap_or(PageId::INVALID);
        self.sync_header();
    }

    pub fn next_page(&self) -> Option<PageId> {
        PageId::link(self.header.next_page.value())
    }

    pub fn set_next_page(&mut self, page_id: Option<PageId>) {
        self.header.next_page = page_id.unwrap_or(PageId::INVALID);
        self.sync_header();
    }

    /// Tag of the available-space list this page is on
    pub fn avail_tag(&self) -> u8 {
        self.header.avail_tag
    }

    pub fn set_avail_tag(&mut self, tag: u8) {
        self.header.avail_tag = tag;
        self.sync_header();
    }

    /// Next page on the same available-space list
    pub fn avail_next(&self) -> Option<PageId> {
        PageId::link(self.header.avail_next.value())
    }

    pub fn set_avail_next(&mut self, page_id: Option<PageId>) {
        self.header.avail_next = page_id.unwrap_or(PageId::INVALID);
        self.sync_header();
    }

    fn slot_position(index: usize) -> usize {
        PAGE_SIZE - (index + 1) * SLOT_SIZE
    }

    /// Get the slot at the given index
    pub fn slot(&self, index: usize) -> Option<Slot> {
        if index >= self.slot_count() {
            return None;
        }
        let pos = Self::slot_position(index);
        let bytes = &self.data[pos..pos + SLOT_SIZE];
        Some(Slot {
            offset: u16::from_be_bytes([bytes[0], bytes[1]]),
            unique: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }

    fn write_slot(&mut self, index: usize, slot: Slot) {
        let pos = Self::slot_position(index);
        self.data[pos..pos + 2].copy_from_slice(&slot.offset.to_be_bytes());
        self.data[pos + 2..pos + 4].fill(0);
        self.data[pos + 4..pos + 8].copy_from_slice(&slot.unique.to_be_bytes());
    }

    pub(crate) fn set_slot_offset(&mut self, index: usize, offset: u16) {
        if let Some(slot) = self.slot(index) {
            self.write_slot(index, Slot { offset, ..slot });
        }
    }

    /// Check whether the slot holds a live object
    pub fn is_live(&self, index: usize) -> bool {
        self.slot(index).is_some_and(|slot| !slot.is_empty())
    }

    /// Iterate over the indexes of live slots in ascending order
    pub fn live_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.slot_count()).filter(move |&i| self.is_live(i))
    }

    pub fn live_count(&self) -> usize {
        self.live_slots().count()
    }

    fn slot_array_bytes(&self) -> usize {
        self.slot_count() * SLOT_SIZE
    }

    /// Total free bytes, holes included
    pub fn free_bytes(&self) -> usize {
        let used = self.free_offset() - self.unused();
        DATA_AREA_SIZE.saturating_sub(used + self.slot_array_bytes())
    }

    /// Free bytes usable without compaction
    pub fn contiguous_free_bytes(&self) -> usize {
        DATA_AREA_SIZE.saturating_sub(self.free_offset() + self.slot_array_bytes())
    }

    fn live_slot(&self, index: usize) -> Result<Slot> {
        match self.slot(index) {
            Some(slot) if !slot.is_empty() => Ok(slot),
            Some(_) => Err(StorageError::invalid_operation(format!(
                "slot {} on page {} is empty",
                index,
                self.page_id()
            ))),
            None => Err(StorageError::invalid_operation(format!(
                "slot index {} out of bounds (count: {})",
                index,
                self.slot_count()
            ))),
        }
    }

    /// Read the object header at a data-area offset, checking it lies in
    /// the used region
    fn header_at(&self, offset: usize) -> Result<ObjectHeader> {
        let free = self.free_offset();
        if offset + OBJECT_HEADER_SIZE > free {
            return Err(StorageError::corruption(format!(
                "object offset {} beyond free offset {} on page {}",
                offset,
                free,
                self.page_id()
            )));
        }
        let pos = HEADER_SIZE + offset;
        let header = ObjectHeader::decode(&self.data[pos..pos + OBJECT_HEADER_SIZE])
            .ok_or_else(|| StorageError::corruption("failed to decode object header"))?;
        if offset + header.stored_size() > free {
            return Err(StorageError::corruption(format!(
                "object at offset {} overruns free offset {} on page {}",
                offset,
                free,
                self.page_id()
            )));
        }
        Ok(header)
    }

    /// Get the header of the object in the given slot
    pub fn object_header(&self, index: usize) -> Result<ObjectHeader> {
        let slot = self.live_slot(index)?;
        self.header_at(slot.offset as usize)
    }

    /// Get the payload of the object in the given slot
    pub fn object_data(&self, index: usize) -> Result<&[u8]> {
        let slot = self.live_slot(index)?;
        let header = self.header_at(slot.offset as usize)?;
        let start = HEADER_SIZE + slot.offset as usize + OBJECT_HEADER_SIZE;
        Ok(&self.data[start..start + header.length as usize])
    }

    /// Bytes the object in the given slot occupies in the data area
    pub fn object_size(&self, index: usize) -> Result<usize> {
        Ok(self.object_header(index)?.stored_size())
    }

    /// Raw bytes (header + aligned payload) of the object at an offset
    pub(crate) fn object_bytes_at(&self, offset: usize) -> Result<&[u8]> {
        let header = self.header_at(offset)?;
        let start = HEADER_SIZE + offset;
        Ok(&self.data[start..start + header.stored_size()])
    }

    /// The whole data area, for moving objects around (compaction only)
    pub(crate) fn data_area_mut(&mut self) -> &mut [u8] {
        &mut self.data[HEADER_SIZE..HEADER_SIZE + DATA_AREA_SIZE]
    }

    /// Set `free` and `unused` directly (compaction only)
    pub(crate) fn set_space(&mut self, free: usize, unused: usize) {
        self.header.free = free as u16;
        self.header.unused = unused as u16;
        self.sync_header();
    }

    /// Index of the first empty slot, if any
    pub fn first_empty_slot(&self) -> Option<usize> {
        (0..self.slot_count()).find(|&i| !self.is_live(i))
    }

    /// Store an object in the contiguous free region
    ///
    /// Reuses the first empty slot or appends a new one. The object's
    /// properties and tag come from `header`; its length from `data`.
    /// Fails with `PageFull` if the contiguous free region is too small;
    /// callers compact first when `free_bytes` would suffice.
    pub fn insert_object(&mut self, header: &ObjectHeader, data: &[u8], unique: u32) -> Result<u16> {
        let stored = OBJECT_HEADER_SIZE + aligned_length(data.len());
        let reuse = self.first_empty_slot();
        let needed = stored + if reuse.is_some() { 0 } else { SLOT_SIZE };

        if self.contiguous_free_bytes() < needed {
            return Err(StorageError::PageFull {
                page_id: self.page_id(),
                needed,
                available: self.contiguous_free_bytes(),
            });
        }

        let index = match reuse {
            Some(index) => index,
            None => {
                if self.slot_count() >= EMPTY_SLOT as usize {
                    return Err(StorageError::invalid_operation("slot array is full"));
                }
                self.header.n_slots += 1;
                self.slot_count() - 1
            }
        };

        let offset = self.free_offset();
        let object_header = ObjectHeader {
            properties: header.properties,
            tag: header.tag,
            length: data.len() as u32,
        };
        let pos = HEADER_SIZE + offset;
        object_header.encode(&mut self.data[pos..pos + OBJECT_HEADER_SIZE]);
        let payload = pos + OBJECT_HEADER_SIZE;
        self.data[payload..payload + data.len()].copy_from_slice(data);
        self.data[payload + data.len()..pos + stored].fill(0);

        self.write_slot(
            index,
            Slot {
                offset: offset as u16,
                unique,
            },
        );
        self.header.free += stored as u16;
        self.sync_header();

        Ok(index as u16)
    }

    /// Remove the object in the given slot
    ///
    /// Trailing empty slots are trimmed from the slot array. The object's
    /// bytes are reclaimed at once if it was the physically last object,
    /// otherwise they are counted in `unused` until the next compaction.
    pub fn remove_object(&mut self, index: usize) -> Result<ObjectHeader> {
        let slot = self.live_slot(index)?;
        let header = self.header_at(slot.offset as usize)?;
        let size = header.stored_size();

        self.write_slot(
            index,
            Slot {
                offset: EMPTY_SLOT,
                unique: slot.unique,
            },
        );
        while self.slot_count() > 0 && !self.is_live(self.slot_count() - 1) {
            self.header.n_slots -= 1;
        }

        if slot.offset as usize + size == self.free_offset() {
            self.header.free -= size as u16;
        } else {
            self.header.unused += size as u16;
        }
        self.sync_header();

        Ok(header)
    }

    /// Check the page's space accounting and slot consistency
    pub fn verify(&self) -> Result<()> {
        if !self.is_data() {
            return Err(StorageError::invalid_page(format!(
                "page {} is not a data page",
                self.page_id()
            )));
        }

        let free = self.free_offset();
        if free + self.slot_array_bytes() > DATA_AREA_SIZE {
            return Err(StorageError::corruption(format!(
                "data area (free {}) overlaps slot array ({} slots) on page {}",
                free,
                self.slot_count(),
                self.page_id()
            )));
        }

        let mut extents = Vec::with_capacity(self.slot_count());
        for index in self.live_slots() {
            let offset = self.live_slot(index)?.offset as usize;
            let size = self.header_at(offset)?.stored_size();
            extents.push((offset, size));
        }

        let live: usize = extents.iter().map(|&(_, size)| size).sum();
        if live + self.unused() != free {
            return Err(StorageError::corruption(format!(
                "space accounting mismatch on page {}: live {} + unused {} != free {}",
                self.page_id(),
                live,
                self.unused(),
                free
            )));
        }

        extents.sort_unstable();
        for pair in extents.windows(2) {
            if pair[0].0 + pair[0].1 > pair[1].0 {
                return Err(StorageError::corruption(format!(
                    "objects at offsets {} and {} overlap on page {}",
                    pair[0].0,
                    pair[1].0,
                    self.page_id()
                )));
            }
        }

        if self.slot_count() > 0 && !self.is_live(self.slot_count() - 1) {
            return Err(StorageError::corruption(format!(
                "trailing empty slot not trimmed on page {}",
                self.page_id()
            )));
        }

        Ok(())
    }

    /// Sync the header to the raw page data
    fn sync_header(&mut self) {
        self.header.write(&mut self.data);
    }
}

impl Clone for SlottedPage {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            header: self.header,
        }
    }
}
