//! Page compaction.
//!
//! Moves every live object to the front of the data area so that all free
//! space forms one contiguous region between the objects and the slot array.

use crate::error::Result;
use crate::page::SlottedPage;
use tracing::trace;

impl SlottedPage {
    /// Compact the data area in place
    ///
    /// Live objects are packed from offset 0 in ascending slot order. If
    /// `pinned` names a live slot, that object is packed last, right before
    /// the free region; an empty or out-of-range pin is ignored. Afterwards
    /// `free` equals the bytes held by live objects and `unused` is 0.
    ///
    /// Holes are closed first by sliding objects down in physical order.
    /// Objects are then brought into slot order by rotating the unsorted
    /// tail of the packed region, so no scratch buffer is needed.
    pub fn compact(&mut self, pinned: Option<u16>) -> Result<()> {
        let pinned = pinned.map(usize::from).filter(|&index| self.is_live(index));

        // Validate every object before the first write.
        let mut layout = Vec::with_capacity(self.slot_count());
        for index in self.live_slots() {
            let offset = self.slot(index).map_or(0, |slot| slot.offset as usize);
            layout.push((index, offset, self.object_bytes_at(offset)?.len()));
        }
        layout.sort_by_key(|&(_, offset, _)| offset);

        let mut order: Vec<usize> = self
            .live_slots()
            .filter(|&index| Some(index) != pinned)
            .collect();
        order.extend(pinned);

        let area = self.data_area_mut();
        let mut used = 0usize;
        for &(_, offset, size) in &layout {
            area.copy_within(offset..offset + size, used);
            used += size;
        }

        // `layout[..k]` already sits in final order at `[0, start)`.
        let mut layout: Vec<(usize, usize)> =
            layout.into_iter().map(|(index, _, size)| (index, size)).collect();
        let mut start = 0usize;
        for (k, &index) in order.iter().enumerate() {
            let Some(found) = layout[k..].iter().position(|&(i, _)| i == index) else {
                continue;
            };
            let size = layout[k + found].1;
            let end = start + layout[k..=k + found].iter().map(|&(_, s)| s).sum::<usize>();
            area[start..end].rotate_right(size);
            layout[k..=k + found].rotate_right(1);
            start += size;
        }

        let mut next = 0usize;
        for (index, size) in layout {
            self.set_slot_offset(index, next as u16);
            next += size;
        }

        trace!(
            page = %self.page_id(),
            reclaimed = self.free_offset().saturating_sub(next),
            "compacted page"
        );
        self.set_space(next, 0);
        Ok(())
    }
}
