//! Ordered traversal of a file's objects.
//!
//! Objects are ordered by page, following the file's page chain from first
//! to last, and by slot index within a page. Empty slots are skipped, so a
//! scan may continue from the id of an object destroyed mid-scan.

use crate::buffer::BufferPool;
use crate::error::{Result, StorageError};
use crate::om::ObjectManager;
use crate::page::{ObjectHeader, SlottedPage};
use crate::types::{FileId, ObjectId};

/// Direction of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Forward,
    Backward,
}

impl ObjectManager {
    /// The object after `current`, or the file's first object for `None`
    ///
    /// Returns `Ok(None)` once the end of the file is reached.
    pub fn next_object(
        &self,
        file: FileId,
        current: Option<&ObjectId>,
    ) -> Result<Option<(ObjectId, ObjectHeader)>> {
        self.step(file, current, ScanDirection::Forward)
    }

    /// The object before `current`, or the file's last object for `None`
    ///
    /// Returns `Ok(None)` once the start of the file is reached.
    pub fn prev_object(
        &self,
        file: FileId,
        current: Option<&ObjectId>,
    ) -> Result<Option<(ObjectId, ObjectHeader)>> {
        self.step(file, current, ScanDirection::Backward)
    }

    /// Iterate over every object of `file`
    pub fn cursor(&self, file: FileId, direction: ScanDirection) -> ObjectCursor<'_> {
        ObjectCursor {
            manager: self,
            file,
            direction,
            current: None,
            done: false,
        }
    }

    fn step(
        &self,
        file: FileId,
        current: Option<&ObjectId>,
        direction: ScanDirection,
    ) -> Result<Option<(ObjectId, ObjectHeader)>> {
        let catalog = self.buffer_pool().catalog_entry(file)?;

        // First page to look at, and the slot bound on it.
        let (mut page_id, mut from) = match current {
            Some(oid) => {
                self.fetch_id_page(file, oid)?;
                (oid.page, Some(oid.slot as usize))
            }
            None => match direction {
                ScanDirection::Forward => (catalog.first_page, None),
                ScanDirection::Backward => (catalog.last_page, None),
            },
        };

        let mut budget = self.buffer_pool().page_count();
        loop {
            if budget == 0 {
                return Err(StorageError::corruption(format!(
                    "file {} chain does not terminate",
                    file
                )));
            }
            budget -= 1;

            let guard = self.fetch_file_page(file, page_id)?;
            let page = guard.read();
            if let Some(slot) = Self::live_slot_from(&page, from, direction) {
                let header = page.object_header(slot)?;
                let unique = page.slot(slot).map_or(0, |s| s.unique);
                let oid = ObjectId::new(self.volume(), page_id, slot as u16, unique);
                return Ok(Some((oid, header)));
            }

            let (end, link) = match direction {
                ScanDirection::Forward => (catalog.last_page, page.next_page()),
                ScanDirection::Backward => (catalog.first_page, page.prev_page()),
            };
            match link {
                Some(link) if page_id != end => {
                    page_id = link;
                    from = None;
                }
                _ => return Ok(None),
            }
        }
    }

    /// First live slot strictly past `from` in the scan direction
    fn live_slot_from(page: &SlottedPage, from: Option<usize>, direction: ScanDirection) -> Option<usize> {
        let count = page.slot_count();
        match direction {
            ScanDirection::Forward => {
                let start = from.map_or(0, |slot| slot + 1);
                (start..count).find(|&i| page.is_live(i))
            }
            ScanDirection::Backward => {
                let end = from.map_or(count, |slot| slot.min(count));
                (0..end).rev().find(|&i| page.is_live(i))
            }
        }
    }
}

/// Iterator over a file's objects, built on `next_object`/`prev_object`
pub struct ObjectCursor<'a> {
    manager: &'a ObjectManager,
    file: FileId,
    direction: ScanDirection,
    current: Option<ObjectId>,
    done: bool,
}

impl Iterator for ObjectCursor<'_> {
    type Item = Result<(ObjectId, ObjectHeader)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self
            .manager
            .step(self.file, self.current.as_ref(), self.direction)
        {
            Ok(Some((oid, header))) => {
                self.current = Some(oid);
                Some(Ok((oid, header)))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
