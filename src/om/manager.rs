//! Object placement and lifecycle.
//!
//! The object manager decides which page of a file receives a new object,
//! stores and destroys objects, and keeps the file's page chain and
//! available-space lists in step with every change.
//!
//! Page selection for a new object:
//! - With a near object: its page if it has room (compacting first when
//!   the room is fragmented), otherwise a fresh page allocated in the same
//!   extent and linked right after it.
//! - Without: the head of the smallest available-space list that is
//!   guaranteed to fit, then the file's last page, then a fresh page
//!   appended to the file.

use crate::buffer::{BufferPool, BufferPoolImpl, PageGuard, PageGuardMut};
use crate::error::{Result, StorageError};
use crate::om::avail::{self, AvailBucket};
use crate::om::dealloc::DeallocList;
use crate::om::file_map;
use crate::page::{
    ObjectHeader, SlottedPage, MAX_OBJECT_LENGTH, NO_BUCKET, OBJECT_HEADER_SIZE, SLOT_SIZE,
};
use crate::storage::CatalogEntry;
use crate::types::{aligned_length, FileId, ObjectId, PageId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a new object goes
enum Placement<'a> {
    /// A page already in the file
    Existing(PageGuardMut<'a>),
    /// A fresh page, to be linked right after `prev`
    After {
        page: PageGuardMut<'a>,
        prev: PageGuardMut<'a>,
    },
    /// A fresh page, to become the file's last page
    Append(PageGuardMut<'a>),
}

impl Placement<'_> {
    fn fresh_page(&self) -> Option<PageId> {
        match self {
            Placement::Existing(_) => None,
            Placement::After { page, .. } | Placement::Append(page) => Some(page.page_id()),
        }
    }
}

/// Stores objects in the files of one volume
pub struct ObjectManager {
    buffer_pool: Arc<BufferPoolImpl>,
    volume: u16,
}

impl ObjectManager {
    pub fn new(buffer_pool: Arc<BufferPoolImpl>) -> Self {
        let volume = buffer_pool.volume_header().volume_id;
        Self {
            buffer_pool,
            volume,
        }
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolImpl> {
        &self.buffer_pool
    }

    /// Volume number stamped into object ids
    pub fn volume(&self) -> u16 {
        self.volume
    }

    /// Create an empty file whose pages fill extents up to `fill_factor`
    /// percent
    ///
    /// The file starts with one anchor page, which stays in the file for
    /// its whole lifetime.
    pub fn create_file(&self, fill_factor: u8) -> Result<FileId> {
        if fill_factor == 0 || fill_factor > 100 {
            return Err(StorageError::invalid_operation(format!(
                "fill factor must be 1..=100, got {}",
                fill_factor
            )));
        }

        let guard = self.buffer_pool.new_page(None, fill_factor)?;
        let page_id = guard.page_id();
        let mut catalog = match self.buffer_pool.create_catalog_entry(page_id, fill_factor) {
            Ok(catalog) => catalog,
            Err(e) => {
                drop(guard);
                self.buffer_pool.free_page(page_id)?;
                return Err(e);
            }
        };

        {
            let mut page = guard.write();
            *page = SlottedPage::new_data(page_id, catalog.file_id);
            avail::insert_into_bucket(&mut catalog, &mut page);
        }
        self.buffer_pool.put_catalog_entry(catalog)?;

        debug!(file = %catalog.file_id, anchor = %page_id, "created file");
        Ok(catalog.file_id)
    }

    /// Store a new object in `file` and return its id
    ///
    /// `data` must hold exactly `length` bytes; it may be omitted only for
    /// an empty object. `header` supplies the properties and tag (the
    /// length is taken from `length`). When `near` names a live object of
    /// the file, the new object is placed on the same page or as close to
    /// it as the file's fill factor allows.
    ///
    /// Nothing is changed if an error is returned.
    pub fn create_object(
        &self,
        file: FileId,
        near: Option<&ObjectId>,
        header: Option<&ObjectHeader>,
        length: usize,
        data: Option<&[u8]>,
    ) -> Result<ObjectId> {
        let mut catalog = self.buffer_pool.catalog_entry(file)?;
        let payload = Self::check_payload(length, data)?;
        let header = header.copied().unwrap_or_default();
        let needed = OBJECT_HEADER_SIZE + aligned_length(length) + SLOT_SIZE;

        let placement = match near {
            Some(near) => self.place_near(file, near, &catalog, needed)?,
            None => self.place_anywhere(file, &catalog, needed)?,
        };

        let fresh = placement.fresh_page();
        let oid = match self.insert(&mut catalog, placement, &header, payload, needed) {
            Ok(oid) => oid,
            Err(e) => {
                if let Some(page_id) = fresh {
                    self.buffer_pool.free_page(page_id)?;
                }
                return Err(e);
            }
        };
        self.buffer_pool.put_catalog_entry(catalog)?;

        debug!(file = %file, oid = %oid, length, "created object");
        Ok(oid)
    }

    /// Destroy the object `oid` of `file`
    ///
    /// A page left without objects is taken out of the file and recorded in
    /// `dealloc`, unless it is the file's anchor page.
    pub fn destroy_object(&self, file: FileId, oid: &ObjectId, dealloc: &mut DeallocList) -> Result<()> {
        let mut catalog = self.buffer_pool.catalog_entry(file)?;
        let guard = self.fetch_object_mut(file, oid)?;
        let pool: &BufferPoolImpl = &self.buffer_pool;

        // A page about to lose its last object leaves the chain; pin its
        // neighbours now so unlinking cannot fail halfway.
        let (prev, next) = {
            let page = guard.read();
            if page.live_count() == 1 && page.page_id() != catalog.first_page {
                (page.prev_page(), page.next_page())
            } else {
                (None, None)
            }
        };
        let _neighbours = (
            prev.map(|page_id| pool.fetch_page(page_id)).transpose()?,
            next.map(|page_id| pool.fetch_page(page_id)).transpose()?,
        );

        {
            let mut page = guard.write();
            avail::remove_from_bucket(pool, &mut catalog, &mut page)?;
            page.remove_object(oid.slot as usize)?;

            if page.live_count() == 0 && page.page_id() != catalog.first_page {
                file_map::unlink(pool, &mut catalog, &mut page)?;
                dealloc.push(page.page_id());
                debug!(file = %file, page = %page.page_id(), "queued empty page for deallocation");
            } else {
                avail::insert_into_bucket(&mut catalog, &mut page);
            }
        }
        self.buffer_pool.put_catalog_entry(catalog)?;

        debug!(file = %file, oid = %oid, "destroyed object");
        Ok(())
    }

    /// Read the header and payload of the object `oid` of `file`
    pub fn read_object(&self, file: FileId, oid: &ObjectId) -> Result<(ObjectHeader, Vec<u8>)> {
        self.buffer_pool.catalog_entry(file)?;
        let guard = self.fetch_object(file, oid)?;
        let page = guard.read();
        let header = page.object_header(oid.slot as usize)?;
        let data = page.object_data(oid.slot as usize)?.to_vec();
        Ok((header, data))
    }

    /// Free every page queued in `dealloc`
    ///
    /// Entries that could not be freed stay in the list.
    pub fn commit_deallocs(&self, dealloc: &mut DeallocList) -> Result<usize> {
        let entries: Vec<_> = dealloc.drain().collect();
        for (i, entry) in entries.iter().enumerate() {
            if let Err(e) = self.free_empty_page(entry.page_id) {
                for rest in &entries[i..] {
                    dealloc.push(rest.page_id);
                }
                return Err(e);
            }
        }
        Ok(entries.len())
    }

    fn free_empty_page(&self, page_id: PageId) -> Result<()> {
        {
            let guard = self.buffer_pool.fetch_page(page_id)?;
            let page = guard.read();
            if page.is_data() && page.slot_count() > 0 {
                return Err(StorageError::invalid_operation(format!(
                    "page {} still holds objects",
                    page_id
                )));
            }
        }
        self.buffer_pool.free_page(page_id)?;
        debug!(page = %page_id, "deallocated page");
        Ok(())
    }

    /// Check a file's pages, chain links and available-space lists
    pub fn verify_file(&self, file: FileId) -> Result<()> {
        let catalog = self.buffer_pool.catalog_entry(file)?;
        let mut tags: HashMap<PageId, u8> = HashMap::new();

        let mut prev = None;
        let mut cursor = Some(catalog.first_page);
        let mut budget = self.buffer_pool.page_count();
        while let Some(page_id) = cursor {
            if budget == 0 {
                return Err(StorageError::corruption(format!("file {} chain has a cycle", file)));
            }
            budget -= 1;

            let guard = self.fetch_file_page(file, page_id)?;
            let page = guard.read();
            page.verify()?;
            if page.prev_page() != prev {
                return Err(StorageError::corruption(format!(
                    "page {} has prev link {:?}, expected {:?}",
                    page_id,
                    page.prev_page(),
                    prev
                )));
            }
            let expected = AvailBucket::classify(page.free_bytes())
                .map_or(NO_BUCKET, |bucket| bucket.index() as u8);
            if page.avail_tag() != expected {
                return Err(StorageError::corruption(format!(
                    "page {} is tagged for bucket {} but has {} free bytes",
                    page_id,
                    page.avail_tag(),
                    page.free_bytes()
                )));
            }
            tags.insert(page_id, page.avail_tag());

            prev = Some(page_id);
            cursor = page.next_page();
        }
        if prev != Some(catalog.last_page) {
            return Err(StorageError::corruption(format!(
                "file {} chain ends at {:?}, catalog says {}",
                file, prev, catalog.last_page
            )));
        }

        for bucket in AvailBucket::ALL {
            let mut members = 0;
            let mut cursor = PageId::link(catalog.avail_heads[bucket.index()].value());
            while let Some(page_id) = cursor {
                if tags.get(&page_id) != Some(&(bucket.index() as u8)) || members > tags.len() {
                    return Err(StorageError::corruption(format!(
                        "page {} on list {:?} is not a member of it",
                        page_id, bucket
                    )));
                }
                members += 1;
                cursor = self.buffer_pool.fetch_page(page_id)?.read().avail_next();
            }
            let tagged = tags.values().filter(|&&tag| tag == bucket.index() as u8).count();
            if members != tagged {
                return Err(StorageError::corruption(format!(
                    "list {:?} holds {} pages, {} are tagged for it",
                    bucket, members, tagged
                )));
            }
        }

        Ok(())
    }

    fn check_payload(length: usize, data: Option<&[u8]>) -> Result<&[u8]> {
        let payload = match data {
            Some(data) if data.len() != length => {
                return Err(StorageError::BadLength {
                    length,
                    buffer: data.len(),
                })
            }
            Some(data) => data,
            None if length > 0 => return Err(StorageError::BadUserBuffer),
            None => &[],
        };
        if aligned_length(length) > MAX_OBJECT_LENGTH {
            return Err(StorageError::Unsupported {
                size: length,
                max: MAX_OBJECT_LENGTH,
            });
        }
        Ok(payload)
    }

    fn place_near(
        &self,
        file: FileId,
        near: &ObjectId,
        catalog: &CatalogEntry,
        needed: usize,
    ) -> Result<Placement<'_>> {
        let prev = self.fetch_object_mut(file, near)?;
        if prev.read().free_bytes() >= needed {
            return Ok(Placement::Existing(prev));
        }
        let page = self.new_data_page(file, Some(near.page), catalog.fill_factor)?;
        Ok(Placement::After { page, prev })
    }

    fn place_anywhere(&self, file: FileId, catalog: &CatalogEntry, needed: usize) -> Result<Placement<'_>> {
        for bucket in AvailBucket::fitting(needed) {
            if let Some(head) = PageId::link(catalog.avail_heads[bucket.index()].value()) {
                let guard = self.fetch_file_page_mut(file, head)?;
                if guard.read().free_bytes() >= needed {
                    return Ok(Placement::Existing(guard));
                }
                warn!(page = %head, bucket = ?bucket, "list head has less space than its list promises");
            }
        }

        let last = self.fetch_file_page_mut(file, catalog.last_page)?;
        if last.read().free_bytes() >= needed {
            return Ok(Placement::Existing(last));
        }
        drop(last);

        let page = self.new_data_page(file, Some(catalog.last_page), catalog.fill_factor)?;
        Ok(Placement::Append(page))
    }

    /// Store the object on the chosen page
    fn insert(
        &self,
        catalog: &mut CatalogEntry,
        placement: Placement<'_>,
        header: &ObjectHeader,
        payload: &[u8],
        needed: usize,
    ) -> Result<ObjectId> {
        let pool: &BufferPoolImpl = &self.buffer_pool;
        let guard = match placement {
            Placement::Existing(guard) => {
                {
                    let mut page = guard.write();
                    avail::remove_from_bucket(pool, catalog, &mut page)?;
                    if page.contiguous_free_bytes() < needed {
                        page.compact(None)?;
                    }
                }
                guard
            }
            Placement::After { page, prev } => {
                file_map::insert_after(pool, catalog, &mut prev.write(), &mut page.write())?;
                page
            }
            Placement::Append(page) => {
                file_map::append(pool, catalog, &mut page.write())?;
                page
            }
        };

        let mut page = guard.write();
        let unique = pool.next_unique();
        let slot = page.insert_object(header, payload, unique)?;
        avail::insert_into_bucket(catalog, &mut page);
        Ok(ObjectId::new(self.volume, guard.page_id(), slot, unique))
    }

    fn new_data_page(&self, file: FileId, near: Option<PageId>, fill_factor: u8) -> Result<PageGuardMut<'_>> {
        let guard = self.buffer_pool.new_page(near, fill_factor)?;
        let page_id = guard.page_id();
        *guard.write() = SlottedPage::new_data(page_id, file);
        debug!(file = %file, page = %page_id, "allocated data page");
        Ok(guard)
    }

    /// Fetch a page that must be a data page of `file`
    pub(crate) fn fetch_file_page(&self, file: FileId, page_id: PageId) -> Result<PageGuard<'_>> {
        let guard = self.buffer_pool.fetch_page(page_id)?;
        Self::check_file_page(&guard.read(), file)?;
        Ok(guard)
    }

    fn fetch_file_page_mut(&self, file: FileId, page_id: PageId) -> Result<PageGuardMut<'_>> {
        let guard = self.buffer_pool.fetch_page_mut(page_id)?;
        Self::check_file_page(&guard.read(), file)?;
        Ok(guard)
    }

    fn check_file_page(page: &SlottedPage, file: FileId) -> Result<()> {
        if page.is_data() && page.file_id() == file {
            Ok(())
        } else {
            Err(StorageError::corruption(format!(
                "page {} linked from file {} is not one of its data pages",
                page.page_id(),
                file
            )))
        }
    }

    /// Fetch the page an object id points into, checking only that it is a
    /// data page of `file`
    pub(crate) fn fetch_id_page(&self, file: FileId, oid: &ObjectId) -> Result<PageGuard<'_>> {
        if oid.volume != self.volume {
            return Err(StorageError::BadObjectId(*oid));
        }
        let guard = self
            .buffer_pool
            .fetch_page(oid.page)
            .map_err(|e| Self::bad_page(e, oid))?;
        {
            let page = guard.read();
            if !page.is_data() || page.file_id() != file {
                return Err(StorageError::BadObjectId(*oid));
            }
        }
        Ok(guard)
    }

    fn fetch_object(&self, file: FileId, oid: &ObjectId) -> Result<PageGuard<'_>> {
        let guard = self.fetch_id_page(file, oid)?;
        Self::check_object(&guard.read(), oid)?;
        Ok(guard)
    }

    fn fetch_object_mut(&self, file: FileId, oid: &ObjectId) -> Result<PageGuardMut<'_>> {
        if oid.volume != self.volume {
            return Err(StorageError::BadObjectId(*oid));
        }
        let guard = self
            .buffer_pool
            .fetch_page_mut(oid.page)
            .map_err(|e| Self::bad_page(e, oid))?;
        {
            let page = guard.read();
            if !page.is_data() || page.file_id() != file {
                return Err(StorageError::BadObjectId(*oid));
            }
            Self::check_object(&page, oid)?;
        }
        Ok(guard)
    }

    /// The slot must hold the object the id was issued for
    fn check_object(page: &SlottedPage, oid: &ObjectId) -> Result<()> {
        match page.slot(oid.slot as usize) {
            Some(slot) if !slot.is_empty() && slot.unique == oid.unique => Ok(()),
            _ => Err(StorageError::BadObjectId(*oid)),
        }
    }

    /// An id pointing outside the volume's data pages is a bad id, not an
    /// I/O failure
    fn bad_page(err: StorageError, oid: &ObjectId) -> StorageError {
        match err {
            StorageError::PageNotFound(_)
            | StorageError::InvalidOperation(_)
            | StorageError::InvalidPage(_) => StorageError::BadObjectId(*oid),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::om::ScanDirection;
    use crate::page::DATA_AREA_SIZE;
    use crate::storage::DiskManagerImpl;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::tempdir;

    fn create_test_manager(capacity: usize) -> Result<(ObjectManager, tempfile::TempDir)> {
        let dir = tempdir().unwrap();
        let dm = Arc::new(DiskManagerImpl::open(&dir.path().join("test.vol"), false, 1)?);
        let pool = Arc::new(BufferPoolImpl::new(dm, capacity));
        Ok((ObjectManager::new(pool), dir))
    }

    fn create(om: &ObjectManager, file: FileId, near: Option<&ObjectId>, data: &[u8]) -> Result<ObjectId> {
        om.create_object(file, near, None, data.len(), Some(data))
    }

    fn page_of(om: &ObjectManager, page_id: PageId) -> SlottedPage {
        om.buffer_pool().fetch_page(page_id).unwrap().read().clone()
    }

    fn file_pages(om: &ObjectManager, file: FileId) -> Result<Vec<PageId>> {
        let catalog = om.buffer_pool().catalog_entry(file)?;
        let mut out = Vec::new();
        let mut cursor = Some(catalog.first_page);
        while let Some(page_id) = cursor {
            out.push(page_id);
            cursor = page_of(om, page_id).next_page();
        }
        Ok(out)
    }

    #[test]
    fn test_create_and_read() -> Result<()> {
        let (om, _dir) = create_test_manager(32)?;
        let file = om.create_file(100)?;

        let header = ObjectHeader {
            properties: 0x3,
            tag: 42,
            length: 0,
        };
        let oid = om.create_object(file, None, Some(&header), 5, Some(b"hello"))?;
        let (read_header, data) = om.read_object(file, &oid)?;

        assert_eq!(data, b"hello");
        assert_eq!(read_header.tag, 42);
        assert_eq!(read_header.properties, 0x3);
        assert_eq!(read_header.length, 5);
        assert_eq!(oid.volume, 1);
        assert_eq!(oid.page, om.buffer_pool().catalog_entry(file)?.first_page);
        om.verify_file(file)?;
        assert_eq!(om.buffer_pool().pinned_pages(), 0);

        Ok(())
    }

    #[test]
    fn test_argument_validation() -> Result<()> {
        let (om, _dir) = create_test_manager(32)?;
        let file = om.create_file(100)?;

        assert!(matches!(
            om.create_object(FileId::new(99), None, None, 1, Some(b"x")),
            Err(StorageError::BadCatalogObject(_))
        ));
        assert!(matches!(
            om.create_object(file, None, None, 3, Some(b"x")),
            Err(StorageError::BadLength { length: 3, buffer: 1 })
        ));
        assert!(matches!(
            om.create_object(file, None, None, 3, None),
            Err(StorageError::BadUserBuffer)
        ));
        let big = vec![0u8; MAX_OBJECT_LENGTH + 1];
        assert!(matches!(
            om.create_object(file, None, None, big.len(), Some(&big)),
            Err(StorageError::Unsupported { .. })
        ));
        assert!(om.create_file(0).is_err());
        assert!(om.create_file(101).is_err());

        // Nothing was stored by the failed calls.
        assert_eq!(om.next_object(file, None)?, None);
        om.verify_file(file)?;
        assert_eq!(om.buffer_pool().pinned_pages(), 0);

        Ok(())
    }

    #[test]
    fn test_empty_and_largest_objects() -> Result<()> {
        let (om, _dir) = create_test_manager(32)?;
        let file = om.create_file(100)?;

        let empty = om.create_object(file, None, None, 0, None)?;
        assert_eq!(om.read_object(file, &empty)?.1, Vec::<u8>::new());

        let largest = vec![7u8; MAX_OBJECT_LENGTH];
        let big = create(&om, file, None, &largest)?;
        assert_ne!(big.page, empty.page);
        assert_eq!(om.read_object(file, &big)?.1, largest);
        assert_eq!(page_of(&om, big.page).free_bytes(), 0);
        om.verify_file(file)?;

        Ok(())
    }

    #[test]
    fn test_bad_object_ids() -> Result<()> {
        let (om, _dir) = create_test_manager(32)?;
        let file = om.create_file(100)?;
        let other = om.create_file(100)?;
        let oid = create(&om, file, None, b"payload")?;
        let mut dealloc = DeallocList::new();

        let stale = ObjectId { unique: oid.unique + 1, ..oid };
        let wrong_volume = ObjectId { volume: 2, ..oid };
        let header_page = ObjectId { page: PageId::new(0), ..oid };
        let beyond = ObjectId { page: PageId::new(500), ..oid };
        let no_slot = ObjectId { slot: 9, ..oid };
        for bad in [stale, wrong_volume, header_page, beyond, no_slot] {
            assert!(matches!(
                om.read_object(file, &bad),
                Err(StorageError::BadObjectId(_))
            ));
            assert!(matches!(
                om.destroy_object(file, &bad, &mut dealloc),
                Err(StorageError::BadObjectId(_))
            ));
            assert!(matches!(
                om.create_object(file, Some(&bad), None, 1, Some(b"x")),
                Err(StorageError::BadObjectId(_))
            ));
        }
        assert!(matches!(
            om.read_object(other, &oid),
            Err(StorageError::BadObjectId(_))
        ));

        om.destroy_object(file, &oid, &mut dealloc)?;
        assert!(matches!(
            om.destroy_object(file, &oid, &mut dealloc),
            Err(StorageError::BadObjectId(_))
        ));
        assert!(dealloc.is_empty());
        assert_eq!(om.buffer_pool().pinned_pages(), 0);

        Ok(())
    }

    #[test]
    fn test_create_then_destroy_restores_space() -> Result<()> {
        let (om, _dir) = create_test_manager(32)?;
        let file = om.create_file(100)?;
        let a = create(&om, file, None, &[1u8; 100])?;
        create(&om, file, None, &[2u8; 200])?;

        let before = page_of(&om, a.page);
        let c = create(&om, file, None, &[3u8; 52])?;
        let mut dealloc = DeallocList::new();
        om.destroy_object(file, &c, &mut dealloc)?;
        let after = page_of(&om, a.page);

        assert_eq!(after.free_offset(), before.free_offset());
        assert_eq!(after.unused(), before.unused());
        assert_eq!(after.slot_count(), before.slot_count());
        om.verify_file(file)?;

        Ok(())
    }

    #[test]
    fn test_reused_slot_gets_new_unique() -> Result<()> {
        let (om, _dir) = create_test_manager(32)?;
        let file = om.create_file(100)?;
        let mut dealloc = DeallocList::new();

        let a = create(&om, file, None, b"first")?;
        create(&om, file, None, b"second")?;
        om.destroy_object(file, &a, &mut dealloc)?;

        let b = create(&om, file, None, b"third")?;
        assert_eq!((b.page, b.slot), (a.page, a.slot));
        assert_ne!(b.unique, a.unique);
        assert!(matches!(
            om.read_object(file, &a),
            Err(StorageError::BadObjectId(_))
        ));
        assert_eq!(om.read_object(file, &b)?.1, b"third");

        Ok(())
    }

    #[test]
    fn test_near_placement() -> Result<()> {
        let (om, _dir) = create_test_manager(32)?;
        let file = om.create_file(100)?;
        let anchor = create(&om, file, None, &[1u8; 2000])?;

        // Fill the anchor so the next no-near object spills to a new last page.
        create(&om, file, None, &[2u8; 1900])?;
        let tail = create(&om, file, None, &[3u8; 1000])?;
        assert_ne!(tail.page, anchor.page);
        assert_eq!(file_pages(&om, file)?, vec![anchor.page, tail.page]);

        // Small enough for the anchor's leftover space.
        let close = create(&om, file, Some(&anchor), &[4u8; 40])?;
        assert_eq!(close.page, anchor.page);

        // Too big for the anchor: a fresh page right after it.
        let spill = create(&om, file, Some(&anchor), &[5u8; 500])?;
        assert_ne!(spill.page, anchor.page);
        assert_ne!(spill.page, tail.page);
        assert_eq!(
            file_pages(&om, file)?,
            vec![anchor.page, spill.page, tail.page]
        );
        assert_eq!(om.buffer_pool().catalog_entry(file)?.last_page, tail.page);
        om.verify_file(file)?;

        Ok(())
    }

    #[test]
    fn test_near_compacts_fragmented_page() -> Result<()> {
        let (om, _dir) = create_test_manager(32)?;
        let file = om.create_file(100)?;
        let mut dealloc = DeallocList::new();

        let a = create(&om, file, None, &[1u8; 1500])?;
        let b = create(&om, file, None, &[2u8; 1500])?;
        let c = create(&om, file, None, &[3u8; 900])?;
        om.destroy_object(file, &b, &mut dealloc)?;
        let fragmented = page_of(&om, a.page);
        assert!(fragmented.contiguous_free_bytes() < 1200);
        assert!(fragmented.free_bytes() >= 1200);

        let d = create(&om, file, Some(&c), &[4u8; 1180])?;
        assert_eq!(d.page, a.page);
        let page = page_of(&om, a.page);
        assert_eq!(page.unused(), 0);
        assert_eq!(om.read_object(file, &a)?.1, vec![1u8; 1500]);
        assert_eq!(om.read_object(file, &c)?.1, vec![3u8; 900]);
        assert_eq!(om.read_object(file, &d)?.1, vec![4u8; 1180]);
        om.verify_file(file)?;

        Ok(())
    }

    #[test]
    fn test_bucket_placement_prefers_tightest_fit() -> Result<()> {
        let (om, _dir) = create_test_manager(32)?;
        let file = om.create_file(100)?;
        let mut dealloc = DeallocList::new();

        // Page A ends with ~1000 free bytes, page B with ~2900.
        let a1 = create(&om, file, None, &[1u8; 3000])?;
        let b1 = create(&om, file, None, &[2u8; 1100])?;
        assert_ne!(a1.page, b1.page);
        assert!(page_of(&om, a1.page).free_bytes() < page_of(&om, b1.page).free_bytes());

        // Fits in page A's bucket; taken from A rather than the roomier B.
        let small = create(&om, file, None, &[3u8; 300])?;
        assert_eq!(small.page, a1.page);

        // Too big for A: taken from B.
        let medium = create(&om, file, None, &[4u8; 1500])?;
        assert_eq!(medium.page, b1.page);

        om.destroy_object(file, &small, &mut dealloc)?;
        om.verify_file(file)?;
        Ok(())
    }

    #[test]
    fn test_empty_page_deferred_deallocation() -> Result<()> {
        let (om, _dir) = create_test_manager(32)?;
        let file = om.create_file(100)?;
        let mut dealloc = DeallocList::new();

        let a = create(&om, file, None, &[1u8; 3000])?;
        let b = create(&om, file, None, &[2u8; 3000])?;
        assert_ne!(a.page, b.page);

        om.destroy_object(file, &b, &mut dealloc)?;
        assert_eq!(dealloc.len(), 1);
        assert_eq!(file_pages(&om, file)?, vec![a.page]);
        om.verify_file(file)?;

        // The anchor page stays even when emptied.
        om.destroy_object(file, &a, &mut dealloc)?;
        assert_eq!(dealloc.len(), 1);
        assert_eq!(file_pages(&om, file)?, vec![a.page]);

        let free_before = om.buffer_pool().volume_header().free_page_count;
        assert_eq!(om.commit_deallocs(&mut dealloc)?, 1);
        assert!(dealloc.is_empty());
        assert_eq!(
            om.buffer_pool().volume_header().free_page_count,
            free_before + 1
        );
        om.verify_file(file)?;

        // The freed page is handed out again.
        let c = create(&om, file, None, &[3u8; 3000])?;
        let d = create(&om, file, None, &[4u8; 3000])?;
        assert!(c.page == b.page || d.page == b.page);
        om.verify_file(file)?;

        Ok(())
    }

    #[test]
    fn test_failed_near_create_changes_nothing() -> Result<()> {
        let (om, _dir) = create_test_manager(32)?;
        let file = om.create_file(100)?;
        let a = create(&om, file, None, &[1u8; 500])?;
        let catalog = om.buffer_pool().catalog_entry(file)?;
        let bytes = page_of(&om, a.page).as_bytes().to_vec();
        let pages = om.buffer_pool().page_count();

        let stale = ObjectId { unique: 0, ..a };
        assert!(om.create_object(file, Some(&stale), None, 4, Some(b"abcd")).is_err());

        assert_eq!(om.buffer_pool().catalog_entry(file)?, catalog);
        assert_eq!(page_of(&om, a.page).as_bytes(), &bytes[..]);
        assert_eq!(om.buffer_pool().page_count(), pages);
        assert_eq!(om.buffer_pool().pinned_pages(), 0);

        Ok(())
    }

    #[test]
    fn test_small_pool_with_long_bucket_list() -> Result<()> {
        let (om, _dir) = create_test_manager(3)?;
        let file = om.create_file(100)?;
        let mut dealloc = DeallocList::new();

        // One object per page, every page on the same list, the anchor last.
        let oids: Vec<ObjectId> = (0..6u8)
            .map(|i| create(&om, file, None, &[i; 3000]))
            .collect::<Result<_>>()?;
        let pages: Vec<PageId> = oids.iter().map(|oid| oid.page).collect();
        let mut unique_pages = pages.clone();
        unique_pages.sort();
        unique_pages.dedup();
        assert_eq!(unique_pages.len(), 6);
        let catalog = om.buffer_pool().catalog_entry(file)?;
        assert_eq!(catalog.avail_heads[AvailBucket::Bucket20.index()], pages[5]);

        // Emptying a middle page needs both neighbours plus the list walk:
        // more frames than the pool has, so nothing may change.
        let before = page_of(&om, pages[2]).as_bytes().to_vec();
        assert!(matches!(
            om.destroy_object(file, &oids[2], &mut dealloc),
            Err(StorageError::BufferPoolExhausted)
        ));
        assert_eq!(om.buffer_pool().catalog_entry(file)?, catalog);
        assert_eq!(page_of(&om, pages[2]).as_bytes(), &before[..]);
        assert_eq!(om.read_object(file, &oids[2])?.1, vec![2u8; 3000]);
        assert!(dealloc.is_empty());
        om.verify_file(file)?;

        // The anchor is found at the far end of the list while it stays locked.
        om.destroy_object(file, &oids[0], &mut dealloc)?;
        assert!(dealloc.is_empty());
        om.verify_file(file)?;

        // The list head empties and leaves the file.
        om.destroy_object(file, &oids[5], &mut dealloc)?;
        assert_eq!(dealloc.len(), 1);
        assert_eq!(om.buffer_pool().pinned_pages(), 0);
        om.verify_file(file)?;

        om.commit_deallocs(&mut dealloc)?;
        let again = create(&om, file, None, &[9u8; 3000])?;
        assert_eq!(om.read_object(file, &again)?.1, vec![9u8; 3000]);
        om.verify_file(file)?;
        assert_eq!(om.buffer_pool().pinned_pages(), 0);

        Ok(())
    }

    #[test]
    fn test_randomized_workload() -> Result<()> {
        let (om, _dir) = create_test_manager(8)?;
        let file = om.create_file(80)?;
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut live: Vec<(ObjectId, Vec<u8>)> = Vec::new();
        let mut dealloc = DeallocList::new();

        for step in 0..1500 {
            if live.is_empty() || rng.gen_bool(0.6) {
                let len = if rng.gen_bool(0.05) {
                    rng.gen_range(1000..=MAX_OBJECT_LENGTH)
                } else {
                    rng.gen_range(0..300)
                };
                let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
                let near = if !live.is_empty() && rng.gen_bool(0.3) {
                    Some(live[rng.gen_range(0..live.len())].0)
                } else {
                    None
                };
                let oid = create(&om, file, near.as_ref(), &data)?;
                live.push((oid, data));
            } else {
                let (oid, _) = live.swap_remove(rng.gen_range(0..live.len()));
                om.destroy_object(file, &oid, &mut dealloc)?;
            }

            if step % 50 == 0 {
                om.commit_deallocs(&mut dealloc)?;
            }
            assert_eq!(om.buffer_pool().pinned_pages(), 0);
            om.verify_file(file)?;
        }

        for (oid, data) in &live {
            assert_eq!(&om.read_object(file, oid)?.1, data);
        }

        let forward: Vec<ObjectId> = om
            .cursor(file, ScanDirection::Forward)
            .map(|r| r.map(|(oid, _)| oid))
            .collect::<Result<_>>()?;
        let mut backward: Vec<ObjectId> = om
            .cursor(file, ScanDirection::Backward)
            .map(|r| r.map(|(oid, _)| oid))
            .collect::<Result<_>>()?;
        backward.reverse();
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), live.len());

        let mut expected: Vec<ObjectId> = live.iter().map(|(oid, _)| *oid).collect();
        let mut seen = forward.clone();
        expected.sort_by_key(|oid| (oid.page, oid.slot));
        seen.sort_by_key(|oid| (oid.page, oid.slot));
        assert_eq!(seen, expected);

        // Every page keeps its bytes in balance.
        for page_id in file_pages(&om, file)? {
            let page = page_of(&om, page_id);
            let live_bytes: usize = page
                .live_slots()
                .map(|i| page.object_size(i).unwrap())
                .sum();
            assert_eq!(
                page.free_bytes() + live_bytes + page.slot_count() * SLOT_SIZE,
                DATA_AREA_SIZE
            );
        }

        Ok(())
    }
}
