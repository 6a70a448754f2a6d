//! File page chain.
//!
//! The pages of a file form a doubly linked list through the `prev_page` and
//! `next_page` header fields, anchored by `first_page` and `last_page` in the
//! catalog entry. Each operation fetches every neighbour it needs before
//! changing any link.

use crate::buffer::BufferPool;
use crate::error::Result;
use crate::page::SlottedPage;
use crate::storage::CatalogEntry;
use tracing::debug;

/// Link `page` into the chain right after `prev`
pub fn insert_after(
    pool: &dyn BufferPool,
    catalog: &mut CatalogEntry,
    prev: &mut SlottedPage,
    page: &mut SlottedPage,
) -> Result<()> {
    let next_guard = match prev.next_page() {
        Some(next) => Some(pool.fetch_page_mut(next)?),
        None => None,
    };

    let page_id = page.page_id();
    page.set_prev_page(Some(prev.page_id()));
    page.set_next_page(prev.next_page());
    prev.set_next_page(Some(page_id));

    match next_guard {
        Some(guard) => guard.write().set_prev_page(Some(page_id)),
        None => catalog.last_page = page_id,
    }

    debug!(page = %page_id, after = %prev.page_id(), "linked page into file");
    Ok(())
}

/// Link `page` into the chain as the file's new last page
pub fn append(pool: &dyn BufferPool, catalog: &mut CatalogEntry, page: &mut SlottedPage) -> Result<()> {
    let last = pool.fetch_page_mut(catalog.last_page)?;
    let mut last = last.write();
    insert_after(pool, catalog, &mut last, page)
}

/// Take `page` out of the chain
///
/// The page keeps its own links, so a scan positioned on it can still move
/// on to its former neighbours.
pub fn unlink(pool: &dyn BufferPool, catalog: &mut CatalogEntry, page: &mut SlottedPage) -> Result<()> {
    let prev = page.prev_page();
    let next = page.next_page();
    let prev_guard = match prev {
        Some(prev) => Some(pool.fetch_page_mut(prev)?),
        None => None,
    };
    let next_guard = match next {
        Some(next) => Some(pool.fetch_page_mut(next)?),
        None => None,
    };

    match prev_guard {
        Some(guard) => guard.write().set_next_page(next),
        None => {
            if let Some(next) = next {
                catalog.first_page = next;
            }
        }
    }
    match next_guard {
        Some(guard) => guard.write().set_prev_page(prev),
        None => {
            if let Some(prev) = prev {
                catalog.last_page = prev;
            }
        }
    }

    debug!(page = %page.page_id(), "unlinked page from file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPoolImpl;
    use crate::storage::DiskManagerImpl;
    use crate::types::{FileId, PageId};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn setup() -> Result<(BufferPoolImpl, CatalogEntry, tempfile::TempDir)> {
        let dir = tempdir().unwrap();
        let dm = Arc::new(DiskManagerImpl::open(&dir.path().join("t.vol"), false, 1)?);
        let pool = BufferPoolImpl::new(dm, 16);
        let first = {
            let guard = pool.new_page(None, 100)?;
            *guard.write() = SlottedPage::new_data(guard.page_id(), FileId::new(1));
            guard.page_id()
        };
        let catalog = CatalogEntry::new(FileId::new(1), first, 100);
        Ok((pool, catalog, dir))
    }

    fn new_data_page(pool: &BufferPoolImpl) -> Result<PageId> {
        let guard = pool.new_page(None, 100)?;
        *guard.write() = SlottedPage::new_data(guard.page_id(), FileId::new(1));
        Ok(guard.page_id())
    }

    fn forward(pool: &BufferPoolImpl, catalog: &CatalogEntry) -> Result<Vec<PageId>> {
        let mut out = Vec::new();
        let mut cursor = Some(catalog.first_page);
        while let Some(page_id) = cursor {
            out.push(page_id);
            cursor = pool.fetch_page(page_id)?.read().next_page();
        }
        Ok(out)
    }

    fn backward(pool: &BufferPoolImpl, catalog: &CatalogEntry) -> Result<Vec<PageId>> {
        let mut out = Vec::new();
        let mut cursor = Some(catalog.last_page);
        while let Some(page_id) = cursor {
            out.push(page_id);
            cursor = pool.fetch_page(page_id)?.read().prev_page();
        }
        out.reverse();
        Ok(out)
    }

    #[test]
    fn test_append_and_insert_after() -> Result<()> {
        let (pool, mut catalog, _dir) = setup()?;
        let first = catalog.first_page;

        let b = new_data_page(&pool)?;
        {
            let guard = pool.fetch_page_mut(b)?;
            append(&pool, &mut catalog, &mut guard.write())?;
        }
        assert_eq!(catalog.last_page, b);

        let c = new_data_page(&pool)?;
        {
            let prev = pool.fetch_page_mut(first)?;
            let guard = pool.fetch_page_mut(c)?;
            insert_after(&pool, &mut catalog, &mut prev.write(), &mut guard.write())?;
        }

        assert_eq!(forward(&pool, &catalog)?, vec![first, c, b]);
        assert_eq!(backward(&pool, &catalog)?, vec![first, c, b]);
        assert_eq!(catalog.last_page, b);
        assert_eq!(pool.pinned_pages(), 0);

        Ok(())
    }

    #[test]
    fn test_unlink() -> Result<()> {
        let (pool, mut catalog, _dir) = setup()?;
        let first = catalog.first_page;
        let mut ids = vec![first];
        for _ in 0..3 {
            let page_id = new_data_page(&pool)?;
            let guard = pool.fetch_page_mut(page_id)?;
            append(&pool, &mut catalog, &mut guard.write())?;
            ids.push(page_id);
        }

        // Middle page.
        {
            let guard = pool.fetch_page_mut(ids[2])?;
            unlink(&pool, &mut catalog, &mut guard.write())?;
            assert_eq!(guard.read().next_page(), Some(ids[3]));
            assert_eq!(guard.read().prev_page(), Some(ids[1]));
        }
        assert_eq!(forward(&pool, &catalog)?, vec![ids[0], ids[1], ids[3]]);
        assert_eq!(backward(&pool, &catalog)?, vec![ids[0], ids[1], ids[3]]);

        // Last page.
        {
            let guard = pool.fetch_page_mut(ids[3])?;
            unlink(&pool, &mut catalog, &mut guard.write())?;
        }
        assert_eq!(catalog.last_page, ids[1]);
        assert_eq!(forward(&pool, &catalog)?, vec![ids[0], ids[1]]);

        Ok(())
    }
}
