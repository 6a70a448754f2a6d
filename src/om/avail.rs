//! Available-space lists.
//!
//! Every data page of a file with at least 10% of the page free sits on
//! exactly one of five singly linked lists, chosen by how much space it has.
//! The list heads live in the file's catalog entry; the links run through
//! the page headers, which also record which list the page is on.

use crate::buffer::BufferPool;
use crate::error::Result;
use crate::page::{SlottedPage, NO_BUCKET};
use crate::storage::CatalogEntry;
use crate::types::{PageId, PAGE_SIZE};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Free-space class of a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AvailBucket {
    Bucket50,
    Bucket40,
    Bucket30,
    Bucket20,
    Bucket10,
}

impl AvailBucket {
    /// All buckets, most free space first
    pub const ALL: [AvailBucket; 5] = [
        AvailBucket::Bucket50,
        AvailBucket::Bucket40,
        AvailBucket::Bucket30,
        AvailBucket::Bucket20,
        AvailBucket::Bucket10,
    ];

    /// Index of this bucket's head in `CatalogEntry::avail_heads`
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub const fn percent(self) -> usize {
        match self {
            AvailBucket::Bucket50 => 50,
            AvailBucket::Bucket40 => 40,
            AvailBucket::Bucket30 => 30,
            AvailBucket::Bucket20 => 20,
            AvailBucket::Bucket10 => 10,
        }
    }

    /// Least free bytes a page in this bucket has
    pub const fn threshold(self) -> usize {
        PAGE_SIZE * self.percent() / 100
    }

    /// Bucket a page with `free_bytes` free belongs to, if any
    pub fn classify(free_bytes: usize) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|bucket| free_bytes >= bucket.threshold())
    }

    /// Smallest bucket whose every member has at least `needed` free bytes
    pub fn smallest_fitting(needed: usize) -> Option<Self> {
        Self::ALL
            .into_iter()
            .rev()
            .find(|bucket| needed <= bucket.threshold())
    }

    /// Buckets able to satisfy `needed`, smallest first
    pub fn fitting(needed: usize) -> impl Iterator<Item = AvailBucket> {
        let smallest = Self::smallest_fitting(needed);
        Self::ALL
            .into_iter()
            .rev()
            .skip_while(move |&bucket| Some(bucket) != smallest)
    }
}

/// Take `page` off the list it is on
///
/// Membership is read from the page's tag. A page that is on no list, or
/// whose list does not actually contain it, is left alone apart from having
/// its tag cleared.
pub fn remove_from_bucket(
    pool: &dyn BufferPool,
    catalog: &mut CatalogEntry,
    page: &mut SlottedPage,
) -> Result<()> {
    let tag = page.avail_tag();
    if tag == NO_BUCKET {
        return Ok(());
    }

    let page_id = page.page_id();
    let successor = page.avail_next();
    let found = match AvailBucket::from_index(tag as usize) {
        Some(bucket) => unlink_from_chain(pool, catalog, bucket, page_id, successor)?,
        None => {
            warn!(page = %page_id, tag, "page carries an unknown bucket tag");
            false
        }
    };
    if !found {
        debug!(page = %page_id, tag, "page not found on its available-space list");
    }

    page.set_avail_tag(NO_BUCKET);
    page.set_avail_next(None);
    Ok(())
}

/// Splice `page_id` out of one bucket's chain; false if it is not on it
fn unlink_from_chain(
    pool: &dyn BufferPool,
    catalog: &mut CatalogEntry,
    bucket: AvailBucket,
    page_id: PageId,
    successor: Option<PageId>,
) -> Result<bool> {
    let head = &mut catalog.avail_heads[bucket.index()];
    if *head == page_id {
        *head = successor.unwrap_or(PageId::INVALID);
        return Ok(true);
    }

    let mut cursor = PageId::link(head.value());
    // A chain can never be longer than the volume.
    let mut budget = pool.page_count();
    while let Some(current) = cursor {
        if budget == 0 {
            warn!(bucket = ?bucket, "available-space list does not terminate");
            return Ok(false);
        }
        budget -= 1;

        let guard = pool.fetch_page_mut(current)?;
        let next = guard.read().avail_next();
        if next == Some(page_id) {
            guard.write().set_avail_next(successor);
            return Ok(true);
        }
        cursor = next;
    }
    Ok(false)
}

/// Put `page` at the head of the list matching its current free space
///
/// Pages under 10% free are not tracked. Returns the bucket chosen.
pub fn insert_into_bucket(catalog: &mut CatalogEntry, page: &mut SlottedPage) -> Option<AvailBucket> {
    let bucket = AvailBucket::classify(page.free_bytes())?;
    let head = &mut catalog.avail_heads[bucket.index()];

    page.set_avail_next(PageId::link(head.value()));
    page.set_avail_tag(bucket.index() as u8);
    *head = page.page_id();
    Some(bucket)
}
