//! Storage layer: disk I/O and page management.
//!
//! This module provides abstractions for reading and writing pages of a
//! volume, managing the volume header and its file catalog, and tracking
//! free pages.

mod catalog;
mod disk_manager;
mod freelist;
mod volume_header;

pub use catalog::{CatalogEntry, AVAIL_LIST_COUNT};
pub use disk_manager::{DiskManager, DiskManagerImpl};
pub use freelist::FreeList;
pub use volume_header::{VolumeHeader, MAX_CATALOG_ENTRIES};
