//! Object manager: places, destroys and traverses objects within files.
//!
//! - **Placement and lifecycle** (`manager`): create, destroy, read
//! - **Available-space lists** (`avail`): five size-bucketed page lists per file
//! - **Page chain** (`file_map`): the doubly linked list of a file's pages
//! - **Deferred deallocation** (`dealloc`): pages emptied by destroy
//! - **Traversal** (`cursor`): next/previous object in file order

mod avail;
mod cursor;
mod dealloc;
mod file_map;
mod manager;

pub use avail::{insert_into_bucket, remove_from_bucket, AvailBucket};
pub use cursor::{ObjectCursor, ScanDirection};
pub use dealloc::{DeallocEntry, DeallocList};
pub use file_map::{append, insert_after, unlink};
pub use manager::ObjectManager;
