//! Error types for the storage layer.

use thiserror::Error;
use crate::types::{FileId, ObjectId, PageId};

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error from the underlying file system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested page was not found
    #[error("Page {0} not found")]
    PageNotFound(PageId),

    /// The file is not registered in the catalog
    #[error("File {0} has no catalog entry")]
    BadCatalogObject(FileId),

    /// The object id does not name a live object of the file
    #[error("Bad object id {0}")]
    BadObjectId(ObjectId),

    /// Declared object length disagrees with the supplied buffer
    #[error("Bad length: declared {length} bytes, buffer holds {buffer}")]
    BadLength { length: usize, buffer: usize },

    /// Non-empty object requested without a data buffer
    #[error("Bad user buffer: no data supplied for a non-empty object")]
    BadUserBuffer,

    /// Object too large for a single page (large objects are not supported)
    #[error("Unsupported: object of {size} bytes exceeds single-page limit {max}")]
    Unsupported { size: usize, max: usize },

    /// Page does not have enough space for the operation
    #[error("Page {page_id} is full, need {needed} bytes but only {available} available")]
    PageFull {
        page_id: PageId,
        needed: usize,
        available: usize,
    },

    /// No room left for another catalog entry in the volume header
    #[error("Catalog full: at most {0} files per volume")]
    CatalogFull(usize),

    /// Data corruption detected (e.g., checksum mismatch)
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Invalid page format or type
    #[error("Invalid page: {0}")]
    InvalidPage(String),

    /// Buffer pool has no available frames
    #[error("Buffer pool exhausted: no available frames")]
    BufferPoolExhausted,

    /// Invalid operation for the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Volume file is corrupted or has invalid format
    #[error("Invalid volume file: {0}")]
    InvalidDatabaseFile(String),
}

impl StorageError {
    /// Create a corruption error with a message
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    /// Create an invalid page error
    pub fn invalid_page(msg: impl Into<String>) -> Self {
        Self::InvalidPage(msg.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create an invalid volume file error
    pub fn invalid_db(msg: impl Into<String>) -> Self {
        Self::InvalidDatabaseFile(msg.into())
    }
}
