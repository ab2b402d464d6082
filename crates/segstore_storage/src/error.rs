//! Error types for segment operations.

use std::io;
use thiserror::Error;

/// Result type for segment operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during segment operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read or truncate beyond the end of a segment.
    #[error("offset {offset} beyond end of segment (size {size})")]
    ReadPastEnd {
        /// The requested offset.
        offset: u64,
        /// The current segment size.
        size: u64,
    },

    /// The segment's backing data is corrupted.
    #[error("segment corrupted: {0}")]
    Corrupted(String),

    /// The segment's backing data no longer exists.
    #[error("segment backing data was deleted")]
    Deleted,
}
