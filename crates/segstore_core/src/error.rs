//! Error types for segstore core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Segment storage error.
    #[error("storage error: {0}")]
    Storage(#[from] segstore_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Archive container error.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// The token was never minted by this chain, was already consumed, or
    /// belongs to another store.
    #[error("unknown position token: {token}")]
    UnknownToken {
        /// Display form of the rejected token.
        token: String,
    },

    /// Another process holds the store's lock file.
    #[error("store locked by {owner} since {since}")]
    ExclusiveAccessViolation {
        /// Owner identity recorded in the lock file.
        owner: String,
        /// Timestamp recorded in the lock file (seconds since the Unix epoch).
        since: String,
    },

    /// The archive's reserved index entry is missing or malformed.
    #[error("index corruption: {message}")]
    IndexCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Renumbering could not restore the minimum key spacing.
    #[error("renumbering exhausted: {segments} segments cannot be spaced apart")]
    RenumberingExhausted {
        /// Number of live segments at the time of the attempt.
        segments: usize,
    },

    /// Invalid store layout or token encoding.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// The stream ended before a value could be decoded.
    #[error("unexpected end of stream: needed {needed} bytes, got {available}")]
    UnexpectedEnd {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// The store has been closed.
    #[error("store is closed")]
    StoreClosed,
}

impl CoreError {
    /// Creates an unknown token error.
    pub fn unknown_token(token: impl std::fmt::Display) -> Self {
        Self::UnknownToken {
            token: token.to_string(),
        }
    }

    /// Creates an index corruption error.
    pub fn index_corruption(message: impl Into<String>) -> Self {
        Self::IndexCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Returns `true` if the error comes from the backing medium.
    #[must_use]
    pub fn is_backend_io(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Io(_) | Self::Archive(_))
    }
}
