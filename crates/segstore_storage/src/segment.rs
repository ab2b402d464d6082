//! Segment trait definition.

use crate::error::StorageResult;

/// Access mode of a segment within a chain.
///
/// At most one segment of a chain is in [`SegmentMode::Write`] and at most
/// one is in [`SegmentMode::Read`]; every other segment is idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SegmentMode {
    /// Finalized or parked; holds no OS resources.
    #[default]
    Idle,
    /// Receiving appended bytes.
    Write,
    /// Being consumed.
    Read,
}

impl SegmentMode {
    /// Returns a short lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Write => "write",
            Self::Read => "read",
        }
    }
}

/// One contiguous, independently stored chunk of a byte stream.
///
/// Segments are **opaque positional byte stores**. They do not know about
/// chains, cursors or tokens: the owner of the segment keeps the read cursor
/// and decides which segment is written.
///
/// # Invariants
///
/// - `append` always writes at the current end and returns the offset written
/// - `read_at` never returns bytes past `size()`
/// - `delete` and `release` consume the segment; it cannot be used afterwards
///
/// # Implementors
///
/// - [`super::MemorySegment`] - Entry in a shared in-memory pool
/// - [`super::FileSegment`] - One file with a self-describing header
pub trait Segment: Send {
    /// Reads up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns the number of bytes read, which is zero at the end of the
    /// segment.
    ///
    /// # Errors
    ///
    /// Returns an error if `offset` is beyond the segment size or an I/O
    /// error occurs.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> StorageResult<usize>;

    /// Appends data to the end of the segment.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Returns the number of data bytes held by the segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Truncates the segment to `new_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is greater than the current size or
    /// the truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Switches the segment's access mode.
    ///
    /// Backends that hold OS handles open them when leaving
    /// [`SegmentMode::Idle`] and flush and close them when entering it.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle cannot be opened or flushed.
    fn set_mode(&mut self, mode: SegmentMode) -> StorageResult<()>;

    /// Records a new ordering key for the segment.
    ///
    /// Media that persist the ordering key alongside the data rewrite it;
    /// others ignore the call.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be persisted.
    fn relabel(&mut self, key: i64) -> StorageResult<()>;

    /// Syncs data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Irreversibly removes the backing data.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing resource cannot be removed.
    fn delete(self: Box<Self>) -> StorageResult<()>;

    /// Releases handles without touching the backing data.
    ///
    /// # Errors
    ///
    /// Returns an error if pending data cannot be flushed.
    fn release(self: Box<Self>) -> StorageResult<()>;
}
