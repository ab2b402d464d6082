//! In-memory segments backed by a shared pool.

use crate::error::{StorageError, StorageResult};
use crate::segment::{Segment, SegmentMode};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A shared pool of in-memory segment buffers keyed by identity.
///
/// The pool outlives the segments handed out from it, which makes it
/// suitable for:
/// - Unit tests that inspect segment contents after the fact
/// - Ephemeral stores that don't need persistence
/// - Staging entries of a container that is written out as a whole
///
/// Cloning the pool yields another handle to the same buffers.
///
/// # Example
///
/// ```rust
/// use segstore_storage::{MemoryPool, Segment};
///
/// let pool = MemoryPool::new();
/// let mut segment = pool.create(7);
/// segment.append(b"hello").unwrap();
/// assert_eq!(pool.data(7).unwrap(), b"hello");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryPool {
    entries: Arc<RwLock<BTreeMap<i64, Vec<u8>>>>,
}

impl MemoryPool {
    /// Creates a new empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty buffer under `id` and returns a segment over it.
    ///
    /// An existing buffer with the same identity is replaced.
    #[must_use]
    pub fn create(&self, id: i64) -> MemorySegment {
        self.entries.write().insert(id, Vec::new());
        MemorySegment {
            id,
            pool: self.clone(),
        }
    }

    /// Stores preloaded data under `id` and returns a segment over it.
    ///
    /// Useful for recovering entries read from a container.
    #[must_use]
    pub fn with_data(&self, id: i64, data: Vec<u8>) -> MemorySegment {
        self.entries.write().insert(id, data);
        MemorySegment {
            id,
            pool: self.clone(),
        }
    }

    /// Returns a segment over an existing buffer.
    #[must_use]
    pub fn segment(&self, id: i64) -> Option<MemorySegment> {
        self.entries.read().contains_key(&id).then(|| MemorySegment {
            id,
            pool: self.clone(),
        })
    }

    /// Returns a copy of the buffer stored under `id`.
    #[must_use]
    pub fn data(&self, id: i64) -> Option<Vec<u8>> {
        self.entries.read().get(&id).cloned()
    }

    /// Returns `true` if a buffer is stored under `id`.
    #[must_use]
    pub fn contains(&self, id: i64) -> bool {
        self.entries.read().contains_key(&id)
    }

    /// Returns all identities in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<i64> {
        self.entries.read().keys().copied().collect()
    }

    /// Returns the number of buffers in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if the pool holds no buffers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Removes every buffer.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    fn with_entry<R>(&self, id: i64, f: impl FnOnce(&mut Vec<u8>) -> R) -> StorageResult<R> {
        let mut entries = self.entries.write();
        let data = entries.get_mut(&id).ok_or(StorageError::Deleted)?;
        Ok(f(data))
    }
}

/// A segment whose bytes live in a [`MemoryPool`].
#[derive(Debug)]
pub struct MemorySegment {
    id: i64,
    pool: MemoryPool,
}

impl MemorySegment {
    /// Returns the identity of the buffer within its pool.
    #[must_use]
    pub fn id(&self) -> i64 {
        self.id
    }
}

impl Segment for MemorySegment {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> StorageResult<usize> {
        self.pool.with_entry(self.id, |data| {
            let size = data.len() as u64;
            if offset > size {
                return Err(StorageError::ReadPastEnd { offset, size });
            }
            let start = offset as usize;
            let n = buf.len().min(data.len() - start);
            buf[..n].copy_from_slice(&data[start..start + n]);
            Ok(n)
        })?
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        self.pool.with_entry(self.id, |data| {
            let offset = data.len() as u64;
            data.extend_from_slice(new_data);
            offset
        })
    }

    fn size(&self) -> StorageResult<u64> {
        self.pool.with_entry(self.id, |data| data.len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.pool.with_entry(self.id, |data| {
            let size = data.len() as u64;
            if new_size > size {
                return Err(StorageError::ReadPastEnd {
                    offset: new_size,
                    size,
                });
            }
            data.truncate(new_size as usize);
            Ok(())
        })?
    }

    fn set_mode(&mut self, _mode: SegmentMode) -> StorageResult<()> {
        // Memory holds no handles
        Ok(())
    }

    fn relabel(&mut self, _key: i64) -> StorageResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn delete(self: Box<Self>) -> StorageResult<()> {
        self.pool
            .entries
            .write()
            .remove(&self.id)
            .map(|_| ())
            .ok_or(StorageError::Deleted)
    }

    fn release(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}
