//! Instrumented segments for engine tests.

use parking_lot::Mutex;
use segstore_storage::{Segment, SegmentMode, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Wraps a segment and records what the engine does to it.
pub(crate) struct Watched {
    inner: Box<dyn Segment>,
    refuse_relabel: bool,
    labels: Arc<Mutex<Vec<i64>>>,
    released: Arc<AtomicUsize>,
}

impl Watched {
    pub(crate) fn new(inner: Box<dyn Segment>) -> Self {
        Self {
            inner,
            refuse_relabel: false,
            labels: Arc::default(),
            released: Arc::default(),
        }
    }

    /// Makes every relabel fail.
    pub(crate) fn refusing_relabel(mut self) -> Self {
        self.refuse_relabel = true;
        self
    }

    /// Counts releases into a shared counter.
    pub(crate) fn counting_releases(mut self, released: &Arc<AtomicUsize>) -> Self {
        self.released = Arc::clone(released);
        self
    }

    /// Keys applied by successful relabels, oldest first.
    pub(crate) fn labels(&self) -> Arc<Mutex<Vec<i64>>> {
        Arc::clone(&self.labels)
    }
}

impl Segment for Watched {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> StorageResult<usize> {
        self.inner.read_at(offset, buf)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.inner.append(data)
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }

    fn set_mode(&mut self, mode: SegmentMode) -> StorageResult<()> {
        self.inner.set_mode(mode)
    }

    fn relabel(&mut self, key: i64) -> StorageResult<()> {
        if self.refuse_relabel {
            return Err(StorageError::Io(io::Error::other("relabel refused")));
        }
        self.inner.relabel(key)?;
        self.labels.lock().push(key);
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.sync()
    }

    fn delete(self: Box<Self>) -> StorageResult<()> {
        self.inner.delete()
    }

    fn release(self: Box<Self>) -> StorageResult<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.inner.release()
    }
}
