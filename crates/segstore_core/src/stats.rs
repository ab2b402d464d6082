//! Store statistics.
//!
//! Counters for monitoring how a store's chain evolves.
//!
//! # Usage
//!
//! ```rust
//! use segstore_core::Store;
//!
//! let mut store = Store::open_in_memory().unwrap();
//! store.append(b"abc").unwrap();
//! let token = store.save().unwrap();
//! store.resume(token).unwrap();
//!
//! let stats = store.stats().snapshot();
//! assert_eq!(stats.saves, 1);
//! assert_eq!(stats.resumes, 1);
//! assert_eq!(stats.bytes_appended, 3);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Store statistics.
///
/// All counters are atomic so a shared reference can be read while the
/// store is in use. Values only ever increase.
#[derive(Debug, Default)]
pub struct StoreStats {
    /// Segments created through the backend.
    segments_created: AtomicU64,
    /// Segments deleted from the chain.
    segments_deleted: AtomicU64,
    /// Bookmarks minted.
    saves: AtomicU64,
    /// Bookmarks redeemed.
    resumes: AtomicU64,
    /// Global renumberings of the chain.
    rearranges: AtomicU64,
    /// Bytes appended by callers.
    bytes_appended: AtomicU64,
    /// Bytes consumed by callers.
    bytes_consumed: AtomicU64,
    /// Unread bytes moved into the write segment by resume or close.
    bytes_folded: AtomicU64,
}

impl StoreStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_segment_created(&self) {
        self.segments_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_segment_deleted(&self) {
        self.segments_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_save(&self) {
        self.saves.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_resume(&self) {
        self.resumes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rearrange(&self) {
        self.rearranges.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_append(&self, bytes: u64) {
        self.bytes_appended.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_consume(&self, bytes: u64) {
        self.bytes_consumed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_fold(&self, bytes: u64) {
        self.bytes_folded.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Returns the number of segments created.
    pub fn segments_created(&self) -> u64 {
        self.segments_created.load(Ordering::Relaxed)
    }

    /// Returns the number of segments deleted.
    pub fn segments_deleted(&self) -> u64 {
        self.segments_deleted.load(Ordering::Relaxed)
    }

    /// Returns the number of rearranges.
    pub fn rearranges(&self) -> u64 {
        self.rearranges.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            segments_created: self.segments_created(),
            segments_deleted: self.segments_deleted(),
            saves: self.saves.load(Ordering::Relaxed),
            resumes: self.resumes.load(Ordering::Relaxed),
            rearranges: self.rearranges(),
            bytes_appended: self.bytes_appended.load(Ordering::Relaxed),
            bytes_consumed: self.bytes_consumed.load(Ordering::Relaxed),
            bytes_folded: self.bytes_folded.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of store statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Segments created through the backend.
    pub segments_created: u64,
    /// Segments deleted from the chain.
    pub segments_deleted: u64,
    /// Bookmarks minted.
    pub saves: u64,
    /// Bookmarks redeemed.
    pub resumes: u64,
    /// Global renumberings.
    pub rearranges: u64,
    /// Bytes appended.
    pub bytes_appended: u64,
    /// Bytes consumed.
    pub bytes_consumed: u64,
    /// Bytes folded forward.
    pub bytes_folded: u64,
}
