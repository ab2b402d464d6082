//! Store engine.
//!
//! The store drives a write cursor and a read cursor over the segment
//! directory:
//!
//! ```text
//!   ... [sealed] [write] [passed] [read] [queued] ...
//!                   ^                ^
//!        appends go here             consume reads here, then moves right
//! ```
//!
//! The write segment sits before the read segment. [`Store::save`] seals
//! the write segment and opens a new one right after it, returning a
//! [`Token`] for it. [`Store::resume`] folds the unread rest of the read
//! segment into the write segment and moves both cursors so reading restarts
//! at the bookmark.
//!
//! Consuming moves the read cursor without changing the chain. Segments the
//! reader has passed stay between the two cursors until the next resume or
//! close, which reclaim those that no live token names.
//!
//! Bytes below the write segment's *base* were sealed by an earlier session
//! or save; bytes above it are fresh and become readable after the store is
//! closed and reopened.

use crate::backend::{
    ArchiveBackend, Backend, DirBackend, MemoryBackend, MemoryMedium, Recovered,
};
use crate::chain::{NodeId, SegmentDirectory};
use crate::codec::{Decode, Encode, Source};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::stats::StoreStats;
use crate::token::{Token, TokenId};
use segstore_storage::SegmentMode;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

/// Snapshot of one segment for introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Order key within the chain.
    pub key: i64,
    /// Backend identity.
    pub id: i64,
    /// Backend name, if the backend names segments.
    pub name: Option<String>,
    /// Bytes held by the segment.
    pub size: u64,
    /// Current access mode.
    pub mode: SegmentMode,
}

/// A segmented, cursor-addressed byte store.
///
/// # Example
///
/// ```rust
/// use segstore_core::Store;
///
/// let mut store = Store::open_in_memory().unwrap();
/// store.append(b"AB").unwrap();
/// let token = store.save().unwrap();
/// store.append(b"CD").unwrap();
///
/// store.resume(token).unwrap();
/// let mut buf = [0u8; 8];
/// let n = store.consume(&mut buf).unwrap();
/// assert_eq!(&buf[..n], b"CD");
/// ```
///
/// The store is single-threaded: every operation takes `&mut self`.
pub struct Store {
    backend: Box<dyn Backend>,
    dir: SegmentDirectory,
    write: Option<NodeId>,
    /// Length of the write segment that predates the current write stream.
    write_base: u64,
    read: Option<NodeId>,
    /// Segment minted at open when there was nothing to resume.
    origin: Option<NodeId>,
    config: Config,
    stats: StoreStats,
    closed: bool,
}

impl Store {
    /// Opens a directory-of-files store.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ExclusiveAccessViolation`] if another store holds
    /// the directory, or an error if the directory cannot be read.
    pub fn open_dir(path: impl AsRef<Path>, config: Config) -> CoreResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "opening directory store");
        let backend = DirBackend::open(path, &config)?;
        Self::open_with_backend(Box::new(backend), config)
    }

    /// Opens an archive store.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexCorruption`] if the archive's index entry
    /// is malformed, or an error if the archive cannot be read.
    pub fn open_archive(path: impl AsRef<Path>, config: Config) -> CoreResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "opening archive store");
        let backend = ArchiveBackend::open(path, &config)?;
        Self::open_with_backend(Box::new(backend), config)
    }

    /// Opens an ephemeral store in memory.
    ///
    /// # Errors
    ///
    /// Returns an error only if opening the fresh medium fails.
    pub fn open_in_memory() -> CoreResult<Self> {
        let backend = MemoryBackend::new(&MemoryMedium::new());
        Self::open_with_backend(Box::new(backend), Config::default())
    }

    /// Opens a store over an arbitrary backend.
    ///
    /// Recovers the chain left by the previous session and resumes at its
    /// persisted resumption point. Without one, the store starts an origin
    /// bookmark after the existing chain.
    ///
    /// # Errors
    ///
    /// Returns an error if recovery fails. The backend is closed again.
    pub fn open_with_backend(mut backend: Box<dyn Backend>, config: Config) -> CoreResult<Self> {
        let recovered = backend.enumerate_existing()?;

        let mut store = Self {
            backend,
            dir: SegmentDirectory::new(),
            write: None,
            write_base: 0,
            read: None,
            origin: None,
            config,
            stats: StoreStats::new(),
            closed: false,
        };

        match store.restore(recovered) {
            Ok(resumed) => {
                info!(
                    backend = store.backend.name(),
                    segments = store.dir.len(),
                    resumed,
                    "opened store"
                );
                Ok(store)
            }
            Err(e) => {
                store.abandon();
                Err(e)
            }
        }
    }

    fn restore(&mut self, recovered: Recovered) -> CoreResult<bool> {
        for segment in recovered.segments {
            let hint = self.dir.tail();
            self.dir
                .insert(segment.key, segment.identity, segment.segment, true, hint)?;
        }

        if let Some(identity) = recovered.resumption {
            self.redeem(&identity)?;
            return Ok(true);
        }

        // Nothing to resume: keep appending after the existing chain.
        if let Some(tail) = self.dir.tail() {
            self.write = Some(tail);
            self.write_base = self.dir.node(tail).size()?;
            self.set_mode(tail, SegmentMode::Write)?;
        }
        let origin = self.mint()?;
        self.origin = Some(origin);
        Ok(false)
    }

    /// Drops every segment handle without persisting anything.
    fn abandon(&mut self) {
        self.closed = true;
        self.write = None;
        self.read = None;
        self.origin = None;
        for node in self.dir.drain() {
            let _ = node.segment.release();
        }
        if let Err(e) = self.backend.close() {
            warn!(error = %e, "failed to close backend after failed open");
        }
    }

    fn check_open(&self) -> CoreResult<()> {
        if self.closed {
            return Err(CoreError::StoreClosed);
        }
        Ok(())
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the store statistics.
    #[must_use]
    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// Returns the backend name.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Returns the number of live segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dir.len()
    }

    /// Returns `true` if the chain holds no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dir.len() == 0
    }

    /// Returns `true` once the store has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Lists the live segments in chain order.
    ///
    /// # Errors
    ///
    /// Returns an error if a segment's size cannot be read.
    pub fn segments(&self) -> CoreResult<Vec<SegmentInfo>> {
        self.dir
            .iter()
            .map(|node| -> CoreResult<SegmentInfo> {
                Ok(SegmentInfo {
                    key: node.key,
                    id: node.identity.id(),
                    name: node.identity.name().map(str::to_string),
                    size: node.size()?,
                    mode: node.mode,
                })
            })
            .collect()
    }

    /// Appends bytes to the write stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or the segment write fails.
    pub fn append(&mut self, data: &[u8]) -> CoreResult<()> {
        self.check_open()?;
        if data.is_empty() {
            return Ok(());
        }

        let write = match self.write {
            Some(write) => write,
            None => {
                // Resumed at the head of the chain; open a segment before it.
                let head = self.dir.head();
                let id = self.insert_between(None, head, false)?;
                self.write = Some(id);
                self.write_base = 0;
                self.set_mode(id, SegmentMode::Write)?;
                id
            }
        };

        self.dir.node_mut(write).write(data)?;
        self.stats.record_append(data.len() as u64);
        Ok(())
    }

    /// Reads bytes from the read stream into `buf`.
    ///
    /// The cursor moves on to the next segment when one runs out; passed
    /// segments and their tokens stay valid. Returns 0 once the stream is
    /// exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or a segment read fails.
    pub fn consume(&mut self, buf: &mut [u8]) -> CoreResult<usize> {
        self.check_open()?;

        let mut filled = 0;
        while filled < buf.len() {
            let Some(read) = self.read else {
                break;
            };
            let n = self.dir.node_mut(read).read(&mut buf[filled..])?;
            filled += n;
            if n > 0 {
                continue;
            }
            match self.dir.next(read) {
                Some(next) => {
                    self.set_mode(read, SegmentMode::Idle)?;
                    self.read = Some(next);
                    self.dir.node_mut(next).read_pos = 0;
                    self.set_mode(next, SegmentMode::Read)?;
                }
                None => break,
            }
        }

        self.stats.record_consume(filled as u64);
        Ok(filled)
    }

    /// Fills `buf` completely from the read stream.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnexpectedEnd`] if the stream runs out first.
    /// The bytes read so far are consumed either way.
    pub fn consume_exact(&mut self, buf: &mut [u8]) -> CoreResult<()> {
        let n = self.consume(buf)?;
        if n < buf.len() {
            return Err(CoreError::UnexpectedEnd {
                needed: buf.len(),
                available: n,
            });
        }
        Ok(())
    }

    /// Encodes a value and appends it.
    ///
    /// Nothing is appended unless the whole value encodes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if a length exceeds
    /// [`crate::MAX_LENGTH`], or an error if the append fails.
    pub fn append_value<T: Encode + ?Sized>(&mut self, value: &T) -> CoreResult<()> {
        let mut bytes = Vec::new();
        value.encode(&mut bytes)?;
        self.append(&bytes)
    }

    /// Consumes and decodes one value.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream ends early or the bytes are invalid.
    pub fn consume_value<T: Decode>(&mut self) -> CoreResult<T> {
        T::decode(self)
    }

    /// Bookmarks the current write position.
    ///
    /// Everything appended so far is sealed; later appends go to a new
    /// segment that the returned token names.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or the backend cannot create
    /// a segment.
    pub fn save(&mut self) -> CoreResult<Token> {
        self.check_open()?;
        let id = self.mint()?;
        self.stats.record_save();

        let node = self.dir.node(id);
        debug!(token = %node.identity, key = node.key, "saved position");
        Ok(Token::new(node.identity.clone()))
    }

    /// Returns to a bookmark, consuming the token.
    ///
    /// Unread bytes of the current read segment are folded into the write
    /// stream, so nothing appended is lost. Reading then restarts at the
    /// bookmarked position.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownToken`] if this store never minted the
    /// token or it was already redeemed. No state changes in that case.
    pub fn resume(&mut self, token: Token) -> CoreResult<()> {
        self.check_open()?;
        let identity = token.into_identity();
        self.redeem(&identity)?;
        self.stats.record_resume();
        debug!(token = %identity, "resumed position");
        Ok(())
    }

    /// Returns `true` if the token can still be redeemed on this store.
    #[must_use]
    pub fn is_valid(&self, token: &Token) -> bool {
        !self.closed && self.dir.lookup(token.identity()).is_some()
    }

    /// Encodes a token in the backend's wire format.
    #[must_use]
    pub fn encode_token(&self, token: &Token) -> Vec<u8> {
        self.backend.encode_token(token.identity())
    }

    /// Rebuilds a token from the backend's wire format.
    ///
    /// The token is only redeemable if its segment is still bookmarked.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if the bytes are malformed.
    pub fn decode_token(&self, bytes: &[u8]) -> CoreResult<Token> {
        Ok(Token::new(self.backend.decode_token(bytes)?))
    }

    /// Closes the store and persists where the next session resumes.
    ///
    /// Every segment handle is released even if persisting fails; the first
    /// error is returned. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first error met while settling, persisting or releasing.
    pub fn close(&mut self) -> CoreResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut failure = None;
        let point = match self.settle() {
            Ok(point) => Some(point),
            Err(e) => {
                note(&mut failure, e);
                None
            }
        };
        self.write = None;
        self.read = None;
        self.origin = None;

        let sync = self.config.sync_on_close;
        for id in self.dir.ids() {
            let node = self.dir.node_mut(id);
            let mut result = Ok(());
            if sync {
                result = node.segment.sync().map_err(CoreError::from);
            }
            if result.is_ok() {
                result = node.set_mode(SegmentMode::Idle);
            }
            if let Err(e) = result {
                note(&mut failure, e);
            }
        }

        if failure.is_none() {
            if let Some(point) = &point {
                let chain: Vec<TokenId> = self.dir.iter().map(|n| n.identity.clone()).collect();
                if let Err(e) = self.backend.persist_resumption_point(point.as_ref(), &chain) {
                    note(&mut failure, e);
                }
            }
        }

        let segments = self.dir.len();
        for node in self.dir.drain() {
            if let Err(e) = node.segment.release() {
                note(&mut failure, e.into());
            }
        }
        if let Err(e) = self.backend.close() {
            note(&mut failure, e);
        }

        info!(backend = self.backend.name(), segments, "closed store");
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Finds the first unread byte and shapes the chain so it starts a
    /// segment.
    fn settle(&mut self) -> CoreResult<Option<TokenId>> {
        let Some(read) = self.read else {
            return Ok(self.origin.map(|origin| self.identity(origin)));
        };
        let passed = self.passed();
        self.reclaim(&passed)?;

        let fresh = match self.write {
            Some(write) => self.dir.node(write).size()? > self.write_base,
            None => false,
        };
        let node = self.dir.node(read);
        let (pos, remaining) = (node.read_pos, node.remaining()?);

        if !fresh {
            if pos == 0 {
                return Ok(Some(self.identity(read)));
            }
            if remaining == 0 {
                let next = self.dir.next(read);
                self.read = None;
                self.retire(read, None)?;
                return Ok(next.map(|next| self.identity(next)));
            }
        }

        // Fresh bytes, then the unread rest, in one segment after the read
        // segment.
        let next = self.dir.next(read);
        let rest = self.insert_between(Some(read), next, true)?;
        if let Some(write) = self.write.filter(|_| fresh) {
            let moved = self.copy_from(write, self.write_base, rest)?;
            self.dir.node_mut(write).segment.truncate(self.write_base)?;
            debug!(bytes = moved, "split fresh bytes from write segment");
            if self.write_base == 0 && !self.dir.is_registered(write) {
                self.write = None;
                self.delete_node(write)?;
            }
        }
        self.copy_from(read, pos, rest)?;
        self.read = None;
        self.retire(read, Some(pos))?;
        Ok(Some(self.identity(rest)))
    }

    /// Seals the write segment and opens a registered one after it.
    fn mint(&mut self) -> CoreResult<NodeId> {
        if let Some(write) = self.write {
            self.set_mode(write, SegmentMode::Idle)?;
        }

        let next = match self.write {
            Some(write) => self.dir.next(write),
            None => self.dir.head(),
        };
        let id = self.insert_between(self.write, next, true)?;
        self.write = Some(id);
        self.write_base = 0;
        self.set_mode(id, SegmentMode::Write)?;

        if let Some(read) = self.read {
            self.set_mode(read, SegmentMode::Read)?;
        }
        if self.dir.gap(Some(id), self.dir.next(id)) < 2 {
            self.rearrange()?;
        }
        Ok(id)
    }

    fn redeem(&mut self, identity: &TokenId) -> CoreResult<()> {
        let target = self
            .dir
            .lookup(identity)
            .ok_or_else(|| CoreError::unknown_token(identity))?;

        let previous_write = self.write;
        let passed = self.passed();
        match (self.write, self.read) {
            (Some(write), Some(read)) if read != target => {
                let pos = self.dir.node(read).read_pos;
                self.fold(read, write)?;
                self.set_mode(write, SegmentMode::Idle)?;
                self.read = None;
                self.retire(read, Some(pos))?;
            }
            (Some(write), _) => self.set_mode(write, SegmentMode::Idle)?,
            (None, Some(read)) if read != target => {
                self.read = None;
                self.retire(read, None)?;
            }
            _ => {}
        }
        self.reclaim(&passed)?;
        self.dir.unregister(identity);

        self.write = self.dir.prev(target);
        if let Some(write) = self.write {
            // Folded and fresh bytes stay above the base of a kept segment.
            if previous_write != Some(write) {
                self.write_base = self.dir.node(write).size()?;
            }
            self.set_mode(write, SegmentMode::Write)?;
        } else {
            self.write_base = 0;
        }

        self.read = Some(target);
        self.dir.node_mut(target).read_pos = 0;
        self.set_mode(target, SegmentMode::Read)?;
        self.origin = None;
        Ok(())
    }

    /// Creates a segment between two neighbours, renumbering first if the
    /// gap between them is used up.
    fn insert_between(
        &mut self,
        lo: Option<NodeId>,
        hi: Option<NodeId>,
        register: bool,
    ) -> CoreResult<NodeId> {
        if self.dir.gap(lo, hi) < 2 {
            self.rearrange()?;
        }
        let key = self.dir.key_between(lo, hi);
        let (identity, segment) = self.backend.create_segment(key)?;
        let id = self.dir.insert(key, identity, segment, register, lo)?;
        self.stats.record_segment_created();
        Ok(id)
    }

    fn rearrange(&mut self) -> CoreResult<()> {
        self.dir.rearrange()?;
        self.stats.record_rearrange();
        info!(segments = self.dir.len(), "rearranged segment keys");
        Ok(())
    }

    /// Moves the unread rest of `from` onto the end of `to`.
    fn fold(&mut self, from: NodeId, to: NodeId) -> CoreResult<()> {
        let pos = self.dir.node(from).read_pos;
        let folded = self.copy_from(from, pos, to)?;
        self.dir.node_mut(from).read_pos += folded;
        self.stats.record_fold(folded);
        if folded > 0 {
            debug!(bytes = folded, "folded unread bytes into write segment");
        }
        Ok(())
    }

    fn copy_from(&mut self, from: NodeId, offset: u64, to: NodeId) -> CoreResult<u64> {
        let mut buf = vec![0u8; self.config.copy_buffer_size.max(1)];
        let mut offset = offset;
        let mut copied = 0;
        loop {
            let n = self.dir.node_mut(from).segment.read_at(offset, &mut buf)?;
            if n == 0 {
                break;
            }
            self.dir.node_mut(to).write(&buf[..n])?;
            offset += n as u64;
            copied += n as u64;
        }
        Ok(copied)
    }

    /// Segments the reader has moved past since the last resume.
    fn passed(&self) -> Vec<NodeId> {
        let Some(read) = self.read else {
            return Vec::new();
        };
        let mut cursor = match self.write {
            Some(write) => self.dir.next(write),
            None => self.dir.head(),
        };
        let mut ids = Vec::new();
        while let Some(id) = cursor.filter(|&id| id != read) {
            ids.push(id);
            cursor = self.dir.next(id);
        }
        ids
    }

    /// Deletes the passed segments no token names.
    fn reclaim(&mut self, passed: &[NodeId]) -> CoreResult<()> {
        for &id in passed {
            if !self.dir.is_registered(id) {
                self.delete_node(id)?;
            }
        }
        Ok(())
    }

    /// Drops a read segment the cursor is leaving.
    ///
    /// A segment a token still names is kept, cut back to `keep` bytes when
    /// its rest was moved elsewhere.
    fn retire(&mut self, id: NodeId, keep: Option<u64>) -> CoreResult<()> {
        if !self.dir.is_registered(id) {
            return self.delete_node(id);
        }
        if let Some(len) = keep {
            self.dir.node_mut(id).segment.truncate(len)?;
        }
        self.dir.node_mut(id).read_pos = 0;
        self.set_mode(id, SegmentMode::Idle)
    }

    fn delete_node(&mut self, id: NodeId) -> CoreResult<()> {
        let node = self.dir.remove(id);
        node.segment.delete()?;
        self.stats.record_segment_deleted();
        Ok(())
    }

    fn set_mode(&mut self, id: NodeId, mode: SegmentMode) -> CoreResult<()> {
        self.dir.node_mut(id).set_mode(mode)
    }

    fn identity(&self, id: NodeId) -> TokenId {
        self.dir.node(id).identity.clone()
    }
}

/// Keeps the first error and logs the rest.
fn note(failure: &mut Option<CoreError>, error: CoreError) {
    if failure.is_some() {
        warn!(error = %error, "additional error while closing store");
    } else {
        *failure = Some(error);
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close store on drop");
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("backend", &self.backend.name())
            .field("segments", &self.dir.len())
            .field("write_base", &self.write_base)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Source for Store {
    fn pull(&mut self, buf: &mut [u8]) -> CoreResult<usize> {
        self.consume(buf)
    }
}

fn into_io(error: CoreError) -> io::Error {
    match error {
        CoreError::Io(e) => e,
        other => io::Error::other(other),
    }
}

impl io::Read for Store {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.consume(buf).map_err(into_io)
    }
}

impl io::Write for Store {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf).map_err(into_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // Appends go straight to the segment
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Watched;
    use segstore_storage::Segment;
    use std::io::{Read, Write};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    fn reopen(medium: &MemoryMedium, config: Config) -> Store {
        Store::open_with_backend(Box::new(MemoryBackend::new(medium)), config).unwrap()
    }

    fn drain(store: &mut Store) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 5];
        loop {
            let n = store.consume(&mut buf).unwrap();
            if n == 0 {
                return out;
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[test]
    fn fresh_store_has_origin_segment() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.len(), 1);
        let segments = store.segments().unwrap();
        assert_eq!(segments[0].mode, SegmentMode::Write);
        assert_eq!(segments[0].key, 0);
    }

    #[test]
    fn nothing_is_readable_before_resume() {
        let mut store = Store::open_in_memory().unwrap();
        store.append(b"hello").unwrap();
        assert!(drain(&mut store).is_empty());
    }

    #[test]
    fn resume_reads_bytes_written_after_save() {
        let mut store = Store::open_in_memory().unwrap();
        store.append(b"AB").unwrap();
        let token = store.save().unwrap();
        store.append(b"CD").unwrap();

        store.resume(token).unwrap();
        assert_eq!(drain(&mut store), b"CD");
    }

    #[test]
    fn resume_right_after_save_reads_nothing() {
        let mut store = Store::open_in_memory().unwrap();
        store.append(b"AB").unwrap();
        let token = store.save().unwrap();
        store.resume(token).unwrap();
        assert!(drain(&mut store).is_empty());
    }

    #[test]
    fn token_is_spent_after_resume() {
        let mut store = Store::open_in_memory().unwrap();
        let token = store.save().unwrap();
        assert!(store.is_valid(&token));

        let bytes = store.encode_token(&token);
        store.resume(token).unwrap();

        let copy = store.decode_token(&bytes).unwrap();
        assert!(!store.is_valid(&copy));
        assert!(matches!(
            store.resume(copy),
            Err(CoreError::UnknownToken { .. })
        ));
    }

    #[test]
    fn unknown_token_changes_nothing() {
        let mut store = Store::open_in_memory().unwrap();
        store.append(b"AB").unwrap();
        let token = store.save().unwrap();
        store.append(b"CD").unwrap();
        store.resume(token).unwrap();
        let mut one = [0u8; 1];
        store.consume(&mut one).unwrap();

        let before = store.segments().unwrap();
        let bogus = store.decode_token(&999i64.to_le_bytes()).unwrap();
        assert!(matches!(
            store.resume(bogus),
            Err(CoreError::UnknownToken { .. })
        ));
        assert_eq!(store.segments().unwrap(), before);
        assert_eq!(drain(&mut store), b"D");
    }

    #[test]
    fn consume_moves_across_segments() {
        let medium = MemoryMedium::new();
        let mut store = reopen(&medium, Config::default());
        store.append(b"one").unwrap();
        let _ = store.save().unwrap();
        store.append(b"two").unwrap();
        let _ = store.save().unwrap();
        store.append(b"three").unwrap();
        store.close().unwrap();

        let mut store = reopen(&medium, Config::default());
        assert_eq!(drain(&mut store), b"onetwothree");
        // Passed segments stay until close
        assert_eq!(store.len(), 3);
        assert_eq!(store.stats().segments_deleted(), 0);

        store.close().unwrap();
        // Only the redeemed origin is reclaimed; the bookmarked ones remain
        assert_eq!(store.stats().segments_deleted(), 1);
        assert_eq!(medium.pool().len(), 2);
    }

    #[test]
    fn passed_bookmarks_stay_redeemable() {
        let mut store = Store::open_in_memory().unwrap();
        let t1 = store.save().unwrap();
        store.append(b"a").unwrap();
        let t2 = store.save().unwrap();
        store.append(b"b").unwrap();
        let t3 = store.save().unwrap();
        store.append(b"c").unwrap();

        store.resume(t1).unwrap();
        assert_eq!(drain(&mut store), b"abc");
        assert!(store.is_valid(&t2));
        assert!(store.is_valid(&t3));

        store.resume(t2).unwrap();
        assert_eq!(drain(&mut store), b"bc");
        assert!(store.is_valid(&t3));
        store.resume(t3).unwrap();
        assert_eq!(drain(&mut store), b"c");
    }

    #[test]
    fn passed_bookmarks_survive_close() {
        let medium = MemoryMedium::new();
        let mut store = reopen(&medium, Config::default());
        let t1 = store.save().unwrap();
        store.append(b"a").unwrap();
        let t2 = store.save().unwrap();
        store.append(b"b").unwrap();
        let wire = store.encode_token(&t2);

        store.resume(t1).unwrap();
        assert_eq!(drain(&mut store), b"ab");
        store.close().unwrap();

        let mut store = reopen(&medium, Config::default());
        let t2 = store.decode_token(&wire).unwrap();
        assert!(store.is_valid(&t2));
        store.resume(t2).unwrap();
        assert_eq!(drain(&mut store), b"b");
    }

    #[test]
    fn fold_keeps_unread_bytes_for_next_session() {
        let medium = MemoryMedium::new();
        let mut store = reopen(&medium, Config::default().copy_buffer_size(1));
        store.append(b"A").unwrap();
        let t1 = store.save().unwrap();
        store.append(b"BCD").unwrap();
        let t2 = store.save().unwrap();
        store.append(b"E").unwrap();

        store.resume(t1).unwrap();
        let mut one = [0u8; 1];
        store.consume(&mut one).unwrap();
        assert_eq!(&one, b"B");

        store.resume(t2).unwrap();
        assert_eq!(drain(&mut store), b"E");
        assert_eq!(store.stats().snapshot().bytes_folded, 2);
        store.close().unwrap();

        let mut store = reopen(&medium, Config::default());
        assert_eq!(drain(&mut store), b"CD");
    }

    #[test]
    fn append_after_resume_at_head_creates_segment() {
        let medium = MemoryMedium::new();
        let mut store = reopen(&medium, Config::default());
        store.append(b"old").unwrap();
        store.close().unwrap();

        // Resumes at the origin, which is the head of the chain
        let mut store = reopen(&medium, Config::default());
        assert_eq!(store.len(), 1);
        store.append(b"new").unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(drain(&mut store), b"old");
        store.close().unwrap();

        let mut store = reopen(&medium, Config::default());
        assert_eq!(drain(&mut store), b"new");
    }

    #[test]
    fn partially_consumed_segment_resumes_mid_way() {
        let medium = MemoryMedium::new();
        let mut store = reopen(&medium, Config::default());
        store.append(b"abcdef").unwrap();
        store.close().unwrap();

        let mut store = reopen(&medium, Config::default());
        let mut buf = [0u8; 2];
        store.consume(&mut buf).unwrap();
        store.close().unwrap();

        let mut store = reopen(&medium, Config::default());
        assert_eq!(drain(&mut store), b"cdef");
    }

    #[test]
    fn fully_consumed_store_is_exhausted() {
        let medium = MemoryMedium::new();
        let mut store = reopen(&medium, Config::default());
        store.append(b"abc").unwrap();
        store.close().unwrap();

        let mut store = reopen(&medium, Config::default());
        assert_eq!(drain(&mut store), b"abc");
        store.close().unwrap();
        assert_eq!(medium.resumption(), None);

        let mut store = reopen(&medium, Config::default());
        assert!(drain(&mut store).is_empty());
    }

    #[test]
    fn many_saves_trigger_rearrange() {
        let medium = MemoryMedium::new();
        let mut store = reopen(&medium, Config::default());
        let mut expected = Vec::new();
        for i in 0..80u8 {
            store.append(&[i]).unwrap();
            expected.push(i);
            let _ = store.save().unwrap();
        }
        assert!(store.stats().rearranges() >= 1);

        let keys: Vec<i64> = store.segments().unwrap().iter().map(|s| s.key).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        store.close().unwrap();

        let mut store = reopen(&medium, Config::default());
        assert_eq!(drain(&mut store), expected);
    }

    #[test]
    fn tokens_survive_rearrange() {
        let mut store = Store::open_in_memory().unwrap();
        store.append(b"x").unwrap();
        let first = store.save().unwrap();
        store.append(b"payload").unwrap();
        for _ in 0..80 {
            let _ = store.save().unwrap();
        }
        assert!(store.stats().rearranges() >= 1);

        assert!(store.is_valid(&first));
        store.resume(first).unwrap();
        assert_eq!(drain(&mut store), b"payload");
    }

    #[test]
    fn closed_store_rejects_operations() {
        let mut store = Store::open_in_memory().unwrap();
        store.close().unwrap();
        assert!(store.is_closed());
        assert!(matches!(store.append(b"x"), Err(CoreError::StoreClosed)));
        assert!(matches!(store.save(), Err(CoreError::StoreClosed)));
        let mut buf = [0u8; 1];
        assert!(matches!(store.consume(&mut buf), Err(CoreError::StoreClosed)));
        // Second close is a no-op
        store.close().unwrap();
    }

    #[test]
    fn typed_values_round_trip() {
        let medium = MemoryMedium::new();
        let mut store = reopen(&medium, Config::default());
        store.append_value(&42u32).unwrap();
        store.append_value("name").unwrap();
        store.append_value(&vec![1i64, -1]).unwrap();
        store.close().unwrap();

        let mut store = reopen(&medium, Config::default());
        assert_eq!(store.consume_value::<u32>().unwrap(), 42);
        assert_eq!(store.consume_value::<String>().unwrap(), "name");
        assert_eq!(store.consume_value::<Vec<i64>>().unwrap(), vec![1, -1]);
        assert!(matches!(
            store.consume_value::<u8>(),
            Err(CoreError::UnexpectedEnd { .. })
        ));
    }

    #[test]
    fn oversized_value_appends_nothing() {
        let medium = MemoryMedium::new();
        let mut store = reopen(&medium, Config::default());
        store.append_value(&7u8).unwrap();
        let payload = vec![0u8; crate::MAX_LENGTH + 1];
        assert!(matches!(
            store.append_value(payload.as_slice()),
            Err(CoreError::InvalidFormat { .. })
        ));
        assert_eq!(store.stats().snapshot().bytes_appended, 1);
        store.close().unwrap();

        let mut store = reopen(&medium, Config::default());
        assert_eq!(store.consume_value::<u8>().unwrap(), 7);
        assert!(drain(&mut store).is_empty());
    }

    #[test]
    fn consume_exact_reports_short_stream() {
        let mut store = Store::open_in_memory().unwrap();
        store.append(b"abc").unwrap();
        let token = store.save().unwrap();
        store.append(b"xy").unwrap();
        store.resume(token).unwrap();

        let mut buf = [0u8; 3];
        assert!(matches!(
            store.consume_exact(&mut buf),
            Err(CoreError::UnexpectedEnd {
                needed: 3,
                available: 2
            })
        ));
    }

    #[test]
    fn std_io_adapters() {
        let medium = MemoryMedium::new();
        let mut store = reopen(&medium, Config::default());
        write!(store, "hello {}", 7).unwrap();
        store.flush().unwrap();
        store.close().unwrap();

        let mut store = reopen(&medium, Config::default());
        let mut text = String::new();
        store.read_to_string(&mut text).unwrap();
        assert_eq!(text, "hello 7");
    }

    /// Memory backend whose resumption write always fails.
    struct UnwritableIndex {
        inner: MemoryBackend,
        released: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    impl Backend for UnwritableIndex {
        fn name(&self) -> &'static str {
            "unwritable"
        }

        fn enumerate_existing(&mut self) -> CoreResult<Recovered> {
            self.inner.enumerate_existing()
        }

        fn create_segment(&mut self, key: i64) -> CoreResult<(TokenId, Box<dyn Segment>)> {
            let (identity, segment) = self.inner.create_segment(key)?;
            let watched = Watched::new(segment).counting_releases(&self.released);
            Ok((identity, Box::new(watched)))
        }

        fn persist_resumption_point(
            &mut self,
            _point: Option<&TokenId>,
            _chain: &[TokenId],
        ) -> CoreResult<()> {
            Err(CoreError::Io(io::Error::other("index write refused")))
        }

        fn encode_token(&self, identity: &TokenId) -> Vec<u8> {
            self.inner.encode_token(identity)
        }

        fn decode_token(&self, bytes: &[u8]) -> CoreResult<TokenId> {
            self.inner.decode_token(bytes)
        }

        fn close(&mut self) -> CoreResult<()> {
            self.closed.store(true, Ordering::SeqCst);
            self.inner.close()
        }
    }

    #[test]
    fn failed_persist_still_releases_everything() {
        let medium = MemoryMedium::new();
        let released = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let backend = UnwritableIndex {
            inner: MemoryBackend::new(&medium),
            released: Arc::clone(&released),
            closed: Arc::clone(&closed),
        };
        let mut store = Store::open_with_backend(Box::new(backend), Config::default()).unwrap();
        store.append(b"AB").unwrap();
        let _ = store.save().unwrap();
        store.append(b"CD").unwrap();
        assert_eq!(store.len(), 2);

        match store.close() {
            Err(CoreError::Io(e)) => assert_eq!(e.to_string(), "index write refused"),
            other => panic!("expected the index error, got {other:?}"),
        }
        assert!(store.is_closed());
        assert_eq!(released.load(Ordering::SeqCst), 2);
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(medium.resumption(), None);

        // Second close is a no-op
        store.close().unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stats_count_public_saves_only() {
        let mut store = Store::open_in_memory().unwrap();
        // The origin segment is created at open without a save
        assert_eq!(store.stats().snapshot().saves, 0);
        assert_eq!(store.stats().segments_created(), 1);
        let _ = store.save().unwrap();
        assert_eq!(store.stats().snapshot().saves, 1);
    }
}
