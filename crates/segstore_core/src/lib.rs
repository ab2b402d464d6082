//! # segstore core
//!
//! Segmented bookmark store engine.
//!
//! A store holds a byte stream as an ordered chain of independently stored
//! segments. Callers append through a write cursor, consume through a read
//! cursor, and can bookmark the write position with [`Store::save`]. Resuming
//! a bookmark with [`Store::resume`] moves reading back to that point without
//! losing anything written since.
//!
//! This crate provides:
//! - [`Store`] - The engine: save, resume, append, consume, close
//! - [`Token`] - Single-use bookmarks, consumed by move on resume
//! - [`Backend`] - The medium contract, with directory, archive and memory
//!   implementations
//! - [`Encode`] / [`Decode`] - Typed values over the byte stream
//!
//! ## Example
//!
//! ```rust
//! use segstore_core::{Config, Store};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("spool");
//!
//! let mut store = Store::open_dir(&path, Config::default()).unwrap();
//! store.append(b"AB").unwrap();
//! let token = store.save().unwrap();
//! store.append(b"CD").unwrap();
//! store.resume(token).unwrap();
//!
//! let mut buf = [0u8; 4];
//! let n = store.consume(&mut buf).unwrap();
//! assert_eq!(&buf[..n], b"CD");
//! store.close().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod chain;
mod codec;
mod config;
mod error;
mod stats;
mod store;
#[cfg(test)]
mod testing;
mod token;

pub use backend::{
    entry_name, ArchiveBackend, Backend, DirBackend, MemoryBackend, MemoryMedium, Recovered,
    RecoveredSegment, ENTRY_FILE, INDEX_ENTRY, LOCK_FILE,
};
pub use codec::{Decode, Encode, Source, MAX_LENGTH};
pub use config::{Config, DEFAULT_COPY_BUFFER_SIZE};
pub use error::{CoreError, CoreResult};
pub use stats::{StatsSnapshot, StoreStats};
pub use store::{SegmentInfo, Store};
pub use token::{Token, TokenId};

pub use segstore_storage::SegmentMode;
