//! # segstore storage
//!
//! Segment contract and byte-store implementations for segstore.
//!
//! This crate provides the lowest-level storage abstraction of the store.
//! Segments are **opaque byte stores** - they do not interpret the data they
//! hold and know nothing about chains, cursors or position tokens.
//!
//! ## Design Principles
//!
//! - Segments are positional byte stores (read at, append, truncate)
//! - The chain owner keeps cursors and decides access modes
//! - Must be `Send` so a store can move between threads
//! - Deleting or releasing a segment consumes it
//!
//! ## Available Segments
//!
//! - [`MemorySegment`] - Buffer in a shared [`MemoryPool`]
//! - [`FileSegment`] - One file per segment with a self-describing header
//!
//! ## Example
//!
//! ```rust
//! use segstore_storage::{MemoryPool, Segment};
//!
//! let pool = MemoryPool::new();
//! let mut segment = pool.create(1);
//! let offset = segment.append(b"hello world").unwrap();
//! let mut buf = [0u8; 11];
//! segment.read_at(offset, &mut buf).unwrap();
//! assert_eq!(&buf, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod segment;

pub use error::{StorageError, StorageResult};
pub use file::{FileSegment, SegmentHeader, SEGMENT_MAGIC};
pub use memory::{MemoryPool, MemorySegment};
pub use segment::{Segment, SegmentMode};
