//! File-based segments for persistent storage.
//!
//! Each segment is one file that starts with a small self-describing header
//! so a directory of segments can be reordered without any other metadata:
//!
//! ```text
//! magic "SGS1" (4) | order key i64 LE (8) | stem length u16 LE (2) | stem | data...
//! ```

use crate::error::{StorageError, StorageResult};
use crate::segment::{Segment, SegmentMode};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes at the start of every segment file.
pub const SEGMENT_MAGIC: [u8; 4] = *b"SGS1";

/// Byte offset of the order key within the header.
const KEY_OFFSET: u64 = 4;

/// Size of the fixed part of the header (magic, key, stem length).
const FIXED_HEADER_LEN: usize = 14;

/// Header stored at the start of a segment file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Ordering key of the segment within its chain.
    pub key: i64,
    /// Stable name of the segment, independent of the file it lives in.
    pub stem: String,
}

impl SegmentHeader {
    /// Creates a header.
    #[must_use]
    pub fn new(key: i64, stem: impl Into<String>) -> Self {
        Self {
            key,
            stem: stem.into(),
        }
    }

    /// Returns the encoded length of the header in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> u64 {
        (FIXED_HEADER_LEN + self.stem.len()) as u64
    }

    /// Encodes the header to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the stem is longer than `u16::MAX` bytes.
    pub fn encode(&self) -> StorageResult<Vec<u8>> {
        let stem_len = u16::try_from(self.stem.len())
            .map_err(|_| StorageError::Corrupted(format!("stem too long: {}", self.stem)))?;

        let mut buf = Vec::with_capacity(FIXED_HEADER_LEN + self.stem.len());
        buf.extend_from_slice(&SEGMENT_MAGIC);
        buf.extend_from_slice(&self.key.to_le_bytes());
        buf.extend_from_slice(&stem_len.to_le_bytes());
        buf.extend_from_slice(self.stem.as_bytes());
        Ok(buf)
    }

    /// Reads a header from the start of `reader`.
    ///
    /// # Errors
    ///
    /// Returns an error if the magic is wrong, the header is truncated, or
    /// the stem is not valid UTF-8.
    pub fn read_from(reader: &mut impl Read) -> StorageResult<Self> {
        let mut fixed = [0u8; FIXED_HEADER_LEN];
        reader.read_exact(&mut fixed).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                StorageError::Corrupted("segment header truncated".into())
            }
            _ => StorageError::Io(e),
        })?;

        if fixed[0..4] != SEGMENT_MAGIC {
            return Err(StorageError::Corrupted("invalid segment magic".into()));
        }

        let mut key_bytes = [0u8; 8];
        key_bytes.copy_from_slice(&fixed[4..12]);
        let key = i64::from_le_bytes(key_bytes);
        let stem_len = u16::from_le_bytes([fixed[12], fixed[13]]) as usize;

        let mut stem = vec![0u8; stem_len];
        reader
            .read_exact(&mut stem)
            .map_err(|_| StorageError::Corrupted("segment stem truncated".into()))?;
        let stem = String::from_utf8(stem)
            .map_err(|_| StorageError::Corrupted("segment stem is not UTF-8".into()))?;

        Ok(Self { key, stem })
    }

    /// Reads the header of the segment file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its header is invalid.
    pub fn read_path(path: &Path) -> StorageResult<Self> {
        let mut file = File::open(path)?;
        Self::read_from(&mut file)
    }
}

/// A file-based segment.
///
/// The OS handle is only held while the segment is in
/// [`SegmentMode::Write`] or [`SegmentMode::Read`]; an idle segment is just
/// a path, so a long chain does not exhaust file descriptors. Operations on
/// an idle segment open a handle for that call only and leave it idle.
///
/// # Example
///
/// ```no_run
/// use segstore_storage::{FileSegment, Segment, SegmentMode};
/// use std::path::Path;
///
/// let mut segment = FileSegment::create(Path::new("0001.seg"), 0, "0001").unwrap();
/// segment.set_mode(SegmentMode::Write).unwrap();
/// segment.append(b"persistent data").unwrap();
/// segment.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileSegment {
    path: PathBuf,
    header_len: u64,
    size: u64,
    file: Option<File>,
}

impl FileSegment {
    /// Creates a new segment file with the given key and stem.
    ///
    /// # Errors
    ///
    /// Returns an error if the file already exists or cannot be written.
    pub fn create(path: &Path, key: i64, stem: &str) -> StorageResult<Self> {
        let header = SegmentHeader::new(key, stem);
        let encoded = header.encode()?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.write_all(&encoded)?;
        file.sync_all()?;

        Ok(Self {
            path: path.to_path_buf(),
            header_len: encoded.len() as u64,
            size: 0,
            file: None,
        })
    }

    /// Opens an existing segment file and returns it with its header.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its header is invalid.
    pub fn open(path: &Path) -> StorageResult<(Self, SegmentHeader)> {
        let mut file = File::open(path)?;
        let header = SegmentHeader::read_from(&mut file)?;
        let total = file.metadata()?.len();
        let header_len = header.encoded_len();

        let segment = Self {
            path: path.to_path_buf(),
            header_len,
            size: total.saturating_sub(header_len),
            file: None,
        };
        Ok((segment, header))
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` if the segment currently holds an OS handle.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn open_file(&self) -> io::Result<File> {
        OpenOptions::new().read(true).write(true).open(&self.path)
    }

    /// Runs `f` on the held handle, or on a transient one while idle.
    fn with_file<R>(&mut self, f: impl FnOnce(&mut File) -> io::Result<R>) -> StorageResult<R> {
        match self.file.as_mut() {
            Some(file) => Ok(f(file)?),
            None => {
                let mut transient = self.open_file()?;
                Ok(f(&mut transient)?)
            }
        }
    }
}

impl Segment for FileSegment {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> StorageResult<usize> {
        let size = self.size;
        if offset > size {
            return Err(StorageError::ReadPastEnd { offset, size });
        }

        let n = buf.len().min((size - offset) as usize);
        if n == 0 {
            return Ok(0);
        }

        let position = self.header_len + offset;
        self.with_file(|file| {
            file.seek(SeekFrom::Start(position))?;
            file.read_exact(&mut buf[..n])
        })?;

        Ok(n)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.size;
        if data.is_empty() {
            return Ok(offset);
        }

        self.with_file(|file| {
            file.seek(SeekFrom::End(0))?;
            file.write_all(data)
        })?;
        self.size += data.len() as u64;

        Ok(offset)
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.size)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if new_size > self.size {
            return Err(StorageError::ReadPastEnd {
                offset: new_size,
                size: self.size,
            });
        }

        let total = self.header_len + new_size;
        self.with_file(|file| file.set_len(total))?;
        self.size = new_size;

        Ok(())
    }

    fn set_mode(&mut self, mode: SegmentMode) -> StorageResult<()> {
        match mode {
            SegmentMode::Idle => {
                if let Some(mut file) = self.file.take() {
                    file.flush()?;
                }
            }
            SegmentMode::Write | SegmentMode::Read => {
                if self.file.is_none() {
                    self.file = Some(self.open_file()?);
                }
            }
        }
        Ok(())
    }

    fn relabel(&mut self, key: i64) -> StorageResult<()> {
        self.with_file(|file| {
            file.seek(SeekFrom::Start(KEY_OFFSET))?;
            file.write_all(&key.to_le_bytes())
        })
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.with_file(|file| file.sync_all())
    }

    fn delete(mut self: Box<Self>) -> StorageResult<()> {
        drop(self.file.take());
        fs::remove_file(&self.path)?;
        Ok(())
    }

    fn release(mut self: Box<Self>) -> StorageResult<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}
