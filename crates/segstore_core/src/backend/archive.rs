//! Archive-entries backend.
//!
//! The whole store is one zip archive:
//!
//! ```text
//! store.zip
//! ├─ $index        [i64 LE resumption seq or -1][i64 LE segment counter]
//! ├─ ĀĀĀĀĀĀĀĀ      segment 0
//! ├─ āĀĀĀĀĀĀĀ      segment 1
//! └─ ...           one entry per live segment, in chain order
//! ```
//!
//! Segment entry names come from the 8 little-endian bytes of the segment's
//! sequence number, each byte biased into U+0100..=U+01FF so names never
//! contain NUL or control characters.
//!
//! While the store is open, segments live in a [`MemoryPool`]. Close writes
//! a fresh archive next to the old one and renames it into place.

use super::{decode_numbered, encode_numbered, sync_directory, Backend, Recovered, RecoveredSegment};
use crate::chain::spread_keys;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::token::TokenId;
use segstore_storage::{MemoryPool, Segment};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Name of the reserved index entry.
pub const INDEX_ENTRY: &str = "$index";

/// Length of the index entry in bytes.
const INDEX_LEN: usize = 16;

/// Resumption value meaning "stream exhausted".
const NO_RESUMPTION: i64 = -1;

/// First code point of the biased name range.
const NAME_BIAS: u32 = 0x100;

/// Returns the archive entry name of a segment sequence number.
#[must_use]
pub fn entry_name(seq: i64) -> String {
    seq.to_le_bytes()
        .iter()
        .filter_map(|&b| char::from_u32(NAME_BIAS + u32::from(b)))
        .collect()
}

fn seq_from_entry_name(name: &str) -> Option<i64> {
    let mut bytes = [0u8; 8];
    let mut chars = name.chars();
    for byte in &mut bytes {
        let offset = u32::from(chars.next()?).checked_sub(NAME_BIAS)?;
        *byte = u8::try_from(offset).ok()?;
    }
    if chars.next().is_some() {
        return None;
    }
    Some(i64::from_le_bytes(bytes))
}

/// A store kept in a single zip archive.
#[derive(Debug)]
pub struct ArchiveBackend {
    path: PathBuf,
    pool: MemoryPool,
    counter: i64,
    config: Config,
}

impl ArchiveBackend {
    /// Opens an archive store, creating an empty one if allowed.
    ///
    /// The archive itself is only written on close.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive doesn't exist and `create_if_missing`
    /// is false.
    pub fn open(path: &Path, config: &Config) -> CoreResult<Self> {
        if !path.exists() && !config.create_if_missing {
            return Err(CoreError::invalid_format(format!(
                "archive does not exist: {}",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            pool: MemoryPool::new(),
            counter: 0,
            config: config.clone(),
        })
    }

    /// Returns the path to the archive.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn write_archive(&self, resumption: i64, chain: &[TokenId]) -> CoreResult<()> {
        let method = if self.config.compress_archive {
            CompressionMethod::Deflated
        } else {
            CompressionMethod::Stored
        };
        let options = SimpleFileOptions::default().compression_method(method);

        let temp_path = self.temp_path();
        let mut zip = ZipWriter::new(File::create(&temp_path)?);

        let mut index = Vec::with_capacity(INDEX_LEN);
        index.extend_from_slice(&resumption.to_le_bytes());
        index.extend_from_slice(&self.counter.to_le_bytes());
        zip.start_file(INDEX_ENTRY, options)?;
        zip.write_all(&index)?;

        for identity in chain {
            let data = self.pool.data(identity.id()).ok_or_else(|| {
                CoreError::index_corruption(format!("segment {identity} missing from pool"))
            })?;
            zip.start_file(entry_name(identity.id()), options)?;
            zip.write_all(&data)?;
        }

        let file = zip.finish()?;
        if self.config.sync_on_close {
            file.sync_all()?;
        }
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        if self.config.sync_on_close {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                sync_directory(parent)?;
            }
        }
        Ok(())
    }
}

impl Backend for ArchiveBackend {
    fn name(&self) -> &'static str {
        "archive"
    }

    fn enumerate_existing(&mut self) -> CoreResult<Recovered> {
        if !self.path.exists() {
            return Ok(Recovered::default());
        }

        let mut archive = ZipArchive::new(File::open(&self.path)?)?;

        let mut index = Vec::with_capacity(INDEX_LEN);
        match archive.by_name(INDEX_ENTRY) {
            Ok(mut entry) => {
                entry.read_to_end(&mut index)?;
            }
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(CoreError::index_corruption("index entry missing"));
            }
            Err(e) => return Err(e.into()),
        }
        if index.len() != INDEX_LEN {
            return Err(CoreError::index_corruption(format!(
                "index entry is {} bytes, expected {INDEX_LEN}",
                index.len()
            )));
        }
        let mut word = [0u8; 8];
        word.copy_from_slice(&index[..8]);
        let resumption = i64::from_le_bytes(word);
        word.copy_from_slice(&index[8..]);
        let counter = i64::from_le_bytes(word);
        if counter < 0 {
            return Err(CoreError::index_corruption(format!(
                "negative segment counter {counter}"
            )));
        }

        let mut loaded = Vec::with_capacity(archive.len());
        let mut known = HashSet::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.name() == INDEX_ENTRY {
                continue;
            }
            let seq = seq_from_entry_name(entry.name()).ok_or_else(|| {
                CoreError::index_corruption(format!("unexpected entry {:?}", entry.name()))
            })?;
            if !(0..counter).contains(&seq) {
                return Err(CoreError::index_corruption(format!(
                    "segment {seq} beyond counter {counter}"
                )));
            }
            if !known.insert(seq) {
                return Err(CoreError::index_corruption(format!("duplicate segment {seq}")));
            }
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            loaded.push((seq, self.pool.with_data(seq, data)));
        }

        let resumption = match resumption {
            NO_RESUMPTION => None,
            seq if known.contains(&seq) => Some(TokenId::numbered(seq)),
            seq => {
                return Err(CoreError::index_corruption(format!(
                    "resumption segment {seq} not in archive"
                )))
            }
        };

        // Entry order is chain order; keys are spread afresh.
        let keys = spread_keys(loaded.len())?;
        let segments: Vec<_> = loaded
            .into_iter()
            .zip(keys)
            .map(|((seq, segment), key)| RecoveredSegment {
                identity: TokenId::numbered(seq),
                key,
                segment: Box::new(segment),
            })
            .collect();

        self.counter = counter;
        debug!(path = %self.path.display(), segments = segments.len(), counter, "read archive");
        Ok(Recovered {
            segments,
            resumption,
        })
    }

    fn create_segment(&mut self, _key: i64) -> CoreResult<(TokenId, Box<dyn Segment>)> {
        let seq = self.counter;
        self.counter += 1;
        Ok((TokenId::numbered(seq), Box::new(self.pool.create(seq))))
    }

    fn persist_resumption_point(
        &mut self,
        point: Option<&TokenId>,
        chain: &[TokenId],
    ) -> CoreResult<()> {
        let resumption = point.map_or(NO_RESUMPTION, TokenId::id);
        self.write_archive(resumption, chain)
    }

    fn encode_token(&self, identity: &TokenId) -> Vec<u8> {
        encode_numbered(identity)
    }

    fn decode_token(&self, bytes: &[u8]) -> CoreResult<TokenId> {
        decode_numbered(bytes)
    }

    fn close(&mut self) -> CoreResult<()> {
        self.pool.clear();
        Ok(())
    }
}
