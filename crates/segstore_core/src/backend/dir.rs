//! Directory-of-files backend.
//!
//! This module handles the file system layout of a directory store:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK                            # Owner of the open store
//! ├─ 1700000000123-000000.seg        # One file per segment
//! ├─ 1700000000456-000001.seg
//! └─ ENTRY.seg                       # Resumption point (at most one)
//! ```
//!
//! Each segment file is named `<unix-millis>-<seq>` and carries its order key
//! and stem in its header, so the chain can be rebuilt from the files alone.
//! The stem is fixed for the life of the file and doubles as the token's wire
//! form. Order keys are not part of it: a rearrange rewrites every key, and
//! only the headers change when that happens.
//! On close the resumption segment is renamed to `ENTRY.seg`; the next open
//! renames it back and resumes there.
//!
//! The LOCK file is created exclusively and records the owner's pid, process
//! name and start time. While it exists no other store can open the
//! directory. It is also held with an advisory lock while open.

use super::{sync_directory, Backend, Recovered, RecoveredSegment};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::token::TokenId;
use fs2::FileExt;
use segstore_storage::{FileSegment, Segment, SegmentHeader};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Name of the lock file within the store directory.
pub const LOCK_FILE: &str = "LOCK";

/// Name of the file holding the resumption segment while the store is closed.
pub const ENTRY_FILE: &str = "ENTRY.seg";

/// Extension of segment files.
const SEGMENT_EXTENSION: &str = "seg";

/// A store directory held exclusively by this process.
#[derive(Debug)]
pub struct DirBackend {
    /// Root directory path.
    path: PathBuf,
    /// Lock file handle; `None` once closed.
    lock: Option<File>,
    /// Next segment sequence number.
    next_seq: i64,
    sync_on_close: bool,
}

impl DirBackend {
    /// Opens or creates a store directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - A LOCK file is present (returns `ExclusiveAccessViolation`)
    /// - I/O errors occur
    pub fn open(path: &Path, config: &Config) -> CoreResult<Self> {
        if !path.exists() {
            if config.create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock = acquire_lock(&path.join(LOCK_FILE))?;

        Ok(Self {
            path: path.to_path_buf(),
            lock: Some(lock),
            next_seq: 0,
            sync_on_close: config.sync_on_close,
        })
    }

    /// Returns the path to the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn segment_path(&self, stem: &str) -> PathBuf {
        self.path.join(format!("{stem}.{SEGMENT_EXTENSION}"))
    }

    fn release_lock(&mut self) -> CoreResult<()> {
        let Some(lock) = self.lock.take() else {
            return Ok(());
        };
        // Unlocking can only fail if the handle is already unlocked
        let _ = lock.unlock();
        drop(lock);
        fs::remove_file(self.path.join(LOCK_FILE))?;
        if self.sync_on_close {
            sync_directory(&self.path)?;
        }
        Ok(())
    }
}

impl Backend for DirBackend {
    fn name(&self) -> &'static str {
        "dir"
    }

    fn enumerate_existing(&mut self) -> CoreResult<Recovered> {
        let mut recovered = Recovered::default();

        // Put the resumption segment back under its own name first.
        let entry_path = self.path.join(ENTRY_FILE);
        if entry_path.exists() {
            let header = SegmentHeader::read_path(&entry_path)?;
            let identity = identity_from_stem(&header.stem)?;
            fs::rename(&entry_path, self.segment_path(&header.stem))?;
            debug!(stem = %header.stem, "restored resumption segment");
            recovered.resumption = Some(identity);
        }

        let mut max_seq = -1;
        for dir_entry in fs::read_dir(&self.path)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_EXTENSION) {
                continue;
            }

            let (segment, header) = FileSegment::open(&path)?;
            let file_stem = path.file_stem().and_then(|s| s.to_str());
            if file_stem != Some(header.stem.as_str()) {
                return Err(CoreError::invalid_format(format!(
                    "segment file {} names stem {}",
                    path.display(),
                    header.stem
                )));
            }

            let identity = identity_from_stem(&header.stem)?;
            max_seq = max_seq.max(identity.id());
            recovered.segments.push(RecoveredSegment {
                identity,
                key: header.key,
                segment: Box::new(segment),
            });
        }

        recovered.segments.sort_by_key(|s| s.key);
        self.next_seq = max_seq + 1;
        Ok(recovered)
    }

    fn create_segment(&mut self, key: i64) -> CoreResult<(TokenId, Box<dyn Segment>)> {
        let seq = self.next_seq;
        self.next_seq += 1;

        let stem = format!("{:013}-{seq:06}", unix_millis());
        let segment = FileSegment::create(&self.segment_path(&stem), key, &stem)?;
        Ok((TokenId::named(seq, stem), Box::new(segment)))
    }

    fn persist_resumption_point(
        &mut self,
        point: Option<&TokenId>,
        _chain: &[TokenId],
    ) -> CoreResult<()> {
        // Chain order lives in the segment headers.
        if let Some(point) = point {
            let stem = point
                .name()
                .ok_or_else(|| CoreError::unknown_token(point))?;
            fs::rename(self.segment_path(stem), self.path.join(ENTRY_FILE))?;
        }
        if self.sync_on_close {
            sync_directory(&self.path)?;
        }
        Ok(())
    }

    fn encode_token(&self, identity: &TokenId) -> Vec<u8> {
        identity.name().unwrap_or_default().as_bytes().to_vec()
    }

    fn decode_token(&self, bytes: &[u8]) -> CoreResult<TokenId> {
        let stem = std::str::from_utf8(bytes)
            .map_err(|_| CoreError::invalid_format("token is not UTF-8"))?;
        identity_from_stem(stem)
    }

    fn close(&mut self) -> CoreResult<()> {
        self.release_lock()
    }
}

impl Drop for DirBackend {
    fn drop(&mut self) {
        // Reached without close only when opening the store failed
        if let Err(e) = self.release_lock() {
            warn!(path = %self.path.display(), error = %e, "failed to release store lock");
        }
    }
}

/// Parses the sequence number out of a `<millis>-<seq>` stem.
fn identity_from_stem(stem: &str) -> CoreResult<TokenId> {
    let seq = stem
        .rsplit_once('-')
        .and_then(|(millis, seq)| {
            millis.parse::<u64>().ok()?;
            seq.parse::<i64>().ok()
        })
        .ok_or_else(|| CoreError::invalid_format(format!("invalid segment stem: {stem}")))?;
    Ok(TokenId::named(seq, stem))
}

fn acquire_lock(lock_path: &Path) -> CoreResult<File> {
    let mut lock = match OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(lock_path)
    {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(lock_violation(lock_path));
        }
        Err(e) => return Err(e.into()),
    };

    let content = format!("{} {}\n{}\n", std::process::id(), process_name(), unix_secs());
    let written = lock
        .write_all(content.as_bytes())
        .and_then(|()| lock.sync_all())
        .and_then(|()| lock.try_lock_exclusive());
    if let Err(e) = written {
        drop(lock);
        let _ = fs::remove_file(lock_path);
        return Err(e.into());
    }

    Ok(lock)
}

/// Builds the violation error from whatever the existing lock file records.
fn lock_violation(lock_path: &Path) -> CoreError {
    let mut content = String::new();
    if let Ok(mut file) = File::open(lock_path) {
        let _ = file.read_to_string(&mut content);
    }
    let mut lines = content.lines();
    let owner = lines.next().unwrap_or("unknown").to_string();
    let since = lines.next().unwrap_or("unknown").to_string();
    CoreError::ExclusiveAccessViolation { owner, since }
}

fn process_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
