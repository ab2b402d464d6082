//! Backend contract and the bundled backends.
//!
//! A backend maps the abstract chain onto one physical medium. It names and
//! creates segments, recovers them at open, and persists the resumption
//! point at close. The engine never looks inside a [`TokenId`]; it only uses
//! it as a map key and hands it back to the backend.
//!
//! - [`DirBackend`] - One file per segment in a locked directory
//! - [`ArchiveBackend`] - One entry per segment in a zip archive
//! - [`MemoryBackend`] - Ephemeral, over a shared [`MemoryMedium`]

mod archive;
mod dir;
mod memory;

pub use archive::{entry_name, ArchiveBackend, INDEX_ENTRY};
pub use dir::{DirBackend, ENTRY_FILE, LOCK_FILE};
pub use memory::{MemoryBackend, MemoryMedium};

use crate::error::{CoreError, CoreResult};
use crate::token::TokenId;
use segstore_storage::Segment;

/// A segment recovered from the medium at open time.
pub struct RecoveredSegment {
    /// Backend identity of the segment.
    pub identity: TokenId,
    /// Order key of the segment.
    pub key: i64,
    /// The segment itself.
    pub segment: Box<dyn Segment>,
}

/// Everything a backend finds on its medium at open time.
#[derive(Default)]
pub struct Recovered {
    /// Existing segments, in any order.
    pub segments: Vec<RecoveredSegment>,
    /// Persisted resumption point, if the previous session left one.
    pub resumption: Option<TokenId>,
}

/// A physical medium for a store's chain.
///
/// Backends are driven by exactly one [`crate::Store`]; calls are serialized
/// by the store.
pub trait Backend: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Recovers the segments and resumption point left by a previous session.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot be read or its metadata is
    /// malformed.
    fn enumerate_existing(&mut self) -> CoreResult<Recovered>;

    /// Creates a new empty segment with the given order key.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot allocate the segment.
    fn create_segment(&mut self, key: i64) -> CoreResult<(TokenId, Box<dyn Segment>)>;

    /// Records where the next session resumes reading.
    ///
    /// `chain` lists every live segment in chain order. `None` means the
    /// stream is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be written.
    fn persist_resumption_point(
        &mut self,
        point: Option<&TokenId>,
        chain: &[TokenId],
    ) -> CoreResult<()>;

    /// Encodes a token identity in this backend's wire format.
    fn encode_token(&self, identity: &TokenId) -> Vec<u8>;

    /// Decodes a token identity from this backend's wire format.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if the bytes are malformed.
    fn decode_token(&self, bytes: &[u8]) -> CoreResult<TokenId>;

    /// Releases the medium. Called once, after every segment was released.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot be released cleanly.
    fn close(&mut self) -> CoreResult<()>;
}

/// Wire format shared by the numbered backends: 8-byte little-endian `i64`.
fn decode_numbered(bytes: &[u8]) -> CoreResult<TokenId> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| {
        CoreError::invalid_format(format!("token must be 8 bytes, got {}", bytes.len()))
    })?;
    Ok(TokenId::numbered(i64::from_le_bytes(raw)))
}

fn encode_numbered(identity: &TokenId) -> Vec<u8> {
    identity.id().to_le_bytes().to_vec()
}

/// Syncs a directory so entry creation, rename and removal are durable.
#[cfg(unix)]
fn sync_directory(path: &std::path::Path) -> CoreResult<()> {
    let dir = std::fs::File::open(path)?;
    dir.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_path: &std::path::Path) -> CoreResult<()> {
    // NTFS journals metadata; directory handles cannot be fsynced
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_wire_format_is_eight_bytes() {
        let bytes = encode_numbered(&TokenId::numbered(-2));
        assert_eq!(bytes, (-2i64).to_le_bytes().to_vec());
        assert_eq!(decode_numbered(&bytes).unwrap(), TokenId::numbered(-2));
    }

    #[test]
    fn numbered_wire_format_rejects_bad_length() {
        assert!(matches!(
            decode_numbered(&[1, 2, 3]),
            Err(CoreError::InvalidFormat { .. })
        ));
    }
}
