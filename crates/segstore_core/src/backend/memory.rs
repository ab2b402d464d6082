//! In-memory backend for testing and scratch use.

use super::{decode_numbered, encode_numbered, Backend, Recovered, RecoveredSegment};
use crate::chain::spread_keys;
use crate::error::{CoreError, CoreResult};
use crate::token::TokenId;
use parking_lot::Mutex;
use segstore_storage::{MemoryPool, Segment};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Persisted {
    chain: Vec<i64>,
    resumption: Option<i64>,
    counter: i64,
}

/// Shared in-memory medium.
///
/// Cloning yields another handle to the same medium, so a store closed over
/// one handle can be reopened from another.
///
/// ```rust
/// use segstore_core::{MemoryBackend, MemoryMedium, Store, Config};
///
/// let medium = MemoryMedium::new();
/// let mut store = Store::open_with_backend(Box::new(MemoryBackend::new(&medium)), Config::default()).unwrap();
/// store.append(b"kept").unwrap();
/// store.close().unwrap();
///
/// let mut store = Store::open_with_backend(Box::new(MemoryBackend::new(&medium)), Config::default()).unwrap();
/// let mut buf = [0u8; 4];
/// assert_eq!(store.consume(&mut buf).unwrap(), 4);
/// assert_eq!(&buf, b"kept");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryMedium {
    pool: MemoryPool,
    persisted: Arc<Mutex<Persisted>>,
}

impl MemoryMedium {
    /// Creates an empty medium.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the segment buffers.
    #[must_use]
    pub fn pool(&self) -> &MemoryPool {
        &self.pool
    }

    /// Returns the resumption point recorded by the last close.
    #[must_use]
    pub fn resumption(&self) -> Option<i64> {
        self.persisted.lock().resumption
    }
}

/// Backend over a [`MemoryMedium`].
#[derive(Debug)]
pub struct MemoryBackend {
    medium: MemoryMedium,
}

impl MemoryBackend {
    /// Creates a backend over `medium`.
    #[must_use]
    pub fn new(medium: &MemoryMedium) -> Self {
        Self {
            medium: medium.clone(),
        }
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn enumerate_existing(&mut self) -> CoreResult<Recovered> {
        let persisted = self.medium.persisted.lock();
        let keys = spread_keys(persisted.chain.len())?;

        let mut segments = Vec::with_capacity(keys.len());
        for (&id, key) in persisted.chain.iter().zip(keys) {
            let segment = self.medium.pool.segment(id).ok_or_else(|| {
                CoreError::invalid_format(format!("segment #{id} missing from medium"))
            })?;
            segments.push(RecoveredSegment {
                identity: TokenId::numbered(id),
                key,
                segment: Box::new(segment),
            });
        }

        Ok(Recovered {
            segments,
            resumption: persisted.resumption.map(TokenId::numbered),
        })
    }

    fn create_segment(&mut self, _key: i64) -> CoreResult<(TokenId, Box<dyn Segment>)> {
        let id = {
            let mut persisted = self.medium.persisted.lock();
            let id = persisted.counter;
            persisted.counter += 1;
            id
        };
        Ok((TokenId::numbered(id), Box::new(self.medium.pool.create(id))))
    }

    fn persist_resumption_point(
        &mut self,
        point: Option<&TokenId>,
        chain: &[TokenId],
    ) -> CoreResult<()> {
        let mut persisted = self.medium.persisted.lock();
        persisted.chain = chain.iter().map(TokenId::id).collect();
        persisted.resumption = point.map(TokenId::id);
        Ok(())
    }

    fn encode_token(&self, identity: &TokenId) -> Vec<u8> {
        encode_numbered(identity)
    }

    fn decode_token(&self, bytes: &[u8]) -> CoreResult<TokenId> {
        decode_numbered(bytes)
    }

    fn close(&mut self) -> CoreResult<()> {
        Ok(())
    }
}
