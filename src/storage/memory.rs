//! In-memory blob store.
//!
//! This is the reference implementation of `BlobStore`.
//! Content ids are the full base64url SHA-256 of the bytes, so identical
//! payloads always land on the same id.
//!
//! ## Limitations
//!
//! - **No persistence**: everything is dropped with the last handle.
//! - **No eviction**: blobs are never removed.
//!
//! The availability switch (`set_available`) makes every call fail with
//! `StorageFailure`, which is how tests exercise store outages.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::RwLock;

use super::BlobStore;
use crate::digest::{ContentDigest, Sha256Digest, SHA256_ID_CHARS, short_id};
use crate::model::ContentId;
use crate::{Error, Result};

// ============================================================================
// MemoryBlobStore
// ============================================================================

/// Content-addressed blobs kept in a hash map. Cloning shares the store.
#[derive(Clone)]
pub struct MemoryBlobStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    blobs: RwLock<HashMap<ContentId, Bytes>>,
    available: AtomicBool,
    puts: AtomicU64,
    gets: AtomicU64,
}

/// Call counters, for tests and debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    pub blobs: usize,
    pub puts: u64,
    pub gets: u64,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                blobs: RwLock::new(HashMap::new()),
                available: AtomicBool::new(true),
                puts: AtomicU64::new(0),
                gets: AtomicU64::new(0),
            }),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            blobs: self.len(),
            puts: self.inner.puts.load(Ordering::Relaxed),
            gets: self.inner.gets.load(Ordering::Relaxed),
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::StorageFailure("memory store is unavailable".into()))
        }
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// BlobStore impl
// ============================================================================

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: Bytes) -> Result<ContentId> {
        self.check_available()?;
        self.inner.puts.fetch_add(1, Ordering::Relaxed);
        let id = ContentId::from(short_id(&Sha256Digest.digest(&bytes), SHA256_ID_CHARS));
        self.inner
            .blobs
            .write()
            .entry(id.clone())
            .or_insert(bytes);
        tracing::trace!(%id, "stored blob");
        Ok(id)
    }

    async fn get(&self, id: &ContentId) -> Result<Bytes> {
        self.check_available()?;
        self.inner.gets.fetch_add(1, Ordering::Relaxed);
        self.inner
            .blobs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("blob {id}")))
    }
}
