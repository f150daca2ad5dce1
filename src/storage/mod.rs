//! # Blob Store Trait
//!
//! The contract between the indexer and any content-addressed store.
//! Collections and item records are persisted through it.
//!
//! ## Implementations
//!
//! | Store | Module | Description |
//! |-------|--------|-------------|
//! | `MemoryBlobStore` | `memory` | In-memory, SHA-256 addressed, for testing/embedding |
//!
//! Retry and replication policy belong to the store. Callers propagate
//! `StorageFailure` as-is.

pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;

use crate::model::ContentId;
use crate::{Error, Result};

pub use memory::MemoryBlobStore;

/// Content-addressed storage: same bytes, same id.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Store bytes and return their content id.
    async fn put(&self, bytes: Bytes) -> Result<ContentId>;

    /// Fetch bytes by content id. `NotFound` if absent.
    async fn get(&self, id: &ContentId) -> Result<Bytes>;

    /// Default: a `get` that maps `NotFound` to false.
    async fn contains(&self, id: &ContentId) -> Result<bool> {
        match self.get(id).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Serialize a value as JSON and store it.
    async fn put_json<T>(&self, value: &T) -> Result<ContentId>
    where
        T: serde::Serialize + Sync,
    {
        let bytes = serde_json::to_vec(value)?;
        self.put(Bytes::from(bytes)).await
    }

    /// Fetch and deserialize a JSON blob.
    async fn get_json<T>(&self, id: &ContentId) -> Result<T>
    where
        T: serde::de::DeserializeOwned + Send,
    {
        let bytes = self.get(id).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
