//! # indexus — Coordinate-Space Indexing over a Peer Network
//!
//! Indexes content-addressed records by one or more orthogonal dimensions
//! (time, geographic position, ...) so peers can find records near a point
//! without a central index.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `BlobStore` and `PeerNetwork` are the contracts with the outside world
//! 2. **Clean DTOs**: `Point`, `Filter`, `Item` cross all boundaries
//! 3. **Deterministic layout**: the same dimension list always compiles to the same key layout
//! 4. **Channels, not callbacks**: results and diagnostics go to caller-owned channels
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use indexus::{Coordinate, Filter, Indexus, Point, Query, Sinks, CancelToken};
//! use serde_json::json;
//!
//! # async fn example() -> indexus::Result<()> {
//! let indexus = Indexus::open_memory();
//! let pins = indexus.create_collection("pins", &["time", "gps"]).await?;
//!
//! let item = indexus
//!     .insert(&pins, json!({"title": "cafe"}), vec![1_700_000_000.0.into(), (48.85, 2.35).into()])
//!     .await?;
//!
//! let query = Query::new(Point::new().with("time", 1_700_000_000.0).with("gps", (48.85, 2.35)))
//!     .filter("gps", Filter::within(5_000.0));
//! let (sinks, mut output, _monitoring) = Sinks::channel(64);
//! indexus.search(&pins, &query, &sinks, &CancelToken::never()).await?;
//! drop(sinks);
//! while let Some(batch) = output.recv().await {
//!     println!("{:?}", batch.items);
//! }
//! # let _ = (item, Coordinate::now());
//! # Ok(())
//! # }
//! ```
//!
//! ## Collaborators
//!
//! | Trait | Memory impl | Role |
//! |-------|-------------|------|
//! | `BlobStore` | `MemoryBlobStore` | content-addressed persistence |
//! | `PeerNetwork` | `MemoryNetwork` | peer sets owning key prefixes |
//! | `ContentDigest` | `Sha256Digest` | collection id derivation |

use std::sync::Arc;

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod registry;
pub mod space;
pub mod collection;
pub mod encoder;
pub mod locality;
pub mod storage;
pub mod network;
pub mod digest;
pub mod config;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    CollectionId, ContentId, Coordinate, Dimension, DimensionKind, Filter, FilterSet, Item,
    ItemRecord, Point, PositionKey, Range,
};

// ============================================================================
// Re-exports: Engine
// ============================================================================

pub use registry::DimensionRegistry;
pub use space::{KeyFormat, KeyPrefix, Space};
pub use collection::Collection;
pub use locality::{
    CancelToken, Canceller, Event, Locality, PublishReport, Query, QueryState, ResultBatch,
    SearchReport, Sinks, cancel_pair,
};

// ============================================================================
// Re-exports: Collaborators
// ============================================================================

pub use storage::{BlobStore, MemoryBlobStore};
pub use network::{MemoryNetwork, PeerNetwork, SetHandle, SetId};
pub use digest::{ContentDigest, Sha256Digest};
pub use config::{ConfigError, IndexusConfig};

// ============================================================================
// Top-level Indexus handle
// ============================================================================

/// The primary entry point. Wires the registry, a blob store and a peer
/// network together. Cheap to share: every part is behind an `Arc`.
pub struct Indexus<S, N> {
    registry: Arc<DimensionRegistry>,
    store: Arc<S>,
    digest: Arc<dyn ContentDigest>,
    config: IndexusConfig,
    locality: Locality<N>,
}

impl<S: BlobStore, N: PeerNetwork> Indexus<S, N> {
    /// Validates `config` and builds the context. SHA-256 is the digest.
    pub fn new(
        registry: Arc<DimensionRegistry>,
        store: Arc<S>,
        network: Arc<N>,
        config: IndexusConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            store,
            digest: Arc::new(Sha256Digest),
            locality: Locality::new(network, config.locality),
            config,
        })
    }

    pub fn with_digest(mut self, digest: Arc<dyn ContentDigest>) -> Self {
        self.digest = digest;
        self
    }

    /// Resolve dimension names, compile the Space and persist the collection.
    pub async fn create_collection(&self, name: &str, dimensions: &[&str]) -> Result<Collection> {
        Collection::create(
            self.store.as_ref(),
            &self.registry,
            self.digest.as_ref(),
            &self.config.key,
            name,
            dimensions,
        )
        .await
    }

    /// Load a collection by the content id of its definition.
    pub async fn collection(&self, content_id: &ContentId) -> Result<Collection> {
        Collection::resolve(self.store.as_ref(), self.digest.as_ref(), &self.config.key, content_id)
            .await
    }

    /// Encode and persist a record. Coordinates follow the Space's dimension order.
    pub async fn add_item(
        &self,
        collection: &Collection,
        content: serde_json::Value,
        coordinates: Vec<Coordinate>,
    ) -> Result<Item> {
        encoder::add_item(self.store.as_ref(), collection, content, coordinates).await
    }

    /// Resolve the collection behind `collection` (its definition's content
    /// id), then `add_item`.
    pub async fn add_item_to(
        &self,
        collection: &ContentId,
        content: serde_json::Value,
        coordinates: Vec<Coordinate>,
    ) -> Result<Item> {
        let collection = self.collection(collection).await?;
        self.add_item(&collection, content, coordinates).await
    }

    pub async fn item(&self, content: &ContentId) -> Result<ItemRecord> {
        encoder::get_item(self.store.as_ref(), content).await
    }

    /// Announce an item to the peer sets covering its key.
    pub async fn publish(&self, item: &Item) -> Result<PublishReport> {
        self.locality.publish(item).await
    }

    /// `add_item` followed by `publish`.
    pub async fn insert(
        &self,
        collection: &Collection,
        content: serde_json::Value,
        coordinates: Vec<Coordinate>,
    ) -> Result<Item> {
        let item = self.add_item(collection, content, coordinates).await?;
        self.publish(&item).await?;
        Ok(item)
    }

    /// `add_item_to` followed by `publish`.
    pub async fn insert_into(
        &self,
        collection: &ContentId,
        content: serde_json::Value,
        coordinates: Vec<Coordinate>,
    ) -> Result<Item> {
        let item = self.add_item_to(collection, content, coordinates).await?;
        self.publish(&item).await?;
        Ok(item)
    }

    pub async fn search(
        &self,
        collection: &Collection,
        query: &Query,
        sinks: &Sinks,
        cancel: &CancelToken,
    ) -> Result<SearchReport> {
        self.locality.search(collection, query, sinks, cancel).await
    }

    /// Resolve the collection by content id, then `search`. A missing
    /// definition is `NotFound` before any network traffic.
    pub async fn search_in(
        &self,
        collection: &ContentId,
        query: &Query,
        sinks: &Sinks,
        cancel: &CancelToken,
    ) -> Result<SearchReport> {
        let collection = self.collection(collection).await?;
        self.search(&collection, query, sinks, cancel).await
    }

    pub fn registry(&self) -> &DimensionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn locality(&self) -> &Locality<N> {
        &self.locality
    }

    pub fn config(&self) -> &IndexusConfig {
        &self.config
    }
}

/// In-memory context for testing and embedding.
impl Indexus<MemoryBlobStore, MemoryNetwork> {
    /// Built-in dimensions, default config, a single peer set.
    pub fn open_memory() -> Self {
        Self {
            registry: Arc::new(DimensionRegistry::builtin()),
            store: Arc::new(MemoryBlobStore::new()),
            digest: Arc::new(Sha256Digest),
            config: IndexusConfig::default(),
            locality: Locality::new(Arc::new(MemoryNetwork::single()), IndexusConfig::default().locality),
        }
    }

    /// Built-in dimensions over the given network and config.
    pub fn open_memory_with(network: MemoryNetwork, config: IndexusConfig) -> Result<Self> {
        Self::new(
            Arc::new(DimensionRegistry::builtin()),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(network),
            config,
        )
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Coordinate out of bounds for '{dimension}': {value} not in [{lower}, {upper}]")]
    OutOfBounds { dimension: String, value: f64, lower: f64, upper: f64 },

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Unknown dimension: {0}")]
    UnknownDimension(String),

    #[error("Invalid dimension: {0}")]
    InvalidDimension(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage failure: {0}")]
    StorageFailure(String),

    #[error("Peer set unreachable: {0}")]
    PeerUnreachable(String),

    #[error("Peer set timed out: {0}")]
    PeerTimeout(String),

    #[error("Output sink failure: {0}")]
    OutputSinkFailure(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
