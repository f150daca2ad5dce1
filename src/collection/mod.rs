//! # Collection
//!
//! A named, persisted binding of dimensions to a compiled Space.
//!
//! ```text
//! create(name, ["time", "gps"])
//!   registry.resolve ──► Space::compile ──► {name, dimensions} as JSON
//!   ──► store.put ──► content id ──► id = base64url(sha256(content id))[..27]
//! ```
//!
//! `resolve(content id)` walks the same path backwards and must land on the
//! same Space and id.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::config::KeyConfig;
use crate::digest::{ContentDigest, short_id};
use crate::model::{CollectionId, ContentId, Dimension};
use crate::registry::DimensionRegistry;
use crate::space::Space;
use crate::storage::BlobStore;

/// The persisted form of a collection. Field and dimension order are part
/// of the content, so they are kept as declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionDefinition {
    pub name: String,
    pub dimensions: Vec<Dimension>,
}

/// A resolved collection: identity plus compiled Space. Immutable.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    id: CollectionId,
    content_id: ContentId,
    name: String,
    space: Space,
}

impl Collection {
    /// Resolve dimension names, compile, persist and derive the id.
    pub async fn create<S: BlobStore>(
        store: &S,
        registry: &DimensionRegistry,
        digest: &dyn ContentDigest,
        key: &KeyConfig,
        name: &str,
        dimensions: &[&str],
    ) -> Result<Self> {
        let dimensions = registry.resolve(dimensions)?;
        let space = Space::compile(dimensions.clone(), key.format()?)?;
        let definition = CollectionDefinition { name: name.to_string(), dimensions };
        let content_id = store.put_json(&definition).await?;
        let id = derive_id(digest, &content_id, key.id_length);
        tracing::debug!(%id, %content_id, name, key_bits = space.key_bits(), "created collection");
        Ok(Self { id, content_id, name: definition.name, space })
    }

    /// Rebuild a collection from its persisted definition.
    pub async fn resolve<S: BlobStore>(
        store: &S,
        digest: &dyn ContentDigest,
        key: &KeyConfig,
        content_id: &ContentId,
    ) -> Result<Self> {
        let definition: CollectionDefinition = store.get_json(content_id).await?;
        let space = Space::compile(definition.dimensions, key.format()?)?;
        Ok(Self {
            id: derive_id(digest, content_id, key.id_length),
            content_id: content_id.clone(),
            name: definition.name,
            space,
        })
    }

    pub fn id(&self) -> &CollectionId {
        &self.id
    }

    pub fn content_id(&self) -> &ContentId {
        &self.content_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn space(&self) -> &Space {
        &self.space
    }

    pub fn definition(&self) -> CollectionDefinition {
        CollectionDefinition {
            name: self.name.clone(),
            dimensions: self.space.dimensions().to_vec(),
        }
    }
}

/// `base64url(digest(content id))`, cut to `length` chars.
pub fn derive_id(digest: &dyn ContentDigest, content_id: &ContentId, length: usize) -> CollectionId {
    CollectionId::from(short_id(&digest.digest(content_id.as_str().as_bytes()), length))
}
