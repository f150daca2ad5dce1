//! # Item Encoder
//!
//! Turns caller content plus coordinates into an `Item`:
//!
//! 1. zip coordinates with the Space's dimension order into a Point
//! 2. encode the Point (shape and bounds errors surface here, before any write)
//! 3. persist `{content, coordinates}` to the blob store
//! 4. return `Item { collection, position, content }`
//!
//! Storage failures are propagated as-is; retrying is the store's job.

use bytes::Bytes;
use serde_json::Value as Json;

use crate::Result;
use crate::collection::Collection;
use crate::model::{ContentId, Coordinate, Item, ItemRecord};
use crate::storage::BlobStore;

/// Encode and persist one record.
pub async fn add_item<S: BlobStore>(
    store: &S,
    collection: &Collection,
    content: Json,
    coordinates: Vec<Coordinate>,
) -> Result<Item> {
    let space = collection.space();
    let point = space.point(coordinates)?;
    let position = space.encode(&point)?;

    let record = ItemRecord { content, coordinates: point };
    let content_id = store.put(Bytes::from(serde_json::to_vec(&record)?)).await?;
    tracing::debug!(collection = %collection.id(), %position, content = %content_id, "added item");

    Ok(Item::new(collection.id().clone(), position, content_id))
}

/// Fetch a record persisted by [`add_item`].
pub async fn get_item<S: BlobStore>(store: &S, content: &ContentId) -> Result<ItemRecord> {
    store.get_json(content).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::config::KeyConfig;
    use crate::digest::Sha256Digest;
    use crate::registry::DimensionRegistry;
    use crate::storage::MemoryBlobStore;
    use serde_json::json;

    async fn pins(store: &MemoryBlobStore) -> Collection {
        Collection::create(
            store,
            &DimensionRegistry::builtin(),
            &Sha256Digest,
            &KeyConfig::default(),
            "pins",
            &["gps", "time"],
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_add_then_get() {
        let store = MemoryBlobStore::new();
        let c = pins(&store).await;
        let item = add_item(
            &store,
            &c,
            json!({"title": "cafe"}),
            vec![(48.85, 2.35).into(), 1_700_000_000.0.into()],
        )
        .await
        .unwrap();
        assert_eq!(&item.collection, c.id());
        assert_eq!(item.position.as_str().len(), c.space().format().chars());

        let record = get_item(&store, &item.content).await.unwrap();
        assert_eq!(record.content["title"], "cafe");
        assert_eq!(record.coordinates.names().collect::<Vec<_>>(), ["gps", "time"]);
        assert_eq!(c.space().encode(&record.coordinates).unwrap(), item.position);
    }

    #[tokio::test]
    async fn test_shape_errors_write_nothing() {
        let store = MemoryBlobStore::new();
        let c = pins(&store).await;
        let before = store.len();

        let err = add_item(&store, &c, json!({}), vec![1.0.into()]).await;
        assert!(matches!(err, Err(Error::DimensionMismatch(_))));

        let err = add_item(&store, &c, json!({}), vec![1.0.into(), 1.0.into()]).await;
        assert!(matches!(err, Err(Error::DimensionMismatch(_))));

        let err = add_item(&store, &c, json!({}), vec![(95.0, 0.0).into(), 1.0.into()]).await;
        assert!(matches!(err, Err(Error::OutOfBounds { .. })));

        assert_eq!(store.len(), before);
    }

    #[tokio::test]
    async fn test_store_outage_is_storage_failure() {
        let store = MemoryBlobStore::new();
        let c = pins(&store).await;
        store.set_available(false);
        let err = add_item(&store, &c, json!({}), vec![(0.0, 0.0).into(), 0.0.into()]).await;
        assert!(matches!(err, Err(Error::StorageFailure(_))));
    }

    #[tokio::test]
    async fn test_same_record_same_content_ref() {
        let store = MemoryBlobStore::new();
        let c = pins(&store).await;
        let coords = || vec![(10.0, 10.0).into(), 5.0.into()];
        let a = add_item(&store, &c, json!({"n": 1}), coords()).await.unwrap();
        let b = add_item(&store, &c, json!({"n": 1}), coords()).await.unwrap();
        assert_eq!(a, b);
    }
}
