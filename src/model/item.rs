//! Identifiers and the item reference record.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use super::Point;
use crate::{Error, Result};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id! {
    /// Short, content-derived collection identifier.
    CollectionId
}

string_id! {
    /// Blob store identifier. Same bytes, same id.
    ContentId
}

string_id! {
    /// Fixed-length, locality-preserving key rendered in base64url.
    ///
    /// Keys that share a prefix lie in the same region of the space.
    PositionKey
}

impl PositionKey {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        URL_SAFE_NO_PAD
            .decode(self.0.as_bytes())
            .map_err(|e| Error::InvalidKey(format!("'{}': {e}", self.0)))
    }
}

/// A stored record's reference plus its position key. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Item {
    pub collection: CollectionId,
    pub position: PositionKey,
    pub content: ContentId,
}

impl Item {
    pub fn new(collection: CollectionId, position: PositionKey, content: ContentId) -> Self {
        Self { collection, position, content }
    }
}

/// The blob persisted for an item: caller content plus its coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub content: serde_json::Value,
    pub coordinates: Point,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twenty_bytes_render_as_27_chars() {
        let key = PositionKey::from_bytes(&[0xAB; 20]);
        assert_eq!(key.as_str().len(), 27);
        assert_eq!(key.to_bytes().unwrap(), vec![0xAB; 20]);
    }

    #[test]
    fn garbage_key_is_invalid() {
        let key = PositionKey::from("not a key!");
        assert!(matches!(key.to_bytes(), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn items_order_by_collection_then_position() {
        let a = Item::new("c".into(), "AAA".into(), "z".into());
        let b = Item::new("c".into(), "AAB".into(), "a".into());
        assert!(a < b);
    }
}
