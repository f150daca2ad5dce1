//! # Peer Network Trait
//!
//! The logical protocol the locality engine drives. A peer set is a group
//! of peers advertising responsibility for one key prefix; the engine asks
//! the network which sets overlap a region, then queries or publishes to
//! each set independently.
//!
//! ```text
//! select_sets(region) ──► [SetHandle { id, prefix }, ...]
//! query(set, SetQuery) ──► [Item, ...]      (all items of the collection)
//! publish(set, item)   ──► ()               (idempotent)
//! ```
//!
//! Wire format, discovery and membership are the transport's business.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::model::{CollectionId, Filter, Item};
use crate::space::KeyPrefix;

pub use memory::{Fault, MemoryNetwork};

/// Opaque peer set identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SetId(pub u64);

impl std::fmt::Display for SetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "set#{}", self.0)
    }
}

/// A peer set and the key prefix it is responsible for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SetHandle {
    pub id: SetId,
    pub prefix: KeyPrefix,
}

/// What a peer set is asked for. Peers may use `filters` to pre-filter;
/// the engine re-checks every returned item regardless.
#[derive(Debug, Clone, PartialEq)]
pub struct SetQuery {
    pub collection: CollectionId,
    pub filters: Vec<Filter>,
}

/// Peer network contract.
///
/// Failures are per set: `PeerUnreachable` or `PeerTimeout`. The engine
/// downgrades them to monitoring events.
#[async_trait]
pub trait PeerNetwork: Send + Sync + 'static {
    /// Sets whose prefix overlaps `region`.
    async fn select_sets(&self, region: &KeyPrefix) -> Result<Vec<SetHandle>>;

    /// Items of `query.collection` held by `set`.
    async fn query(&self, set: &SetHandle, query: &SetQuery) -> Result<Vec<Item>>;

    /// Ask `set` to hold `item`. Storing the same item twice is a no-op.
    async fn publish(&self, set: &SetHandle, item: &Item) -> Result<()>;
}
