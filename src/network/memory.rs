//! In-memory layered peer network.
//!
//! Each peer set owns one key prefix and keeps its items per collection in
//! a `BTreeSet`, so re-publishing is a no-op and query results come back in
//! key order. Several sets may own the same prefix (replicas).
//!
//! Faults are injected per set:
//!
//! | Fault | Effect |
//! |-------|--------|
//! | `Stall` | every call hangs until the caller's timeout fires |
//! | `Unreachable` | every call fails with `PeerUnreachable` |

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::RwLock;

use super::{PeerNetwork, SetHandle, SetId, SetQuery};
use crate::model::{CollectionId, Item};
use crate::space::KeyPrefix;
use crate::{Error, Result};

/// How long a stalled set hangs. Far beyond any sane peer timeout.
const STALL: Duration = Duration::from_secs(3600);

/// Injected failure mode of one peer set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Stall,
    Unreachable,
}

// ============================================================================
// MemoryNetwork
// ============================================================================

/// Peer sets held in process. Cloning shares the network.
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

struct NetworkInner {
    sets: Vec<PeerSet>,
    queries: AtomicU64,
}

struct PeerSet {
    handle: SetHandle,
    items: RwLock<HashMap<CollectionId, BTreeSet<Item>>>,
    fault: RwLock<Option<Fault>>,
}

impl MemoryNetwork {
    /// One set per prefix, in the given order.
    pub fn with_prefixes(prefixes: impl IntoIterator<Item = KeyPrefix>) -> Self {
        let sets = prefixes
            .into_iter()
            .enumerate()
            .map(|(i, prefix)| PeerSet {
                handle: SetHandle { id: SetId(i as u64), prefix },
                items: RwLock::new(HashMap::new()),
                fault: RwLock::new(None),
            })
            .collect();
        Self {
            inner: Arc::new(NetworkInner { sets, queries: AtomicU64::new(0) }),
        }
    }

    /// `2^prefix_bits` sets partitioning the key space evenly.
    pub fn uniform(prefix_bits: u32) -> Self {
        let mut prefixes = vec![KeyPrefix::root()];
        for _ in 0..prefix_bits {
            prefixes = prefixes
                .iter()
                .flat_map(|p| [p.child(false), p.child(true)])
                .collect();
        }
        Self::with_prefixes(prefixes)
    }

    /// A single set owning the whole key space.
    pub fn single() -> Self {
        Self::uniform(0)
    }

    pub fn sets(&self) -> Vec<SetHandle> {
        self.inner.sets.iter().map(|s| s.handle.clone()).collect()
    }

    /// The set owning `prefix`, first match wins.
    pub fn set_for(&self, prefix: &KeyPrefix) -> Option<SetHandle> {
        self.inner
            .sets
            .iter()
            .find(|s| &s.handle.prefix == prefix)
            .map(|s| s.handle.clone())
    }

    pub fn set_fault(&self, id: SetId, fault: Option<Fault>) {
        if let Some(set) = self.peer_set(id) {
            *set.fault.write() = fault;
        }
    }

    /// Items held by one set across all collections.
    pub fn item_count(&self, id: SetId) -> usize {
        self.peer_set(id)
            .map(|s| s.items.read().values().map(BTreeSet::len).sum())
            .unwrap_or(0)
    }

    /// Items held across all sets, replicas counted once each.
    pub fn total_items(&self) -> usize {
        self.inner.sets.iter().map(|s| self.item_count(s.handle.id)).sum()
    }

    /// Number of `query` calls served or attempted.
    pub fn query_count(&self) -> u64 {
        self.inner.queries.load(Ordering::Relaxed)
    }

    fn peer_set(&self, id: SetId) -> Option<&PeerSet> {
        self.inner.sets.iter().find(|s| s.handle.id == id)
    }

    /// Resolve a handle and apply its fault, if any.
    async fn reach(&self, handle: &SetHandle) -> Result<&PeerSet> {
        let set = self
            .peer_set(handle.id)
            .ok_or_else(|| Error::PeerUnreachable(format!("{} is not part of this network", handle.id)))?;
        let fault = *set.fault.read();
        match fault {
            None => Ok(set),
            Some(Fault::Unreachable) => Err(Error::PeerUnreachable(handle.id.to_string())),
            Some(Fault::Stall) => {
                tokio::time::sleep(STALL).await;
                Err(Error::PeerTimeout(handle.id.to_string()))
            }
        }
    }
}

// ============================================================================
// PeerNetwork impl
// ============================================================================

#[async_trait]
impl PeerNetwork for MemoryNetwork {
    async fn select_sets(&self, region: &KeyPrefix) -> Result<Vec<SetHandle>> {
        Ok(self
            .inner
            .sets
            .iter()
            .filter(|s| s.handle.prefix.overlaps(region))
            .map(|s| s.handle.clone())
            .collect())
    }

    async fn query(&self, set: &SetHandle, query: &SetQuery) -> Result<Vec<Item>> {
        self.inner.queries.fetch_add(1, Ordering::Relaxed);
        let peer = self.reach(set).await?;
        Ok(peer
            .items
            .read()
            .get(&query.collection)
            .map(|items| items.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn publish(&self, set: &SetHandle, item: &Item) -> Result<()> {
        let peer = self.reach(set).await?;
        let key = item.position.to_bytes()?;
        if !peer.handle.prefix.covers(&key) {
            return Err(Error::InvalidKey(format!(
                "{} does not fall under {} prefix {}",
                item.position, set.id, peer.handle.prefix
            )));
        }
        let inserted = peer
            .items
            .write()
            .entry(item.collection.clone())
            .or_default()
            .insert(item.clone());
        tracing::trace!(set = %set.id, position = %item.position, inserted, "publish");
        Ok(())
    }
}
