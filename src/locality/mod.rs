//! # Locality Query Engine
//!
//! Executes a query against a layered network of peer sets, finest region
//! first, and streams matching items to the caller's output channel.
//!
//! ## Layer policy
//!
//! Layer `k` examines the keys sharing the origin key's first
//! `p_k = min(key_bits, (max_layers - 1 - k) * stride)` bits. With the
//! defaults (5 layers, stride 6) that is 24, 18, 12, 6 and 0 bits; the last
//! layer is the whole key space.
//!
//! ```text
//!  per layer:
//!    select_sets(region) ─► drop visited ─► prune by prefix span
//!      ─► order by shared bits with origin ─► take max_sets_per_layer
//!      ─► query concurrently (each under peer_timeout)
//!      ─► decode, filter, dedup ─► sort by (key bytes, content)
//!      ─► flush in pages of page_size, cut to the remaining budget
//! ```
//!
//! Sets beyond `max_sets_per_layer` are deferred to the next, coarser
//! layer. The last layer drains its candidates in rounds of the same size.
//!
//! Per-set failures (timeout, unreachable) become monitoring events and an
//! empty contribution. A failing set selection or a closed output channel
//! aborts the query. Cancellation is raced against every await: set
//! selection, set queries and each page sent to the output channel.

pub mod cancel;
pub mod events;

use std::cmp::Reverse;
use std::sync::Arc;

use futures::future::join_all;
use hashbrown::HashSet;
use tokio::time::timeout;

use crate::collection::Collection;
use crate::config::LocalityConfig;
use crate::model::{ContentId, Filter, Item, Point, PositionKey};
use crate::network::{PeerNetwork, SetHandle, SetId, SetQuery};
use crate::space::{KeyPrefix, Space};
use crate::{Error, Result};

pub use cancel::{CancelToken, Canceller, cancel_pair};
pub use events::{Event, LayerSummary, Query, QueryState, ResultBatch, SearchReport, Sinks};

// ============================================================================
// Locality
// ============================================================================

/// Search and publish over a shared peer network.
pub struct Locality<N> {
    network: Arc<N>,
    config: LocalityConfig,
}

impl<N> Clone for Locality<N> {
    fn clone(&self) -> Self {
        Self { network: Arc::clone(&self.network), config: self.config }
    }
}

/// Which sets took a published item.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PublishReport {
    pub accepted: Vec<SetId>,
    pub failed: Vec<(SetId, String)>,
}

impl<N: PeerNetwork> Locality<N> {
    pub fn new(network: Arc<N>, config: LocalityConfig) -> Self {
        Self { network, config }
    }

    pub fn network(&self) -> &Arc<N> {
        &self.network
    }

    pub fn config(&self) -> &LocalityConfig {
        &self.config
    }

    /// Run one query to completion, cancellation or abort.
    ///
    /// Shape errors in the origin or filters are returned before any
    /// network traffic. Output failures and set selection failures are
    /// returned after the `Aborted` state has been reported.
    pub async fn search(
        &self,
        collection: &Collection,
        query: &Query,
        sinks: &Sinks,
        cancel: &CancelToken,
    ) -> Result<SearchReport> {
        let space = collection.space();
        let filters = space.resolve_filters(&query.filters)?;
        let origin_key = space.encode_bytes(&query.origin)?;

        let run = SearchRun {
            network: self.network.as_ref(),
            config: &self.config,
            space,
            origin: &query.origin,
            origin_key,
            set_query: SetQuery { collection: collection.id().clone(), filters: filters.clone() },
            filters,
            budget: query.budget,
            sinks,
            cancel,
            visited: HashSet::new(),
            accepted: HashSet::new(),
            deferred: Vec::new(),
            report: SearchReport::new(),
        };
        run.execute().await
    }

    /// Hand `item` to every set covering its key.
    pub async fn publish(&self, item: &Item) -> Result<PublishReport> {
        let key = item.position.to_bytes()?;
        let region = KeyPrefix::of(&key, (key.len() * 8) as u32);
        let sets = self.network.select_sets(&region).await?;
        if sets.is_empty() {
            return Err(Error::PeerUnreachable(format!("no peer set covers {}", item.position)));
        }

        let network = &self.network;
        let peer_timeout = self.config.peer_timeout();
        let outcomes = join_all(sets.iter().map(|set| async move {
            let outcome = match timeout(peer_timeout, network.publish(set, item)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::PeerTimeout(set.id.to_string())),
            };
            (set.id, outcome)
        }))
        .await;

        let mut report = PublishReport::default();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => report.accepted.push(id),
                Err(e) => {
                    tracing::warn!(set = %id, error = %e, "publish failed");
                    report.failed.push((id, e.to_string()));
                }
            }
        }
        if report.accepted.is_empty() {
            return Err(Error::PeerUnreachable(format!(
                "no peer set accepted {} ({} tried)",
                item.position,
                report.failed.len()
            )));
        }
        tracing::debug!(position = %item.position, accepted = report.accepted.len(), "published");
        Ok(report)
    }
}

// ============================================================================
// SearchRun
// ============================================================================

enum LayerOutcome {
    Completed,
    Cancelled,
}

/// State owned by a single `search` call.
struct SearchRun<'a, N> {
    network: &'a N,
    config: &'a LocalityConfig,
    space: &'a Space,
    origin: &'a Point,
    origin_key: Vec<u8>,
    set_query: SetQuery,
    filters: Vec<Filter>,
    budget: Option<usize>,
    sinks: &'a Sinks,
    cancel: &'a CancelToken,
    visited: HashSet<SetId>,
    accepted: HashSet<(PositionKey, ContentId)>,
    deferred: Vec<SetHandle>,
    report: SearchReport,
}

impl<N: PeerNetwork> SearchRun<'_, N> {
    async fn execute(mut self) -> Result<SearchReport> {
        self.transition(QueryState::Init);
        for layer in 0..self.config.max_layers {
            if self.remaining() == Some(0) {
                break;
            }
            if self.cancel.is_cancelled() {
                return Ok(self.finish(QueryState::Cancelled));
            }
            self.transition(QueryState::Layer(layer));
            match self.run_layer(layer).await {
                Ok(LayerOutcome::Completed) => {}
                Ok(LayerOutcome::Cancelled) => return Ok(self.finish(QueryState::Cancelled)),
                Err(e) => {
                    tracing::warn!(layer, error = %e, "search aborted");
                    self.finish(QueryState::Aborted);
                    return Err(e);
                }
            }
        }
        Ok(self.finish(QueryState::Done))
    }

    async fn run_layer(&mut self, layer: usize) -> Result<LayerOutcome> {
        let bits = self.config.prefix_bits(layer, self.space.key_bits());
        let region = KeyPrefix::of(&self.origin_key, bits);
        let mut summary = LayerSummary {
            layer,
            region: region.clone(),
            sets_queried: 0,
            sets_pruned: 0,
            sets_deferred: 0,
            unreachable: 0,
            received: 0,
            filtered: 0,
            duplicates: 0,
            delivered: 0,
        };

        let selection = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(LayerOutcome::Cancelled),
            selection = timeout(self.config.peer_timeout(), self.network.select_sets(&region)) => selection,
        };
        let selected = selection
            .map_err(|_| Error::PeerTimeout(format!("set selection for region {region}")))??;

        let mut candidates = std::mem::take(&mut self.deferred);
        for set in selected {
            if !candidates.iter().any(|c| c.id == set.id) {
                candidates.push(set);
            }
        }
        candidates.retain(|s| !self.visited.contains(&s.id));
        let (mut candidates, pruned): (Vec<SetHandle>, Vec<SetHandle>) = candidates
            .into_iter()
            .partition(|s| self.space.prefix_may_match(&s.prefix, self.origin, &self.filters));
        summary.sets_pruned = pruned.len();
        self.visited.extend(pruned.iter().map(|s| s.id));
        candidates.sort_by_cached_key(|s| {
            (Reverse(s.prefix.shared_bits(&self.origin_key)), s.prefix.clone(), s.id)
        });

        self.sinks.emit(Event::LayerStarted {
            layer,
            region: region.clone(),
            candidates: candidates.len(),
        });

        let width = self.config.max_sets_per_layer.max(1);
        if layer + 1 < self.config.max_layers && candidates.len() > width {
            self.deferred = candidates.split_off(width);
            summary.sets_deferred = self.deferred.len();
            self.sinks.emit(Event::SetsDeferred { layer, count: self.deferred.len() });
        }

        let mut buffer = Vec::new();
        let peer_timeout = self.config.peer_timeout();
        for round in candidates.chunks(width) {
            self.visited.extend(round.iter().map(|s| s.id));
            let network = self.network;
            let set_query = &self.set_query;
            let fetch = join_all(round.iter().map(|set| async move {
                (set, timeout(peer_timeout, network.query(set, set_query)).await)
            }));
            let outcomes = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(LayerOutcome::Cancelled),
                outcomes = fetch => outcomes,
            };

            summary.sets_queried += round.len();
            for (set, outcome) in outcomes {
                match outcome {
                    Ok(Ok(items)) => self.absorb(layer, set, items, &mut buffer, &mut summary),
                    Ok(Err(Error::PeerTimeout(_))) | Err(_) => {
                        summary.unreachable += 1;
                        tracing::warn!(layer, set = %set.id, "peer set timed out");
                        self.sinks.emit(Event::PeerTimeout { layer, set: set.id });
                    }
                    Ok(Err(e)) => {
                        summary.unreachable += 1;
                        tracing::warn!(layer, set = %set.id, error = %e, "peer set unreachable");
                        self.sinks.emit(Event::PeerUnreachable {
                            layer,
                            set: set.id,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        if self.cancel.is_cancelled() {
            return Ok(LayerOutcome::Cancelled);
        }

        buffer.sort_by(|(ka, a), (kb, b)| (ka, &a.content).cmp(&(kb, &b.content)));
        if buffer.is_empty() {
            self.sinks.emit(Event::EmptyLayer { layer });
        }
        if let Some(remaining) = self.remaining() {
            buffer.truncate(remaining);
        }
        let items: Vec<Item> = buffer.into_iter().map(|(_, item)| item).collect();
        if let LayerOutcome::Cancelled = self.flush(layer, items, &mut summary).await? {
            return Ok(LayerOutcome::Cancelled);
        }

        self.report.layers_completed += 1;
        self.report.sets_queried += summary.sets_queried;
        self.report.unreachable += summary.unreachable;
        tracing::debug!(
            layer,
            region = %summary.region,
            queried = summary.sets_queried,
            unreachable = summary.unreachable,
            delivered = summary.delivered,
            "layer completed"
        );
        self.sinks.emit(Event::LayerCompleted(summary));
        Ok(LayerOutcome::Completed)
    }

    /// Decode, check and dedup one set's answer into the layer buffer.
    fn absorb(
        &mut self,
        layer: usize,
        set: &SetHandle,
        items: Vec<Item>,
        buffer: &mut Vec<(Vec<u8>, Item)>,
        summary: &mut LayerSummary,
    ) {
        summary.received += items.len();
        for item in items {
            let decoded = item
                .position
                .to_bytes()
                .and_then(|key| self.space.cells(&key).map(|cells| (key, cells)));
            let (key, cells) = match decoded {
                Ok(decoded) => decoded,
                Err(e) => {
                    self.sinks.emit(Event::RejectedItem {
                        layer,
                        position: item.position.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            if item.collection != self.set_query.collection || !set.prefix.covers(&key) {
                self.sinks.emit(Event::PrefixMismatch {
                    layer,
                    set: set.id,
                    position: item.position.clone(),
                });
                continue;
            }
            if !self.space.cells_match(self.origin, &cells, &self.filters) {
                summary.filtered += 1;
                continue;
            }
            if !self.accepted.insert((item.position.clone(), item.content.clone())) {
                summary.duplicates += 1;
                continue;
            }
            buffer.push((key, item));
        }
    }

    /// Send the layer's pages in order. A consumer that stops reading does
    /// not hold a cancelled query: pages not yet sent are dropped.
    async fn flush(
        &mut self,
        layer: usize,
        buffer: Vec<Item>,
        summary: &mut LayerSummary,
    ) -> Result<LayerOutcome> {
        for page in buffer.chunks(self.config.page_size.max(1)) {
            let batch = ResultBatch { layer, items: page.to_vec() };
            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(LayerOutcome::Cancelled),
                sent = self.sinks.output.send(batch) => sent,
            };
            sent.map_err(|_| {
                Error::OutputSinkFailure(format!("output receiver closed during layer {layer}"))
            })?;
            self.report.batches += 1;
            self.report.delivered += page.len();
            summary.delivered += page.len();
        }
        Ok(LayerOutcome::Completed)
    }

    fn remaining(&self) -> Option<usize> {
        self.budget.map(|b| b.saturating_sub(self.report.delivered))
    }

    fn transition(&mut self, state: QueryState) {
        self.report.state = state;
        self.sinks.emit(Event::StateChanged(state));
    }

    fn finish(&mut self, state: QueryState) -> SearchReport {
        self.transition(state);
        self.sinks.emit(Event::Finished(self.report.clone()));
        tracing::info!(
            state = ?state,
            layers = self.report.layers_completed,
            delivered = self.report.delivered,
            unreachable = self.report.unreachable,
            "search finished"
        );
        self.report.clone()
    }
}
