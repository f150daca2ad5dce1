//! Query inputs, output batches and monitoring events.

use tokio::sync::mpsc;

use crate::model::{Filter, FilterSet, Item, Point, PositionKey};
use crate::network::SetId;
use crate::space::KeyPrefix;

// ============================================================================
// Query
// ============================================================================

/// Origin, per-dimension filters and an optional item budget.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub origin: Point,
    pub filters: FilterSet,
    pub budget: Option<usize>,
}

impl Query {
    pub fn new(origin: Point) -> Self {
        Self { origin, filters: FilterSet::new(), budget: None }
    }

    pub fn filter(mut self, dimension: impl Into<String>, filter: impl Into<Filter>) -> Self {
        self.filters = self.filters.with(dimension, filter);
        self
    }

    /// Stop after delivering `items` items.
    pub fn budget(mut self, items: usize) -> Self {
        self.budget = Some(items);
        self
    }
}

// ============================================================================
// State
// ============================================================================

/// Per-query state machine.
///
/// ```text
/// Init ─► Layer(0) ─► … ─► Layer(n-1) ─► Done
///            │                 │
///            ├──► Aborted      (transport or output failure)
///            └──► Cancelled    (token fired)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Init,
    Layer(usize),
    Done,
    Aborted,
    Cancelled,
}

impl QueryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted | Self::Cancelled)
    }
}

// ============================================================================
// Output
// ============================================================================

/// At most `page_size` filter-satisfying items, sorted by key bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultBatch {
    pub layer: usize,
    pub items: Vec<Item>,
}

/// Counters for one completed layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSummary {
    pub layer: usize,
    pub region: KeyPrefix,
    pub sets_queried: usize,
    pub sets_pruned: usize,
    pub sets_deferred: usize,
    /// Sets that timed out or could not be reached.
    pub unreachable: usize,
    pub received: usize,
    pub filtered: usize,
    pub duplicates: usize,
    pub delivered: usize,
}

/// Outcome of a whole search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchReport {
    pub state: QueryState,
    pub layers_completed: usize,
    pub sets_queried: usize,
    pub unreachable: usize,
    pub delivered: usize,
    pub batches: usize,
}

impl SearchReport {
    pub(crate) fn new() -> Self {
        Self {
            state: QueryState::Init,
            layers_completed: 0,
            sets_queried: 0,
            unreachable: 0,
            delivered: 0,
            batches: 0,
        }
    }
}

/// Diagnostics. Never carries result items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    StateChanged(QueryState),
    LayerStarted { layer: usize, region: KeyPrefix, candidates: usize },
    PeerTimeout { layer: usize, set: SetId },
    PeerUnreachable { layer: usize, set: SetId, reason: String },
    /// A set returned an item outside its prefix or collection.
    PrefixMismatch { layer: usize, set: SetId, position: PositionKey },
    /// A returned item whose key could not be decoded.
    RejectedItem { layer: usize, position: PositionKey, reason: String },
    EmptyLayer { layer: usize },
    SetsDeferred { layer: usize, count: usize },
    LayerCompleted(LayerSummary),
    Finished(SearchReport),
}

// ============================================================================
// Sinks
// ============================================================================

/// Consumer-owned channels. `output` applies backpressure; `monitoring`
/// is best-effort and drops events when full.
#[derive(Debug, Clone)]
pub struct Sinks {
    pub output: mpsc::Sender<ResultBatch>,
    pub monitoring: Option<mpsc::Sender<Event>>,
}

impl Sinks {
    pub fn new(output: mpsc::Sender<ResultBatch>) -> Self {
        Self { output, monitoring: None }
    }

    pub fn with_monitoring(mut self, monitoring: mpsc::Sender<Event>) -> Self {
        self.monitoring = Some(monitoring);
        self
    }

    /// Fresh bounded channels for both sinks.
    pub fn channel(
        capacity: usize,
    ) -> (Self, mpsc::Receiver<ResultBatch>, mpsc::Receiver<Event>) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (mon_tx, mon_rx) = mpsc::channel(capacity);
        (Self::new(out_tx).with_monitoring(mon_tx), out_rx, mon_rx)
    }

    pub(crate) fn emit(&self, event: Event) {
        if let Some(monitoring) = &self.monitoring {
            if let Err(e) = monitoring.try_send(event) {
                tracing::debug!(error = %e, "monitoring event dropped");
            }
        }
    }
}
