//! End-to-end tests for the locality query engine.
//!
//! Each test builds an in-memory context (`MemoryBlobStore` + `MemoryNetwork`),
//! inserts items through `Indexus::insert()` and runs `Indexus::search()`,
//! collecting both the output and the monitoring channel.

use std::time::Duration;

use indexus::config::LocalityConfig;
use indexus::network::Fault;
use indexus::{
    CancelToken, Collection, Error, Event, Filter, Indexus, IndexusConfig, Item, KeyPrefix,
    MemoryBlobStore, MemoryNetwork, Point, Query, QueryState, ResultBatch, SearchReport, Sinks,
    cancel_pair,
};
use pretty_assertions::assert_eq;
use serde_json::json;

type Memory = Indexus<MemoryBlobStore, MemoryNetwork>;

fn config(peer_timeout_ms: u64) -> IndexusConfig {
    IndexusConfig {
        locality: LocalityConfig { peer_timeout_ms, ..LocalityConfig::default() },
        ..IndexusConfig::default()
    }
}

async fn timeline(network: &MemoryNetwork) -> (Memory, Collection) {
    let indexus = Indexus::open_memory_with(network.clone(), config(200)).unwrap();
    let collection = indexus.create_collection("timeline", &["time"]).await.unwrap();
    (indexus, collection)
}

async fn insert_at(indexus: &Memory, collection: &Collection, time: f64) -> Item {
    indexus
        .insert(collection, json!({ "at": time }), vec![time.into()])
        .await
        .unwrap()
}

struct Outcome {
    result: indexus::Result<SearchReport>,
    batches: Vec<ResultBatch>,
    events: Vec<Event>,
}

impl Outcome {
    fn items(&self) -> Vec<Item> {
        self.batches.iter().flat_map(|b| b.items.clone()).collect()
    }

    fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

async fn run(indexus: &Memory, collection: &Collection, query: &Query, cancel: &CancelToken) -> Outcome {
    let (sinks, mut output, mut monitoring) = Sinks::channel(1024);
    let result = indexus.search(collection, query, &sinks, cancel).await;
    drop(sinks);
    let mut batches = Vec::new();
    while let Some(batch) = output.recv().await {
        batches.push(batch);
    }
    let mut events = Vec::new();
    while let Some(event) = monitoring.recv().await {
        events.push(event);
    }
    Outcome { result, batches, events }
}

fn sorted(mut items: Vec<Item>) -> Vec<Item> {
    items.sort();
    items
}

// ============================================================================
// 1. Full-range filters return every item exactly once
// ============================================================================

#[tokio::test]
async fn test_full_range_returns_every_item_once() {
    let network = MemoryNetwork::uniform(3);
    let (indexus, collection) = timeline(&network).await;

    let mut stored = Vec::new();
    for i in 0..20 {
        stored.push(insert_at(&indexus, &collection, (i as f64 - 10.0) * 2.0e10).await);
    }

    let query = Query::new(Point::new().with("time", 1000.0)).filter("time", Filter::any());
    let outcome = run(&indexus, &collection, &query, &CancelToken::never()).await;
    let report = outcome.result.as_ref().unwrap();

    assert_eq!(report.state, QueryState::Done);
    assert_eq!(report.sets_queried, 8);
    assert_eq!(report.delivered, 20);
    assert_eq!(sorted(outcome.items()), sorted(stored));
    assert!(outcome.batches.iter().all(|b| b.items.len() <= 10));
    assert!(outcome.batches.windows(2).all(|w| w[0].layer <= w[1].layer));
}

/// Width of one 8-bit prefix cell on the built-in time axis.
const CELL_8: f64 = 2_019_686_400.0;

#[tokio::test]
async fn test_deferred_sets_arrive_in_layer_order() {
    // 256 sets; origin 0 sits at the start of set 10000000
    let network = MemoryNetwork::uniform(8);
    let (indexus, collection) = timeline(&network).await;
    let near = insert_at(&indexus, &collection, 1000.0).await;
    let sibling = insert_at(&indexus, &collection, CELL_8 + 1000.0).await;
    let deferred = insert_at(&indexus, &collection, 3.0 * CELL_8 + 1000.0).await;
    let far = insert_at(&indexus, &collection, -1.0e11).await;

    let query = Query::new(Point::new().with("time", 0.0));
    let outcome = run(&indexus, &collection, &query, &CancelToken::never()).await;
    assert_eq!(outcome.result.as_ref().unwrap().state, QueryState::Done);

    // the 6-bit layer sees three unvisited sets and can only ask two
    assert!(outcome.events.contains(&Event::SetsDeferred { layer: 3, count: 1 }));

    let layers: Vec<usize> = outcome.batches.iter().map(|b| b.layer).collect();
    assert!(layers.windows(2).all(|w| w[0] <= w[1]), "{layers:?}");

    let layer_of = |item: &Item| {
        outcome
            .batches
            .iter()
            .find(|b| b.items.contains(item))
            .map(|b| b.layer)
    };
    assert_eq!(outcome.batches[0].items, vec![near.clone()]);
    assert_eq!(layer_of(&near), Some(0));
    assert_eq!(layer_of(&sibling), Some(3));
    assert_eq!(layer_of(&deferred), Some(4));
    assert_eq!(layer_of(&far), Some(4));
}

// ============================================================================
// 2. A stalled set costs exactly one timeout event
// ============================================================================

#[tokio::test]
async fn test_timeout_reports_once_and_keeps_other_sets() {
    let network = MemoryNetwork::uniform(1);
    let (indexus, collection) = timeline(&network).await;

    let mut negative = Vec::new();
    for t in [-3.0e9, -2.0e9, -1.0e9] {
        negative.push(insert_at(&indexus, &collection, t).await);
    }
    insert_at(&indexus, &collection, 5.0e9).await;

    let upper = network.set_for(&KeyPrefix::parse("1").unwrap()).unwrap();
    network.set_fault(upper.id, Some(Fault::Stall));

    let query = Query::new(Point::new().with("time", 1000.0));
    let outcome = run(&indexus, &collection, &query, &CancelToken::never()).await;
    let report = outcome.result.as_ref().unwrap();

    assert_eq!(report.state, QueryState::Done);
    assert_eq!(report.unreachable, 1);
    assert_eq!(sorted(outcome.items()), sorted(negative));
    assert_eq!(outcome.count(|e| matches!(e, Event::PeerTimeout { .. })), 1);
    assert_eq!(
        outcome.count(|e| matches!(e, Event::PeerTimeout { set, .. } if *set == upper.id)),
        1
    );
}

#[tokio::test]
async fn test_unreachable_set_is_counted_per_layer() {
    let network = MemoryNetwork::uniform(1);
    let (indexus, collection) = timeline(&network).await;
    let item = insert_at(&indexus, &collection, -5.0).await;

    let upper = network.set_for(&KeyPrefix::parse("1").unwrap()).unwrap();
    network.set_fault(upper.id, Some(Fault::Unreachable));

    let query = Query::new(Point::new().with("time", 1000.0));
    let outcome = run(&indexus, &collection, &query, &CancelToken::never()).await;

    assert_eq!(outcome.items(), vec![item]);
    assert_eq!(outcome.count(|e| matches!(e, Event::PeerUnreachable { .. })), 1);
    let first_layer = outcome.events.iter().find_map(|e| match e {
        Event::LayerCompleted(s) if s.layer == 0 => Some(s.clone()),
        _ => None,
    });
    assert_eq!(first_layer.unwrap().unreachable, 1);
}

// ============================================================================
// 3. Example scenarios on a single time dimension
// ============================================================================

#[tokio::test]
async fn test_exact_origin_with_zero_ranges() {
    let network = MemoryNetwork::single();
    let (indexus, collection) = timeline(&network).await;
    let item = insert_at(&indexus, &collection, 1000.0).await;

    let query = Query::new(Point::new().with("time", 1000.0))
        .filter("time", Filter::from([[0.0, 0.0], [0.0, 0.0]]));
    let outcome = run(&indexus, &collection, &query, &CancelToken::never()).await;

    assert_eq!(outcome.items(), vec![item]);
}

#[tokio::test]
async fn test_distance_range_keeps_only_near_items() {
    let network = MemoryNetwork::uniform(2);
    let (indexus, collection) = timeline(&network).await;
    let near = insert_at(&indexus, &collection, 1000.0).await;
    insert_at(&indexus, &collection, 2000.0).await;

    let query = Query::new(Point::new().with("time", 1000.0)).filter("time", Filter::within(500.0));
    let outcome = run(&indexus, &collection, &query, &CancelToken::never()).await;

    assert_eq!(outcome.items(), vec![near]);
    assert_eq!(outcome.result.unwrap().delivered, 1);
}

#[tokio::test]
async fn test_item_on_the_distance_bound_is_returned() {
    let network = MemoryNetwork::uniform(2);
    let (indexus, collection) = timeline(&network).await;
    let on_bound = insert_at(&indexus, &collection, 123_456_789.0).await;
    insert_at(&indexus, &collection, 123_456_790.0).await;

    let query = Query::new(Point::new().with("time", 123_456_000.0))
        .filter("time", Filter::within(789.0));
    let outcome = run(&indexus, &collection, &query, &CancelToken::never()).await;

    assert_eq!(outcome.items(), vec![on_bound]);
}

#[tokio::test]
async fn test_direction_selects_later_items() {
    let network = MemoryNetwork::single();
    let (indexus, collection) = timeline(&network).await;
    insert_at(&indexus, &collection, 900.0).await;
    let later = insert_at(&indexus, &collection, 1100.0).await;

    let query = Query::new(Point::new().with("time", 1000.0))
        .filter("time", Filter::within(500.0).towards(1.0, 1.0));
    let outcome = run(&indexus, &collection, &query, &CancelToken::never()).await;

    assert_eq!(outcome.items(), vec![later]);
}

#[tokio::test]
async fn test_prefix_pruning_skips_far_sets() {
    let network = MemoryNetwork::uniform(2);
    let (indexus, collection) = timeline(&network).await;
    insert_at(&indexus, &collection, 1000.0).await;
    insert_at(&indexus, &collection, -2.0e11).await;

    let query = Query::new(Point::new().with("time", 1000.0)).filter("time", Filter::within(10.0));
    let before = network.query_count();
    let outcome = run(&indexus, &collection, &query, &CancelToken::never()).await;

    assert_eq!(outcome.items().len(), 1);
    assert_eq!(network.query_count() - before, 1);
    let pruned: usize = outcome
        .events
        .iter()
        .filter_map(|e| match e {
            Event::LayerCompleted(s) => Some(s.sets_pruned),
            _ => None,
        })
        .sum();
    assert_eq!(pruned, 3);
}

// ============================================================================
// 4. Geographic search
// ============================================================================

#[tokio::test]
async fn test_gps_distance_filter() {
    let network = MemoryNetwork::uniform(2);
    let indexus = Indexus::open_memory_with(network, config(200)).unwrap();
    let pins = indexus.create_collection("pins", &["gps", "time"]).await.unwrap();

    let paris = indexus
        .insert(&pins, json!({"city": "Paris"}), vec![(48.8566, 2.3522).into(), 0.0.into()])
        .await
        .unwrap();
    let berlin = indexus
        .insert(&pins, json!({"city": "Berlin"}), vec![(52.52, 13.405).into(), 0.0.into()])
        .await
        .unwrap();
    indexus
        .insert(&pins, json!({"city": "New York"}), vec![(40.7128, -74.006).into(), 0.0.into()])
        .await
        .unwrap();

    let origin = Point::new().with("gps", (48.86, 2.35)).with("time", 0.0);

    let close = Query::new(origin.clone()).filter("gps", Filter::within(10_000.0));
    let outcome = run(&indexus, &pins, &close, &CancelToken::never()).await;
    assert_eq!(outcome.items(), vec![paris.clone()]);

    let europe = Query::new(origin).filter("gps", Filter::within(1_000_000.0));
    let outcome = run(&indexus, &pins, &europe, &CancelToken::never()).await;
    assert_eq!(sorted(outcome.items()), sorted(vec![paris, berlin]));
}

// ============================================================================
// 5. Budget, ordering, determinism
// ============================================================================

#[tokio::test]
async fn test_budget_truncates_delivery() {
    let network = MemoryNetwork::single();
    let (indexus, collection) = timeline(&network).await;
    for i in 0..12 {
        insert_at(&indexus, &collection, i as f64 * 10.0).await;
    }

    let query = Query::new(Point::new().with("time", 0.0)).budget(5);
    let outcome = run(&indexus, &collection, &query, &CancelToken::never()).await;

    assert_eq!(outcome.items().len(), 5);
    assert_eq!(outcome.result.unwrap().delivered, 5);
}

#[tokio::test]
async fn test_batches_are_paged_and_sorted() {
    let network = MemoryNetwork::single();
    let (indexus, collection) = timeline(&network).await;
    for i in (0..25).rev() {
        insert_at(&indexus, &collection, i as f64).await;
    }

    let query = Query::new(Point::new().with("time", 0.0));
    let outcome = run(&indexus, &collection, &query, &CancelToken::never()).await;

    let sizes: Vec<usize> = outcome.batches.iter().map(|b| b.items.len()).collect();
    assert_eq!(sizes, vec![10, 10, 5]);
    let keys: Vec<Vec<u8>> = outcome
        .items()
        .iter()
        .map(|i| i.position.to_bytes().unwrap())
        .collect();
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_repeated_search_is_deterministic() {
    let network = MemoryNetwork::uniform(3);
    let (indexus, collection) = timeline(&network).await;
    for i in 0..15 {
        insert_at(&indexus, &collection, (i as f64 - 7.0) * 3.0e10).await;
    }

    let query = Query::new(Point::new().with("time", 42.0));
    let a = run(&indexus, &collection, &query, &CancelToken::never()).await;
    let b = run(&indexus, &collection, &query, &CancelToken::never()).await;
    assert_eq!(a.batches, b.batches);
}

#[tokio::test]
async fn test_state_events_follow_the_layers() {
    let network = MemoryNetwork::single();
    let (indexus, collection) = timeline(&network).await;
    insert_at(&indexus, &collection, 1.0).await;

    let query = Query::new(Point::new().with("time", 1.0));
    let outcome = run(&indexus, &collection, &query, &CancelToken::never()).await;

    let states: Vec<QueryState> = outcome
        .events
        .iter()
        .filter_map(|e| match e {
            Event::StateChanged(s) => Some(*s),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            QueryState::Init,
            QueryState::Layer(0),
            QueryState::Layer(1),
            QueryState::Layer(2),
            QueryState::Layer(3),
            QueryState::Layer(4),
            QueryState::Done,
        ]
    );
    assert_eq!(outcome.count(|e| matches!(e, Event::EmptyLayer { .. })), 4);
    assert!(matches!(outcome.events.last(), Some(Event::Finished(r)) if r.state == QueryState::Done));
}

// ============================================================================
// 6. Idempotent publish
// ============================================================================

#[tokio::test]
async fn test_duplicate_publish_is_returned_once() {
    let network = MemoryNetwork::with_prefixes([KeyPrefix::root(), KeyPrefix::root()]);
    let (indexus, collection) = timeline(&network).await;
    let item = insert_at(&indexus, &collection, 7.0).await;
    indexus.publish(&item).await.unwrap();

    let query = Query::new(Point::new().with("time", 7.0));
    let outcome = run(&indexus, &collection, &query, &CancelToken::never()).await;

    assert_eq!(outcome.items(), vec![item]);
    let duplicates: usize = outcome
        .events
        .iter()
        .filter_map(|e| match e {
            Event::LayerCompleted(s) => Some(s.duplicates),
            _ => None,
        })
        .sum();
    assert_eq!(duplicates, 1);
}

// ============================================================================
// 7. Cancellation and output failures
// ============================================================================

#[tokio::test]
async fn test_cancel_before_start_delivers_nothing() {
    let network = MemoryNetwork::single();
    let (indexus, collection) = timeline(&network).await;
    insert_at(&indexus, &collection, 1.0).await;

    let (canceller, token) = cancel_pair();
    canceller.cancel();
    let query = Query::new(Point::new().with("time", 1.0));
    let outcome = run(&indexus, &collection, &query, &token).await;

    assert_eq!(outcome.result.unwrap().state, QueryState::Cancelled);
    assert!(outcome.batches.is_empty());
}

#[tokio::test]
async fn test_cancel_during_layer_drops_buffer() {
    let network = MemoryNetwork::with_prefixes([KeyPrefix::root(), KeyPrefix::root()]);
    let indexus = Indexus::open_memory_with(network.clone(), config(60_000)).unwrap();
    let collection = indexus.create_collection("timeline", &["time"]).await.unwrap();
    insert_at(&indexus, &collection, 1.0).await;
    network.set_fault(indexus::SetId(1), Some(Fault::Stall));

    let (canceller, token) = cancel_pair();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });
    let query = Query::new(Point::new().with("time", 1.0));
    let outcome = run(&indexus, &collection, &query, &token).await;

    assert_eq!(outcome.result.unwrap().state, QueryState::Cancelled);
    assert!(outcome.batches.is_empty());
    assert!(outcome.events.contains(&Event::StateChanged(QueryState::Cancelled)));
}

#[tokio::test]
async fn test_cancel_unblocks_a_full_output_channel() {
    let network = MemoryNetwork::single();
    let (indexus, collection) = timeline(&network).await;
    for i in 0..50 {
        insert_at(&indexus, &collection, i as f64).await;
    }

    // room for one page; nobody reads
    let (sinks, mut output, _monitoring) = Sinks::channel(1);
    let (canceller, token) = cancel_pair();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let query = Query::new(Point::new().with("time", 0.0));
    let search = indexus.search(&collection, &query, &sinks, &token);
    let report = tokio::time::timeout(Duration::from_secs(2), search)
        .await
        .expect("cancelled search must return")
        .unwrap();

    assert_eq!(report.state, QueryState::Cancelled);
    assert_eq!(report.delivered, 10);
    drop(sinks);
    assert_eq!(output.recv().await.map(|b| b.items.len()), Some(10));
    assert!(output.recv().await.is_none());
}

#[tokio::test]
async fn test_closed_output_aborts() {
    let network = MemoryNetwork::single();
    let (indexus, collection) = timeline(&network).await;
    insert_at(&indexus, &collection, 1.0).await;

    let (sinks, output, mut monitoring) = Sinks::channel(64);
    drop(output);
    let query = Query::new(Point::new().with("time", 1.0));
    let err = indexus
        .search(&collection, &query, &sinks, &CancelToken::never())
        .await;
    assert!(matches!(err, Err(Error::OutputSinkFailure(_))));

    drop(sinks);
    let mut saw_aborted = false;
    while let Some(event) = monitoring.recv().await {
        saw_aborted |= event == Event::StateChanged(QueryState::Aborted);
    }
    assert!(saw_aborted);
}

// ============================================================================
// 8. Shape errors surface before any network traffic
// ============================================================================

#[tokio::test]
async fn test_bad_origin_or_filter_fails_synchronously() {
    let network = MemoryNetwork::single();
    let (indexus, collection) = timeline(&network).await;
    let before = network.query_count();

    let query = Query::new(Point::new().with("gps", (0.0, 0.0)));
    let outcome = run(&indexus, &collection, &query, &CancelToken::never()).await;
    assert!(matches!(outcome.result, Err(Error::DimensionMismatch(_))));

    let query = Query::new(Point::new().with("time", 1.0)).filter("depth", Filter::any());
    let outcome = run(&indexus, &collection, &query, &CancelToken::never()).await;
    assert!(matches!(outcome.result, Err(Error::DimensionMismatch(_))));

    let query = Query::new(Point::new().with("time", 1.0e300));
    let outcome = run(&indexus, &collection, &query, &CancelToken::never()).await;
    assert!(matches!(outcome.result, Err(Error::OutOfBounds { .. })));

    assert_eq!(network.query_count(), before);
    assert!(outcome.events.is_empty());
}
