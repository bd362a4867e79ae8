//! Integration tests for the log cache.

mod common;

use common::{record, settle, times, MockTransport};
use logcache::{
    CacheConfig, CacheEvent, Entry, FieldSpec, IntervalKey, LogCache, Query, Timestamp,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn range(from: i64, to: i64) -> Query {
    Query::new()
        .from_date(Timestamp(from))
        .to_date(Timestamp(to))
}

// --- Realistic Workflow Tests ---

#[tokio::test(start_paused = true)]
async fn test_end_to_end_scenario() {
    let mock = MockTransport::with_times(&[100, 90, 80]);
    let cache = LogCache::new(mock.clone(), CacheConfig::default());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let _subscription = {
        let seen = Arc::clone(&seen);
        cache.subscribe(Query::new(), move |entries: &[Entry]| {
            *seen.lock() = times(entries);
        })
    };
    assert_eq!(
        cache.demand(),
        vec![(IntervalKey::WHOLE, 1)],
        "first unbounded subscription demands the whole timeline"
    );

    assert!(cache.poll_once().await.unwrap());
    assert_eq!(times(&cache.get()), vec![100, 90, 80]);
    assert_eq!(*seen.lock(), vec![100, 90, 80]);
    assert_eq!(cache.watermark(), Timestamp(80));
    assert_eq!(
        cache.demand(),
        vec![(IntervalKey::new(Timestamp(80), Timestamp::MAX), 1)]
    );

    // Older history shows up on the server; backfill it.
    mock.add_times(&[70, 60]);
    cache.fill_gaps(&range(50, 90)).await;

    assert_eq!(times(&cache.get()), vec![100, 90, 80, 70, 60]);
    assert_eq!(*seen.lock(), vec![100, 90, 80, 70, 60]);
    assert_eq!(cache.segments(), vec![IntervalKey::millis(50, 101)]);
    assert_eq!(cache.watermark(), Timestamp(60));
}

#[tokio::test(start_paused = true)]
async fn test_subscription_backfills_history() {
    let mock = MockTransport::with_times(&[100]);
    let cache = LogCache::new(mock.clone(), CacheConfig::default());

    // Seed the live edge, then ask for older history.
    cache.poll_once().await.unwrap();
    mock.add_times(&[5, 15, 25]);

    let (handle, _subscription) = cache.subscribe_events(Query::new().from_date(Timestamp(10)));
    settle().await;

    assert_eq!(times(&cache.get()), vec![100, 25, 15]);
    assert_eq!(cache.segments(), vec![IntervalKey::millis(10, 101)]);

    let latest = handle.latest().expect("a snapshot after the backfill");
    assert_eq!(latest.len(), 3);

    // The backfill only asked for what was missing.
    let last = mock.calls().pop().unwrap();
    assert_eq!(last.from, Some(Timestamp(10)));
    assert_eq!(last.to, Some(Timestamp(100)));
}

#[tokio::test(start_paused = true)]
async fn test_recursive_backfill_with_capped_server() {
    let mock = MockTransport::with_times(&[10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
    let cache = LogCache::new(mock.clone(), CacheConfig::new().with_fetch_limit(3));

    cache.fill_gaps(&range(0, 105)).await;

    assert_eq!(
        times(&cache.get()),
        vec![100, 90, 80, 70, 60, 50, 40, 30, 20, 10]
    );
    assert_eq!(cache.segments(), vec![IntervalKey::millis(0, 105)]);

    // Each capped page narrows the next request to what is still missing.
    let windows: Vec<(Option<Timestamp>, Option<Timestamp>)> =
        mock.calls().iter().map(|c| (c.from, c.to)).collect();
    assert_eq!(
        windows,
        vec![
            (Some(Timestamp(0)), Some(Timestamp(105))),
            (Some(Timestamp(0)), Some(Timestamp(81))),
            (Some(Timestamp(0)), Some(Timestamp(61))),
            (Some(Timestamp(0)), Some(Timestamp(41))),
            (Some(Timestamp(0)), Some(Timestamp(21))),
        ]
    );
    assert!(mock.calls().iter().all(|c| c.limit == 3));
    assert_eq!(cache.stats().backfills_in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn test_backfill_against_second_granular_server() {
    common::init_tracing();
    // The server widens [0,1150) to whole seconds, so a capped page can sit
    // entirely above the requested range.
    let mock = MockTransport::second_granular(&[500, 1200, 2000]);
    let cache = LogCache::new(mock.clone(), CacheConfig::new().with_fetch_limit(2));

    cache.fill_gaps(&range(0, 1150)).await;

    let windows: Vec<(Option<Timestamp>, Option<Timestamp>)> =
        mock.calls().iter().map(|c| (c.from, c.to)).collect();
    assert_eq!(
        windows,
        vec![
            (Some(Timestamp(0)), Some(Timestamp(1150))),
            (Some(Timestamp(0)), Some(Timestamp(1000))),
        ]
    );
    assert_eq!(times(&cache.get()), vec![500]);
    assert_eq!(cache.segments(), vec![IntervalKey::millis(0, 1000)]);
    // The first page said nothing about [1000,1150).
    assert_eq!(
        cache.absent_ranges(Some(Timestamp(0)), Timestamp(1150)),
        vec![IntervalKey::millis(1000, 1150)]
    );
    assert_eq!(cache.stats().backfills_in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn test_second_granular_backfill_makes_progress() {
    let mock = MockTransport::second_granular(&[100, 200, 300, 1100, 1200, 1300]);
    let cache = LogCache::new(mock.clone(), CacheConfig::new().with_fetch_limit(2));

    cache.fill_gaps(&range(0, 1150)).await;

    // Second 0 holds more records than a page; what a page can reach is kept.
    assert_eq!(times(&cache.get()), vec![300]);
    assert_eq!(cache.segments(), vec![IntervalKey::millis(201, 1000)]);
    assert_eq!(mock.call_count(), 3);
    assert_eq!(cache.stats().backfills_in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_gaps_fetched_together() {
    let mock = MockTransport::with_times(&[20]);
    let cache = LogCache::new(mock.clone(), CacheConfig::default());
    cache.poll_once().await.unwrap();

    mock.set_records(vec![record(4), record(9), record(20)]);
    cache.fill_gaps(&range(4, 5)).await;
    cache.fill_gaps(&range(9, 10)).await;
    assert_eq!(cache.segments().len(), 3);

    mock.add_times(&[2, 6, 12]);
    let before = mock.call_count();
    cache.fill_gaps(&range(0, 15)).await;

    // [0,4), [5,9) and [10,15) below the last segment at [20,21).
    assert_eq!(mock.call_count() - before, 3);
    assert_eq!(times(&cache.get()), vec![20, 12, 9, 6, 4, 2]);
    assert_eq!(
        cache.segments(),
        vec![IntervalKey::millis(0, 15), IntervalKey::millis(20, 21)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stale_backfill_is_discarded() {
    let mock = MockTransport::new();
    mock.set_records(vec![json!({"timestamp": 5, "msg": "stale"})]);
    mock.delay_next(&[Duration::from_millis(100), Duration::from_millis(200)]);
    let cache = LogCache::new(mock.clone(), CacheConfig::default());
    let query = range(0, 10);

    tokio::join!(cache.fill_gaps(&query), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        mock.set_records(vec![json!({"timestamp": 5, "msg": "fresh"})]);
        cache.fill_gaps(&query).await;
    });

    // The first backfill returned first, but it had been superseded.
    let entries = cache.get();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].get("msg"), Some(&json!("fresh")));
    assert_eq!(cache.segments(), vec![IntervalKey::millis(0, 10)]);
    assert_eq!(cache.stats().backfills_in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn test_demand_refcounting_via_subscriptions() {
    let mock = MockTransport::new();
    let cache = LogCache::new(mock, CacheConfig::default());

    let first = cache.subscribe(range(0, 10), |_: &[Entry]| {});
    let _second = cache.subscribe(range(5, 15), |_: &[Entry]| {});

    assert_eq!(
        cache.demand(),
        vec![
            (IntervalKey::millis(0, 5), 1),
            (IntervalKey::millis(5, 10), 2),
            (IntervalKey::millis(10, 15), 1),
        ]
    );
    assert_eq!(cache.stats().unbounded_subscribers, 2);

    first.unsubscribe();
    settle().await;

    assert_eq!(cache.demand(), vec![(IntervalKey::millis(5, 15), 1)]);
    assert_eq!(cache.stats().unbounded_subscribers, 1);
}

#[tokio::test(start_paused = true)]
async fn test_whole_timeline_subscriber_release_keeps_bounded_demand() {
    common::init_tracing();
    let mock = MockTransport::with_times(&[100, 90, 80]);
    let cache = LogCache::new(mock.clone(), CacheConfig::default());

    let whole = cache.subscribe(Query::new(), |_: &[Entry]| {});
    assert_eq!(cache.demand(), vec![(IntervalKey::WHOLE, 1)]);
    assert!(cache.poll_once().await.unwrap());
    assert_eq!(
        cache.demand(),
        vec![(IntervalKey::new(Timestamp(80), Timestamp::MAX), 1)]
    );

    mock.add_times(&[15, 25]);
    let _bounded = cache.subscribe(range(10, 30), |_: &[Entry]| {});
    settle().await;
    assert!(cache.segments().contains(&IntervalKey::millis(10, 30)));

    drop(whole);
    settle().await;

    assert_eq!(cache.demand(), vec![(IntervalKey::millis(10, 30), 1)]);
    assert_eq!(cache.stats().unbounded_subscribers, 1);
    assert!(cache.segments().contains(&IntervalKey::millis(10, 30)));
    assert_eq!(times(&cache.get()), vec![100, 90, 80, 25, 15]);
}

#[tokio::test(start_paused = true)]
async fn test_orphan_dedup_single_fetch() {
    let mock = MockTransport::with_times(&[10, 20, 30]);
    let cache = LogCache::builder(mock.clone())
        .field("level", FieldSpec::of_type("enumeration"))
        .build();

    let query = Query::new()
        .limit(2)
        .filter("level", json!({"error": true}));

    let first = cache.subscribe(query.clone(), |_: &[Entry]| {});
    let second = cache.subscribe(query.clone(), |_: &[Entry]| {});
    settle().await;

    assert_eq!(mock.call_count(), 1);
    assert_eq!(mock.calls()[0].params, "limit=2&level=error");

    let orphans = cache.orphans();
    assert_eq!(orphans.len(), 2);
    assert!(orphans.iter().all(|o| o.subs == 2));
    assert_eq!(times(&cache.query_result(&query).unwrap()), vec![30, 20]);
    assert_eq!(times(&cache.get()), vec![30, 20]);

    first.unsubscribe();
    settle().await;
    assert!(cache.orphans().iter().all(|o| o.subs == 1));

    // A third identical subscription reuses the cached result.
    let third = cache.subscribe(query.clone(), |_: &[Entry]| {});
    settle().await;
    assert_eq!(mock.call_count(), 1);
    assert!(cache.orphans().iter().all(|o| o.subs == 2));

    drop(second);
    drop(third);
    settle().await;
    assert!(cache.orphans().is_empty());
    assert_eq!(cache.stats().orphan_queries, 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeline_wins_over_orphans() {
    let mock = MockTransport::with_times(&[10, 20, 30]);
    let cache = LogCache::new(mock.clone(), CacheConfig::default());

    let _limited = cache.subscribe(Query::new().limit(3), |_: &[Entry]| {});
    settle().await;
    assert_eq!(cache.orphans().len(), 3);

    cache.poll_once().await.unwrap();
    assert!(cache.orphans().is_empty());
    assert_eq!(times(&cache.get()), vec![30, 20, 10]);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_eviction_is_deferred() {
    let mock = MockTransport::with_times(&[55]);
    let cache = LogCache::new(mock.clone(), CacheConfig::default());
    cache.poll_once().await.unwrap();

    mock.add_times(&[5]);
    let subscription = cache.subscribe(range(0, 10), |_: &[Entry]| {});
    settle().await;
    assert_eq!(
        cache.segments(),
        vec![IntervalKey::millis(0, 10), IntervalKey::millis(55, 56)]
    );

    // Churn: resubscribing before the tick keeps the range cached.
    drop(subscription);
    let subscription = cache.subscribe(range(0, 10), |_: &[Entry]| {});
    settle().await;
    assert_eq!(cache.segments().len(), 2);

    drop(subscription);
    assert_eq!(cache.segments().len(), 2, "release waits one tick");
    settle().await;

    // The last segment survives, whatever the demand.
    assert_eq!(cache.segments(), vec![IntervalKey::millis(55, 56)]);
    assert!(cache.demand().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_polling_loop() {
    let mock = MockTransport::with_times(&[100]);
    let cache = LogCache::new(
        mock.clone(),
        CacheConfig::new().with_polling(Duration::from_secs(1)),
    );

    let task = cache.start().unwrap();
    settle().await;
    assert_eq!(mock.call_count(), 1);
    assert_eq!(times(&cache.get()), vec![100]);

    mock.add_times(&[150]);
    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(mock.call_count(), 2);
    assert_eq!(mock.calls()[1].from, Some(Timestamp(101)));
    assert_eq!(times(&cache.get()), vec![150, 100]);
    assert_eq!(cache.segments(), vec![IntervalKey::millis(100, 151)]);

    cache.shutdown();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_push_mode() {
    let mock = MockTransport::with_times(&[10, 20]);
    let push = mock.push_channel();
    let cache = LogCache::builder(mock.clone())
        .config(CacheConfig::new().with_push())
        .build();

    let (handle, _subscription) = cache.subscribe_events(Query::new());
    let task = cache.start().unwrap();
    settle().await;

    // Catch-up fetch on connect.
    assert_eq!(mock.call_count(), 1);
    assert_eq!(times(&cache.get()), vec![20, 10]);

    push.unbounded_send(r#"{"timestamp": 30}"#.to_string()).unwrap();
    push.unbounded_send("not json".to_string()).unwrap();
    push.unbounded_send(r#"{"timestamp": 15}"#.to_string()).unwrap();
    settle().await;

    assert_eq!(times(&cache.get()), vec![30, 20, 15, 10]);
    assert_eq!(cache.last_segment(), Some(IntervalKey::millis(10, 31)));

    let snapshots = std::iter::from_fn(|| handle.try_recv().ok())
        .filter(|e| matches!(e, CacheEvent::Snapshot { .. }))
        .count();
    assert_eq!(snapshots, 3);

    // Closing the stream ends the loop.
    drop(push);
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_filter_over_cached_view() {
    let mock = MockTransport::new();
    mock.set_records(vec![
        json!({"timestamp": 3, "level": "error", "msg": "disk full"}),
        json!({"timestamp": 2, "level": "info", "msg": "disk ok"}),
        json!({"timestamp": 1, "level": "error", "msg": "timeout"}),
    ]);
    let cache = LogCache::builder(mock.clone())
        .field("level", FieldSpec::of_type("enumeration"))
        .field("search", FieldSpec::of_type("string").with_key("msg"))
        .build();

    cache.poll_once().await.unwrap();
    let calls = mock.call_count();

    let errors = cache.filter(&Query::new().filter("level", json!({"error": true})));
    assert_eq!(times(&errors), vec![3, 1]);

    let disk_errors = cache.filter(
        &Query::new()
            .filter("level", json!({"error": true}))
            .filter("search", json!("disk")),
    );
    assert_eq!(times(&disk_errors), vec![3]);

    let bounded = cache.filter(&range(2, 3));
    assert_eq!(times(&bounded), vec![3, 2]);

    // Reads never fetch.
    assert_eq!(mock.call_count(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_transform_applies_to_fetched_records() {
    let mock = MockTransport::new();
    mock.set_records(vec![json!({"timestamp": 1, "msg": "a"})]);
    let cache = LogCache::builder(mock)
        .config(CacheConfig::new().with_time_field("at"))
        .transform(|raw, index, _batch, streamed| {
            json!({"at": raw["timestamp"], "idx": index, "streamed": streamed})
        })
        .build();

    cache.poll_once().await.unwrap();
    let entries = cache.get();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].get("idx"), Some(&json!(0)));
    assert_eq!(entries[0].get("streamed"), Some(&json!(false)));
}
