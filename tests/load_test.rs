//! Concurrent ingestion.

use bot_telemetry::config::{RetentionConfig, TrackerConfig};
use bot_telemetry::store::MemoryStore;
use bot_telemetry::{BotTriggerEvent, EventTracker, Store};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_thousand_concurrent_triggers() {
    let store = MemoryStore::new();
    store.set_latency(Duration::from_millis(2));
    let shared: Arc<dyn Store> = Arc::new(store.clone());
    let tracker = EventTracker::new(
        shared,
        TrackerConfig::default().with_flush_interval(Duration::from_millis(50)),
        RetentionConfig::default(),
        &Registry::new(),
    )
    .unwrap();

    let tasks: Vec<_> = (0..1_000)
        .map(|i| {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                let event = BotTriggerEvent::new(
                    format!("bot{}", i % 10),
                    format!("user{}", i % 97),
                    format!("chan{}", i % 13),
                    format!("msg{i}"),
                )
                .with_condition(format!("cond{}", i % 4));
                tracker.track_bot_trigger(event).await
            })
        })
        .collect();

    let results = tokio::time::timeout(Duration::from_secs(10), futures::future::join_all(tasks))
        .await
        .expect("ingestion took too long");
    for result in results {
        result.unwrap().unwrap();
    }

    tracker.flush().await.unwrap();
    let stats = tracker.stats();
    assert_eq!(stats.tracked, 1_000);
    assert_eq!(stats.flushed, 1_000);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.buffered, 0);
    // size-triggered batching coalesces writes
    assert!(store.stats().eval_calls <= 100, "{:?}", store.stats());

    let total: u64 = (0..10)
        .map(|b| {
            store.hash(&format!("bot:bot{b}:stats")).unwrap()["total_triggers"]
                .parse::<u64>()
                .unwrap()
        })
        .sum();
    assert_eq!(total, 1_000);

    tracker.shutdown().await.unwrap();
}
