//! Ingestion against a store that drops connections, fails scripts and
//! rejects transactions at random.

use bot_telemetry::config::{CircuitBreakerConfig, RetentionConfig, TrackerConfig};
use bot_telemetry::store::faults::ids;
use bot_telemetry::store::{FaultConfig, FaultInjectingStore, MemoryStore};
use bot_telemetry::tracker::TrackerStats;
use bot_telemetry::{BotTriggerEvent, EventTracker};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;

fn accounted(s: &TrackerStats) -> u64 {
    s.flushed + s.buffered as u64 + s.in_flight + s.dropped + s.rejected + s.failed
}

async fn run(seed: u64) -> (TrackerStats, u64, u64) {
    let memory = MemoryStore::new();
    let faulty = Arc::new(FaultInjectingStore::new(
        Arc::new(memory.clone()),
        FaultConfig::chaos(),
        seed,
    ));
    let tracker = EventTracker::new(
        faulty.clone(),
        TrackerConfig::default()
            .with_batch_size(10)
            .with_flush_interval(Duration::from_millis(100))
            .with_max_buffered_events(200)
            .with_circuit_breaker(CircuitBreakerConfig::new(3, Duration::from_millis(500))),
        RetentionConfig::default(),
        &Registry::new(),
    )
    .unwrap();

    for i in 0..400 {
        let event = BotTriggerEvent::new("chaosbot", format!("u{}", i % 9), "c1", format!("m{i}"))
            .with_trigger_id(format!("t{i}"));
        tracker.track_bot_trigger(event).await.unwrap();
        if i % 20 == 0 {
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        let stats = tracker.stats();
        assert_eq!(accounted(&stats), stats.tracked, "seed {seed} step {i}");
    }
    tokio::time::sleep(Duration::from_secs(30)).await;

    let stats = tracker.stats();
    let stored = memory
        .hash("bot:chaosbot:stats")
        .and_then(|h| h.get("total_triggers").cloned())
        .map_or(0, |v| v.parse().unwrap());
    let injected = faulty.total_injected();
    let _ = tracker.shutdown().await;
    (stats, stored, injected)
}

#[tokio::test(start_paused = true)]
async fn test_accounting_survives_faults() {
    for seed in [1, 7, 42] {
        let (stats, stored, injected) = run(seed).await;
        assert!(injected > 0, "seed {seed} injected nothing");
        assert_eq!(stats.tracked, 400);
        assert_eq!(accounted(&stats), stats.tracked, "seed {seed}: {stats:?}");
        // a failed flush writes nothing, a successful one writes everything
        assert_eq!(stored, stats.flushed, "seed {seed}");
        assert!(stats.flushed > 0, "seed {seed}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_same_seed_same_outcome() {
    let (a, stored_a, injected_a) = run(99).await;
    let (b, stored_b, injected_b) = run(99).await;
    assert_eq!((a.flushed, a.dropped, stored_a, injected_a), (b.flushed, b.dropped, stored_b, injected_b));
}

#[tokio::test]
async fn test_fault_ids_are_distinct() {
    let mut all = ids::ALL.to_vec();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), ids::ALL.len());
}
