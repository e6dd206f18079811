//! Store contents after flushing through the tracker.

use bot_telemetry::config::{RetentionConfig, TrackerConfig};
use bot_telemetry::store::MemoryStore;
use bot_telemetry::{BotTriggerEvent, EventTracker, ResponseType, Store};
use prometheus::Registry;
use std::sync::Arc;

// 2024-03-05T14:00:00Z
const BASE_TS: i64 = 1_709_647_200_000;

fn events(n: usize) -> Vec<BotTriggerEvent> {
    let conditions = ["hug", "wave", "", "pat"];
    (0..n)
        .map(|i| {
            let bot = if i % 3 == 0 { "wavebot" } else { "hugbot" };
            let event = BotTriggerEvent::new(bot, format!("user{}", i % 7), format!("chan{}", i % 4), format!("msg{i}"))
                .with_trigger_id(format!("trigger-{i}"))
                .with_timestamp(BASE_TS + (i as i64) * 97_000)
                .with_condition(conditions[i % conditions.len()])
                .with_guild("guild-1")
                .with_response((i as u64 % 5) * 40, ResponseType::Message);
            if i % 11 == 0 {
                event.failed("responder crashed")
            } else {
                event
            }
        })
        .collect()
}

fn tracker(store: &MemoryStore, batch_size: usize) -> EventTracker {
    let store: Arc<dyn Store> = Arc::new(store.clone());
    EventTracker::new(
        store,
        TrackerConfig::default().with_batch_size(batch_size),
        RetentionConfig::default(),
        &Registry::new(),
    )
    .unwrap()
}

async fn flush_all(store: &MemoryStore, batch_size: usize, events: Vec<BotTriggerEvent>) {
    let tracker = tracker(store, batch_size);
    for event in events {
        tracker.track_bot_trigger(event).await.unwrap();
    }
    tracker.flush().await.unwrap();
    tracker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_script_and_fallback_paths_agree() {
    let scripted = MemoryStore::new();
    let fallback = MemoryStore::new();
    fallback.set_scripting(false);

    flush_all(&scripted, 25, events(120)).await;
    flush_all(&fallback, 25, events(120)).await;

    assert!(scripted.stats().eval_calls > 0);
    assert_eq!(scripted.stats().pipeline_calls, 0);
    assert!(fallback.stats().pipeline_calls > 0);
    assert_eq!(scripted.snapshot(), fallback.snapshot());
}

#[tokio::test]
async fn test_counters_add_up() {
    let store = MemoryStore::new();
    let n = 150;
    flush_all(&store, 40, events(n)).await;

    let mut triggers = 0;
    let mut condition_total = 0;
    for bot in ["hugbot", "wavebot"] {
        let stats = store.hash(&format!("bot:{bot}:stats")).unwrap();
        triggers += stats["total_triggers"].parse::<u64>().unwrap();

        let responses: u64 = stats["total_responses"].parse().unwrap();
        let failures: u64 = stats.get("total_failures").map_or(0, |v| v.parse().unwrap());
        assert_eq!(responses + failures, stats["total_triggers"].parse::<u64>().unwrap());

        let conditions = store.hash(&format!("bot:{bot}:conditions")).unwrap();
        condition_total += conditions.values().map(|v| v.parse::<u64>().unwrap()).sum::<u64>();
        // empty condition names roll up under "default"
        assert!(conditions.contains_key("default") || bot == "wavebot");
    }
    assert_eq!(triggers, n as u64);
    assert_eq!(condition_total, n as u64);

    let users = store.members("bot:hugbot:users").unwrap();
    let stats = store.hash("bot:hugbot:stats").unwrap();
    assert_eq!(stats["unique_users"], users.len().to_string());
}

#[tokio::test]
async fn test_flushing_same_batch_twice_doubles_counters_only() {
    let store = MemoryStore::new();
    flush_all(&store, 100, events(10)).await;
    let once = store.hash("bot:hugbot:stats").unwrap();
    flush_all(&store, 100, events(10)).await;
    let twice = store.hash("bot:hugbot:stats").unwrap();

    let n = |m: &std::collections::BTreeMap<String, String>, f: &str| m[f].parse::<u64>().unwrap();
    assert_eq!(n(&twice, "total_triggers"), 2 * n(&once, "total_triggers"));
    // set cardinalities are absolute, not accumulated
    assert_eq!(twice["unique_users"], once["unique_users"]);
    assert_eq!(twice["last_activity"], once["last_activity"]);
}

#[tokio::test]
async fn test_rollups_carry_retention() {
    let store = MemoryStore::new();
    flush_all(&store, 100, events(5)).await;
    let retention = RetentionConfig::default();

    let event_ttl = store.ttl("event:trigger-1").unwrap();
    assert!(event_ttl.as_secs() <= retention.event_ttl_secs);
    assert!(event_ttl.as_secs() + 5 >= retention.event_ttl_secs);

    let hourly_ttl = store.ttl("bot:hugbot:hourly:2024-03-05T14").unwrap();
    assert!(hourly_ttl.as_secs() + 5 >= retention.hourly_ttl_secs);
    assert!(store.ttl("bot:hugbot:daily:2024-03-05").is_some());
}
