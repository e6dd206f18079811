//! Tracker → store → exporter / analytics / health, end to end.

use bot_telemetry::config::{ExporterConfig, HealthConfig, RetentionConfig, TrackerConfig};
use bot_telemetry::store::MemoryStore;
use bot_telemetry::{
    AnalyticsReader, BotMetricsFilter, BotTriggerEvent, ErrorCode, EventTracker, HealthReporter,
    HealthState, MetricsExporter, ResponseType, SnapshotSource, Store,
};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;

struct Pipeline {
    store: MemoryStore,
    registry: Registry,
    tracker: EventTracker,
    exporter: MetricsExporter,
    health: HealthReporter,
    analytics: AnalyticsReader,
}

fn pipeline(exporter_config: ExporterConfig) -> Pipeline {
    let store = MemoryStore::new();
    let shared: Arc<dyn Store> = Arc::new(store.clone());
    let registry = Registry::new();
    let tracker = EventTracker::new(
        shared.clone(),
        TrackerConfig::default(),
        RetentionConfig::default(),
        &registry,
    )
    .unwrap();
    let exporter = MetricsExporter::new(shared.clone(), exporter_config, &registry).unwrap();
    let health = HealthReporter::new(
        shared.clone(),
        tracker.clone(),
        exporter.clone(),
        HealthConfig::default(),
    );
    Pipeline {
        store,
        registry,
        tracker,
        exporter,
        health,
        analytics: AnalyticsReader::new(shared),
    }
}

fn trigger(i: usize) -> BotTriggerEvent {
    BotTriggerEvent::new("hugbot", format!("u{}", i % 3), "c1", format!("m{i}"))
        .with_condition(if i % 2 == 0 { "hug" } else { "wave" })
        .with_guild("g1")
        .with_response(50 + i as u64, ResponseType::Reaction)
}

#[tokio::test]
async fn test_batch_is_visible_to_every_reader() {
    let p = pipeline(ExporterConfig::default());
    let result = p
        .tracker
        .track_batch_triggers((0..20).map(trigger).collect())
        .await
        .unwrap();
    assert_eq!(result.successful, 20);

    let snapshot = p.exporter.export_metrics().await.unwrap().snapshot;
    let bot = snapshot.bot("hugbot").unwrap();
    assert_eq!(bot.total_triggers, 20);
    assert_eq!(bot.unique_users, 3);
    assert_eq!(snapshot.channels.len(), 1);

    let text = p.exporter.render().unwrap();
    assert!(text.contains(r#"bot_telemetry_bot_triggers_total{bot_name="hugbot",condition_name="all"} 20"#));
    assert!(text.contains(r#"bot_telemetry_channel_activity{channel_id="c1",guild_id="g1"} 20"#));
    assert!(text.contains("bot_telemetry_tracker_operations_total"));

    let metrics = p
        .analytics
        .get_bot_metrics(&BotMetricsFilter::bot("hugbot"), None)
        .await
        .unwrap();
    assert_eq!(metrics.stats.total_triggers, 20);
    assert_eq!(metrics.stats.success_rate, 1.0);
    assert_eq!(metrics.top_conditions.len(), 2);

    let health = p.health.get_health_status().await;
    assert_eq!(health.status, HealthState::Healthy);
    assert_eq!(health.tracker.flushed, 20);
    assert_eq!(health.exporter.fresh_exports, 1);
}

#[tokio::test]
async fn test_counters_reflect_store_not_history() {
    let p = pipeline(ExporterConfig::default().with_cache_ttl(Duration::ZERO));
    p.tracker
        .track_batch_triggers((0..5).map(trigger).collect())
        .await
        .unwrap();
    p.exporter.export_metrics().await.unwrap();
    p.exporter.export_metrics().await.unwrap();

    // two exports of the same store state must not double the counter
    let families = p.registry.gather();
    let triggers = families
        .iter()
        .find(|f| f.get_name() == "bot_telemetry_bot_triggers_total")
        .unwrap();
    assert_eq!(triggers.get_metric()[0].get_counter().get_value(), 5.0);
}

fn response_samples(registry: &Registry) -> u64 {
    registry
        .gather()
        .iter()
        .find(|f| f.get_name() == "bot_telemetry_bot_response_duration_seconds")
        .map_or(0, |f| f.get_metric()[0].get_histogram().get_sample_count())
}

#[tokio::test]
async fn test_response_histogram_observes_each_response_once() {
    let p = pipeline(ExporterConfig::default().with_cache_ttl(Duration::ZERO));
    p.tracker
        .track_batch_triggers((0..3).map(trigger).collect())
        .await
        .unwrap();
    p.exporter.export_metrics().await.unwrap();
    assert_eq!(response_samples(&p.registry), 3);

    p.exporter.export_metrics().await.unwrap();
    assert_eq!(response_samples(&p.registry), 3);

    p.tracker
        .track_batch_triggers((3..5).map(trigger).collect())
        .await
        .unwrap();
    p.exporter.export_metrics().await.unwrap();
    assert_eq!(response_samples(&p.registry), 5);
}

#[tokio::test(start_paused = true)]
async fn test_outage_degrades_to_stale_and_recovers() {
    let p = pipeline(ExporterConfig::default().with_cache_ttl(Duration::from_secs(5)));
    p.tracker
        .track_batch_triggers((0..3).map(trigger).collect())
        .await
        .unwrap();
    let first = p.exporter.export_metrics().await.unwrap();
    assert_eq!(first.source, SnapshotSource::Fresh);

    p.store.set_available(false);
    tokio::time::advance(Duration::from_secs(6)).await;
    let during = p.exporter.export_metrics().await.unwrap();
    assert_eq!(during.source, SnapshotSource::Stale);
    assert_eq!(during.snapshot.bot("hugbot").unwrap().total_triggers, 3);
    assert_eq!(p.health.get_health_status().await.status, HealthState::Unhealthy);

    p.store.set_available(true);
    let after = p.exporter.export_metrics().await.unwrap();
    assert_eq!(after.source, SnapshotSource::Fresh);
}

#[tokio::test]
async fn test_export_without_any_snapshot_fails() {
    let p = pipeline(ExporterConfig::default());
    p.store.set_available(false);
    let err = p.exporter.export_metrics().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ExportFailed);
    assert!(p.exporter.render().unwrap().contains("bot_telemetry_export_errors_total 1"));
}

#[tokio::test]
async fn test_invalid_events_in_bulk() {
    let p = pipeline(ExporterConfig::default());
    let mut batch: Vec<_> = (0..4).map(trigger).collect();
    batch.push(BotTriggerEvent::new("hugbot", "", "c1", "m"));
    let result = p.tracker.track_batch_triggers(batch).await.unwrap();
    assert_eq!((result.successful, result.failed), (4, 1));
}
