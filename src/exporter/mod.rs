//! Store → Prometheus export.
//!
//! A fresh export scans the bot stats and channel activity rollups, parses
//! them into a [`MetricsSnapshot`] and publishes it to the registry. Results
//! are cached for `cache_ttl`; only one export runs at a time and every
//! failure degrades to the last good snapshot.
//!
//! The response duration histogram is fed from each bot's perf set: every
//! fresh export observes the samples an earlier export has not seen yet.

mod cache;
mod registry;

pub use self::cache::TtlCache;
pub use self::registry::ALL_CONDITIONS;

use self::registry::ExporterMetrics;
use crate::breaker::{CallError, CircuitBreaker, CircuitBreakerStats};
use crate::config::ExporterConfig;
use crate::error::{StoreError, TelemetryError};
use crate::observability::{export_span, scan_span};
use crate::schema::{fields, keys, BOT_STATS_PATTERN, CHANNEL_ACTIVITY_PATTERN};
use crate::store::{FieldMap, Store, StoreInfo};
use ahash::{AHashMap, AHashSet};
use chrono::Utc;
use parking_lot::Mutex;
use prometheus::Registry;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

const SNAPSHOT_KEY: &str = "metrics";

/// Perf set members with their response time in ms, per bot
type ResponseSamples = Vec<(String, Vec<(String, f64)>)>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotSnapshot {
    pub bot_name: String,
    pub total_triggers: u64,
    pub total_responses: u64,
    pub total_failures: u64,
    pub avg_response_time_ms: f64,
    pub unique_users: u64,
    pub unique_channels: u64,
    pub last_activity: Option<i64>,
    /// Trigger counts keyed by condition, or a single [`ALL_CONDITIONS`] entry
    pub triggers_by_condition: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSnapshot {
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub bot_triggers: u64,
    pub unique_bots: u64,
    pub unique_users: u64,
}

/// Result of one fresh export
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub generated_at: i64,
    pub bots: Vec<BotSnapshot>,
    pub channels: Vec<ChannelSnapshot>,
    pub store_info: Option<StoreInfo>,
    pub scanned_keys: usize,
    /// The scan stopped at `max_scan_keys`
    pub truncated: bool,
}

impl MetricsSnapshot {
    pub fn bot(&self, name: &str) -> Option<&BotSnapshot> {
        self.bots.iter().find(|b| b.bot_name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    Fresh,
    Cache,
    Stale,
}

#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub snapshot: Arc<MetricsSnapshot>,
    pub source: SnapshotSource,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExporterStats {
    pub cache_size: usize,
    pub cache_hit_rate: f64,
    pub last_export_at: Option<i64>,
    pub export_in_progress: bool,
    pub fresh_exports: u64,
    pub failed_exports: u64,
    pub store_connected: bool,
    pub circuit_breaker: CircuitBreakerStats,
}

#[derive(Clone)]
pub struct MetricsExporter {
    inner: Arc<ExporterInner>,
}

struct ExporterInner {
    store: Arc<dyn Store>,
    config: ExporterConfig,
    breaker: CircuitBreaker,
    cache: Mutex<TtlCache<&'static str, Arc<MetricsSnapshot>>>,
    last_snapshot: Mutex<Option<Arc<MetricsSnapshot>>>,
    /// Perf members already in the histogram, per bot
    observed: Mutex<AHashMap<String, AHashSet<String>>>,
    in_progress: AtomicBool,
    last_export_at: AtomicI64,
    fresh_exports: AtomicU64,
    failed_exports: AtomicU64,
    metrics: ExporterMetrics,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

/// Clears the in-progress flag however the export ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl MetricsExporter {
    pub fn new(
        store: Arc<dyn Store>,
        config: ExporterConfig,
        registry: &Registry,
    ) -> Result<Self, TelemetryError> {
        config.validate()?;
        let metrics = ExporterMetrics::register(registry)?;
        Ok(MetricsExporter {
            inner: Arc::new(ExporterInner {
                store,
                breaker: CircuitBreaker::new("exporter", config.circuit_breaker),
                cache: Mutex::new(TtlCache::new(config.cache_ttl())),
                last_snapshot: Mutex::new(None),
                observed: Mutex::new(AHashMap::new()),
                in_progress: AtomicBool::new(false),
                last_export_at: AtomicI64::new(0),
                fresh_exports: AtomicU64::new(0),
                failed_exports: AtomicU64::new(0),
                metrics,
                tasks: Mutex::new(Vec::new()),
                cancel: CancellationToken::new(),
                config,
            }),
        })
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    /// Spawn cache cleanup and, when configured, periodic exports
    pub fn start(&self) {
        let mut tasks = self.inner.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        let exporter = self.clone();
        tasks.push(tokio::spawn(async move {
            let inner = &exporter.inner;
            let mut ticker = tokio::time::interval(inner.config.cache_cleanup_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = inner.cache.lock().cleanup(inner.config.cache_ttl());
                        if removed > 0 {
                            debug!(removed, "expired export cache entries");
                        }
                    }
                }
            }
        }));

        if let Some(every) = self.inner.config.export_interval() {
            let exporter = self.clone();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = exporter.inner.cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = exporter.export_metrics().await {
                                warn!(error = %e, "periodic export failed");
                            }
                        }
                    }
                }
            }));
        }
        info!(tasks = tasks.len(), "metrics exporter started");
    }

    pub async fn export_metrics(&self) -> Result<ExportOutcome, TelemetryError> {
        let inner = &self.inner;
        let cached = inner.cache.lock().get(&SNAPSHOT_KEY);
        inner.metrics.set_hit_rate(inner.cache.lock().hit_rate());
        if let Some(snapshot) = cached {
            return Ok(ExportOutcome {
                snapshot,
                source: SnapshotSource::Cache,
            });
        }

        if inner
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("export already running, serving last snapshot");
            return self.stale("export already in progress");
        }
        let _in_flight = InFlight(&inner.in_progress);

        let started = Instant::now();
        let timeout = inner.config.export_timeout();
        let result = inner
            .breaker
            .call(async {
                tokio::time::timeout(timeout, self.collect())
                    .await
                    .unwrap_or(Err(StoreError::Timeout(timeout.as_millis() as u64)))
            })
            .instrument(export_span())
            .await;
        inner.metrics.set_breaker_state(inner.breaker.state());
        inner.metrics.set_connected(inner.store.is_connected());

        match result {
            Ok((snapshot, samples)) => {
                let elapsed = started.elapsed();
                let snapshot = Arc::new(snapshot);
                inner.metrics.publish(&snapshot);
                self.observe_responses(samples);
                inner.metrics.observe_export(elapsed);
                inner.cache.lock().insert(SNAPSHOT_KEY, snapshot.clone());
                *inner.last_snapshot.lock() = Some(snapshot.clone());
                inner.last_export_at.store(snapshot.generated_at, Ordering::Relaxed);
                inner.fresh_exports.fetch_add(1, Ordering::Relaxed);
                debug!(
                    bots = snapshot.bots.len(),
                    channels = snapshot.channels.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "export complete"
                );
                Ok(ExportOutcome {
                    snapshot,
                    source: SnapshotSource::Fresh,
                })
            }
            Err(e) => {
                inner.failed_exports.fetch_add(1, Ordering::Relaxed);
                inner.metrics.record_error();
                let reason = match e {
                    CallError::Open => "circuit breaker open".to_string(),
                    CallError::Inner(e) => e.to_string(),
                };
                warn!(error = %reason, "export failed, serving last snapshot");
                self.stale(&reason)
            }
        }
    }

    /// Prometheus text exposition of the registry
    pub fn render(&self) -> Result<String, TelemetryError> {
        self.inner.metrics.render()
    }

    pub fn stats(&self) -> ExporterStats {
        let inner = &self.inner;
        let (cache_size, cache_hit_rate) = {
            let cache = inner.cache.lock();
            (cache.len(), cache.hit_rate())
        };
        let last = inner.last_export_at.load(Ordering::Relaxed);
        ExporterStats {
            cache_size,
            cache_hit_rate,
            last_export_at: (last > 0).then_some(last),
            export_in_progress: inner.in_progress.load(Ordering::Acquire),
            fresh_exports: inner.fresh_exports.load(Ordering::Relaxed),
            failed_exports: inner.failed_exports.load(Ordering::Relaxed),
            store_connected: inner.store.is_connected(),
            circuit_breaker: inner.breaker.stats(),
        }
    }

    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let tasks: Vec<_> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "exporter task ended abnormally");
            }
        }
        info!("metrics exporter stopped");
    }

    fn stale(&self, reason: &str) -> Result<ExportOutcome, TelemetryError> {
        match self.inner.last_snapshot.lock().clone() {
            Some(snapshot) => Ok(ExportOutcome {
                snapshot,
                source: SnapshotSource::Stale,
            }),
            None => Err(TelemetryError::Export(format!(
                "{reason}, no snapshot available"
            ))),
        }
    }

    fn observe_responses(&self, samples: ResponseSamples) {
        let mut observed = self.inner.observed.lock();
        let mut current = AHashMap::with_capacity(samples.len());
        for (bot, members) in samples {
            let seen = observed.remove(&bot).unwrap_or_default();
            let mut members_now = AHashSet::with_capacity(members.len());
            for (member, response_ms) in members {
                if !seen.contains(&member) {
                    self.inner.metrics.observe_response(&bot, response_ms / 1_000.0);
                }
                members_now.insert(member);
            }
            current.insert(bot, members_now);
        }
        *observed = current;
    }

    async fn collect(&self) -> Result<(MetricsSnapshot, ResponseSamples), StoreError> {
        let inner = &self.inner;
        if !inner.store.is_connected() {
            inner.store.connect().await?;
        }

        let mut budget = inner.config.max_scan_keys;
        let mut truncated = false;
        let bot_keys = self.scan_all(BOT_STATS_PATTERN, &mut budget, &mut truncated).await?;
        let channel_keys = self
            .scan_all(CHANNEL_ACTIVITY_PATTERN, &mut budget, &mut truncated)
            .await?;
        if truncated {
            warn!(
                max_scan_keys = inner.config.max_scan_keys,
                "key scan truncated, export is partial"
            );
        }

        let bot_hashes = self.read_chunked(&bot_keys).await?;
        let mut bots: Vec<BotSnapshot> = bot_keys
            .iter()
            .zip(&bot_hashes)
            .filter_map(|(key, hash)| {
                keys::bot_name_from_stats(key).map(|name| parse_bot(name, hash))
            })
            .collect();

        let mut samples = Vec::with_capacity(bots.len());
        for bot in &bots {
            let members = inner.store.zrange_with_scores(&keys::bot_perf(&bot.bot_name)).await?;
            samples.push((bot.bot_name.clone(), members));
        }

        if inner.config.enable_detailed_labels {
            let condition_keys: Vec<String> =
                bots.iter().map(|b| keys::bot_conditions(&b.bot_name)).collect();
            let conditions = self.read_chunked(&condition_keys).await?;
            for (bot, hash) in bots.iter_mut().zip(conditions) {
                if hash.is_empty() {
                    continue;
                }
                bot.triggers_by_condition = hash
                    .iter()
                    .map(|(condition, _)| (condition.clone(), parse_count(&hash, condition)))
                    .collect();
            }
        }

        let channel_hashes = self.read_chunked(&channel_keys).await?;
        let channels = channel_keys
            .iter()
            .zip(&channel_hashes)
            .filter_map(|(key, hash)| {
                keys::channel_id_from_activity(key).map(|id| ChannelSnapshot {
                    channel_id: id.to_string(),
                    guild_id: hash.get(fields::GUILD_ID).filter(|g| !g.is_empty()).cloned(),
                    bot_triggers: parse_count(hash, fields::BOT_TRIGGERS),
                    unique_bots: parse_count(hash, fields::UNIQUE_BOTS),
                    unique_users: parse_count(hash, fields::UNIQUE_USERS),
                })
            })
            .collect();

        let store_info = match inner.store.info().await {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(error = %e, "store info unavailable, system metrics skipped");
                None
            }
        };

        let snapshot = MetricsSnapshot {
            generated_at: Utc::now().timestamp_millis(),
            scanned_keys: bot_keys.len() + channel_keys.len(),
            bots,
            channels,
            store_info,
            truncated,
        };
        Ok((snapshot, samples))
    }

    /// Every key matching `pattern`, up to `budget` in total
    async fn scan_all(
        &self,
        pattern: &str,
        budget: &mut usize,
        truncated: &mut bool,
    ) -> Result<Vec<String>, StoreError> {
        let count = self.inner.config.scan_count;
        let mut found = BTreeSet::new();
        let mut cursor = 0;
        let scanned: Result<(), StoreError> = async {
            loop {
                let (next, page) = self.inner.store.scan(cursor, pattern, count).await?;
                for key in page {
                    if found.contains(&key) {
                        continue;
                    }
                    if *budget == 0 {
                        *truncated = true;
                        return Ok(());
                    }
                    *budget -= 1;
                    found.insert(key);
                }
                if next == 0 {
                    return Ok(());
                }
                cursor = next;
            }
        }
        .instrument(scan_span(pattern))
        .await;
        scanned?;
        Ok(found.into_iter().collect())
    }

    async fn read_chunked(&self, keys: &[String]) -> Result<Vec<FieldMap>, StoreError> {
        let mut out = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(self.inner.config.batch_size.max(1)) {
            out.extend(self.inner.store.hgetall_many(chunk).await?);
        }
        Ok(out)
    }
}

fn parse_bot(name: &str, hash: &FieldMap) -> BotSnapshot {
    let total_triggers = parse_count(hash, fields::TOTAL_TRIGGERS);
    let total_responses = parse_count(hash, fields::TOTAL_RESPONSES);
    let total_response_time = parse_count(hash, fields::TOTAL_RESPONSE_TIME);
    let avg_response_time_ms = if total_responses == 0 {
        0.0
    } else {
        total_response_time as f64 / total_responses as f64
    };

    BotSnapshot {
        bot_name: name.to_string(),
        total_triggers,
        total_responses,
        total_failures: parse_count(hash, fields::TOTAL_FAILURES),
        avg_response_time_ms,
        unique_users: parse_count(hash, fields::UNIQUE_USERS),
        unique_channels: parse_count(hash, fields::UNIQUE_CHANNELS),
        last_activity: hash.get(fields::LAST_ACTIVITY).and_then(|v| v.parse().ok()),
        triggers_by_condition: BTreeMap::from([(ALL_CONDITIONS.to_string(), total_triggers)]),
    }
}

/// Missing fields read as 0 quietly, malformed ones with a warning
fn parse_count(hash: &FieldMap, field: &str) -> u64 {
    match hash.get(field) {
        None => 0,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(field, value = %raw, "malformed counter, reading as 0");
            0
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use crate::error::ErrorCode;
    use crate::store::MemoryStore;

    fn exporter(store: &MemoryStore, config: ExporterConfig) -> MetricsExporter {
        MetricsExporter::new(Arc::new(store.clone()), config, &Registry::new()).unwrap()
    }

    fn seed(store: &MemoryStore) {
        store.put_field("bot:hugbot:stats", "total_triggers", "10");
        store.put_field("bot:hugbot:stats", "total_responses", "8");
        store.put_field("bot:hugbot:stats", "total_failures", "2");
        store.put_field("bot:hugbot:stats", "total_response_time", "800");
        store.put_field("bot:hugbot:stats", "unique_users", "3");
        store.put_field("bot:hugbot:conditions", "hug", "7");
        store.put_field("bot:hugbot:conditions", "wave", "3");
        store.put_field("channel:c1:activity", "bot_triggers", "10");
        store.put_field("channel:c1:activity", "guild_id", "g1");
    }

    #[test]
    fn test_parse_is_tolerant() {
        let hash: FieldMap = [("total_triggers", "abc"), ("total_responses", "4")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let bot = parse_bot("b", &hash);
        assert_eq!(bot.total_triggers, 0);
        assert_eq!(bot.total_responses, 4);
        assert_eq!(bot.avg_response_time_ms, 0.0);
        assert_eq!(bot.total_failures, 0);
    }

    #[tokio::test]
    async fn test_fresh_export_reads_rollups() {
        let store = MemoryStore::new();
        seed(&store);
        let outcome = exporter(&store, ExporterConfig::default()).export_metrics().await.unwrap();
        assert_eq!(outcome.source, SnapshotSource::Fresh);

        let snapshot = outcome.snapshot;
        let bot = snapshot.bot("hugbot").unwrap();
        assert_eq!(bot.total_triggers, 10);
        assert_eq!(bot.avg_response_time_ms, 100.0);
        assert_eq!(bot.triggers_by_condition[ALL_CONDITIONS], 10);
        assert_eq!(snapshot.channels[0].guild_id.as_deref(), Some("g1"));
        assert!(snapshot.store_info.is_some());
        assert!(!snapshot.truncated);
    }

    #[tokio::test]
    async fn test_detailed_labels_split_conditions() {
        let store = MemoryStore::new();
        seed(&store);
        let exporter = exporter(&store, ExporterConfig::default().with_detailed_labels());
        let snapshot = exporter.export_metrics().await.unwrap().snapshot;
        let by_condition = &snapshot.bot("hugbot").unwrap().triggers_by_condition;
        assert_eq!(by_condition.get("hug"), Some(&7));
        assert_eq!(by_condition.get("wave"), Some(&3));
        assert!(!by_condition.contains_key(ALL_CONDITIONS));

        let text = exporter.render().unwrap();
        assert!(text.contains(r#"bot_telemetry_bot_triggers_total{bot_name="hugbot",condition_name="hug"} 7"#));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_within_ttl() {
        let store = MemoryStore::new();
        seed(&store);
        let exporter = exporter(&store, ExporterConfig::default().with_cache_ttl(Duration::from_secs(15)));

        exporter.export_metrics().await.unwrap();
        let scans = store.stats().scan_calls;
        let outcome = exporter.export_metrics().await.unwrap();
        assert_eq!(outcome.source, SnapshotSource::Cache);
        assert_eq!(store.stats().scan_calls, scans);

        tokio::time::advance(Duration::from_secs(16)).await;
        let outcome = exporter.export_metrics().await.unwrap();
        assert_eq!(outcome.source, SnapshotSource::Fresh);
        assert!(store.stats().scan_calls > scans);
        assert_eq!(exporter.stats().fresh_exports, 2);
    }

    #[tokio::test]
    async fn test_scan_cap_truncates() {
        let store = MemoryStore::new();
        for i in 0..10 {
            store.put_field(&format!("bot:b{i}:stats"), "total_triggers", "1");
        }
        let exporter = exporter(&store, ExporterConfig::default().with_scan_count(3).with_max_scan_keys(4));
        let snapshot = exporter.export_metrics().await.unwrap().snapshot;
        assert!(snapshot.truncated);
        assert_eq!(snapshot.bots.len(), 4);
        assert_eq!(snapshot.scanned_keys, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outage_serves_stale() {
        let store = MemoryStore::new();
        seed(&store);
        let exporter = exporter(&store, ExporterConfig::default().with_cache_ttl(Duration::from_secs(1)));
        let first = exporter.export_metrics().await.unwrap();

        store.set_available(false);
        tokio::time::advance(Duration::from_secs(2)).await;
        let outcome = exporter.export_metrics().await.unwrap();
        assert_eq!(outcome.source, SnapshotSource::Stale);
        assert!(Arc::ptr_eq(&outcome.snapshot, &first.snapshot));
        assert_eq!(exporter.stats().failed_exports, 1);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = ExporterConfig::default().with_scan_count(0);
        let err = MetricsExporter::new(Arc::new(MemoryStore::new()), config, &Registry::new())
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::ConfigInvalid);
    }

    #[tokio::test]
    async fn test_no_snapshot_is_export_error() {
        let store = MemoryStore::new();
        store.set_available(false);
        let err = exporter(&store, ExporterConfig::default()).export_metrics().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExportFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_breaker_failure() {
        let store = MemoryStore::new();
        store.set_latency(Duration::from_secs(30));
        let config = ExporterConfig {
            export_timeout_ms: 1_000,
            ..ExporterConfig::default()
        }
        .with_circuit_breaker(CircuitBreakerConfig::new(1, Duration::from_secs(60)));
        let exporter = exporter(&store, config);

        assert!(exporter.export_metrics().await.is_err());
        assert_eq!(exporter.circuit_breaker().stats().total_failures, 1);
        assert_eq!(exporter.circuit_breaker().state(), crate::breaker::CircuitState::Open);

        // open circuit short-circuits without touching the store
        let calls = store.stats();
        assert!(exporter.export_metrics().await.is_err());
        assert_eq!(store.stats(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_export_gets_stale() {
        let store = MemoryStore::new();
        seed(&store);
        let exporter = exporter(&store, ExporterConfig::default().with_cache_ttl(Duration::from_secs(1)));
        exporter.export_metrics().await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        store.set_latency(Duration::from_millis(500));
        let slow = tokio::spawn({
            let exporter = exporter.clone();
            async move { exporter.export_metrics().await }
        });
        tokio::task::yield_now().await;
        assert!(exporter.stats().export_in_progress);

        let outcome = exporter.export_metrics().await.unwrap();
        assert_eq!(outcome.source, SnapshotSource::Stale);
        assert_eq!(slow.await.unwrap().unwrap().source, SnapshotSource::Fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_cleanup_and_periodic_export() {
        let store = MemoryStore::new();
        seed(&store);
        let config = ExporterConfig {
            cache_cleanup_interval_ms: 1_000,
            export_interval_ms: Some(10_000),
            ..ExporterConfig::default()
        }
        .with_cache_ttl(Duration::from_secs(5));
        let exporter = exporter(&store, config);
        exporter.start();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(exporter.stats().fresh_exports, 1);
        assert_eq!(exporter.stats().cache_size, 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(exporter.stats().cache_size, 0);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(exporter.stats().fresh_exports, 2);

        exporter.shutdown().await;
    }
}
