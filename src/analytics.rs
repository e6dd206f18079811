//! Read-side queries over the rollups.
//!
//! Every failure, including a missing bot name or an invalid range, comes back
//! as `ANALYTICS_FAILED`.

use crate::error::TelemetryError;
use crate::observability::query_span;
use crate::schema::{fields, keys, millis_to_datetime, perf_member_timestamp, Period};
use crate::store::{FieldMap, Store};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, Instrument};

/// Most aggregated buckets one query may cover
pub const MAX_BUCKETS: usize = 2_000;
const TOP_CONDITIONS: usize = 10;
const DEFAULT_WINDOW_MS: i64 = 24 * 60 * 60 * 1_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotMetricsFilter {
    pub bot_name: Option<String>,
}

impl BotMetricsFilter {
    pub fn bot(name: impl Into<String>) -> Self {
        BotMetricsFilter {
            bot_name: Some(name.into()),
        }
    }
}

/// Inclusive range in epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start_time: i64,
    pub end_time: i64,
}

impl TimeRange {
    pub fn new(start_time: i64, end_time: i64) -> Self {
        TimeRange { start_time, end_time }
    }

    /// The 24 hours up to now
    pub fn last_day() -> Self {
        let now = Utc::now().timestamp_millis();
        TimeRange::new(now - DEFAULT_WINDOW_MS, now)
    }

    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start_time && ts <= self.end_time
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRangeQuery {
    pub start_time: i64,
    pub end_time: i64,
    pub period: Period,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotStats {
    pub total_triggers: u64,
    pub total_responses: u64,
    pub total_failures: u64,
    pub success_rate: f64,
    pub avg_response_time: f64,
    pub median_response_time: f64,
    pub p95_response_time: f64,
    pub unique_users: u64,
    pub unique_channels: u64,
    pub last_activity: Option<i64>,
    /// Response-time samples inside the query range
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionCount {
    pub condition_name: String,
    pub trigger_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotPerformanceAnalytics {
    pub bot_name: String,
    pub time_range: TimeRange,
    pub stats: BotStats,
    pub top_conditions: Vec<ConditionCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelActivityAnalytics {
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub time_range: TimeRange,
    pub total_bot_triggers: u64,
    pub unique_bots: u64,
    pub unique_users: u64,
    pub last_trigger: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInteractionAnalytics {
    pub user_id: String,
    pub time_range: TimeRange,
    pub total_bot_triggers: u64,
    pub unique_bots: u64,
    pub last_trigger: Option<i64>,
}

/// One time bucket of an aggregated query
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotMetricsAggregation {
    pub time_key: String,
    pub period: Period,
    pub bot_name: String,
    pub total_triggers: u64,
    pub total_responses: u64,
    pub total_failures: u64,
    pub avg_response_time: f64,
    pub min_response_time: f64,
    pub max_response_time: f64,
    pub unique_users: u64,
    pub unique_channels: u64,
    pub top_condition: Option<String>,
    pub response_types: BTreeMap<String, u64>,
}

pub struct AnalyticsReader {
    store: Arc<dyn Store>,
}

impl AnalyticsReader {
    pub fn new(store: Arc<dyn Store>) -> Self {
        AnalyticsReader { store }
    }

    pub async fn get_bot_metrics(
        &self,
        filter: &BotMetricsFilter,
        range: Option<TimeRange>,
    ) -> Result<BotPerformanceAnalytics, TelemetryError> {
        const OP: &str = "get_bot_metrics";
        let bot = required_bot(OP, filter)?;
        let range = range.unwrap_or_else(TimeRange::last_day);
        check_range(OP, range.start_time, range.end_time)?;

        async {
            self.ensure_connected(OP).await?;
            let stats = self.read_hash(OP, &keys::bot_stats(bot)).await?;
            let conditions = self.read_hash(OP, &keys::bot_conditions(bot)).await?;
            let mut samples: Vec<f64> = self
                .store
                .zrange_with_scores(&keys::bot_perf(bot))
                .await
                .map_err(|e| TelemetryError::analytics(OP, e.to_string()))?
                .into_iter()
                .filter(|(member, _)| perf_member_timestamp(member).map_or(false, |ts| range.contains(ts)))
                .map(|(_, score)| score)
                .collect();
            samples.sort_by(f64::total_cmp);

            let total_triggers = count(&stats, fields::TOTAL_TRIGGERS);
            let total_responses = count(&stats, fields::TOTAL_RESPONSES);
            let total_response_time = count(&stats, fields::TOTAL_RESPONSE_TIME);

            debug!(bot, samples = samples.len(), "bot metrics computed");
            Ok::<_, TelemetryError>(BotPerformanceAnalytics {
                bot_name: bot.to_string(),
                time_range: range,
                stats: BotStats {
                    total_triggers,
                    total_responses,
                    total_failures: count(&stats, fields::TOTAL_FAILURES),
                    success_rate: ratio(total_responses, total_triggers),
                    avg_response_time: ratio(total_response_time, total_responses),
                    median_response_time: percentile(&samples, 0.5),
                    p95_response_time: percentile(&samples, 0.95),
                    unique_users: count(&stats, fields::UNIQUE_USERS),
                    unique_channels: count(&stats, fields::UNIQUE_CHANNELS),
                    last_activity: timestamp(&stats, fields::LAST_ACTIVITY),
                    samples: samples.len(),
                },
                top_conditions: top_conditions(&conditions, TOP_CONDITIONS),
            })
        }
        .instrument(query_span(OP, bot))
        .await
    }

    /// Channel rollups carry no time dimension: the counters cover the
    /// retention window of the activity hash, and `range` is only echoed back.
    pub async fn get_channel_metrics(
        &self,
        channel_id: &str,
        range: Option<TimeRange>,
    ) -> Result<ChannelActivityAnalytics, TelemetryError> {
        const OP: &str = "get_channel_metrics";
        if channel_id.is_empty() {
            return Err(TelemetryError::analytics(OP, "channel id is required"));
        }
        self.ensure_connected(OP).await?;
        let activity = self
            .read_hash(OP, &keys::channel_activity(channel_id))
            .instrument(query_span(OP, channel_id))
            .await?;

        Ok(ChannelActivityAnalytics {
            channel_id: channel_id.to_string(),
            guild_id: activity.get(fields::GUILD_ID).cloned(),
            time_range: range.unwrap_or_else(TimeRange::last_day),
            total_bot_triggers: count(&activity, fields::BOT_TRIGGERS),
            unique_bots: count(&activity, fields::UNIQUE_BOTS),
            unique_users: count(&activity, fields::UNIQUE_USERS),
            last_trigger: timestamp(&activity, fields::LAST_TRIGGER),
        })
    }

    /// Lifetime totals within retention, like [`Self::get_channel_metrics`]
    pub async fn get_user_metrics(
        &self,
        user_id: &str,
        range: Option<TimeRange>,
    ) -> Result<UserInteractionAnalytics, TelemetryError> {
        const OP: &str = "get_user_metrics";
        if user_id.is_empty() {
            return Err(TelemetryError::analytics(OP, "user id is required"));
        }
        self.ensure_connected(OP).await?;
        let interactions = self
            .read_hash(OP, &keys::user_interactions(user_id))
            .instrument(query_span(OP, user_id))
            .await?;

        Ok(UserInteractionAnalytics {
            user_id: user_id.to_string(),
            time_range: range.unwrap_or_else(TimeRange::last_day),
            total_bot_triggers: count(&interactions, fields::BOT_TRIGGERS),
            unique_bots: count(&interactions, fields::UNIQUE_BOTS),
            last_trigger: timestamp(&interactions, fields::LAST_TRIGGER),
        })
    }

    /// One record per bucket between `start_time` and `end_time`, empty
    /// buckets included
    pub async fn get_aggregated_metrics(
        &self,
        filter: &BotMetricsFilter,
        query: TimeRangeQuery,
    ) -> Result<Vec<BotMetricsAggregation>, TelemetryError> {
        const OP: &str = "get_aggregated_metrics";
        let bot = required_bot(OP, filter)?;
        check_range(OP, query.start_time, query.end_time)?;
        let buckets = bucket_ids(query)?;

        async {
            self.ensure_connected(OP).await?;
            let bucket_keys: Vec<String> = buckets
                .iter()
                .map(|id| keys::bot_bucket(bot, query.period, id))
                .collect();
            let hashes = self
                .store
                .hgetall_many(&bucket_keys)
                .await
                .map_err(|e| TelemetryError::analytics(OP, e.to_string()))?;

            // min/max per bucket from the raw response-time samples
            let mut extremes: BTreeMap<String, (f64, f64)> = BTreeMap::new();
            let perf = self
                .store
                .zrange_with_scores(&keys::bot_perf(bot))
                .await
                .map_err(|e| TelemetryError::analytics(OP, e.to_string()))?;
            for (member, score) in perf {
                let Some(at) = perf_member_timestamp(&member).and_then(millis_to_datetime) else {
                    continue;
                };
                let slot = extremes
                    .entry(query.period.bucket_id(at))
                    .or_insert((score, score));
                slot.0 = slot.0.min(score);
                slot.1 = slot.1.max(score);
            }

            Ok::<_, TelemetryError>(buckets
                .into_iter()
                .zip(hashes)
                .map(|(time_key, hash)| {
                    let responses = count(&hash, fields::RESPONSES);
                    let (min, max) = extremes.get(&time_key).copied().unwrap_or((0.0, 0.0));
                    let mut conditions = BTreeMap::new();
                    let mut response_types = BTreeMap::new();
                    for (field, value) in &hash {
                        let n = value.parse().unwrap_or(0);
                        if let Some(c) = field.strip_prefix(fields::CONDITION_PREFIX) {
                            conditions.insert(c.to_string(), n);
                        } else if let Some(t) = field.strip_prefix(fields::RESPONSE_TYPE_PREFIX) {
                            response_types.insert(t.to_string(), n);
                        }
                    }

                    BotMetricsAggregation {
                        period: query.period,
                        bot_name: bot.to_string(),
                        total_triggers: count(&hash, fields::TRIGGERS),
                        total_responses: responses,
                        total_failures: count(&hash, fields::FAILURES),
                        avg_response_time: ratio(count(&hash, fields::RESPONSE_TIME_SUM), responses),
                        min_response_time: min,
                        max_response_time: max,
                        unique_users: count(&hash, fields::UNIQUE_USERS),
                        unique_channels: count(&hash, fields::UNIQUE_CHANNELS),
                        top_condition: top_condition(&conditions),
                        response_types,
                        time_key,
                    }
                })
                .collect())
        }
        .instrument(query_span(OP, bot))
        .await
    }

    async fn ensure_connected(&self, op: &'static str) -> Result<(), TelemetryError> {
        if !self.store.is_connected() {
            self.store
                .connect()
                .await
                .map_err(|e| TelemetryError::analytics(op, e.to_string()))?;
        }
        Ok(())
    }

    async fn read_hash(&self, op: &'static str, key: &str) -> Result<FieldMap, TelemetryError> {
        self.store
            .hgetall(key)
            .await
            .map_err(|e| TelemetryError::analytics(op, e.to_string()))
    }
}

fn required_bot<'a>(op: &'static str, filter: &'a BotMetricsFilter) -> Result<&'a str, TelemetryError> {
    filter
        .bot_name
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| TelemetryError::analytics(op, "bot name is required"))
}

fn check_range(op: &'static str, start: i64, end: i64) -> Result<(), TelemetryError> {
    if start > end {
        return Err(TelemetryError::analytics(
            op,
            format!("start time {start} is after end time {end}"),
        ));
    }
    Ok(())
}

fn bucket_ids(query: TimeRangeQuery) -> Result<Vec<String>, TelemetryError> {
    const OP: &str = "get_aggregated_metrics";
    let (Some(start), Some(end)) = (
        millis_to_datetime(query.start_time),
        millis_to_datetime(query.end_time),
    ) else {
        return Err(TelemetryError::analytics(OP, "time range is not representable"));
    };

    let mut ids = Vec::new();
    let mut at = query.period.floor(start);
    while at <= end {
        if ids.len() == MAX_BUCKETS {
            return Err(TelemetryError::analytics(
                OP,
                format!("time range covers more than {MAX_BUCKETS} buckets"),
            ));
        }
        ids.push(query.period.bucket_id(at));
        match query.period.next(at) {
            Some(next) => at = next,
            None => break,
        }
    }
    Ok(ids)
}

fn count(fields: &FieldMap, name: &str) -> u64 {
    fields.get(name).and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn timestamp(fields: &FieldMap, name: &str) -> Option<i64> {
    fields.get(name).and_then(|v| v.parse().ok())
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Nearest-rank percentile over ascending `sorted`
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 * p).floor() as usize).min(sorted.len() - 1);
    sorted[idx]
}

fn top_conditions(conditions: &FieldMap, limit: usize) -> Vec<ConditionCount> {
    let mut ranked: Vec<ConditionCount> = conditions
        .iter()
        .map(|(name, n)| ConditionCount {
            condition_name: name.clone(),
            trigger_count: n.parse().unwrap_or(0),
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.trigger_count
            .cmp(&a.trigger_count)
            .then_with(|| a.condition_name.cmp(&b.condition_name))
    });
    ranked.truncate(limit);
    ranked
}

fn top_condition(conditions: &BTreeMap<String, u64>) -> Option<String> {
    // BTreeMap iterates by name, so the first maximum wins ties
    conditions
        .iter()
        .fold(None::<(&String, u64)>, |best, (name, &n)| match best {
            Some((_, top)) if top >= n => best,
            _ => Some((name, n)),
        })
        .filter(|(_, n)| *n > 0)
        .map(|(name, _)| name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetentionConfig, TrackerConfig};
    use crate::error::ErrorCode;
    use crate::event::{BotTriggerEvent, ResponseType};
    use crate::store::MemoryStore;
    use crate::tracker::EventTracker;
    use chrono::DateTime;
    use prometheus::Registry;

    // 2024-03-05T14:00:00Z
    const HOUR: i64 = 1_709_647_200_000;
    const H: i64 = 3_600_000;

    fn trigger(i: usize, ts: i64, rt: u64, condition: &str) -> BotTriggerEvent {
        BotTriggerEvent::new("hugbot", format!("u{}", i % 2), format!("c{}", i % 3), "m")
            .with_trigger_id(format!("t{i}"))
            .with_timestamp(ts)
            .with_condition(condition)
            .with_guild("g1")
            .with_response(rt, ResponseType::Message)
    }

    async fn seeded() -> (MemoryStore, AnalyticsReader) {
        let store = MemoryStore::new();
        let tracker = EventTracker::new(
            Arc::new(store.clone()),
            TrackerConfig::default(),
            RetentionConfig::default(),
            &Registry::new(),
        )
        .unwrap();

        let events = vec![
            trigger(0, HOUR + 1_000, 100, "hug"),
            trigger(1, HOUR + 2_000, 200, "hug"),
            trigger(2, HOUR + 3_000, 300, "wave"),
            trigger(3, HOUR + 2 * H, 400, "hug").failed("timeout"),
        ];
        tracker.track_batch_triggers(events).await.unwrap();
        (store.clone(), AnalyticsReader::new(Arc::new(store)))
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let v: Vec<f64> = (1..=20).map(f64::from).collect();
        assert_eq!(percentile(&v, 0.5), 11.0);
        assert_eq!(percentile(&v, 0.95), 20.0);
        assert_eq!(percentile(&[], 0.95), 0.0);
        assert_eq!(percentile(&[7.0], 0.5), 7.0);
    }

    #[test]
    fn test_top_conditions_order() {
        let conditions: FieldMap = [("b", "5"), ("a", "5"), ("c", "9"), ("d", "x")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let top = top_conditions(&conditions, 3);
        let names: Vec<_> = top.iter().map(|c| c.condition_name.as_str()).collect();
        assert_eq!(names, ["c", "a", "b"]);

        let by_name: BTreeMap<String, u64> =
            [("b".to_string(), 2), ("a".to_string(), 2)].into_iter().collect();
        assert_eq!(top_condition(&by_name).as_deref(), Some("a"));
        assert_eq!(top_condition(&BTreeMap::new()), None);
    }

    #[tokio::test]
    async fn test_bot_metrics_requires_name() {
        let reader = AnalyticsReader::new(Arc::new(MemoryStore::new()));
        let err = reader
            .get_bot_metrics(&BotMetricsFilter::default(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::AnalyticsFailed);
    }

    #[tokio::test]
    async fn test_bot_metrics() {
        let (_, reader) = seeded().await;
        let range = TimeRange::new(HOUR, HOUR + H);
        let m = reader
            .get_bot_metrics(&BotMetricsFilter::bot("hugbot"), Some(range))
            .await
            .unwrap();

        assert_eq!(m.stats.total_triggers, 4);
        assert_eq!(m.stats.total_responses, 3);
        assert_eq!(m.stats.total_failures, 1);
        assert_eq!(m.stats.success_rate, 0.75);
        assert_eq!(m.stats.avg_response_time, 200.0);
        // the failed trigger two hours later is outside the range
        assert_eq!(m.stats.samples, 3);
        assert_eq!(m.stats.median_response_time, 200.0);
        assert_eq!(m.stats.p95_response_time, 300.0);
        assert_eq!(m.stats.unique_users, 2);
        assert_eq!(m.stats.last_activity, Some(HOUR + 2 * H));
        assert_eq!(m.top_conditions[0].condition_name, "hug");
        assert_eq!(m.top_conditions[0].trigger_count, 3);
    }

    #[tokio::test]
    async fn test_unknown_bot_is_empty_not_error() {
        let (_, reader) = seeded().await;
        let m = reader
            .get_bot_metrics(&BotMetricsFilter::bot("nobody"), None)
            .await
            .unwrap();
        assert_eq!(m.stats.total_triggers, 0);
        assert_eq!(m.stats.success_rate, 0.0);
        assert!(m.top_conditions.is_empty());
    }

    #[tokio::test]
    async fn test_channel_and_user_metrics() {
        let (_, reader) = seeded().await;
        let c = reader.get_channel_metrics("c0", None).await.unwrap();
        assert_eq!(c.total_bot_triggers, 2);
        assert_eq!(c.unique_bots, 1);
        assert_eq!(c.guild_id.as_deref(), Some("g1"));

        let u = reader.get_user_metrics("u1", None).await.unwrap();
        assert_eq!(u.total_bot_triggers, 2);
        assert_eq!(u.last_trigger, Some(HOUR + 2 * H));
    }

    #[tokio::test]
    async fn test_aggregated_hourly_zero_fills() {
        let (_, reader) = seeded().await;
        let query = TimeRangeQuery {
            start_time: HOUR,
            end_time: HOUR + 2 * H + 1,
            period: Period::Hour,
        };
        let buckets = reader
            .get_aggregated_metrics(&BotMetricsFilter::bot("hugbot"), query)
            .await
            .unwrap();

        let keys: Vec<_> = buckets.iter().map(|b| b.time_key.as_str()).collect();
        assert_eq!(keys, ["2024-03-05T14", "2024-03-05T15", "2024-03-05T16"]);

        let first = &buckets[0];
        assert_eq!(first.total_triggers, 3);
        assert_eq!(first.avg_response_time, 200.0);
        assert_eq!(first.min_response_time, 100.0);
        assert_eq!(first.max_response_time, 300.0);
        assert_eq!(first.top_condition.as_deref(), Some("hug"));
        assert_eq!(first.response_types["message"], 3);

        assert_eq!(buckets[1].total_triggers, 0);
        assert_eq!(buckets[1].top_condition, None);
        assert_eq!(buckets[2].total_failures, 1);
    }

    #[tokio::test]
    async fn test_aggregated_daily() {
        let (_, reader) = seeded().await;
        let query = TimeRangeQuery {
            start_time: HOUR,
            end_time: HOUR,
            period: Period::Day,
        };
        let buckets = reader
            .get_aggregated_metrics(&BotMetricsFilter::bot("hugbot"), query)
            .await
            .unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].total_triggers, 4);
        assert_eq!(buckets[0].unique_channels, 3);
    }

    #[tokio::test]
    async fn test_aggregated_monthly() {
        let (_, reader) = seeded().await;
        let query = TimeRangeQuery {
            start_time: HOUR - 40 * 24 * H,
            end_time: HOUR,
            period: Period::Month,
        };
        let buckets = reader
            .get_aggregated_metrics(&BotMetricsFilter::bot("hugbot"), query)
            .await
            .unwrap();

        let keys: Vec<_> = buckets.iter().map(|b| b.time_key.as_str()).collect();
        assert_eq!(keys, ["2024-01", "2024-02", "2024-03"]);
        assert_eq!(buckets[0].total_triggers, 0);
        assert_eq!(buckets[1].total_triggers, 0);
        let march = &buckets[2];
        assert_eq!(march.period, Period::Month);
        assert_eq!(march.total_triggers, 4);
        assert_eq!(march.total_failures, 1);
        assert_eq!(march.min_response_time, 100.0);
        assert_eq!(march.unique_users, 2);
    }

    #[test]
    fn test_bucket_ids_stop_at_the_end_of_time() {
        let max = DateTime::<Utc>::MAX_UTC.timestamp_millis();
        for period in Period::ALL {
            let ids = bucket_ids(TimeRangeQuery {
                start_time: max - 1_000,
                end_time: max,
                period,
            })
            .unwrap();
            assert_eq!(ids.len(), 1, "{period:?}");
        }
    }

    #[tokio::test]
    async fn test_aggregated_rejects_bad_ranges() {
        let reader = AnalyticsReader::new(Arc::new(MemoryStore::new()));
        let filter = BotMetricsFilter::bot("hugbot");

        let inverted = TimeRangeQuery {
            start_time: HOUR + H,
            end_time: HOUR,
            period: Period::Hour,
        };
        assert!(reader.get_aggregated_metrics(&filter, inverted).await.is_err());

        let too_long = TimeRangeQuery {
            start_time: HOUR,
            end_time: HOUR + 2_001 * H,
            period: Period::Hour,
        };
        let err = reader.get_aggregated_metrics(&filter, too_long).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AnalyticsFailed);
    }

    #[tokio::test]
    async fn test_store_failure_is_analytics_error() {
        let store = MemoryStore::new();
        store.set_available(false);
        let reader = AnalyticsReader::new(Arc::new(store));
        let err = reader.get_user_metrics("u1", None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AnalyticsFailed);
    }
}
