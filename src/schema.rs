//! Aggregation key layout and the flush plan.
//!
//! Every key the pipeline writes is built here, and a batch of events is
//! turned into a [`FlushPlan`]: a flat, deterministic list of [`StoreOp`]s that
//! a store applies as one atomic unit. Events are pre-aggregated so a batch of
//! 100 triggers for the same bot becomes a handful of `HINCRBY`s, not hundreds.

use crate::config::RetentionConfig;
use crate::error::TelemetryError;
use crate::event::BotTriggerEvent;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Months, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const BOT_STATS_PATTERN: &str = "bot:*:stats";
pub const CHANNEL_ACTIVITY_PATTERN: &str = "channel:*:activity";

pub mod keys {
    use super::Period;

    pub fn event(trigger_id: &str) -> String {
        format!("event:{trigger_id}")
    }

    pub fn bot_stats(bot: &str) -> String {
        format!("bot:{bot}:stats")
    }

    pub fn bot_bucket(bot: &str, period: Period, bucket: &str) -> String {
        format!("bot:{bot}:{}:{bucket}", period.as_str_key())
    }

    pub fn bot_conditions(bot: &str) -> String {
        format!("bot:{bot}:conditions")
    }

    pub fn bot_perf(bot: &str) -> String {
        format!("bot:{bot}:perf")
    }

    pub fn bot_users(bot: &str) -> String {
        format!("bot:{bot}:users")
    }

    pub fn bot_channels(bot: &str) -> String {
        format!("bot:{bot}:channels")
    }

    /// Membership set owned by a hash, e.g. `bot:x:hourly:2024-01-01T10:users`
    pub fn members_of(owner: &str, kind: &str) -> String {
        format!("{owner}:{kind}")
    }

    pub fn channel_activity(channel_id: &str) -> String {
        format!("channel:{channel_id}:activity")
    }

    pub fn channel_bots(channel_id: &str) -> String {
        format!("channel:{channel_id}:bots")
    }

    pub fn channel_users(channel_id: &str) -> String {
        format!("channel:{channel_id}:users")
    }

    pub fn user_interactions(user_id: &str) -> String {
        format!("user:{user_id}:interactions")
    }

    pub fn user_bots(user_id: &str) -> String {
        format!("user:{user_id}:bots")
    }

    pub fn bot_name_from_stats(key: &str) -> Option<&str> {
        key.strip_prefix("bot:")?
            .strip_suffix(":stats")
            .filter(|name| !name.is_empty())
    }

    pub fn channel_id_from_activity(key: &str) -> Option<&str> {
        key.strip_prefix("channel:")?
            .strip_suffix(":activity")
            .filter(|id| !id.is_empty())
    }
}

pub mod fields {
    pub const DATA: &str = "data";
    pub const TIMESTAMP: &str = "timestamp";

    pub const TOTAL_TRIGGERS: &str = "total_triggers";
    pub const TOTAL_RESPONSES: &str = "total_responses";
    pub const TOTAL_FAILURES: &str = "total_failures";
    pub const TOTAL_RESPONSE_TIME: &str = "total_response_time";
    pub const LAST_ACTIVITY: &str = "last_activity";

    pub const TRIGGERS: &str = "triggers";
    pub const RESPONSES: &str = "responses";
    pub const FAILURES: &str = "failures";
    pub const RESPONSE_TIME_SUM: &str = "response_time_sum";
    pub const CONDITION_PREFIX: &str = "condition:";
    pub const RESPONSE_TYPE_PREFIX: &str = "response_type:";

    pub const UNIQUE_USERS: &str = "unique_users";
    pub const UNIQUE_CHANNELS: &str = "unique_channels";
    pub const UNIQUE_BOTS: &str = "unique_bots";

    pub const BOT_TRIGGERS: &str = "bot_triggers";
    pub const LAST_TRIGGER: &str = "last_trigger";
    pub const GUILD_ID: &str = "guild_id";
}

/// Time bucket granularity for rollups and aggregated queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Hour,
    Day,
    Month,
}

impl Period {
    pub const ALL: [Period; 3] = [Period::Hour, Period::Day, Period::Month];

    fn as_str_key(&self) -> &'static str {
        match self {
            Period::Hour => "hourly",
            Period::Day => "daily",
            Period::Month => "monthly",
        }
    }

    /// `YYYY-MM-DDTHH`, `YYYY-MM-DD` or `YYYY-MM` (UTC)
    pub fn bucket_id(&self, at: DateTime<Utc>) -> String {
        match self {
            Period::Hour => at.format("%Y-%m-%dT%H").to_string(),
            Period::Day => at.format("%Y-%m-%d").to_string(),
            Period::Month => at.format("%Y-%m").to_string(),
        }
    }

    /// Start of the bucket containing `at`
    pub fn floor(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let hour_start = at
            .with_nanosecond(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_minute(0))
            .unwrap_or(at);
        let day_start = hour_start.with_hour(0).unwrap_or(hour_start);
        match self {
            Period::Hour => hour_start,
            Period::Day => day_start,
            Period::Month => day_start.with_day(1).unwrap_or(day_start),
        }
    }

    /// Start of the bucket after the one starting at `at`, `None` past the
    /// representable range
    pub fn next(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Period::Hour => at.checked_add_signed(ChronoDuration::hours(1)),
            Period::Day => at.checked_add_signed(ChronoDuration::days(1)),
            Period::Month => at.checked_add_months(Months::new(1)),
        }
    }

    pub fn ttl_secs(&self, retention: &RetentionConfig) -> u64 {
        match self {
            Period::Hour => retention.hourly_ttl_secs,
            Period::Day => retention.daily_ttl_secs,
            Period::Month => retention.monthly_ttl_secs,
        }
    }
}

/// Perf sorted-set member: `{timestamp}:{triggerId}`
pub fn perf_member(timestamp: i64, trigger_id: &str) -> String {
    format!("{timestamp}:{trigger_id}")
}

pub fn perf_member_timestamp(member: &str) -> Option<i64> {
    member.split_once(':')?.0.parse().ok()
}

pub fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// One primitive store mutation
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    HIncrBy { key: String, field: String, delta: i64 },
    HSet { key: String, field: String, value: String },
    /// Set `key.field` to `value` unless it already holds a larger integer
    HSetMax { key: String, field: String, value: i64 },
    SAdd { key: String, member: String },
    /// Write `SCARD(set_key)` into `key.field` as an absolute value
    HSetCard { key: String, field: String, set_key: String },
    ZAdd { key: String, score: f64, member: String },
    Expire { key: String, secs: u64 },
}

impl StoreOp {
    pub fn key(&self) -> &str {
        match self {
            StoreOp::HIncrBy { key, .. }
            | StoreOp::HSet { key, .. }
            | StoreOp::HSetMax { key, .. }
            | StoreOp::SAdd { key, .. }
            | StoreOp::HSetCard { key, .. }
            | StoreOp::ZAdd { key, .. }
            | StoreOp::Expire { key, .. } => key,
        }
    }

    pub fn command(&self) -> &'static str {
        match self {
            StoreOp::HIncrBy { .. } => "HINCRBY",
            StoreOp::HSet { .. } => "HSET",
            StoreOp::HSetMax { .. } => "HSETMAX",
            StoreOp::SAdd { .. } => "SADD",
            StoreOp::HSetCard { .. } => "HSETCARD",
            StoreOp::ZAdd { .. } => "ZADD",
            StoreOp::Expire { .. } => "EXPIRE",
        }
    }
}

/// Ordered operations for one atomic flush unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushPlan {
    ops: Vec<StoreOp>,
    event_count: usize,
}

impl FlushPlan {
    /// Pre-aggregate `events` into store operations. Every event must already
    /// have passed validation; a malformed timestamp here is an error rather
    /// than a silently skipped event.
    pub fn build(events: &[BotTriggerEvent], retention: &RetentionConfig) -> Result<Self, TelemetryError> {
        let mut b = PlanBuilder::default();

        for event in events {
            let at = event.occurred_at().ok_or_else(|| {
                TelemetryError::Validation(format!(
                    "trigger {} has malformed timestamp {}",
                    event.trigger_id, event.timestamp
                ))
            })?;
            let data = serde_json::to_string(event)
                .map_err(|e| TelemetryError::Validation(format!("unserializable event: {e}")))?;
            b.record_event(event, at, data, retention);
        }

        Ok(b.finish(events.len()))
    }

    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    pub fn event_count(&self) -> usize {
        self.event_count
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Distinct keys touched, in first-use order
    pub fn keys(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.ops
            .iter()
            .map(StoreOp::key)
            .filter(|k| seen.insert(*k))
            .collect()
    }
}

type FieldKey = (String, String);

#[derive(Default)]
struct PlanBuilder {
    event_sets: Vec<StoreOp>,
    members: BTreeMap<String, BTreeSet<String>>,
    incrs: BTreeMap<FieldKey, i64>,
    latest: BTreeMap<FieldKey, i64>,
    sets: BTreeMap<FieldKey, String>,
    cards: BTreeMap<FieldKey, String>,
    zadds: Vec<StoreOp>,
    expires: BTreeMap<String, u64>,
}

impl PlanBuilder {
    fn incr(&mut self, key: &str, field: &str, delta: i64) {
        *self.incrs.entry((key.to_string(), field.to_string())).or_insert(0) += delta;
    }

    fn latest(&mut self, key: &str, field: &str, ts: i64) {
        let slot = self.latest.entry((key.to_string(), field.to_string())).or_insert(ts);
        *slot = (*slot).max(ts);
    }

    fn add_member(&mut self, set_key: String, member: &str) -> String {
        self.members
            .entry(set_key.clone())
            .or_default()
            .insert(member.to_string());
        set_key
    }

    fn card(&mut self, key: &str, field: &str, set_key: String) {
        self.cards.insert((key.to_string(), field.to_string()), set_key);
    }

    fn expire(&mut self, key: impl Into<String>, secs: u64) {
        self.expires.insert(key.into(), secs);
    }

    fn record_event(
        &mut self,
        event: &BotTriggerEvent,
        at: DateTime<Utc>,
        data: String,
        retention: &RetentionConfig,
    ) {
        let bot = event.bot_name.as_str();
        let condition = event.condition();
        let rollup_ttl = retention.rollup_ttl_secs;
        let success_rt = if event.success { event.response_time_ms as i64 } else { 0 };

        // raw snapshot
        let event_key = keys::event(&event.trigger_id);
        self.event_sets.push(StoreOp::HSet {
            key: event_key.clone(),
            field: fields::DATA.to_string(),
            value: data,
        });
        self.event_sets.push(StoreOp::HSet {
            key: event_key.clone(),
            field: fields::TIMESTAMP.to_string(),
            value: event.timestamp.to_string(),
        });
        self.expire(event_key, retention.event_ttl_secs);

        // bot totals
        let stats = keys::bot_stats(bot);
        self.incr(&stats, fields::TOTAL_TRIGGERS, 1);
        if event.success {
            self.incr(&stats, fields::TOTAL_RESPONSES, 1);
            self.incr(&stats, fields::TOTAL_RESPONSE_TIME, success_rt);
        } else {
            self.incr(&stats, fields::TOTAL_FAILURES, 1);
        }
        self.latest(&stats, fields::LAST_ACTIVITY, event.timestamp);
        let users = self.add_member(keys::bot_users(bot), &event.user_id);
        let channels = self.add_member(keys::bot_channels(bot), &event.channel_id);
        self.card(&stats, fields::UNIQUE_USERS, users.clone());
        self.card(&stats, fields::UNIQUE_CHANNELS, channels.clone());
        self.expire(stats, rollup_ttl);
        self.expire(users, rollup_ttl);
        self.expire(channels, rollup_ttl);

        // time buckets
        for period in Period::ALL {
            let bucket = keys::bot_bucket(bot, period, &period.bucket_id(at));
            let ttl = period.ttl_secs(retention);
            self.incr(&bucket, fields::TRIGGERS, 1);
            if event.success {
                self.incr(&bucket, fields::RESPONSES, 1);
                self.incr(&bucket, fields::RESPONSE_TIME_SUM, success_rt);
            } else {
                self.incr(&bucket, fields::FAILURES, 1);
            }
            self.incr(&bucket, &format!("{}{condition}", fields::CONDITION_PREFIX), 1);
            self.incr(
                &bucket,
                &format!("{}{}", fields::RESPONSE_TYPE_PREFIX, event.response_type),
                1,
            );
            let users = self.add_member(keys::members_of(&bucket, "users"), &event.user_id);
            let channels = self.add_member(keys::members_of(&bucket, "channels"), &event.channel_id);
            self.card(&bucket, fields::UNIQUE_USERS, users.clone());
            self.card(&bucket, fields::UNIQUE_CHANNELS, channels.clone());
            self.expire(bucket, ttl);
            self.expire(users, ttl);
            self.expire(channels, ttl);
        }

        let conditions = keys::bot_conditions(bot);
        self.incr(&conditions, condition, 1);
        self.expire(conditions, rollup_ttl);

        if event.response_time_ms > 0 {
            let perf = keys::bot_perf(bot);
            self.zadds.push(StoreOp::ZAdd {
                key: perf.clone(),
                score: event.response_time_ms as f64,
                member: perf_member(event.timestamp, &event.trigger_id),
            });
            self.expire(perf, retention.perf_ttl_secs);
        }

        // channel activity
        let activity = keys::channel_activity(&event.channel_id);
        self.incr(&activity, fields::BOT_TRIGGERS, 1);
        self.latest(&activity, fields::LAST_TRIGGER, event.timestamp);
        if let Some(guild) = event.guild_id.as_deref().filter(|g| !g.is_empty()) {
            self.sets.insert(
                (activity.clone(), fields::GUILD_ID.to_string()),
                guild.to_string(),
            );
        }
        let bots = self.add_member(keys::channel_bots(&event.channel_id), bot);
        let users = self.add_member(keys::channel_users(&event.channel_id), &event.user_id);
        self.card(&activity, fields::UNIQUE_BOTS, bots.clone());
        self.card(&activity, fields::UNIQUE_USERS, users.clone());
        self.expire(activity, rollup_ttl);
        self.expire(bots, rollup_ttl);
        self.expire(users, rollup_ttl);

        // user interactions
        let interactions = keys::user_interactions(&event.user_id);
        self.incr(&interactions, fields::BOT_TRIGGERS, 1);
        self.latest(&interactions, fields::LAST_TRIGGER, event.timestamp);
        let bots = self.add_member(keys::user_bots(&event.user_id), bot);
        self.card(&interactions, fields::UNIQUE_BOTS, bots.clone());
        self.expire(interactions, rollup_ttl);
        self.expire(bots, rollup_ttl);
    }

    fn finish(self, event_count: usize) -> FlushPlan {
        let mut ops = self.event_sets;

        for (key, members) in self.members {
            ops.extend(members.into_iter().map(|member| StoreOp::SAdd {
                key: key.clone(),
                member,
            }));
        }
        ops.extend(
            self.incrs
                .into_iter()
                .map(|((key, field), delta)| StoreOp::HIncrBy { key, field, delta }),
        );
        ops.extend(
            self.latest
                .into_iter()
                .map(|((key, field), value)| StoreOp::HSetMax { key, field, value }),
        );
        ops.extend(
            self.sets
                .into_iter()
                .map(|((key, field), value)| StoreOp::HSet { key, field, value }),
        );
        ops.extend(
            self.cards
                .into_iter()
                .map(|((key, field), set_key)| StoreOp::HSetCard { key, field, set_key }),
        );
        ops.extend(self.zadds);
        ops.extend(
            self.expires
                .into_iter()
                .map(|(key, secs)| StoreOp::Expire { key, secs }),
        );

        FlushPlan { ops, event_count }
    }
}
