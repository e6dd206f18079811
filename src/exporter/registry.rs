use crate::breaker::CircuitState;
use crate::error::TelemetryError;
use prometheus::{
    Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Label used for the condition dimension unless detailed labels are on
pub const ALL_CONDITIONS: &str = "all";

/// Everything the exporter publishes
#[derive(Clone)]
pub(crate) struct ExporterMetrics {
    registry: Registry,
    triggers: IntCounterVec,
    responses: IntCounterVec,
    response_duration: HistogramVec,
    unique_users: IntGaugeVec,
    channel_activity: IntGaugeVec,
    store_connected: IntGauge,
    export_duration: Histogram,
    cache_hit_rate: Gauge,
    breaker_state: IntGauge,
    store_keys: IntGauge,
    store_memory: IntGauge,
    export_errors: IntCounter,
}

impl ExporterMetrics {
    pub(crate) fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let triggers = IntCounterVec::new(
            Opts::new("bot_telemetry_bot_triggers_total", "Bot triggers recorded in the store"),
            &["bot_name", "condition_name"],
        )?;
        let responses = IntCounterVec::new(
            Opts::new("bot_telemetry_bot_responses_total", "Bot responses by outcome"),
            &["bot_name", "success"],
        )?;
        let response_duration = HistogramVec::new(
            HistogramOpts::new(
                "bot_telemetry_bot_response_duration_seconds",
                "Bot response times, one observation per recorded response",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["bot_name"],
        )?;
        let unique_users = IntGaugeVec::new(
            Opts::new("bot_telemetry_bot_unique_users", "Distinct users per bot"),
            &["bot_name"],
        )?;
        let channel_activity = IntGaugeVec::new(
            Opts::new("bot_telemetry_channel_activity", "Bot triggers per channel"),
            &["channel_id", "guild_id"],
        )?;
        let store_connected = IntGauge::new(
            "bot_telemetry_store_connection_status",
            "1 when the store is connected",
        )?;
        let export_duration = Histogram::with_opts(
            HistogramOpts::new(
                "bot_telemetry_export_duration_seconds",
                "Duration of fresh metric exports",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;
        let cache_hit_rate = Gauge::new(
            "bot_telemetry_export_cache_hit_rate",
            "Share of exports answered from the cache",
        )?;
        let breaker_state = IntGauge::new(
            "bot_telemetry_export_circuit_breaker_state",
            "Export circuit breaker state (0=closed, 1=open, 2=half-open)",
        )?;
        let store_keys = IntGauge::new("bot_telemetry_store_keys", "Keys in the store")?;
        let store_memory = IntGauge::new(
            "bot_telemetry_store_memory_bytes",
            "Memory used by the store",
        )?;
        let export_errors = IntCounter::new(
            "bot_telemetry_export_errors_total",
            "Exports that failed and fell back to a cached snapshot",
        )?;

        registry.register(Box::new(triggers.clone()))?;
        registry.register(Box::new(responses.clone()))?;
        registry.register(Box::new(response_duration.clone()))?;
        registry.register(Box::new(unique_users.clone()))?;
        registry.register(Box::new(channel_activity.clone()))?;
        registry.register(Box::new(store_connected.clone()))?;
        registry.register(Box::new(export_duration.clone()))?;
        registry.register(Box::new(cache_hit_rate.clone()))?;
        registry.register(Box::new(breaker_state.clone()))?;
        registry.register(Box::new(store_keys.clone()))?;
        registry.register(Box::new(store_memory.clone()))?;
        registry.register(Box::new(export_errors.clone()))?;

        Ok(ExporterMetrics {
            registry: registry.clone(),
            triggers,
            responses,
            response_duration,
            unique_users,
            channel_activity,
            store_connected,
            export_duration,
            cache_hit_rate,
            breaker_state,
            store_keys,
            store_memory,
            export_errors,
        })
    }

    /// Replace the per-bot and per-channel series with a fresh snapshot
    pub(crate) fn publish(&self, snapshot: &super::MetricsSnapshot) {
        self.triggers.reset();
        self.responses.reset();
        self.unique_users.reset();
        self.channel_activity.reset();

        for bot in &snapshot.bots {
            for (condition, count) in &bot.triggers_by_condition {
                self.triggers
                    .with_label_values(&[&bot.bot_name, condition])
                    .inc_by(*count);
            }
            self.responses
                .with_label_values(&[&bot.bot_name, "true"])
                .inc_by(bot.total_responses);
            self.responses
                .with_label_values(&[&bot.bot_name, "false"])
                .inc_by(bot.total_failures);
            self.unique_users
                .with_label_values(&[&bot.bot_name])
                .set(bot.unique_users as i64);
        }

        for channel in &snapshot.channels {
            let guild = channel.guild_id.as_deref().unwrap_or("");
            self.channel_activity
                .with_label_values(&[&channel.channel_id, guild])
                .set(channel.bot_triggers as i64);
        }

        if let Some(info) = snapshot.store_info {
            self.store_keys.set(info.total_keys as i64);
            self.store_memory.set(info.used_memory_bytes as i64);
        }
    }

    pub(crate) fn observe_response(&self, bot_name: &str, seconds: f64) {
        self.response_duration.with_label_values(&[bot_name]).observe(seconds);
    }

    pub(crate) fn observe_export(&self, elapsed: Duration) {
        self.export_duration.observe(elapsed.as_secs_f64());
    }

    pub(crate) fn record_error(&self) {
        self.export_errors.inc();
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.store_connected.set(i64::from(connected));
    }

    pub(crate) fn set_hit_rate(&self, rate: f64) {
        self.cache_hit_rate.set(rate);
    }

    pub(crate) fn set_breaker_state(&self, state: CircuitState) {
        self.breaker_state.set(state.as_gauge());
    }

    /// Text exposition of the whole registry, tracker instruments included
    pub(crate) fn render(&self) -> Result<String, TelemetryError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Export(e.to_string()))
    }
}
