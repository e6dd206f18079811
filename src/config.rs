use crate::error::TelemetryError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Circuit breaker thresholds for one guarded component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call is allowed
    pub reset_timeout_ms: u64,
    /// Trailing window used for the failure-rate diagnostics in stats
    pub monitoring_period_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            monitoring_period_ms: 10_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        CircuitBreakerConfig {
            failure_threshold,
            reset_timeout_ms: reset_timeout.as_millis() as u64,
            ..Default::default()
        }
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn monitoring_period(&self) -> Duration {
        Duration::from_millis(self.monitoring_period_ms)
    }

    pub fn validate(&self) -> Result<(), TelemetryError> {
        if self.failure_threshold == 0 {
            return invalid("circuit_breaker.failure_threshold must be greater than zero");
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> Result<(), TelemetryError> {
    Err(TelemetryError::Config(msg.to_string()))
}

/// Connection parameters for the backing key-value store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis connection URL (redis://[:password@]host:port/db)
    pub url: String,
    pub connect_timeout_ms: u64,
    /// Upper bound for a single round-trip (script, pipeline, scan page)
    pub command_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            url: "redis://127.0.0.1:6379/0".to_string(),
            connect_timeout_ms: 10_000,
            command_timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Event ingestion and batching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Buffer events and flush them in the background
    pub enable_batch_operations: bool,
    /// Flush as soon as this many events are buffered; also the size of one
    /// atomic flush unit
    pub batch_size: usize,
    /// Flush once the oldest buffered event is this old
    pub batch_flush_interval_ms: u64,
    /// Hard cap on buffered + re-queued events; overflow drops the oldest
    pub max_buffered_events: usize,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            enable_batch_operations: true,
            batch_size: 100,
            batch_flush_interval_ms: 5_000,
            max_buffered_events: 10_000,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl TrackerConfig {
    pub fn batch_flush_interval(&self) -> Duration {
        Duration::from_millis(self.batch_flush_interval_ms)
    }

    /// Direct mode: every event is written before `track_bot_trigger` returns
    pub fn direct() -> Self {
        TrackerConfig {
            enable_batch_operations: false,
            ..Default::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.batch_flush_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = breaker;
        self
    }

    pub fn with_max_buffered_events(mut self, max: usize) -> Self {
        self.max_buffered_events = max;
        self
    }

    pub fn validate(&self) -> Result<(), TelemetryError> {
        if self.batch_size == 0 {
            return invalid("tracker.batch_size must be greater than zero");
        }
        if self.max_buffered_events < self.batch_size {
            return invalid("tracker.max_buffered_events must be at least tracker.batch_size");
        }
        if self.enable_batch_operations && self.batch_flush_interval_ms == 0 {
            return invalid("tracker.batch_flush_interval_ms must be greater than zero");
        }
        self.circuit_breaker.validate()
    }
}

/// Scan → aggregate → cache → expose
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// How long an aggregation snapshot is served without touching the store
    pub cache_ttl_ms: u64,
    /// COUNT hint per SCAN page
    pub scan_count: usize,
    /// Keys per pipelined HGETALL round-trip
    pub batch_size: usize,
    /// Total keys considered per pattern; the rest of the key space is skipped
    pub max_scan_keys: usize,
    /// Budget for one scan + aggregate cycle
    pub export_timeout_ms: u64,
    /// Emit per-condition label values instead of collapsing them to "all"
    pub enable_detailed_labels: bool,
    pub cache_cleanup_interval_ms: u64,
    /// Export on a timer in addition to scrape-driven exports
    pub export_interval_ms: Option<u64>,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        ExporterConfig {
            cache_ttl_ms: 15_000,
            scan_count: 1_000,
            batch_size: 100,
            max_scan_keys: 10_000,
            export_timeout_ms: 5_000,
            enable_detailed_labels: false,
            cache_cleanup_interval_ms: 60_000,
            export_interval_ms: None,
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 3,
                reset_timeout_ms: 30_000,
                monitoring_period_ms: 10_000,
            },
        }
    }
}

impl ExporterConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_millis(self.export_timeout_ms)
    }

    pub fn cache_cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cache_cleanup_interval_ms)
    }

    pub fn export_interval(&self) -> Option<Duration> {
        self.export_interval_ms.map(Duration::from_millis)
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn with_scan_count(mut self, count: usize) -> Self {
        self.scan_count = count;
        self
    }

    pub fn with_max_scan_keys(mut self, max: usize) -> Self {
        self.max_scan_keys = max;
        self
    }

    pub fn with_detailed_labels(mut self) -> Self {
        self.enable_detailed_labels = true;
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = breaker;
        self
    }

    pub fn validate(&self) -> Result<(), TelemetryError> {
        if self.scan_count == 0 || self.batch_size == 0 {
            return invalid("exporter.scan_count and exporter.batch_size must be greater than zero");
        }
        if self.max_scan_keys == 0 {
            return invalid("exporter.max_scan_keys must be greater than zero");
        }
        if self.export_timeout_ms == 0 {
            return invalid("exporter.export_timeout_ms must be greater than zero");
        }
        if self.cache_cleanup_interval_ms == 0 || self.export_interval_ms == Some(0) {
            return invalid("exporter intervals must be greater than zero");
        }
        self.circuit_breaker.validate()
    }
}

/// Key lifetimes, in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub event_ttl_secs: u64,
    pub rollup_ttl_secs: u64,
    pub hourly_ttl_secs: u64,
    pub daily_ttl_secs: u64,
    pub monthly_ttl_secs: u64,
    pub perf_ttl_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        RetentionConfig {
            event_ttl_secs: 7 * 24 * 3600,
            rollup_ttl_secs: 30 * 24 * 3600,
            hourly_ttl_secs: 30 * 24 * 3600,
            daily_ttl_secs: 90 * 24 * 3600,
            monthly_ttl_secs: 365 * 24 * 3600,
            perf_ttl_secs: 7 * 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub ping_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            ping_timeout_ms: 2_000,
        }
    }
}

impl HealthConfig {
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: "0.0.0.0:9464".to_string(),
        }
    }
}

/// Complete configuration, supplied once at construction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub store: StoreConfig,
    pub tracker: TrackerConfig,
    pub exporter: ExporterConfig,
    pub retention: RetentionConfig,
    pub health: HealthConfig,
    pub server: ServerConfig,
}

impl TelemetryConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self, TelemetryError> {
        let config: TelemetryConfig =
            toml::from_str(raw).map_err(|e| TelemetryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TelemetryError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TelemetryError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), TelemetryError> {
        self.tracker.validate()?;
        self.exporter.validate()
    }
}
