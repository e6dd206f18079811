//! Bot trigger telemetry.
//!
//! Events are buffered by the [`EventTracker`] and flushed into Redis rollups
//! in one atomic round-trip. The [`MetricsExporter`] scans those rollups into
//! Prometheus series, [`AnalyticsReader`] answers ad-hoc queries, and the
//! [`HealthReporter`] summarizes store reachability and breaker state.

pub mod analytics;
pub mod breaker;
pub mod config;
pub mod error;
pub mod event;
pub mod exporter;
pub mod health;
pub mod observability;
pub mod schema;
pub mod server;
pub mod store;
pub mod tracker;

pub use analytics::{AnalyticsReader, BotMetricsFilter, TimeRange, TimeRangeQuery};
pub use breaker::{CircuitBreaker, CircuitState};
pub use config::TelemetryConfig;
pub use error::{ErrorCode, Result, StoreError, TelemetryError};
pub use event::{BotTriggerEvent, ResponseType};
pub use exporter::{ExportOutcome, MetricsExporter, MetricsSnapshot, SnapshotSource};
pub use health::{HealthReporter, HealthState, HealthStatus};
pub use schema::Period;
pub use server::MetricsServer;
pub use store::{MemoryStore, RedisStore, Store};
pub use tracker::{BatchOperationResult, EventTracker};
