//! Liveness summary for the `/health` endpoint.

use crate::breaker::{CircuitBreakerStats, CircuitState};
use crate::config::HealthConfig;
use crate::exporter::{ExporterStats, MetricsExporter};
use crate::observability::health_span;
use crate::store::Store;
use crate::tracker::{EventTracker, TrackerStats};
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreHealth {
    pub kind: &'static str,
    pub connected: bool,
    pub latency_ms: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: HealthState,
    pub timestamp: i64,
    pub store: StoreHealth,
    pub circuit_breakers: Vec<CircuitBreakerStats>,
    pub tracker: TrackerStats,
    pub exporter: ExporterStats,
}

pub struct HealthReporter {
    store: Arc<dyn Store>,
    tracker: EventTracker,
    exporter: MetricsExporter,
    config: HealthConfig,
}

impl HealthReporter {
    pub fn new(
        store: Arc<dyn Store>,
        tracker: EventTracker,
        exporter: MetricsExporter,
        config: HealthConfig,
    ) -> Self {
        HealthReporter {
            store,
            tracker,
            exporter,
            config,
        }
    }

    pub async fn get_health_status(&self) -> HealthStatus {
        async {
            let store = self.check_store().await;
            let circuit_breakers = vec![
                self.tracker.circuit_breaker().stats(),
                self.exporter.circuit_breaker().stats(),
            ];

            let status = if store.error.is_some() {
                HealthState::Unhealthy
            } else if circuit_breakers.iter().any(|b| b.state != CircuitState::Closed) {
                HealthState::Degraded
            } else {
                HealthState::Healthy
            };
            if status != HealthState::Healthy {
                warn!(%status, store_error = ?store.error, "health check not healthy");
            }

            HealthStatus {
                status,
                timestamp: Utc::now().timestamp_millis(),
                store,
                circuit_breakers,
                tracker: self.tracker.stats(),
                exporter: self.exporter.stats(),
            }
        }
        .instrument(health_span())
        .await
    }

    async fn check_store(&self) -> StoreHealth {
        let started = Instant::now();
        let timeout = self.config.ping_timeout();
        let outcome = tokio::time::timeout(timeout, async {
            if !self.store.is_connected() {
                self.store.connect().await?;
            }
            self.store.ping().await
        })
        .await;

        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("ping timed out after {}ms", timeout.as_millis())),
        };
        StoreHealth {
            kind: self.store.kind(),
            connected: self.store.is_connected(),
            latency_ms: error
                .is_none()
                .then(|| started.elapsed().as_secs_f64() * 1_000.0),
            error,
        }
    }
}
