use crate::breaker::CircuitState;
use prometheus::{Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::time::Duration;

/// Prometheus instruments describing the tracker itself
#[derive(Clone)]
pub(crate) struct TrackerMetrics {
    operations: IntCounterVec,
    operation_duration: HistogramVec,
    batch_size: Histogram,
    breaker_state: IntGauge,
    events_dropped: IntCounter,
    script_fallbacks: IntCounter,
    buffered: IntGauge,
}

impl TrackerMetrics {
    pub(crate) fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let operations = IntCounterVec::new(
            Opts::new(
                "bot_telemetry_tracker_operations_total",
                "Tracker operations by outcome",
            ),
            &["operation", "success"],
        )?;
        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "bot_telemetry_tracker_operation_duration_seconds",
                "Tracker operation latency",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation"],
        )?;
        let batch_size = Histogram::with_opts(
            HistogramOpts::new(
                "bot_telemetry_tracker_batch_size",
                "Events per flush unit",
            )
            .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0]),
        )?;
        let breaker_state = IntGauge::new(
            "bot_telemetry_tracker_circuit_breaker_state",
            "Tracker circuit breaker state (0=closed, 1=open, 2=half-open)",
        )?;
        let events_dropped = IntCounter::new(
            "bot_telemetry_tracker_events_dropped_total",
            "Buffered events discarded because the buffer was full",
        )?;
        let script_fallbacks = IntCounter::new(
            "bot_telemetry_tracker_script_fallbacks_total",
            "Flushes that fell back from the script to the transaction path",
        )?;
        let buffered = IntGauge::new(
            "bot_telemetry_tracker_buffered_events",
            "Events waiting to be flushed",
        )?;

        registry.register(Box::new(operations.clone()))?;
        registry.register(Box::new(operation_duration.clone()))?;
        registry.register(Box::new(batch_size.clone()))?;
        registry.register(Box::new(breaker_state.clone()))?;
        registry.register(Box::new(events_dropped.clone()))?;
        registry.register(Box::new(script_fallbacks.clone()))?;
        registry.register(Box::new(buffered.clone()))?;

        Ok(TrackerMetrics {
            operations,
            operation_duration,
            batch_size,
            breaker_state,
            events_dropped,
            script_fallbacks,
            buffered,
        })
    }

    pub(crate) fn record_operation(&self, operation: &str, elapsed: Duration, success: bool) {
        let success = if success { "true" } else { "false" };
        self.operations.with_label_values(&[operation, success]).inc();
        self.operation_duration
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    pub(crate) fn record_batch(&self, events: usize) {
        self.batch_size.observe(events as f64);
    }

    pub(crate) fn set_breaker_state(&self, state: CircuitState) {
        self.breaker_state.set(state.as_gauge());
    }

    pub(crate) fn record_dropped(&self, count: usize) {
        if count > 0 {
            self.events_dropped.inc_by(count as u64);
        }
    }

    pub(crate) fn record_fallback(&self) {
        self.script_fallbacks.inc();
    }

    pub(crate) fn set_buffered(&self, count: usize) {
        self.buffered.set(count as i64);
    }
}
