//! Event ingestion.
//!
//! `track_bot_trigger` validates and buffers; a background worker flushes the
//! buffer when it reaches `batch_size` or when its oldest event is
//! `batch_flush_interval` old. Each flush unit becomes one [`FlushPlan`],
//! written through the tracker's circuit breaker: script first, transaction
//! fallback if the server rejects the script.
//!
//! A failed buffered flush puts its events back at the front of the buffer
//! and retries after one interval. The buffer is bounded by
//! `max_buffered_events`; on overflow the oldest events are dropped and
//! counted, so `tracked == flushed + buffered + in_flight + dropped + rejected
//! + failed` always holds once the tracker is idle.
//!
//! Call [`EventTracker::shutdown`] before dropping the last handle; the
//! worker holds a handle of its own. Once shut down, every tracking call
//! fails with `TRACKING_FAILED` and nothing more is buffered.

mod batch;
mod metrics;

pub use self::batch::BatchOperationResult;

use self::batch::EventBuffer;
use self::metrics::TrackerMetrics;
use crate::breaker::{CallError, CircuitBreaker, CircuitBreakerStats};
use crate::config::{RetentionConfig, TrackerConfig};
use crate::error::{StoreError, TelemetryError};
use crate::event::BotTriggerEvent;
use crate::observability::flush_span;
use crate::schema::FlushPlan;
use crate::store::Store;
use parking_lot::Mutex;
use prometheus::Registry;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

#[derive(Default)]
struct TrackerCounters {
    tracked: AtomicU64,
    invalid: AtomicU64,
    flushed: AtomicU64,
    in_flight: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
    flush_count: AtomicU64,
    flush_failures: AtomicU64,
    script_fallbacks: AtomicU64,
}

/// Point-in-time tracker counters
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerStats {
    pub buffered: usize,
    pub in_flight: u64,
    /// Valid events accepted for tracking
    pub tracked: u64,
    /// Events rejected by validation
    pub invalid: u64,
    pub flushed: u64,
    /// Buffered events discarded on overflow
    pub dropped: u64,
    /// Direct-mode events discarded while the circuit was open
    pub rejected: u64,
    /// Direct or bulk events whose write failed
    pub failed: u64,
    pub flush_count: u64,
    pub flush_failures: u64,
    pub script_fallbacks: u64,
    pub worker_running: bool,
    pub store_connected: bool,
    pub circuit_breaker: CircuitBreakerStats,
}

struct TrackerInner {
    store: Arc<dyn Store>,
    config: TrackerConfig,
    retention: RetentionConfig,
    breaker: CircuitBreaker,
    buffer: Mutex<EventBuffer>,
    wake: Notify,
    flush_gate: tokio::sync::Mutex<()>,
    counters: TrackerCounters,
    metrics: TrackerMetrics,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct EventTracker {
    inner: Arc<TrackerInner>,
}

impl EventTracker {
    pub fn new(
        store: Arc<dyn Store>,
        config: TrackerConfig,
        retention: RetentionConfig,
        registry: &Registry,
    ) -> Result<Self, TelemetryError> {
        config.validate()?;
        let metrics = TrackerMetrics::register(registry)?;
        let breaker = CircuitBreaker::new("tracker", config.circuit_breaker);
        Ok(EventTracker {
            inner: Arc::new(TrackerInner {
                store,
                buffer: Mutex::new(EventBuffer::new(config.max_buffered_events)),
                config,
                retention,
                breaker,
                wake: Notify::new(),
                flush_gate: tokio::sync::Mutex::new(()),
                counters: TrackerCounters::default(),
                metrics,
                worker: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        })
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    /// Connect the store and start the flush worker. Called lazily by the
    /// ingestion methods; calling it up front surfaces connection errors early.
    pub async fn initialize(&self) -> Result<(), TelemetryError> {
        if !self.inner.store.is_connected() {
            self.inner.store.connect().await?;
        }
        self.ensure_worker();
        Ok(())
    }

    pub async fn track_bot_trigger(&self, event: BotTriggerEvent) -> Result<(), TelemetryError> {
        let started = Instant::now();
        let result = self.track_one(event).await;
        self.inner
            .metrics
            .record_operation("track_bot_trigger", started.elapsed(), result.is_ok());
        result
    }

    async fn track_one(&self, event: BotTriggerEvent) -> Result<(), TelemetryError> {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return Err(TelemetryError::ShutDown);
        }
        if let Err(e) = event.validate() {
            inner.counters.invalid.fetch_add(1, Ordering::Relaxed);
            debug!(trigger_id = %event.trigger_id, error = %e, "rejected invalid trigger");
            return Err(e);
        }
        if !inner.config.enable_batch_operations {
            inner.counters.tracked.fetch_add(1, Ordering::Relaxed);
            return self.track_direct(event).await;
        }

        self.ensure_worker();
        let (len, dropped) = {
            let mut buffer = inner.buffer.lock();
            // checked under the lock so shutdown's final drain sees every push
            if inner.cancel.is_cancelled() {
                return Err(TelemetryError::ShutDown);
            }
            inner.counters.tracked.fetch_add(1, Ordering::Relaxed);
            let dropped = buffer.push(event, Instant::now());
            (buffer.len(), dropped)
        };
        inner.metrics.set_buffered(len);
        self.record_dropped(dropped);

        if len == 1 || len >= inner.config.batch_size {
            inner.wake.notify_one();
        }
        Ok(())
    }

    async fn track_direct(&self, event: BotTriggerEvent) -> Result<(), TelemetryError> {
        let inner = &self.inner;
        let bot_name = event.bot_name.clone();
        let events = [event];

        let result = {
            let _gate = inner.flush_gate.lock().await;
            inner.counters.in_flight.fetch_add(1, Ordering::Relaxed);
            let result = self.write_events(&events, "direct").await;
            inner.counters.in_flight.fetch_sub(1, Ordering::Relaxed);
            result
        };

        match result {
            Ok(()) => {
                inner.counters.flushed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TelemetryError::CircuitOpen { component }) => {
                inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(component, bot = %bot_name, "circuit open, trigger not recorded");
                Ok(())
            }
            Err(TelemetryError::Store(source)) => {
                inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(bot = %bot_name, error = %source, "failed to record trigger");
                Err(TelemetryError::Tracking { bot_name, source })
            }
            Err(other) => {
                inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                Err(other)
            }
        }
    }

    /// Write `events` immediately as one flush unit, bypassing the buffer.
    /// Invalid events are skipped and counted as failed.
    pub async fn track_batch_triggers(
        &self,
        events: Vec<BotTriggerEvent>,
    ) -> Result<BatchOperationResult, TelemetryError> {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return Err(TelemetryError::ShutDown);
        }
        let started = Instant::now();
        let total = events.len();

        let mut valid = Vec::with_capacity(total);
        let mut invalid = 0usize;
        for event in events {
            match event.validate() {
                Ok(()) => valid.push(event),
                Err(e) => {
                    invalid += 1;
                    debug!(trigger_id = %event.trigger_id, error = %e, "skipping invalid trigger in batch");
                }
            }
        }
        inner.counters.invalid.fetch_add(invalid as u64, Ordering::Relaxed);

        let result = if valid.is_empty() {
            Ok(())
        } else {
            let n = valid.len() as u64;
            inner.counters.tracked.fetch_add(n, Ordering::Relaxed);
            let _gate = inner.flush_gate.lock().await;
            inner.counters.in_flight.fetch_add(n, Ordering::Relaxed);
            let result = self.write_events(&valid, "bulk").await;
            inner.counters.in_flight.fetch_sub(n, Ordering::Relaxed);
            result
        };

        let elapsed = started.elapsed();
        inner
            .metrics
            .record_operation("track_batch_triggers", elapsed, result.is_ok());

        match result {
            Ok(()) => {
                inner.counters.flushed.fetch_add(valid.len() as u64, Ordering::Relaxed);
                debug!(successful = valid.len(), failed = invalid, "batch tracked");
                Ok(BatchOperationResult {
                    successful: valid.len(),
                    failed: invalid,
                    processing_time_ms: elapsed.as_millis() as u64,
                })
            }
            Err(e) => {
                inner.counters.failed.fetch_add(valid.len() as u64, Ordering::Relaxed);
                error!(events = total, error = %e, "batch write failed");
                Err(TelemetryError::BatchProcessing {
                    message: e.to_string(),
                    successful: 0,
                    failed: total,
                })
            }
        }
    }

    /// Flush every buffered event now, regardless of size or age
    pub async fn flush(&self) -> Result<usize, TelemetryError> {
        let started = Instant::now();
        let result = self.drain(true).await;
        self.inner
            .metrics
            .record_operation("flush", started.elapsed(), result.is_ok());
        result
    }

    /// Stop the worker, flush what is left and close the store
    pub async fn shutdown(&self) -> Result<(), TelemetryError> {
        let inner = &self.inner;
        info!("shutting down event tracker");
        inner.cancel.cancel();

        let worker = inner.worker.lock().take();
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                warn!(error = %e, "tracker worker ended abnormally");
            }
        }

        let flushed = self
            .drain(true)
            .await
            .map_err(|e| TelemetryError::Cleanup(format!("final flush failed: {e}")))?;
        inner
            .store
            .close()
            .await
            .map_err(|e| TelemetryError::Cleanup(format!("closing store failed: {e}")))?;

        info!(flushed, "event tracker stopped");
        Ok(())
    }

    pub fn stats(&self) -> TrackerStats {
        let inner = &self.inner;
        let c = &inner.counters;
        TrackerStats {
            buffered: inner.buffer.lock().len(),
            in_flight: c.in_flight.load(Ordering::Relaxed),
            tracked: c.tracked.load(Ordering::Relaxed),
            invalid: c.invalid.load(Ordering::Relaxed),
            flushed: c.flushed.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            flush_count: c.flush_count.load(Ordering::Relaxed),
            flush_failures: c.flush_failures.load(Ordering::Relaxed),
            script_fallbacks: c.script_fallbacks.load(Ordering::Relaxed),
            worker_running: inner
                .worker
                .lock()
                .as_ref()
                .map_or(false, |handle| !handle.is_finished()),
            store_connected: inner.store.is_connected(),
            circuit_breaker: inner.breaker.stats(),
        }
    }

    fn ensure_worker(&self) {
        if !self.inner.config.enable_batch_operations || self.inner.cancel.is_cancelled() {
            return;
        }
        let mut worker = self.inner.worker.lock();
        if worker.is_none() {
            debug!("starting tracker flush worker");
            *worker = Some(tokio::spawn(self.clone().run_worker()));
        }
    }

    async fn run_worker(self) {
        let inner = &self.inner;
        let batch_size = inner.config.batch_size;
        let interval = inner.config.batch_flush_interval();

        loop {
            let deadline = inner.buffer.lock().next_deadline(batch_size, interval);
            tokio::select! {
                biased;
                _ = inner.cancel.cancelled() => break,
                _ = inner.wake.notified() => {}
                _ = wait_until(deadline) => {}
            }
            // failures are logged and re-queued inside drain
            let _ = self.drain(false).await;
        }
        debug!("tracker flush worker stopped");
    }

    /// Flush buffered events in chunks of `batch_size`. Without `force` only
    /// chunks that are due are taken. Stops at the first failed chunk.
    async fn drain(&self, force: bool) -> Result<usize, TelemetryError> {
        let inner = &self.inner;
        let _gate = inner.flush_gate.lock().await;
        let batch_size = inner.config.batch_size;
        let interval = inner.config.batch_flush_interval();
        let trigger = if force { "manual" } else { "scheduled" };
        let mut flushed = 0;

        loop {
            let chunk = {
                let mut buffer = inner.buffer.lock();
                if !force && !buffer.is_due(Instant::now(), batch_size, interval) {
                    break;
                }
                let chunk = buffer.take(batch_size);
                inner.metrics.set_buffered(buffer.len());
                chunk
            };
            if chunk.is_empty() {
                break;
            }

            let n = chunk.len();
            inner.counters.in_flight.fetch_add(n as u64, Ordering::Relaxed);
            let result = self.write_events(&chunk, trigger).await;

            match result {
                Ok(()) => {
                    inner.counters.flushed.fetch_add(n as u64, Ordering::Relaxed);
                    inner.counters.in_flight.fetch_sub(n as u64, Ordering::Relaxed);
                    inner.buffer.lock().clear_backoff();
                    flushed += n;
                }
                Err(e) => {
                    let dropped = {
                        let mut buffer = inner.buffer.lock();
                        let dropped = buffer.requeue_front(chunk, Instant::now(), interval);
                        inner.metrics.set_buffered(buffer.len());
                        dropped
                    };
                    inner.counters.in_flight.fetch_sub(n as u64, Ordering::Relaxed);
                    self.record_dropped(dropped);
                    error!(events = n, error = %e, "flush failed, events re-queued");
                    return Err(e);
                }
            }
        }

        if flushed > 0 {
            debug!(flushed, trigger, "buffer flushed");
        }
        Ok(flushed)
    }

    /// One flush unit through the breaker
    async fn write_events(&self, events: &[BotTriggerEvent], trigger: &'static str) -> Result<(), TelemetryError> {
        let inner = &self.inner;
        let plan = FlushPlan::build(events, &inner.retention)?;

        let outcome = inner
            .breaker
            .call(self.write_plan(&plan))
            .instrument(flush_span(events.len(), trigger))
            .await;
        inner.metrics.set_breaker_state(inner.breaker.state());

        match outcome {
            Ok(()) => {
                inner.counters.flush_count.fetch_add(1, Ordering::Relaxed);
                inner.metrics.record_batch(events.len());
                Ok(())
            }
            Err(CallError::Open) => {
                inner.counters.flush_failures.fetch_add(1, Ordering::Relaxed);
                Err(TelemetryError::CircuitOpen { component: "tracker" })
            }
            Err(CallError::Inner(e)) => {
                inner.counters.flush_failures.fetch_add(1, Ordering::Relaxed);
                Err(TelemetryError::Store(e))
            }
        }
    }

    async fn write_plan(&self, plan: &FlushPlan) -> Result<(), StoreError> {
        let store = &self.inner.store;
        if !store.is_connected() {
            store.connect().await?;
        }

        // only a script that never ran may be retried as a transaction; a
        // partial run followed by the fallback would count twice
        match store.eval_plan(plan).await {
            Err(StoreError::ScriptUnavailable(reason)) => {
                warn!(%reason, "flush script unavailable, falling back to transaction");
                self.inner.counters.script_fallbacks.fetch_add(1, Ordering::Relaxed);
                self.inner.metrics.record_fallback();
                store.apply_plan(plan).await
            }
            other => other,
        }
    }

    fn record_dropped(&self, dropped: usize) {
        if dropped > 0 {
            self.inner.counters.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
            self.inner.metrics.record_dropped(dropped);
            warn!(dropped, "tracker buffer full, dropped oldest events");
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
