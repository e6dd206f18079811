//! Circuit breaker guarding store access.
//!
//! CLOSED passes everything through and counts consecutive failures. Reaching
//! `failure_threshold` opens the circuit; while OPEN every call is rejected
//! until `reset_timeout` has elapsed, after which exactly one trial call is let
//! through (HALF_OPEN). Its outcome decides between CLOSED and OPEN.
//!
//! The tracker and the exporter each own an instance so a slow scan cannot
//! trip ingestion and vice versa.

use crate::config::CircuitBreakerConfig;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding: 0 = CLOSED, 1 = OPEN, 2 = HALF_OPEN
    pub fn as_gauge(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`CircuitBreaker::call`]
#[derive(Debug)]
pub enum CallError<E> {
    /// Rejected without running the operation
    Open,
    /// The operation ran and failed
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for CallError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Open => f.write_str("circuit breaker is open"),
            CallError::Inner(e) => e.fmt(f),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for CallError<E> {}

/// Point-in-time view of a breaker, serialized into health reports
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerStats {
    pub name: &'static str,
    pub state: CircuitState,
    pub failure_count: u32,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    pub failures_in_period: usize,
    pub last_failure_ago_ms: Option<u64>,
    pub last_success_ago_ms: Option<u64>,
    pub next_attempt_in_ms: Option<u64>,
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    next_attempt_at: Option<Instant>,
    trial_in_flight: bool,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
    recent_failures: VecDeque<Instant>,
    total_requests: u64,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
}

pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            name,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                next_attempt_at: None,
                trial_in_flight: false,
                last_failure: None,
                last_success: None,
                recent_failures: VecDeque::new(),
                total_requests: 0,
                total_successes: 0,
                total_failures: 0,
                total_rejections: 0,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Ask permission for one call. Every `true` must be followed by exactly
    /// one `record_success` or `record_failure`.
    pub fn allow(&self) -> bool {
        self.admit().is_some()
    }

    /// Scoped permission for one call. Dropping the permit without settling
    /// it counts as a failure when it carried the half-open trial call, and as no
    /// outcome otherwise.
    pub fn permit(&self) -> Option<Permit<'_>> {
        self.admit().map(|trial| Permit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    /// `Some(true)` when the admitted call is the half-open trial call
    fn admit(&self) -> Option<bool> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.total_requests += 1;

        let admitted = match inner.state {
            CircuitState::Closed => Some(false),
            CircuitState::Open => match inner.next_attempt_at {
                Some(at) if now >= at => {
                    info!(breaker = self.name, "circuit half-open, allowing a trial call");
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    Some(true)
                }
                _ => None,
            },
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    None
                } else {
                    inner.trial_in_flight = true;
                    Some(true)
                }
            }
        };

        if admitted.is_none() {
            inner.total_rejections += 1;
        }
        admitted
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.total_successes += 1;
        inner.last_success = Some(Instant::now());
        inner.failure_count = 0;

        if inner.state == CircuitState::HalfOpen {
            info!(breaker = self.name, "trial call succeeded, circuit closed");
            inner.state = CircuitState::Closed;
            inner.trial_in_flight = false;
            inner.next_attempt_at = None;
        }
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.total_failures += 1;
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(now);
        inner.recent_failures.push_back(now);
        self.prune_recent(&mut inner, now);

        let trip = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failure_count >= self.config.failure_threshold,
            CircuitState::Open => false,
        };

        if trip {
            warn!(
                breaker = self.name,
                failures = inner.failure_count,
                reset_timeout_ms = self.config.reset_timeout_ms,
                "circuit opened"
            );
            inner.state = CircuitState::Open;
            inner.trial_in_flight = false;
            inner.next_attempt_at = Some(now + self.config.reset_timeout());
        }
    }

    /// Run `fut` under the breaker, recording its outcome
    pub async fn call<T, E, F>(&self, fut: F) -> Result<T, CallError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let Some(permit) = self.permit() else {
            return Err(CallError::Open);
        };
        match fut.await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                permit.failure();
                Err(CallError::Inner(e))
            }
        }
    }

    /// Force the circuit closed and clear the failure count
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.next_attempt_at = None;
        inner.trial_in_flight = false;
        inner.recent_failures.clear();
        info!(breaker = self.name, "circuit manually reset");
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.prune_recent(&mut inner, now);

        let ago = |t: Option<Instant>| t.map(|t| now.saturating_duration_since(t).as_millis() as u64);
        CircuitBreakerStats {
            name: self.name,
            state: inner.state,
            failure_count: inner.failure_count,
            total_requests: inner.total_requests,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
            failures_in_period: inner.recent_failures.len(),
            last_failure_ago_ms: ago(inner.last_failure),
            last_success_ago_ms: ago(inner.last_success),
            next_attempt_in_ms: match inner.state {
                CircuitState::Open => inner
                    .next_attempt_at
                    .map(|at| at.saturating_duration_since(now).as_millis() as u64),
                _ => None,
            },
        }
    }

    fn abandon(&self, trial: bool) {
        if trial && self.inner.lock().state == CircuitState::HalfOpen {
            warn!(breaker = self.name, "trial call abandoned before completing");
            self.record_failure();
        }
    }

    fn prune_recent(&self, inner: &mut BreakerInner, now: Instant) {
        let period: Duration = self.config.monitoring_period();
        while let Some(&oldest) = inner.recent_failures.front() {
            if now.saturating_duration_since(oldest) > period {
                inner.recent_failures.pop_front();
            } else {
                break;
            }
        }
    }
}

/// One admitted call, settled with [`Permit::success`] or [`Permit::failure`]
#[must_use = "a permit that is dropped unsettled re-opens a half-open circuit"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Permit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.abandon(self.trial);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                reset_timeout_ms: reset_ms,
                monitoring_period_ms: 1_000,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_consecutive_failures() {
        let cb = breaker(3, 1_000);
        for _ in 0..2 {
            assert!(cb.allow());
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        assert!(cb.allow());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow());
        assert_eq!(cb.stats().total_rejections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_count() {
        let cb = breaker(3, 1_000);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failure_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_trial_call_after_reset_timeout() {
        let cb = breaker(1, 1_000);
        cb.record_failure();
        assert!(!cb.allow());

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!cb.allow());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cb.allow());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // second caller while the trial call is in flight
        assert!(!cb.allow());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_call_reopens() {
        let cb = breaker(5, 500);
        for _ in 0..5 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(cb.allow());
        cb.record_failure();

        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.stats().next_attempt_in_ms, Some(500));
        assert!(!cb.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_wraps_future() {
        let cb = breaker(1, 10_000);

        let ok: Result<u32, CallError<&str>> = cb.call(async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err = cb.call(async { Err::<u32, _>("boom") }).await;
        assert!(matches!(err, Err(CallError::Inner("boom"))));

        let rejected = cb.call(async { Ok::<u32, &str>(1) }).await;
        assert!(matches!(rejected, Err(CallError::Open)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_trial_call_reopens() {
        let cb = breaker(1, 100);
        cb.record_failure();
        tokio::time::advance(Duration::from_millis(200)).await;

        let slow = cb.call(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, &str>(())
        });
        assert!(tokio::time::timeout(Duration::from_millis(10), slow).await.is_err());
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.stats().total_failures, 2);

        tokio::time::advance(Duration::from_secs(3_600)).await;
        let ok = cb.call(async { Ok::<_, &str>(1) }).await;
        assert_eq!(ok.unwrap(), 1);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_closed_permit_records_nothing() {
        let cb = breaker(1, 100);
        let permit = cb.permit().unwrap();
        assert!(!permit.is_trial());
        drop(permit);

        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.total_failures, 0);
        assert!(cb.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitoring_period_is_diagnostic_only() {
        let cb = breaker(10, 1_000);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.stats().failures_in_period, 2);

        tokio::time::advance(Duration::from_millis(1_500)).await;
        let stats = cb.stats();
        assert_eq!(stats.failures_in_period, 0);
        assert_eq!(stats.failure_count, 2);
        assert_eq!(stats.state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reset() {
        let cb = breaker(1, 60_000);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow());
    }

    #[test]
    fn test_state_encoding() {
        assert_eq!(CircuitState::Closed.as_gauge(), 0);
        assert_eq!(CircuitState::Open.as_gauge(), 1);
        assert_eq!(CircuitState::HalfOpen.as_gauge(), 2);
        assert_eq!(
            serde_json::to_string(&CircuitState::HalfOpen).unwrap(),
            "\"HALF_OPEN\""
        );
    }
}
