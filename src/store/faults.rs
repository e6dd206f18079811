//! Probabilistic fault injection around any [`Store`].
//!
//! Faults are drawn from a seeded ChaCha RNG so a chaos run replays exactly
//! for a given seed. Each fault has a stable identifier; probabilities are
//! configured per identifier and scaled by a global multiplier.

use super::{FieldMap, Store, StoreInfo};
use crate::error::StoreError;
use crate::schema::FlushPlan;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fault identifiers
pub mod ids {
    /// Refuse the round-trip as if the connection dropped
    pub const CONNECTION_DROP: &str = "store.connection_drop";
    /// Refuse the flush script as if scripting were unavailable, so callers
    /// take the fallback path
    pub const SCRIPT_FAILURE: &str = "store.script_failure";
    /// Fail the flush script with an error reply; nothing is written and no
    /// fallback applies
    pub const SCRIPT_ERROR: &str = "store.script_error";
    /// Reject the fallback transaction
    pub const PIPELINE_FAILURE: &str = "store.pipeline_failure";
    /// Add latency before the round-trip
    pub const SLOW_RESPONSE: &str = "store.slow_response";
    /// Abort a scan page mid-iteration
    pub const SCAN_FAILURE: &str = "store.scan_failure";

    pub const ALL: &[&str] = &[
        CONNECTION_DROP,
        SCRIPT_FAILURE,
        SCRIPT_ERROR,
        PIPELINE_FAILURE,
        SLOW_RESPONSE,
        SCAN_FAILURE,
    ];
}

#[derive(Debug, Clone)]
pub struct FaultConfig {
    pub enabled: bool,
    /// Per-fault probabilities (0.0 to 1.0)
    pub probabilities: HashMap<&'static str, f64>,
    pub global_multiplier: f64,
    /// Delay injected by `SLOW_RESPONSE`
    pub slow_response: Duration,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self::moderate()
    }
}

impl FaultConfig {
    pub fn new() -> Self {
        FaultConfig {
            enabled: true,
            probabilities: HashMap::new(),
            global_multiplier: 1.0,
            slow_response: Duration::from_millis(50),
        }
    }

    pub fn disabled() -> Self {
        FaultConfig {
            enabled: false,
            global_multiplier: 0.0,
            ..Self::new()
        }
    }

    /// Rare faults, suitable for long soak runs
    pub fn calm() -> Self {
        let mut config = Self::new();
        config.set(ids::CONNECTION_DROP, 0.005);
        config.set(ids::SCRIPT_FAILURE, 0.01);
        config.set(ids::SLOW_RESPONSE, 0.01);
        config
    }

    pub fn moderate() -> Self {
        let mut config = Self::new();
        config.set(ids::CONNECTION_DROP, 0.05);
        config.set(ids::SCRIPT_FAILURE, 0.1);
        config.set(ids::PIPELINE_FAILURE, 0.02);
        config.set(ids::SLOW_RESPONSE, 0.05);
        config.set(ids::SCAN_FAILURE, 0.05);
        config
    }

    /// Frequent faults of every kind
    pub fn chaos() -> Self {
        let mut config = Self::new();
        config.set(ids::CONNECTION_DROP, 0.2);
        config.set(ids::SCRIPT_FAILURE, 0.3);
        config.set(ids::SCRIPT_ERROR, 0.05);
        config.set(ids::PIPELINE_FAILURE, 0.1);
        config.set(ids::SLOW_RESPONSE, 0.2);
        config.set(ids::SCAN_FAILURE, 0.2);
        config
    }

    pub fn set(&mut self, fault: &'static str, probability: f64) {
        self.probabilities.insert(fault, probability.clamp(0.0, 1.0));
    }

    pub fn get(&self, fault: &str) -> f64 {
        if !self.enabled {
            return 0.0;
        }
        self.probabilities.get(fault).copied().unwrap_or(0.0) * self.global_multiplier
    }
}

pub struct FaultInjectingStore<S> {
    inner: Arc<S>,
    config: FaultConfig,
    rng: Mutex<ChaCha8Rng>,
    injected: Mutex<HashMap<&'static str, u64>>,
    calls: AtomicU64,
}

impl<S: Store> FaultInjectingStore<S> {
    pub fn new(inner: Arc<S>, config: FaultConfig, seed: u64) -> Self {
        FaultInjectingStore {
            inner,
            config,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            injected: Mutex::new(HashMap::new()),
            calls: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    /// How often each fault fired
    pub fn injected(&self) -> HashMap<&'static str, u64> {
        self.injected.lock().clone()
    }

    pub fn total_injected(&self) -> u64 {
        self.injected.lock().values().sum()
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn should_trigger(&self, fault: &'static str) -> bool {
        let p = self.config.get(fault);
        if p <= 0.0 {
            return false;
        }
        let hit = self.rng.lock().gen::<f64>() < p;
        if hit {
            *self.injected.lock().entry(fault).or_insert(0) += 1;
        }
        hit
    }

    /// Common prelude for every round-trip
    async fn before_call(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.should_trigger(ids::SLOW_RESPONSE) {
            tokio::time::sleep(self.config.slow_response).await;
        }
        if self.should_trigger(ids::CONNECTION_DROP) {
            return Err(StoreError::Connection("injected connection drop".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: Store> Store for FaultInjectingStore<S> {
    fn kind(&self) -> &'static str {
        self.inner.kind()
    }

    async fn connect(&self) -> Result<(), StoreError> {
        self.before_call().await?;
        self.inner.connect().await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.before_call().await?;
        self.inner.ping().await
    }

    async fn eval_plan(&self, plan: &FlushPlan) -> Result<(), StoreError> {
        self.before_call().await?;
        if self.should_trigger(ids::SCRIPT_FAILURE) {
            return Err(StoreError::ScriptUnavailable("NOSCRIPT injected script failure".to_string()));
        }
        if self.should_trigger(ids::SCRIPT_ERROR) {
            return Err(StoreError::Script("ERR injected error running script".to_string()));
        }
        self.inner.eval_plan(plan).await
    }

    async fn apply_plan(&self, plan: &FlushPlan) -> Result<(), StoreError> {
        self.before_call().await?;
        if self.should_trigger(ids::PIPELINE_FAILURE) {
            return Err(StoreError::Command("EXECABORT injected transaction failure".to_string()));
        }
        self.inner.apply_plan(plan).await
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>), StoreError> {
        self.before_call().await?;
        if self.should_trigger(ids::SCAN_FAILURE) {
            return Err(StoreError::Connection("injected scan failure".to_string()));
        }
        self.inner.scan(cursor, pattern, count).await
    }

    async fn hgetall(&self, key: &str) -> Result<FieldMap, StoreError> {
        self.before_call().await?;
        self.inner.hgetall(key).await
    }

    async fn hgetall_many(&self, keys: &[String]) -> Result<Vec<FieldMap>, StoreError> {
        self.before_call().await?;
        self.inner.hgetall_many(keys).await
    }

    async fn zrange_with_scores(&self, key: &str) -> Result<Vec<(String, f64)>, StoreError> {
        self.before_call().await?;
        self.inner.zrange_with_scores(key).await
    }

    async fn info(&self) -> Result<StoreInfo, StoreError> {
        self.before_call().await?;
        self.inner.info().await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_presets() {
        assert_eq!(FaultConfig::disabled().get(ids::CONNECTION_DROP), 0.0);
        assert!(FaultConfig::chaos().get(ids::SCRIPT_FAILURE) > FaultConfig::calm().get(ids::SCRIPT_FAILURE));
        for id in ids::ALL {
            assert!(FaultConfig::chaos().get(id) > 0.0, "{id}");
        }
    }

    #[test]
    fn test_probability_is_clamped() {
        let mut config = FaultConfig::new();
        config.set(ids::SCAN_FAILURE, 3.0);
        assert_eq!(config.get(ids::SCAN_FAILURE), 1.0);
    }

    #[tokio::test]
    async fn test_same_seed_same_faults() {
        let run = |seed| async move {
            let store = FaultInjectingStore::new(Arc::new(MemoryStore::new()), FaultConfig::chaos(), seed);
            let mut outcomes = Vec::new();
            for _ in 0..50 {
                outcomes.push(store.ping().await.is_ok());
            }
            outcomes
        };
        assert_eq!(run(7).await, run(7).await);
    }

    #[tokio::test]
    async fn test_always_failing_script() {
        let mut config = FaultConfig::new();
        config.set(ids::SCRIPT_FAILURE, 1.0);
        let store = FaultInjectingStore::new(Arc::new(MemoryStore::new()), config, 1);

        let err = store.eval_plan(&FlushPlan::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::ScriptUnavailable(_)));
        assert_eq!(store.injected()[ids::SCRIPT_FAILURE], 1);
        assert_eq!(store.inner().stats().eval_calls, 0);
    }
}
