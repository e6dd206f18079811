//! Storage backends for the aggregation schema.
//!
//! All store access goes through the [`Store`] trait so the tracker, the
//! exporter, analytics and health checks run unchanged against Redis, the
//! in-process [`MemoryStore`], or either of those wrapped in a
//! [`FaultInjectingStore`].

pub mod faults;
pub mod memory;
pub mod redis;

pub use self::faults::{FaultConfig, FaultInjectingStore};
pub use self::memory::{MemoryStore, StoreStats};
pub use self::redis::RedisStore;

use crate::error::StoreError;
use crate::schema::FlushPlan;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;

/// Hash contents as returned by `HGETALL`
pub type FieldMap = HashMap<String, String>;

/// Server-side numbers exported as system metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreInfo {
    pub total_keys: u64,
    pub used_memory_bytes: u64,
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Short backend name for logs and health output
    fn kind(&self) -> &'static str;

    async fn connect(&self) -> Result<(), StoreError>;

    fn is_connected(&self) -> bool;

    /// Round-trip liveness check
    async fn ping(&self) -> Result<(), StoreError>;

    /// Apply `plan` atomically through the server-side script.
    /// `StoreError::ScriptUnavailable` means nothing ran and the caller should
    /// use [`Store::apply_plan`]; any other error means the plan was rejected.
    async fn eval_plan(&self, plan: &FlushPlan) -> Result<(), StoreError>;

    /// Apply `plan` without scripting: set cardinalities are resolved first,
    /// then every mutation is sent as one MULTI/EXEC transaction.
    async fn apply_plan(&self, plan: &FlushPlan) -> Result<(), StoreError>;

    /// One `SCAN` page. A returned cursor of 0 ends the iteration.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize)
        -> Result<(u64, Vec<String>), StoreError>;

    async fn hgetall(&self, key: &str) -> Result<FieldMap, StoreError>;

    /// Pipelined `HGETALL`; output order matches `keys`, missing keys are empty
    async fn hgetall_many(&self, keys: &[String]) -> Result<Vec<FieldMap>, StoreError>;

    /// Every member with its score, ascending by score
    async fn zrange_with_scores(&self, key: &str) -> Result<Vec<(String, f64)>, StoreError>;

    async fn info(&self) -> Result<StoreInfo, StoreError>;

    async fn close(&self) -> Result<(), StoreError>;
}
