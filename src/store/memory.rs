//! In-process store with Redis semantics for the subset the pipeline uses.
//!
//! Keys live in a `BTreeMap` behind one `RwLock`; a flush plan is applied under
//! a single write lock, so it is atomic in both the script and the fallback
//! path. Expiry is lazy on read, plus an optional sweeper task.
//!
//! Test hooks: [`MemoryStore::set_available`] simulates an outage,
//! [`MemoryStore::set_scripting`] makes `eval_plan` fail like a server without
//! Lua, [`MemoryStore::set_latency`] delays every round-trip, and
//! [`MemoryStore::stats`] counts calls by kind.

use super::{FieldMap, Store, StoreInfo};
use crate::error::StoreError;
use crate::schema::{FlushPlan, StoreOp};
use ahash::{AHashMap, AHashSet};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
enum Value {
    Hash(AHashMap<String, String>),
    Set(AHashSet<String>),
    SortedSet(AHashMap<String, f64>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
            Value::SortedSet(_) => "zset",
        }
    }

    fn approx_bytes(&self) -> u64 {
        let bytes = match self {
            Value::Hash(h) => h.iter().map(|(k, v)| k.len() + v.len()).sum::<usize>(),
            Value::Set(s) => s.iter().map(String::len).sum(),
            Value::SortedSet(z) => z.keys().map(|m| m.len() + 8).sum(),
        };
        bytes as u64
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// Readable copy of one key, used to compare store contents in tests
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Hash(BTreeMap<String, String>),
    Set(BTreeSet<String>),
    SortedSet(Vec<(String, f64)>),
}

/// Call counts by kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub eval_calls: u64,
    pub pipeline_calls: u64,
    pub scan_calls: u64,
    pub read_calls: u64,
    pub ping_calls: u64,
    pub info_calls: u64,
}

#[derive(Default)]
struct Counters {
    eval: AtomicU64,
    pipeline: AtomicU64,
    scan: AtomicU64,
    read: AtomicU64,
    ping: AtomicU64,
    info: AtomicU64,
}

struct MemoryInner {
    data: RwLock<BTreeMap<String, Entry>>,
    connected: AtomicBool,
    available: AtomicBool,
    scripting: AtomicBool,
    latency: Mutex<Duration>,
    counters: Counters,
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            inner: Arc::new(MemoryInner {
                data: RwLock::new(BTreeMap::new()),
                connected: AtomicBool::new(false),
                available: AtomicBool::new(true),
                scripting: AtomicBool::new(true),
                latency: Mutex::new(Duration::ZERO),
                counters: Counters::default(),
            }),
        }
    }

    /// `false` makes every call fail with a connection error
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// `false` makes `eval_plan` fail as if scripting were disabled server-side
    pub fn set_scripting(&self, enabled: bool) {
        self.inner.scripting.store(enabled, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.lock() = latency;
    }

    pub fn stats(&self) -> StoreStats {
        let c = &self.inner.counters;
        StoreStats {
            eval_calls: c.eval.load(Ordering::Relaxed),
            pipeline_calls: c.pipeline.load(Ordering::Relaxed),
            scan_calls: c.scan.load(Ordering::Relaxed),
            read_calls: c.read.load(Ordering::Relaxed),
            ping_calls: c.ping.load(Ordering::Relaxed),
            info_calls: c.info.load(Ordering::Relaxed),
        }
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner.data.read().values().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hash(&self, key: &str) -> Option<BTreeMap<String, String>> {
        match self.snapshot_key(key)? {
            Snapshot::Hash(h) => Some(h),
            _ => None,
        }
    }

    pub fn members(&self, key: &str) -> Option<BTreeSet<String>> {
        match self.snapshot_key(key)? {
            Snapshot::Set(s) => Some(s),
            _ => None,
        }
    }

    /// Remaining time to live, `None` for missing or persistent keys
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let data = self.inner.data.read();
        let entry = data.get(key).filter(|e| !e.is_expired(now))?;
        entry.expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Every live key with its contents
    pub fn snapshot(&self) -> BTreeMap<String, Snapshot> {
        let now = Instant::now();
        self.inner
            .data
            .read()
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, e)| (k.clone(), to_snapshot(&e.value)))
            .collect()
    }

    fn snapshot_key(&self, key: &str) -> Option<Snapshot> {
        let now = Instant::now();
        let data = self.inner.data.read();
        data.get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| to_snapshot(&e.value))
    }

    /// Write a raw hash field, bypassing the flush path
    pub fn put_field(&self, key: &str, field: &str, value: &str) {
        let mut data = self.inner.data.write();
        let entry = data.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(AHashMap::new()),
            expires_at: None,
        });
        if let Value::Hash(h) = &mut entry.value {
            h.insert(field.to_string(), value.to_string());
        }
    }

    /// Drop expired keys, returning how many were removed
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut data = self.inner.data.write();
        let before = data.len();
        data.retain(|_, e| !e.is_expired(now));
        before - data.len()
    }

    pub fn spawn_ttl_sweeper(&self, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut tick = interval(every);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        let evicted = store.evict_expired();
                        if evicted > 0 {
                            debug!("TTL sweeper evicted {} expired keys", evicted);
                        }
                    }
                }
            }
        })
    }

    async fn round_trip(&self) -> Result<(), StoreError> {
        let latency = *self.inner.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if !self.inner.available.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("connection refused".to_string()));
        }
        Ok(())
    }

    fn apply(&self, plan: &FlushPlan) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut data = self.inner.data.write();
        data.retain(|_, e| !e.is_expired(now));

        // type check everything first so a rejected plan leaves no trace
        for op in plan.ops() {
            let expected = match op {
                StoreOp::HIncrBy { .. }
                | StoreOp::HSet { .. }
                | StoreOp::HSetMax { .. }
                | StoreOp::HSetCard { .. } => Some("hash"),
                StoreOp::SAdd { .. } => Some("set"),
                StoreOp::ZAdd { .. } => Some("zset"),
                StoreOp::Expire { .. } => None,
            };
            if let (Some(expected), Some(entry)) = (expected, data.get(op.key())) {
                if entry.value.type_name() != expected {
                    return Err(StoreError::WrongType(op.key().to_string()));
                }
            }
            if let StoreOp::HSetCard { set_key, .. } = op {
                if let Some(entry) = data.get(set_key) {
                    if !matches!(entry.value, Value::Set(_)) {
                        return Err(StoreError::WrongType(set_key.clone()));
                    }
                }
            }
            if let StoreOp::HIncrBy { key, field, delta } = op {
                let current = data.get(key).and_then(|e| match &e.value {
                    Value::Hash(h) => h.get(field),
                    _ => None,
                });
                if let Some(current) = current {
                    incremented(current, *delta)?;
                }
            }
        }

        for op in plan.ops() {
            match op {
                StoreOp::HIncrBy { key, field, delta } => {
                    if let Some(hash) = hash_mut(&mut data, key) {
                        let next = match hash.get(field) {
                            Some(current) => incremented(current, *delta)?,
                            None => *delta,
                        };
                        hash.insert(field.clone(), next.to_string());
                    }
                }
                StoreOp::HSet { key, field, value } => {
                    if let Some(hash) = hash_mut(&mut data, key) {
                        hash.insert(field.clone(), value.clone());
                    }
                }
                StoreOp::HSetMax { key, field, value } => {
                    if let Some(hash) = hash_mut(&mut data, key) {
                        let current = hash.get(field).and_then(|v| v.parse::<i64>().ok());
                        if current.map_or(true, |c| *value > c) {
                            hash.insert(field.clone(), value.to_string());
                        }
                    }
                }
                StoreOp::SAdd { key, member } => {
                    let entry = data.entry(key.clone()).or_insert_with(|| Entry {
                        value: Value::Set(AHashSet::new()),
                        expires_at: None,
                    });
                    if let Value::Set(s) = &mut entry.value {
                        s.insert(member.clone());
                    }
                }
                StoreOp::HSetCard { key, field, set_key } => {
                    let card = match data.get(set_key).map(|e| &e.value) {
                        Some(Value::Set(s)) => s.len(),
                        _ => 0,
                    };
                    if let Some(hash) = hash_mut(&mut data, key) {
                        hash.insert(field.clone(), card.to_string());
                    }
                }
                StoreOp::ZAdd { key, score, member } => {
                    let entry = data.entry(key.clone()).or_insert_with(|| Entry {
                        value: Value::SortedSet(AHashMap::new()),
                        expires_at: None,
                    });
                    if let Value::SortedSet(z) = &mut entry.value {
                        z.insert(member.clone(), *score);
                    }
                }
                StoreOp::Expire { key, secs } => {
                    if let Some(entry) = data.get_mut(key) {
                        entry.expires_at = Some(now + Duration::from_secs(*secs));
                    }
                }
            }
        }
        Ok(())
    }
}

/// `HINCRBY` arithmetic with Redis' error replies
fn incremented(current: &str, delta: i64) -> Result<i64, StoreError> {
    let current = current
        .parse::<i64>()
        .map_err(|_| StoreError::Command("ERR hash value is not an integer".to_string()))?;
    current
        .checked_add(delta)
        .ok_or_else(|| StoreError::Command("ERR increment or decrement would overflow".to_string()))
}

fn hash_mut<'a>(data: &'a mut BTreeMap<String, Entry>, key: &str) -> Option<&'a mut AHashMap<String, String>> {
    let entry = data.entry(key.to_string()).or_insert_with(|| Entry {
        value: Value::Hash(AHashMap::new()),
        expires_at: None,
    });
    match &mut entry.value {
        Value::Hash(h) => Some(h),
        _ => None,
    }
}

fn to_snapshot(value: &Value) -> Snapshot {
    match value {
        Value::Hash(h) => Snapshot::Hash(h.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        Value::Set(s) => Snapshot::Set(s.iter().cloned().collect()),
        Value::SortedSet(z) => Snapshot::SortedSet(sorted_by_score(z)),
    }
}

fn sorted_by_score(z: &AHashMap<String, f64>) -> Vec<(String, f64)> {
    let mut members: Vec<(String, f64)> = z.iter().map(|(m, s)| (m.clone(), *s)).collect();
    members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    members
}

/// Redis-style glob supporting `*` and `?`
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

#[async_trait]
impl Store for MemoryStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> Result<(), StoreError> {
        self.round_trip().await?;
        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst) && self.inner.available.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.counters.ping.fetch_add(1, Ordering::Relaxed);
        self.round_trip().await
    }

    async fn eval_plan(&self, plan: &FlushPlan) -> Result<(), StoreError> {
        self.inner.counters.eval.fetch_add(1, Ordering::Relaxed);
        self.round_trip().await?;
        if !self.inner.scripting.load(Ordering::SeqCst) {
            return Err(StoreError::ScriptUnavailable("NOSCRIPT scripting is disabled".to_string()));
        }
        self.apply(plan)
    }

    async fn apply_plan(&self, plan: &FlushPlan) -> Result<(), StoreError> {
        self.inner.counters.pipeline.fetch_add(1, Ordering::Relaxed);
        self.round_trip().await?;
        self.apply(plan)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>), StoreError> {
        self.inner.counters.scan.fetch_add(1, Ordering::Relaxed);
        self.round_trip().await?;

        let now = Instant::now();
        let data = self.inner.data.read();
        let live: Vec<&String> = data
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, _)| k)
            .collect();

        let start = cursor as usize;
        let end = start.saturating_add(count.max(1)).min(live.len());
        let page = live
            .get(start..end)
            .unwrap_or(&[])
            .iter()
            .filter(|k| glob_match(pattern, k))
            .map(|k| (*k).clone())
            .collect();
        let next = if end >= live.len() { 0 } else { end as u64 };
        Ok((next, page))
    }

    async fn hgetall(&self, key: &str) -> Result<FieldMap, StoreError> {
        self.inner.counters.read.fetch_add(1, Ordering::Relaxed);
        self.round_trip().await?;
        read_hash(&self.inner.data.read(), key)
    }

    async fn hgetall_many(&self, keys: &[String]) -> Result<Vec<FieldMap>, StoreError> {
        self.inner.counters.read.fetch_add(1, Ordering::Relaxed);
        self.round_trip().await?;
        let data = self.inner.data.read();
        keys.iter().map(|k| read_hash(&data, k)).collect()
    }

    async fn zrange_with_scores(&self, key: &str) -> Result<Vec<(String, f64)>, StoreError> {
        self.inner.counters.read.fetch_add(1, Ordering::Relaxed);
        self.round_trip().await?;
        let now = Instant::now();
        let data = self.inner.data.read();
        match data.get(key).filter(|e| !e.is_expired(now)).map(|e| &e.value) {
            None => Ok(Vec::new()),
            Some(Value::SortedSet(z)) => Ok(sorted_by_score(z)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn info(&self) -> Result<StoreInfo, StoreError> {
        self.inner.counters.info.fetch_add(1, Ordering::Relaxed);
        self.round_trip().await?;
        let now = Instant::now();
        let data = self.inner.data.read();
        let (keys, bytes) = data
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .fold((0u64, 0u64), |(n, b), (k, e)| (n + 1, b + k.len() as u64 + e.value.approx_bytes()));
        Ok(StoreInfo {
            total_keys: keys,
            used_memory_bytes: bytes,
        })
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.inner.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn read_hash(data: &BTreeMap<String, Entry>, key: &str) -> Result<FieldMap, StoreError> {
    let now = Instant::now();
    match data.get(key).filter(|e| !e.is_expired(now)).map(|e| &e.value) {
        None => Ok(FieldMap::new()),
        Some(Value::Hash(h)) => Ok(h.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        Some(_) => Err(StoreError::WrongType(key.to_string())),
    }
}
