//! Redis backend.
//!
//! Flushes go through one Lua script that interprets the plan as a flat list
//! of `(opcode, key index, arg, arg)` quadruples, so the whole batch lands
//! atomically in a single round-trip. The script type-checks every key before
//! its first write, so an error reply leaves nothing behind. Servers that
//! refuse scripting get the two-phase fallback in [`RedisStore::apply_plan`].

use super::{FieldMap, Store, StoreInfo};
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::schema::{FlushPlan, StoreOp};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::{RedisError, Script};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::timeout;
use tracing::{debug, info, warn};

const FLUSH_SCRIPT: &str = r#"
local n = #ARGV
local expected = {HINCRBY = 'hash', HSET = 'hash', HSETMAX = 'hash', HSETCARD = 'hash', SADD = 'set', ZADD = 'zset'}
local i = 1
while i <= n do
  local op = ARGV[i]
  local key = KEYS[tonumber(ARGV[i + 1])]
  local want = expected[op]
  if want then
    local kind = redis.call('TYPE', key)['ok']
    if kind ~= 'none' and kind ~= want then
      return redis.error_reply('WRONGTYPE ' .. key)
    end
  end
  if op == 'HINCRBY' then
    local cur = redis.call('HGET', key, ARGV[i + 2])
    if cur and not tonumber(cur) then
      return redis.error_reply('ERR hash value is not an integer')
    end
  elseif op == 'HSETCARD' then
    local set_key = KEYS[tonumber(ARGV[i + 3])]
    local kind = redis.call('TYPE', set_key)['ok']
    if kind ~= 'none' and kind ~= 'set' then
      return redis.error_reply('WRONGTYPE ' .. set_key)
    end
  end
  i = i + 4
end
i = 1
while i <= n do
  local op = ARGV[i]
  local key = KEYS[tonumber(ARGV[i + 1])]
  local a = ARGV[i + 2]
  local b = ARGV[i + 3]
  if op == 'HINCRBY' then
    redis.call('HINCRBY', key, a, b)
  elseif op == 'HSET' then
    redis.call('HSET', key, a, b)
  elseif op == 'HSETMAX' then
    local cur = tonumber(redis.call('HGET', key, a))
    if not cur or tonumber(b) > cur then
      redis.call('HSET', key, a, b)
    end
  elseif op == 'SADD' then
    redis.call('SADD', key, a)
  elseif op == 'HSETCARD' then
    redis.call('HSET', key, a, redis.call('SCARD', KEYS[tonumber(b)]))
  elseif op == 'ZADD' then
    redis.call('ZADD', key, a, b)
  elseif op == 'EXPIRE' then
    redis.call('EXPIRE', key, a)
  end
  i = i + 4
end
return n / 4
"#;

pub struct RedisStore {
    config: StoreConfig,
    script: Script,
    manager: Mutex<Option<ConnectionManager>>,
    connected: AtomicBool,
}

impl RedisStore {
    pub fn new(config: StoreConfig) -> Self {
        RedisStore {
            config,
            script: Script::new(FLUSH_SCRIPT),
            manager: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    fn conn(&self) -> Result<ConnectionManager, StoreError> {
        self.manager
            .lock()
            .clone()
            .ok_or_else(|| StoreError::Connection("not connected".to_string()))
    }

    /// Run one round-trip under the command timeout, tracking connection health
    async fn run<T, F>(&self, fut: F, on_error: fn(RedisError) -> StoreError) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, RedisError>>,
    {
        let limit = self.config.command_timeout();
        let result = match timeout(limit, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(on_error(e)),
            Err(_) => Err(StoreError::Timeout(limit.as_millis() as u64)),
        };
        match &result {
            Ok(_) => self.connected.store(true, Ordering::SeqCst),
            Err(e) if e.is_connection() => self.connected.store(false, Ordering::SeqCst),
            Err(_) => {}
        }
        result
    }
}

fn map_command_error(e: RedisError) -> StoreError {
    if e.is_timeout() {
        StoreError::Timeout(0)
    } else if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        StoreError::Connection(e.to_string())
    } else if e.code() == Some("WRONGTYPE") {
        StoreError::WrongType(e.to_string())
    } else {
        StoreError::Command(e.to_string())
    }
}

/// Replies meaning the server never ran the script
fn scripting_unavailable(code: Option<&str>, detail: &str) -> bool {
    let detail = detail.to_ascii_lowercase();
    matches!(code, Some("NOSCRIPT") | Some("NOPERM"))
        || detail.contains("unknown command")
        || detail.contains("scripting is disabled")
}

fn map_script_error(e: RedisError) -> StoreError {
    if scripting_unavailable(e.code(), &e.to_string()) {
        return StoreError::ScriptUnavailable(e.to_string());
    }
    match map_command_error(e) {
        StoreError::Command(msg) | StoreError::WrongType(msg) => StoreError::Script(msg),
        other => other,
    }
}

/// Flatten a plan into `KEYS` and `ARGV` for the flush script
pub(crate) fn encode_script_args(plan: &FlushPlan) -> (Vec<String>, Vec<String>) {
    let mut keys: Vec<String> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut slot = |key: &str| -> usize {
        if let Some(i) = index.get(key) {
            return *i;
        }
        keys.push(key.to_string());
        // Lua arrays are 1-based
        index.insert(key.to_string(), keys.len());
        keys.len()
    };

    let mut args = Vec::with_capacity(plan.ops().len() * 4);
    for op in plan.ops() {
        let k = slot(op.key()).to_string();
        let (a, b) = match op {
            StoreOp::HIncrBy { field, delta, .. } => (field.clone(), delta.to_string()),
            StoreOp::HSet { field, value, .. } => (field.clone(), value.clone()),
            StoreOp::HSetMax { field, value, .. } => (field.clone(), value.to_string()),
            StoreOp::SAdd { member, .. } => (member.clone(), String::new()),
            StoreOp::HSetCard { field, set_key, .. } => (field.clone(), slot(set_key).to_string()),
            StoreOp::ZAdd { score, member, .. } => (score.to_string(), member.clone()),
            StoreOp::Expire { secs, .. } => (secs.to_string(), String::new()),
        };
        args.push(op.command().to_string());
        args.push(k);
        args.push(a);
        args.push(b);
    }
    (keys, args)
}

fn parse_used_memory(info: &str) -> u64 {
    info.lines()
        .find_map(|line| line.strip_prefix("used_memory:"))
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl Store for RedisStore {
    fn kind(&self) -> &'static str {
        "redis"
    }

    async fn connect(&self) -> Result<(), StoreError> {
        if self.manager.lock().is_some() {
            return Ok(());
        }

        let client = redis::Client::open(self.config.url.as_str())
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let limit = self.config.connect_timeout();
        let manager = match timeout(limit, ConnectionManager::new(client)).await {
            Ok(Ok(manager)) => manager,
            Ok(Err(e)) => return Err(StoreError::Connection(e.to_string())),
            Err(_) => return Err(StoreError::Timeout(limit.as_millis() as u64)),
        };

        *self.manager.lock() = Some(manager);
        self.connected.store(true, Ordering::SeqCst);
        info!(url = %self.config.url, "connected to redis");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.manager.lock().is_some()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let pong: String = self
            .run(redis::cmd("PING").query_async(&mut conn), map_command_error)
            .await?;
        debug!(reply = %pong, "redis ping");
        Ok(())
    }

    async fn eval_plan(&self, plan: &FlushPlan) -> Result<(), StoreError> {
        if plan.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let (keys, args) = encode_script_args(plan);

        let mut invocation = self.script.prepare_invoke();
        for key in &keys {
            invocation.key(key);
        }
        for arg in &args {
            invocation.arg(arg);
        }

        let applied: i64 = self
            .run(invocation.invoke_async(&mut conn), map_script_error)
            .await?;
        debug!(ops = applied, keys = keys.len(), "flush script applied");
        Ok(())
    }

    async fn apply_plan(&self, plan: &FlushPlan) -> Result<(), StoreError> {
        if plan.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;

        // Phase 1: membership sets, then read back the cardinalities and the
        // timestamps the max-preserving writes compare against
        let mut card_keys: Vec<&str> = Vec::new();
        let mut latest_fields: Vec<(&str, &str)> = Vec::new();
        let mut phase1 = redis::pipe();
        phase1.atomic();
        for op in plan.ops() {
            match op {
                StoreOp::SAdd { key, member } => {
                    phase1.cmd("SADD").arg(key).arg(member).ignore();
                }
                StoreOp::HSetCard { set_key, .. } => {
                    if !card_keys.contains(&set_key.as_str()) {
                        card_keys.push(set_key);
                        phase1.cmd("SCARD").arg(set_key);
                    }
                }
                _ => {}
            }
        }
        for op in plan.ops() {
            if let StoreOp::HSetMax { key, field, .. } = op {
                latest_fields.push((key.as_str(), field.as_str()));
                phase1.cmd("HGET").arg(key).arg(field);
            }
        }
        let replies: Vec<redis::Value> = self
            .run(phase1.query_async(&mut conn), map_command_error)
            .await?;
        if replies.len() != card_keys.len() + latest_fields.len() {
            return Err(StoreError::Command(format!(
                "fallback phase 1 returned {} replies, expected {}",
                replies.len(),
                card_keys.len() + latest_fields.len()
            )));
        }
        let (card_replies, latest_replies) = replies.split_at(card_keys.len());

        let mut cardinality: HashMap<&str, u64> = HashMap::new();
        for (key, reply) in card_keys.into_iter().zip(card_replies) {
            let card: u64 = redis::from_redis_value(reply).map_err(map_command_error)?;
            cardinality.insert(key, card);
        }
        let current: HashMap<(&str, &str), i64> = latest_fields
            .into_iter()
            .zip(latest_replies)
            .filter_map(|(slot, reply)| {
                let value: Option<String> = redis::from_redis_value(reply).ok()?;
                Some((slot, value?.parse().ok()?))
            })
            .collect();

        // Phase 2: every counter, field and TTL in one MULTI/EXEC
        let mut phase2 = redis::pipe();
        phase2.atomic();
        for op in plan.ops() {
            match op {
                StoreOp::HIncrBy { key, field, delta } => {
                    phase2.cmd("HINCRBY").arg(key).arg(field).arg(*delta).ignore();
                }
                StoreOp::HSet { key, field, value } => {
                    phase2.cmd("HSET").arg(key).arg(field).arg(value).ignore();
                }
                StoreOp::HSetMax { key, field, value } => {
                    let newer = current
                        .get(&(key.as_str(), field.as_str()))
                        .map_or(true, |cur| value > cur);
                    if newer {
                        phase2.cmd("HSET").arg(key).arg(field).arg(*value).ignore();
                    }
                }
                StoreOp::HSetCard { key, field, set_key } => {
                    let card = cardinality.get(set_key.as_str()).copied().unwrap_or(0);
                    phase2.cmd("HSET").arg(key).arg(field).arg(card).ignore();
                }
                StoreOp::ZAdd { key, score, member } => {
                    phase2.cmd("ZADD").arg(key).arg(*score).arg(member).ignore();
                }
                StoreOp::Expire { key, secs } => {
                    phase2.cmd("EXPIRE").arg(key).arg(*secs).ignore();
                }
                StoreOp::SAdd { .. } => {}
            }
        }
        self.run(phase2.query_async::<_, ()>(&mut conn), map_command_error)
            .await?;
        Ok(())
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>), StoreError> {
        let mut conn = self.conn()?;
        self.run(
            redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(count)
                .query_async(&mut conn),
            map_command_error,
        )
        .await
    }

    async fn hgetall(&self, key: &str) -> Result<FieldMap, StoreError> {
        let mut conn = self.conn()?;
        self.run(redis::cmd("HGETALL").arg(key).query_async(&mut conn), map_command_error)
            .await
    }

    async fn hgetall_many(&self, keys: &[String]) -> Result<Vec<FieldMap>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn()?;
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("HGETALL").arg(key);
        }
        self.run(pipe.query_async(&mut conn), map_command_error).await
    }

    async fn zrange_with_scores(&self, key: &str) -> Result<Vec<(String, f64)>, StoreError> {
        let mut conn = self.conn()?;
        self.run(
            redis::cmd("ZRANGE")
                .arg(key)
                .arg(0)
                .arg(-1)
                .arg("WITHSCORES")
                .query_async(&mut conn),
            map_command_error,
        )
        .await
    }

    async fn info(&self) -> Result<StoreInfo, StoreError> {
        let mut conn = self.conn()?;
        let total_keys: u64 = self
            .run(redis::cmd("DBSIZE").query_async(&mut conn), map_command_error)
            .await?;
        let memory: String = self
            .run(redis::cmd("INFO").arg("memory").query_async(&mut conn), map_command_error)
            .await?;
        Ok(StoreInfo {
            total_keys,
            used_memory_bytes: parse_used_memory(&memory),
        })
    }

    async fn close(&self) -> Result<(), StoreError> {
        if self.manager.lock().take().is_some() {
            info!("redis connection closed");
        } else {
            warn!("close called on a redis store that was never connected");
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("url", &self.config.url)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish()
    }
}
