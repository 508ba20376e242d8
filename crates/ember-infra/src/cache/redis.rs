//! Redis cache client with connection management and atomic scripts.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Cmd, RedisError, Script};
use serde::Serialize;
use serde::de::DeserializeOwned;

use ember_core::codec::{decode, encode};
use ember_core::ports::{CacheClient, CacheError};
use ember_core::{CacheNumber, CacheValue, NumberKind};

/// Redis connection configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Namespace prepended to every key as `prefix:key`
    pub key_prefix: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
            key_prefix: None,
        }
    }
}

impl RedisConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            connect_timeout: Duration::from_secs(
                std::env::var("REDIS_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            key_prefix: std::env::var("REDIS_KEY_PREFIX")
                .ok()
                .filter(|s| !s.is_empty()),
        }
    }
}

// Lua helpers shared by the numeric scripts. `is_number` accepts exactly the text the
// codec decodes for the kind in use; `compare` orders integers digit by digit so values
// beyond 2^53 keep their precision.
macro_rules! numeric_lua {
    () => {
        r#"
local function is_integer(text)
    if text ~= '0' and text ~= '-0' and not string.match(text, '^%-?[1-9]%d*$') then
        return false
    end
    local digits = string.gsub(text, '^%-', '')
    if #digits ~= 19 then
        return #digits < 19
    end
    if string.sub(text, 1, 1) == '-' then
        return digits <= '9223372036854775808'
    end
    return digits <= '9223372036854775807'
end

local function is_float(text)
    local rest = string.gsub(text, '^%-', '', 1)
    local whole, tail = string.match(rest, '^(%d+)(.*)$')
    if not whole or (#whole > 1 and string.sub(whole, 1, 1) == '0') then
        return false
    end
    tail = string.gsub(tail, '^%.%d+', '', 1)
    tail = string.gsub(tail, '^[eE][%+%-]?%d+', '', 1)
    local value = tonumber(text)
    return tail == '' and value ~= nil and math.abs(value) ~= math.huge
end

local function is_number(text, kind)
    if kind == 'integer' then
        return is_integer(text)
    end
    return is_float(text)
end

local function compare(a, b, kind)
    if kind ~= 'integer' then
        local x, y = tonumber(a), tonumber(b)
        if x < y then
            return -1
        elseif x > y then
            return 1
        end
        return 0
    end

    local a_negative = string.sub(a, 1, 1) == '-'
    local b_negative = string.sub(b, 1, 1) == '-'
    local x = string.gsub(a, '^%-', '')
    local y = string.gsub(b, '^%-', '')
    if x == '0' and y == '0' then
        return 0
    end
    if a_negative ~= b_negative then
        return a_negative and -1 or 1
    end

    local order = 0
    if #x ~= #y then
        order = #x < #y and -1 or 1
    elseif x ~= y then
        order = x < y and -1 or 1
    end
    return a_negative and -order or order
end
"#
    };
}

// Adds ARGV[2] using the command in ARGV[1] (INCRBY / INCRBYFLOAT) and returns the
// stored text, so integers keep full precision. ARGV[4] is the number kind.
const INCREMENT_SCRIPT: &str = concat!(
    numeric_lua!(),
    r#"
local key = KEYS[1]
local current = redis.call('GET', key)
if current and not is_number(current, ARGV[4]) then
    return redis.error_reply('NOTNUMBER stored value is not a valid ' .. ARGV[4])
end

redis.call(ARGV[1], key, ARGV[2])
if ARGV[3] ~= '' then
    redis.call('PEXPIRE', key, ARGV[3])
end
return redis.call('GET', key)
"#
);

// Writes ARGV[1] when it is higher/lower (ARGV[2]) than the stored number or the key
// is absent. ARGV[4] is the number kind. Returns {applied, previous-or-empty}.
// Every check runs before the first write.
const WATERMARK_SCRIPT: &str = concat!(
    numeric_lua!(),
    r#"
local key = KEYS[1]
local candidate, direction, ttl, kind = ARGV[1], ARGV[2], ARGV[3], ARGV[4]
local current = redis.call('GET', key)
local applied = 0

if not current then
    applied = 1
else
    if not is_number(current, kind) then
        return redis.error_reply('NOTNUMBER stored value is not a valid ' .. kind)
    end
    local order = compare(candidate, current, kind)
    if (direction == 'higher' and order > 0) or (direction == 'lower' and order < 0) then
        applied = 1
    end
end

if applied == 1 then
    if ttl ~= '' then
        redis.call('SET', key, candidate, 'PX', ttl)
    else
        redis.call('SET', key, candidate, 'KEEPTTL')
    end
elseif ttl ~= '' then
    redis.call('PEXPIRE', key, ttl)
end

return {applied, current or ''}
"#
);

// Reads every key in KEYS, refusing keys that hold anything but a plain value.
// Returns {wrong-index-or-0, wrong-type, values}.
const GET_ALL_SCRIPT: &str = r#"
local values = {}
for i, key in ipairs(KEYS) do
    local kind = redis.call('TYPE', key)['ok']
    if kind == 'none' then
        values[i] = false
    elseif kind == 'string' then
        values[i] = redis.call('GET', key)
    else
        return {i, kind, {}}
    end
end
return {0, '', values}
"#;

// Applies SADD/SREM (ARGV[1]) with the members in ARGV[3..] in batches, then refreshes
// the TTL in ARGV[2]. A key of another type fails on the first batch, before any write.
const SET_MEMBERS_SCRIPT: &str = r#"
local key = KEYS[1]
local changed = 0
for i = 3, #ARGV, 1000 do
    changed = changed + redis.call(ARGV[1], key, unpack(ARGV, i, math.min(i + 999, #ARGV)))
end
if ARGV[2] ~= '' then
    redis.call('PEXPIRE', key, ARGV[2])
end
return changed
"#;

#[derive(Debug, Clone, Copy)]
enum Watermark {
    Higher,
    Lower,
}

impl Watermark {
    fn as_arg(self) -> &'static str {
        match self {
            Self::Higher => "higher",
            Self::Lower => "lower",
        }
    }
}

/// Milliseconds for `PX`/`PEXPIRE`; sub-millisecond TTLs round up so they never become zero.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn kind_arg(kind: NumberKind) -> &'static str {
    match kind {
        NumberKind::Integer => "integer",
        NumberKind::Float => "float",
    }
}

fn ttl_arg(ttl: Option<Duration>) -> String {
    ttl.map(|d| ttl_millis(d).to_string()).unwrap_or_default()
}

fn expires_immediately(ttl: Option<Duration>) -> bool {
    ttl == Some(Duration::ZERO)
}

/// Map a Redis failure into the cache error taxonomy.
fn cache_error(key: &str, e: RedisError) -> CacheError {
    tracing::warn!(key = %key, error = %e, "Redis command failed");

    if e.is_timeout() {
        return CacheError::Timeout(e.to_string());
    }
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        return CacheError::Connection(e.to_string());
    }

    let message = e.to_string();
    let wrong_kind = matches!(e.code(), Some("WRONGTYPE") | Some("NOTNUMBER"))
        || message.contains("WRONGTYPE")
        || message.contains("NOTNUMBER")
        || message.contains("not an integer")
        || message.contains("not a valid float");

    if wrong_kind {
        CacheError::decode(key, message)
    } else {
        CacheError::Operation(message)
    }
}

/// Redis-backed cache client.
///
/// Uses connection manager for automatic reconnection. Plain values are stored as
/// codec text under `GET`/`SET`, set entries as native Redis sets.
pub struct RedisCacheClient {
    conn: ConnectionManager,
    config: RedisConfig,
    increment_script: Script,
    watermark_script: Script,
    get_all_script: Script,
    set_members_script: Script,
}

impl RedisCacheClient {
    pub async fn new(config: RedisConfig) -> Result<Self, CacheError> {
        let client =
            Client::open(config.url.as_str()).map_err(|e| CacheError::Connection(e.to_string()))?;

        // Use timeout to prevent hanging if Redis is unreachable
        let conn_manager_fut = ConnectionManager::new(client);
        let conn = tokio::time::timeout(config.connect_timeout, conn_manager_fut)
            .await
            .map_err(|_| CacheError::Timeout("Connection timed out".to_string()))?
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        tracing::info!(
            url = %config.url,
            prefix = config.key_prefix.as_deref().unwrap_or(""),
            "Connected to Redis cache"
        );

        Ok(Self {
            conn,
            config,
            increment_script: Script::new(INCREMENT_SCRIPT),
            watermark_script: Script::new(WATERMARK_SCRIPT),
            get_all_script: Script::new(GET_ALL_SCRIPT),
            set_members_script: Script::new(SET_MEMBERS_SCRIPT),
        })
    }

    /// Create from environment configuration.
    pub async fn from_env() -> Result<Self, CacheError> {
        Self::new(RedisConfig::from_env()).await
    }

    fn make_key(&self, key: &str) -> String {
        match &self.config.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }

    fn set_cmd(&self, key: &str, raw: &str, condition: Option<&str>, ttl: Option<Duration>) -> Cmd {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.make_key(key)).arg(raw);
        if let Some(condition) = condition {
            cmd.arg(condition);
        }
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        cmd
    }

    async fn delete(&self, keys: &[&str]) -> Result<usize, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let redis_keys: Vec<String> = keys.iter().map(|k| self.make_key(k)).collect();
        let mut conn = self.conn.clone();
        conn.del::<_, usize>(redis_keys)
            .await
            .map_err(|e| cache_error(keys[0], e))
    }

    async fn update_members(
        &self,
        key: &str,
        command: &str,
        members: &[String],
        ttl: Option<Duration>,
    ) -> Result<usize, CacheError> {
        let mut conn = self.conn.clone();
        self.set_members_script
            .key(self.make_key(key))
            .arg(command)
            .arg(ttl_arg(ttl))
            .arg(members)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| cache_error(key, e))
    }

    async fn set_watermark<N>(
        &self,
        key: &str,
        candidate: N,
        ttl: Option<Duration>,
        direction: Watermark,
    ) -> Result<N, CacheError>
    where
        N: CacheNumber,
    {
        if expires_immediately(ttl) {
            self.delete(&[key]).await?;
            return Ok(N::ZERO);
        }

        let raw = encode(&candidate)?;
        let mut conn = self.conn.clone();
        let (applied, previous): (i64, String) = self
            .watermark_script
            .key(self.make_key(key))
            .arg(&raw)
            .arg(direction.as_arg())
            .arg(ttl_arg(ttl))
            .arg(kind_arg(N::KIND))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| cache_error(key, e))?;

        if applied == 0 {
            return Ok(N::ZERO);
        }
        if previous.is_empty() {
            return Ok(candidate);
        }

        let previous: N = decode(key, &previous)?;
        tracing::debug!(key = %key, %previous, %candidate, "Watermark moved");
        Ok(match direction {
            Watermark::Higher => candidate.saturating_sub(previous),
            Watermark::Lower => previous.saturating_sub(candidate),
        })
    }
}

#[async_trait]
impl CacheClient for RedisCacheClient {
    async fn get<T>(&self, key: &str) -> Result<CacheValue<T>, CacheError>
    where
        T: DeserializeOwned + Send,
    {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(self.make_key(key))
            .await
            .map_err(|e| cache_error(key, e))?;

        match raw {
            Some(raw) => Ok(CacheValue::new(decode(key, &raw)?)),
            None => Ok(CacheValue::none()),
        }
    }

    async fn get_all<T>(&self, keys: &[&str]) -> Result<HashMap<String, CacheValue<T>>, CacheError>
    where
        T: DeserializeOwned + Send,
    {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let mut invocation = self.get_all_script.prepare_invoke();
        for key in keys {
            invocation.key(self.make_key(key));
        }

        let mut conn = self.conn.clone();
        let (wrong, kind, raw): (usize, String, Vec<Option<String>>) = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| cache_error(keys[0], e))?;

        if wrong > 0 {
            let key = keys.get(wrong - 1).copied().unwrap_or(keys[0]);
            return Err(CacheError::decode(key, format!("entry holds a {kind}")));
        }

        let mut result = HashMap::with_capacity(keys.len());
        for (key, raw) in keys.iter().zip(raw) {
            let value = match raw {
                Some(raw) => CacheValue::new(decode(key, &raw)?),
                None => CacheValue::none(),
            };
            result.insert(key.to_string(), value);
        }
        Ok(result)
    }

    async fn add<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<bool, CacheError>
    where
        T: Serialize + Sync + ?Sized,
    {
        if expires_immediately(ttl) {
            return Ok(false);
        }

        let raw = encode(value)?;
        let mut conn = self.conn.clone();
        let reply: Option<String> = self
            .set_cmd(key, &raw, Some("NX"), ttl)
            .query_async(&mut conn)
            .await
            .map_err(|e| cache_error(key, e))?;

        Ok(reply.is_some())
    }

    async fn set<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<bool, CacheError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let raw = encode(value)?;
        if expires_immediately(ttl) {
            self.delete(&[key]).await?;
            tracing::debug!(key = %key, "Write with zero TTL evicted key");
            return Ok(false);
        }

        let mut conn = self.conn.clone();
        let _: () = self
            .set_cmd(key, &raw, None, ttl)
            .query_async(&mut conn)
            .await
            .map_err(|e| cache_error(key, e))?;

        Ok(true)
    }

    async fn replace<T>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let raw = encode(value)?;
        if expires_immediately(ttl) {
            self.delete(&[key]).await?;
            return Ok(false);
        }

        let mut conn = self.conn.clone();
        let reply: Option<String> = self
            .set_cmd(key, &raw, Some("XX"), ttl)
            .query_async(&mut conn)
            .await
            .map_err(|e| cache_error(key, e))?;

        Ok(reply.is_some())
    }

    async fn set_all<T>(
        &self,
        values: &HashMap<String, T>,
        ttl: Option<Duration>,
    ) -> Result<usize, CacheError>
    where
        T: Serialize + Sync,
    {
        let encoded = values
            .iter()
            .map(|(key, value)| Ok((key.as_str(), encode(value)?)))
            .collect::<Result<Vec<_>, CacheError>>()?;

        if encoded.is_empty() {
            return Ok(0);
        }

        if expires_immediately(ttl) {
            let keys: Vec<&str> = encoded.iter().map(|(key, _)| *key).collect();
            self.delete(&keys).await?;
            return Ok(0);
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, raw) in &encoded {
            pipe.add_command(self.set_cmd(key, raw, None, ttl)).ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| cache_error(encoded[0].0, e))?;

        Ok(encoded.len())
    }

    async fn remove_all(&self, keys: &[&str]) -> Result<usize, CacheError> {
        self.delete(keys).await
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        conn.exists::<_, bool>(self.make_key(key))
            .await
            .map_err(|e| cache_error(key, e))
    }

    async fn get_expiration(&self, key: &str) -> Result<CacheValue<Option<Duration>>, CacheError> {
        let mut conn = self.conn.clone();
        let millis: i64 = redis::cmd("PTTL")
            .arg(self.make_key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| cache_error(key, e))?;

        // -2: no such key, -1: key without expiry
        Ok(match millis {
            -2 => CacheValue::none(),
            -1 => CacheValue::new(None),
            ms => CacheValue::new(Some(Duration::from_millis(ms.max(0) as u64))),
        })
    }

    async fn set_expiration(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        if ttl.is_zero() {
            return Ok(self.delete(&[key]).await? == 1);
        }

        let mut conn = self.conn.clone();
        let updated: bool = redis::cmd("PEXPIRE")
            .arg(self.make_key(key))
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| cache_error(key, e))?;

        Ok(updated)
    }

    async fn increment<N>(
        &self,
        key: &str,
        amount: N,
        ttl: Option<Duration>,
    ) -> Result<N, CacheError>
    where
        N: CacheNumber,
    {
        if expires_immediately(ttl) {
            self.delete(&[key]).await?;
            return Ok(N::ZERO);
        }

        let command = match N::KIND {
            NumberKind::Integer => "INCRBY",
            NumberKind::Float => "INCRBYFLOAT",
        };

        let mut conn = self.conn.clone();
        let raw: String = self
            .increment_script
            .key(self.make_key(key))
            .arg(command)
            .arg(encode(&amount)?)
            .arg(ttl_arg(ttl))
            .arg(kind_arg(N::KIND))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| cache_error(key, e))?;

        decode(key, &raw)
    }

    async fn set_if_higher<N>(
        &self,
        key: &str,
        candidate: N,
        ttl: Option<Duration>,
    ) -> Result<N, CacheError>
    where
        N: CacheNumber,
    {
        self.set_watermark(key, candidate, ttl, Watermark::Higher).await
    }

    async fn set_if_lower<N>(
        &self,
        key: &str,
        candidate: N,
        ttl: Option<Duration>,
    ) -> Result<N, CacheError>
    where
        N: CacheNumber,
    {
        self.set_watermark(key, candidate, ttl, Watermark::Lower).await
    }

    async fn set_add<T>(
        &self,
        key: &str,
        members: &[T],
        ttl: Option<Duration>,
    ) -> Result<usize, CacheError>
    where
        T: Serialize + Sync,
    {
        let encoded = members.iter().map(encode).collect::<Result<Vec<_>, _>>()?;
        if expires_immediately(ttl) {
            self.delete(&[key]).await?;
            return Ok(0);
        }
        if encoded.is_empty() {
            return Ok(0);
        }

        self.update_members(key, "SADD", &encoded, ttl).await
    }

    async fn set_remove<T>(
        &self,
        key: &str,
        members: &[T],
        ttl: Option<Duration>,
    ) -> Result<usize, CacheError>
    where
        T: Serialize + Sync,
    {
        let encoded = members.iter().map(encode).collect::<Result<Vec<_>, _>>()?;
        if expires_immediately(ttl) {
            self.delete(&[key]).await?;
            return Ok(0);
        }
        if encoded.is_empty() {
            return Ok(0);
        }

        self.update_members(key, "SREM", &encoded, ttl).await
    }

    async fn get_set<T>(&self, key: &str) -> Result<CacheValue<Vec<T>>, CacheError>
    where
        T: DeserializeOwned + Send,
    {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .smembers(self.make_key(key))
            .await
            .map_err(|e| cache_error(key, e))?;

        // Redis drops empty sets, so no members means no key.
        if raw.is_empty() {
            return Ok(CacheValue::none());
        }

        let members = raw
            .iter()
            .map(|member| decode(key, member))
            .collect::<Result<Vec<T>, _>>()?;
        Ok(CacheValue::new(members))
    }
}
