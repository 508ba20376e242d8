//! In-memory cache client - a single-process backend for the full cache contract.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tokio::time::Instant;

use ember_core::codec::{decode, encode};
use ember_core::ports::{CacheClient, CacheError};
use ember_core::{CacheNumber, CacheValue};

enum Payload {
    /// Codec-encoded value.
    Value(String),
    /// Codec-encoded members.
    Set(HashSet<String>),
}

struct CacheEntry {
    payload: Payload,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(payload: Payload, ttl: Option<Duration>, now: Instant) -> Self {
        Self {
            payload,
            expires_at: ttl.map(|d| now + d),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }

    /// Reset the expiration when a TTL is given, keep it otherwise.
    fn touch(&mut self, ttl: Option<Duration>, now: Instant) {
        if let Some(d) = ttl {
            self.expires_at = Some(now + d);
        }
    }

    fn value<T: DeserializeOwned>(&self, key: &str) -> Result<T, CacheError> {
        match &self.payload {
            Payload::Value(raw) => decode(key, raw),
            Payload::Set(_) => Err(CacheError::decode(key, "entry holds a set")),
        }
    }
}

type Store = HashMap<String, CacheEntry>;

fn expires_immediately(ttl: Option<Duration>) -> bool {
    ttl == Some(Duration::ZERO)
}

fn live<'a>(store: &'a Store, key: &str, now: Instant) -> Option<&'a CacheEntry> {
    store.get(key).filter(|entry| !entry.is_expired(now))
}

fn live_mut<'a>(store: &'a mut Store, key: &str, now: Instant) -> Option<&'a mut CacheEntry> {
    if store.get(key).is_some_and(|entry| entry.is_expired(now)) {
        store.remove(key);
    }
    store.get_mut(key)
}

/// In-memory cache using a HashMap behind one async RwLock.
///
/// Every mutation runs under the write lock, which makes each primitive atomic.
/// Expired entries are dropped lazily when touched. Data is lost on process restart.
pub struct InMemoryCacheClient {
    store: RwLock<Store>,
}

impl InMemoryCacheClient {
    pub fn new() -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
        }
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let store = self.store.read().await;
        store.values().filter(|entry| !entry.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Free expired entries that were never touched again. Returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut store = self.store.write().await;
        let before = store.len();
        store.retain(|_, entry| !entry.is_expired(now));

        let purged = before - store.len();
        if purged > 0 {
            tracing::debug!(purged, "Purged expired cache entries");
        }
        purged
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        self.store.write().await.clear();
    }

    async fn purge_if_expired(&self, key: &str) {
        let now = Instant::now();
        let mut store = self.store.write().await;
        // Re-check under the write lock: the key may have been rewritten meanwhile.
        if store.get(key).is_some_and(|entry| entry.is_expired(now)) {
            store.remove(key);
        }
    }

    async fn set_watermark<N, F>(
        &self,
        key: &str,
        candidate: N,
        ttl: Option<Duration>,
        improves: F,
    ) -> Result<N, CacheError>
    where
        N: CacheNumber,
        F: Fn(N, N) -> Option<N>,
    {
        let raw = encode(&candidate)?;
        let now = Instant::now();
        let mut store = self.store.write().await;

        if expires_immediately(ttl) {
            store.remove(key);
            return Ok(N::ZERO);
        }

        match live_mut(&mut store, key, now) {
            Some(entry) => {
                let previous: N = entry.value(key)?;
                entry.touch(ttl, now);
                match improves(candidate, previous) {
                    Some(delta) => {
                        entry.payload = Payload::Value(raw);
                        tracing::debug!(key = %key, %previous, %candidate, "Watermark moved");
                        Ok(delta)
                    }
                    None => Ok(N::ZERO),
                }
            }
            None => {
                store.insert(key.to_string(), CacheEntry::new(Payload::Value(raw), ttl, now));
                Ok(candidate)
            }
        }
    }
}

impl Default for InMemoryCacheClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheClient for InMemoryCacheClient {
    async fn get<T>(&self, key: &str) -> Result<CacheValue<T>, CacheError>
    where
        T: DeserializeOwned + Send,
    {
        let now = Instant::now();
        let store = self.store.read().await;
        let Some(entry) = store.get(key) else {
            return Ok(CacheValue::none());
        };

        if entry.is_expired(now) {
            drop(store);
            self.purge_if_expired(key).await;
            return Ok(CacheValue::none());
        }

        entry.value(key).map(CacheValue::new)
    }

    async fn get_all<T>(&self, keys: &[&str]) -> Result<HashMap<String, CacheValue<T>>, CacheError>
    where
        T: DeserializeOwned + Send,
    {
        let now = Instant::now();
        let store = self.store.read().await;
        let mut result = HashMap::with_capacity(keys.len());

        for key in keys {
            let value = match live(&store, key, now) {
                Some(entry) => CacheValue::new(entry.value(key)?),
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
        let raw = encode(value)?;
        let now = Instant::now();
        let mut store = self.store.write().await;

        if expires_immediately(ttl) || live_mut(&mut store, key, now).is_some() {
            return Ok(false);
        }

        store.insert(key.to_string(), CacheEntry::new(Payload::Value(raw), ttl, now));
        Ok(true)
    }

    async fn set<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<bool, CacheError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let raw = encode(value)?;
        let now = Instant::now();
        let mut store = self.store.write().await;

        if expires_immediately(ttl) {
            store.remove(key);
            tracing::debug!(key = %key, "Write with zero TTL evicted key");
            return Ok(false);
        }

        store.insert(key.to_string(), CacheEntry::new(Payload::Value(raw), ttl, now));
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
        let now = Instant::now();
        let mut store = self.store.write().await;

        if live_mut(&mut store, key, now).is_none() {
            return Ok(false);
        }

        if expires_immediately(ttl) {
            store.remove(key);
            return Ok(false);
        }

        store.insert(key.to_string(), CacheEntry::new(Payload::Value(raw), ttl, now));
        Ok(true)
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
            .map(|(key, value)| Ok((key.clone(), encode(value)?)))
            .collect::<Result<Vec<_>, CacheError>>()?;

        let now = Instant::now();
        let mut store = self.store.write().await;

        if expires_immediately(ttl) {
            for (key, _) in &encoded {
                store.remove(key);
            }
            return Ok(0);
        }

        let written = encoded.len();
        for (key, raw) in encoded {
            store.insert(key, CacheEntry::new(Payload::Value(raw), ttl, now));
        }
        Ok(written)
    }

    async fn remove_all(&self, keys: &[&str]) -> Result<usize, CacheError> {
        let now = Instant::now();
        let mut store = self.store.write().await;

        let removed = keys
            .iter()
            .filter_map(|key| store.remove(*key))
            .filter(|entry| !entry.is_expired(now))
            .count();

        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        let store = self.store.read().await;
        Ok(live(&store, key, now).is_some())
    }

    async fn get_expiration(&self, key: &str) -> Result<CacheValue<Option<Duration>>, CacheError> {
        let now = Instant::now();
        let store = self.store.read().await;

        Ok(live(&store, key, now)
            .map(|entry| entry.expires_at.map(|exp| exp.saturating_duration_since(now)))
            .into())
    }

    async fn set_expiration(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut store = self.store.write().await;

        let Some(entry) = live_mut(&mut store, key, now) else {
            return Ok(false);
        };

        if ttl.is_zero() {
            store.remove(key);
        } else {
            entry.expires_at = Some(now + ttl);
        }
        Ok(true)
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
        encode(&amount)?;
        let now = Instant::now();
        let mut store = self.store.write().await;

        if expires_immediately(ttl) {
            store.remove(key);
            return Ok(N::ZERO);
        }

        let current: N = match live(&store, key, now) {
            Some(entry) => entry.value(key)?,
            None => N::ZERO,
        };
        let next = current.checked_add(amount).ok_or_else(|| {
            CacheError::Operation(format!("increment of '{key}' by {amount} would overflow"))
        })?;
        let raw = encode(&next)?;

        match live_mut(&mut store, key, now) {
            Some(entry) => {
                entry.payload = Payload::Value(raw);
                entry.touch(ttl, now);
            }
            None => {
                store.insert(key.to_string(), CacheEntry::new(Payload::Value(raw), ttl, now));
            }
        }

        Ok(next)
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
        self.set_watermark(key, candidate, ttl, |candidate, previous| {
            (candidate > previous).then(|| candidate.saturating_sub(previous))
        })
        .await
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
        self.set_watermark(key, candidate, ttl, |candidate, previous| {
            (candidate < previous).then(|| previous.saturating_sub(candidate))
        })
        .await
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
        let now = Instant::now();
        let mut store = self.store.write().await;

        if expires_immediately(ttl) {
            store.remove(key);
            return Ok(0);
        }
        if encoded.is_empty() {
            return Ok(0);
        }

        match live_mut(&mut store, key, now) {
            Some(entry) => {
                let Payload::Set(set) = &mut entry.payload else {
                    return Err(CacheError::decode(key, "entry does not hold a set"));
                };
                let added = encoded.into_iter().filter(|m| set.insert(m.clone())).count();
                entry.touch(ttl, now);
                Ok(added)
            }
            None => {
                let set: HashSet<String> = encoded.into_iter().collect();
                let added = set.len();
                store.insert(key.to_string(), CacheEntry::new(Payload::Set(set), ttl, now));
                Ok(added)
            }
        }
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
        let now = Instant::now();
        let mut store = self.store.write().await;

        if expires_immediately(ttl) {
            store.remove(key);
            return Ok(0);
        }

        let Some(entry) = live_mut(&mut store, key, now) else {
            return Ok(0);
        };
        let Payload::Set(set) = &mut entry.payload else {
            return Err(CacheError::decode(key, "entry does not hold a set"));
        };

        let removed = encoded.iter().filter(|m| set.remove(*m)).count();
        if set.is_empty() {
            store.remove(key);
        } else {
            entry.touch(ttl, now);
        }

        Ok(removed)
    }

    async fn get_set<T>(&self, key: &str) -> Result<CacheValue<Vec<T>>, CacheError>
    where
        T: DeserializeOwned + Send,
    {
        let now = Instant::now();
        let store = self.store.read().await;

        let Some(entry) = live(&store, key, now) else {
            return Ok(CacheValue::none());
        };
        let Payload::Set(set) = &entry.payload else {
            return Err(CacheError::decode(key, "entry does not hold a set"));
        };

        let members = set
            .iter()
            .map(|raw| decode(key, raw))
            .collect::<Result<Vec<T>, _>>()?;
        Ok(CacheValue::new(members))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_missing_key_is_a_miss() {
        let cache = InMemoryCacheClient::new();
        let value = cache.get::<String>("never-written").await.unwrap();
        assert!(!value.has_value());
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = InMemoryCacheClient::new();
        assert!(cache.set("key1", "value1", None).await.unwrap());
        assert_eq!(
            cache.get::<String>("key1").await.unwrap().into_value(),
            Some("value1".to_string())
        );
    }

    #[tokio::test]
    async fn test_add_only_creates() {
        let cache = InMemoryCacheClient::new();
        assert!(cache.add("k", "v", None).await.unwrap());
        assert!(!cache.add("k", "v2", None).await.unwrap());
        assert_eq!(cache.get::<String>("k").await.unwrap().into_value().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_replace_requires_existing_key() {
        let cache = InMemoryCacheClient::new();
        assert!(!cache.replace("k", &1_i64, None).await.unwrap());
        assert!(!cache.exists("k").await.unwrap());

        cache.set("k", &1_i64, None).await.unwrap();
        assert!(cache.replace("k", &2_i64, None).await.unwrap());
        assert_eq!(cache.get::<i64>("k").await.unwrap().into_value(), Some(2));
    }

    #[tokio::test]
    async fn test_get_all_reports_every_key() {
        let cache = InMemoryCacheClient::new();
        let values = HashMap::from([("a".to_string(), 1_i64), ("b".to_string(), 2_i64)]);
        assert_eq!(cache.set_all(&values, None).await.unwrap(), 2);

        let result = cache.get_all::<i64>(&["a", "b", "c"]).await.unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result["a"].value(), Some(&1));
        assert_eq!(result["b"].value(), Some(&2));
        assert!(result["c"].is_none());
    }

    #[tokio::test]
    async fn test_remove_counts_existing_keys() {
        let cache = InMemoryCacheClient::new();
        cache.set("k1", "v", None).await.unwrap();

        assert_eq!(cache.remove_all(&["k1", "k2"]).await.unwrap(), 1);
        assert!(!cache.remove("k1").await.unwrap());

        cache.set("k1", "v", None).await.unwrap();
        assert!(cache.remove("k1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = InMemoryCacheClient::new();
        cache.set("k", "v", Some(Duration::from_secs(1))).await.unwrap();
        assert!(cache.exists("k").await.unwrap());

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(cache.get::<String>("k").await.unwrap().is_none());
        assert!(cache.add("k", "fresh", None).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_keys_do_not_count_as_removed() {
        let cache = InMemoryCacheClient::new();
        cache.set("k", "v", Some(Duration::from_secs(1))).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.remove_all(&["k"]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_zero_ttl_means_already_expired() {
        let cache = InMemoryCacheClient::new();
        cache.set("k", "old", None).await.unwrap();

        assert!(!cache.add("k", "x", Some(Duration::ZERO)).await.unwrap());
        assert!(cache.exists("k").await.unwrap());

        assert!(!cache.set("k", "new", Some(Duration::ZERO)).await.unwrap());
        assert!(cache.get::<String>("k").await.unwrap().is_none());

        assert!(!cache.add("fresh", "x", Some(Duration::ZERO)).await.unwrap());
        assert!(!cache.exists("fresh").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_expiration_keeps_value() {
        let cache = InMemoryCacheClient::new();
        assert!(!cache.set_expiration("missing", Duration::from_secs(5)).await.unwrap());

        cache.set("k", &7_i64, None).await.unwrap();
        assert_eq!(cache.get_expiration("k").await.unwrap().into_value(), Some(None));

        assert!(cache.set_expiration("k", Duration::from_secs(5)).await.unwrap());
        assert_eq!(
            cache.get_expiration("k").await.unwrap().into_value(),
            Some(Some(Duration::from_secs(5)))
        );
        assert_eq!(cache.get::<i64>("k").await.unwrap().into_value(), Some(7));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.get_expiration("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_expiration_to_zero_evicts() {
        let cache = InMemoryCacheClient::new();
        cache.set("k", "v", None).await.unwrap();
        assert!(cache.set_expiration("k", Duration::ZERO).await.unwrap());
        assert!(!cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_increment_starts_from_zero() {
        let cache = InMemoryCacheClient::new();
        assert_eq!(cache.increment("hits", 1_i64, None).await.unwrap(), 1);
        assert_eq!(cache.increment("hits", 5_i64, None).await.unwrap(), 6);
        assert_eq!(cache.decrement("hits", 2_i64, None).await.unwrap(), 4);
        assert_eq!(cache.get::<i64>("hits").await.unwrap().into_value(), Some(4));
    }

    #[tokio::test]
    async fn test_float_increment() {
        let cache = InMemoryCacheClient::new();
        assert_eq!(cache.increment("load", 0.5_f64, None).await.unwrap(), 0.5);
        assert_eq!(cache.increment("load", 1.25_f64, None).await.unwrap(), 1.75);
    }

    #[tokio::test]
    async fn test_increment_overflow_leaves_counter_unchanged() {
        let cache = InMemoryCacheClient::new();
        cache.set("big", &i64::MAX, None).await.unwrap();

        let err = cache.increment("big", 1_i64, None).await.unwrap_err();
        assert!(matches!(err, CacheError::Operation(_)));
        assert_eq!(cache.get::<i64>("big").await.unwrap().into_value(), Some(i64::MAX));
    }

    #[tokio::test]
    async fn test_increment_on_text_is_decode_error() {
        let cache = InMemoryCacheClient::new();
        cache.set("name", "ada", None).await.unwrap();
        let err = cache.increment("name", 1_i64, None).await.unwrap_err();
        assert!(matches!(err, CacheError::Decode { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_ttl_refreshes_only_when_given() {
        let cache = InMemoryCacheClient::new();
        cache.increment("c", 1_i64, Some(Duration::from_secs(10))).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        cache.increment("c", 1_i64, None).await.unwrap();
        assert_eq!(
            cache.get_expiration("c").await.unwrap().into_value(),
            Some(Some(Duration::from_secs(4)))
        );

        cache.increment("c", 1_i64, Some(Duration::from_secs(10))).await.unwrap();
        assert_eq!(
            cache.get_expiration("c").await.unwrap().into_value(),
            Some(Some(Duration::from_secs(10)))
        );
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let cache = Arc::new(InMemoryCacheClient::new());

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.increment("shared", 1_i64, None).await })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(cache.get::<i64>("shared").await.unwrap().into_value(), Some(64));
    }

    #[tokio::test]
    async fn test_concurrent_add_has_single_winner() {
        let cache = Arc::new(InMemoryCacheClient::new());

        let tasks: Vec<_> = (0..16_i64)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.add("lock", &i, None).await })
            })
            .collect();

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap().unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_set_if_higher() {
        let cache = InMemoryCacheClient::new();
        assert_eq!(cache.set_if_higher("hw", 5_i64, None).await.unwrap(), 5);
        assert_eq!(cache.set_if_higher("hw", 3_i64, None).await.unwrap(), 0);
        assert_eq!(cache.get::<i64>("hw").await.unwrap().into_value(), Some(5));

        assert_eq!(cache.set_if_higher("hw", 9_i64, None).await.unwrap(), 4);
        assert_eq!(cache.get::<i64>("hw").await.unwrap().into_value(), Some(9));
    }

    #[tokio::test]
    async fn test_set_if_lower() {
        let cache = InMemoryCacheClient::new();
        assert_eq!(cache.set_if_lower("lw", 10_i64, None).await.unwrap(), 10);
        assert_eq!(cache.set_if_lower("lw", 12_i64, None).await.unwrap(), 0);
        assert_eq!(cache.set_if_lower("lw", 4_i64, None).await.unwrap(), 6);
        assert_eq!(cache.get::<i64>("lw").await.unwrap().into_value(), Some(4));
    }

    #[tokio::test]
    async fn test_equal_candidate_is_not_applied() {
        let cache = InMemoryCacheClient::new();
        cache.set_if_higher("hw", 2.5_f64, None).await.unwrap();
        assert_eq!(cache.set_if_higher("hw", 2.5_f64, None).await.unwrap(), 0.0);
        assert_eq!(cache.set_if_lower("hw", 2.5_f64, None).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_set_add_counts_new_members() {
        let cache = InMemoryCacheClient::new();
        assert_eq!(cache.set_add("s", &["a", "b"], None).await.unwrap(), 2);
        assert_eq!(cache.set_add("s", &["b", "c"], None).await.unwrap(), 1);

        let mut members = cache.get_set::<String>("s").await.unwrap().into_value().unwrap();
        members.sort();
        assert_eq!(members, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_set_remove_counts_removed_members() {
        let cache = InMemoryCacheClient::new();
        cache.set_add("s", &[1_i64, 2, 3], None).await.unwrap();

        assert_eq!(cache.set_remove("s", &[2_i64, 9], None).await.unwrap(), 1);
        assert_eq!(cache.set_remove("missing", &[1_i64], None).await.unwrap(), 0);

        assert_eq!(cache.set_remove("s", &[1_i64, 3], None).await.unwrap(), 2);
        assert!(!cache.exists("s").await.unwrap());
    }

    #[tokio::test]
    async fn test_value_and_set_entries_do_not_mix() {
        let cache = InMemoryCacheClient::new();
        cache.set_add("s", &["a"], None).await.unwrap();
        cache.set("v", "plain", None).await.unwrap();

        assert!(matches!(cache.get::<String>("s").await, Err(CacheError::Decode { .. })));
        assert!(matches!(cache.set_add("v", &["a"], None).await, Err(CacheError::Decode { .. })));
        assert!(matches!(cache.get_set::<String>("v").await, Err(CacheError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_non_finite_watermark_is_rejected_and_key_stays_readable() {
        let cache = InMemoryCacheClient::new();
        assert_eq!(cache.set_if_higher("w", 2.0_f64, None).await.unwrap(), 2.0);

        let err = cache.set_if_higher("w", f64::INFINITY, None).await.unwrap_err();
        assert!(matches!(err, CacheError::Serialization(_)));
        assert_eq!(cache.set_if_higher("w", 3.0_f64, None).await.unwrap(), 1.0);

        assert!(cache.set("n", &f64::NAN, None).await.is_err());
        assert!(!cache.exists("n").await.unwrap());

        let err = cache.increment("load", f64::NEG_INFINITY, None).await.unwrap_err();
        assert!(matches!(err, CacheError::Serialization(_)));
        assert!(!cache.exists("load").await.unwrap());
    }

    #[tokio::test]
    async fn test_watermarks_compare_large_integers_exactly() {
        let cache = InMemoryCacheClient::new();
        cache.set("ns", &9_007_199_254_740_993_i64, None).await.unwrap();

        assert_eq!(cache.set_if_lower("ns", 9_007_199_254_740_992_i64, None).await.unwrap(), 1);
        assert_eq!(cache.set_if_higher("ns", 9_007_199_254_740_993_i64, None).await.unwrap(), 1);
        assert_eq!(
            cache.get::<i64>("ns").await.unwrap().into_value(),
            Some(9_007_199_254_740_993)
        );
    }

    #[tokio::test]
    async fn test_zero_ttl_watermarks_evict_and_return_zero() {
        let cache = InMemoryCacheClient::new();
        cache.set_if_higher("hw", 5_i64, None).await.unwrap();
        assert_eq!(cache.set_if_higher("hw", 9_i64, Some(Duration::ZERO)).await.unwrap(), 0);
        assert!(!cache.exists("hw").await.unwrap());

        cache.set_if_lower("lw", 5_i64, None).await.unwrap();
        assert_eq!(cache.set_if_lower("lw", 1_i64, Some(Duration::ZERO)).await.unwrap(), 0);
        assert!(!cache.exists("lw").await.unwrap());

        assert_eq!(cache.set_if_higher("fresh", 1.5_f64, Some(Duration::ZERO)).await.unwrap(), 0.0);
        assert!(!cache.exists("fresh").await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_ttl_set_ops_evict_and_return_zero() {
        let cache = InMemoryCacheClient::new();
        cache.set_add("s", &["a", "b"], None).await.unwrap();
        assert_eq!(cache.set_add("s", &["c"], Some(Duration::ZERO)).await.unwrap(), 0);
        assert!(cache.get_set::<String>("s").await.unwrap().is_none());

        cache.set_add("s", &["a", "b"], None).await.unwrap();
        assert_eq!(cache.set_remove("s", &["a"], Some(Duration::ZERO)).await.unwrap(), 0);
        assert!(!cache.exists("s").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_set_if_higher_keeps_maximum() {
        let cache = Arc::new(InMemoryCacheClient::new());

        let tasks: Vec<_> = (1..=32_i64)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.set_if_higher("max", i, None).await })
            })
            .collect();

        let mut total = 0;
        for task in tasks {
            let delta = task.await.unwrap().unwrap();
            assert!(delta >= 0);
            total += delta;
        }

        // Every applied delta moves the watermark up from the previous winner.
        assert_eq!(total, 32);
        assert_eq!(cache.get::<i64>("max").await.unwrap().into_value(), Some(32));
    }

    #[tokio::test]
    async fn test_concurrent_equal_candidates_have_single_winner() {
        let cache = Arc::new(InMemoryCacheClient::new());
        cache.set("max", &10_i64, None).await.unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.set_if_higher("max", 15_i64, None).await })
            })
            .collect();

        let mut winners = 0;
        for task in tasks {
            match task.await.unwrap().unwrap() {
                0 => {}
                5 => winners += 1,
                other => panic!("unexpected delta {other}"),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_frees_untouched_entries() {
        let cache = InMemoryCacheClient::new();
        cache.set("short", "v", Some(Duration::from_secs(1))).await.unwrap();
        cache.set_add("tags", &["a"], Some(Duration::from_secs(1))).await.unwrap();
        cache.set("long", "v", None).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.purge_expired().await, 2);
        assert_eq!(cache.purge_expired().await, 0);
        assert!(cache.exists("long").await.unwrap());
    }

    #[tokio::test]
    async fn test_len_and_clear() {
        let cache = InMemoryCacheClient::new();
        cache.set("a", "1", None).await.unwrap();
        cache.set_add("b", &["x"], None).await.unwrap();
        assert_eq!(cache.len().await, 2);

        cache.clear().await;
        assert!(cache.is_empty().await);
    }
}
