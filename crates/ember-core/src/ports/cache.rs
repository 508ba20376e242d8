use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{CacheNumber, CacheValue};

/// Cache client trait - the primitive contract every backend (Redis, in-memory) implements.
///
/// Every mutating method is a single atomic step at the backend: concurrent calls on
/// the same key never interleave partially.
///
/// `ttl` is relative. `None` stores without automatic expiry and `Some(Duration::ZERO)`
/// means "already expired":
/// - `add` returns false and changes nothing
/// - `set`, `replace` and `set_all` evict the targeted keys and report nothing written
/// - `set_expiration` evicts the key and reports whether it existed
/// - counters, watermarks and set-member operations evict the key and return zero
///
/// For counters, watermarks and sets a `Some(ttl)` resets the expiration on every call,
/// while `None` leaves the current expiration of an existing key untouched.
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Read a value. A missing or expired key is a miss, not an error.
    async fn get<T>(&self, key: &str) -> Result<CacheValue<T>, CacheError>
    where
        T: DeserializeOwned + Send;

    /// Read several keys at once. Every requested key is present in the result.
    async fn get_all<T>(&self, keys: &[&str]) -> Result<HashMap<String, CacheValue<T>>, CacheError>
    where
        T: DeserializeOwned + Send;

    /// Store a value only if the key does not exist yet.
    async fn add<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<bool, CacheError>
    where
        T: Serialize + Sync + ?Sized;

    /// Store a value unconditionally.
    async fn set<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<bool, CacheError>
    where
        T: Serialize + Sync + ?Sized;

    /// Overwrite a value only if the key already exists.
    async fn replace<T>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError>
    where
        T: Serialize + Sync + ?Sized;

    /// Store every entry with the same TTL. Returns how many keys were written.
    async fn set_all<T>(
        &self,
        values: &HashMap<String, T>,
        ttl: Option<Duration>,
    ) -> Result<usize, CacheError>
    where
        T: Serialize + Sync;

    /// Delete keys. Returns how many of them existed.
    async fn remove_all(&self, keys: &[&str]) -> Result<usize, CacheError>;

    /// Delete a single key. Returns true if it existed.
    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.remove_all(&[key]).await? == 1)
    }

    /// Check whether a live entry exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Remaining time to live of a key. `Some(None)` means the key never expires.
    async fn get_expiration(&self, key: &str) -> Result<CacheValue<Option<Duration>>, CacheError>;

    /// Change the TTL of an existing key without touching its value.
    async fn set_expiration(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Atomically add `amount` to a counter, starting from zero when absent.
    async fn increment<N>(
        &self,
        key: &str,
        amount: N,
        ttl: Option<Duration>,
    ) -> Result<N, CacheError>
    where
        N: CacheNumber;

    /// Atomically subtract `amount` from a counter.
    async fn decrement<N>(
        &self,
        key: &str,
        amount: N,
        ttl: Option<Duration>,
    ) -> Result<N, CacheError>
    where
        N: CacheNumber,
    {
        self.increment(key, -amount, ttl).await
    }

    /// Store `candidate` if it is greater than the current value (or the key is absent).
    ///
    /// Returns `candidate - previous` when applied, zero otherwise. An absent key
    /// counts as zero for the returned delta.
    async fn set_if_higher<N>(
        &self,
        key: &str,
        candidate: N,
        ttl: Option<Duration>,
    ) -> Result<N, CacheError>
    where
        N: CacheNumber;

    /// Store `candidate` if it is less than the current value (or the key is absent).
    ///
    /// Returns `previous - candidate` when applied, zero otherwise. An absent key
    /// counts as zero for the returned delta.
    async fn set_if_lower<N>(
        &self,
        key: &str,
        candidate: N,
        ttl: Option<Duration>,
    ) -> Result<N, CacheError>
    where
        N: CacheNumber;

    /// Add members to a set entry, creating it if needed. Returns how many were new.
    async fn set_add<T>(
        &self,
        key: &str,
        members: &[T],
        ttl: Option<Duration>,
    ) -> Result<usize, CacheError>
    where
        T: Serialize + Sync;

    /// Remove members from a set entry. Returns how many were actually removed.
    async fn set_remove<T>(
        &self,
        key: &str,
        members: &[T],
        ttl: Option<Duration>,
    ) -> Result<usize, CacheError>
    where
        T: Serialize + Sync;

    /// Read all members of a set entry.
    async fn get_set<T>(&self, key: &str) -> Result<CacheValue<Vec<T>>, CacheError>
    where
        T: DeserializeOwned + Send;
}

/// Cache operation errors.
///
/// A miss is never an error: it surfaces as an empty [`CacheValue`], a zero count or `false`.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Cannot decode value for key '{key}': {reason}")]
    Decode { key: String, reason: String },

    #[error("Operation failed: {0}")]
    Operation(String),
}

impl CacheError {
    pub fn decode(key: &str, reason: impl ToString) -> Self {
        Self::Decode {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True when the backend could not be reached or did not answer in time.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}
