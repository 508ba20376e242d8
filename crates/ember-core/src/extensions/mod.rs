//! Convenience layer over [`CacheClient`].
//!
//! [`CacheExtensions`] adds absolute-time variants, unix-time encoding and
//! single-member shorthands. It holds no state besides the client and a clock,
//! and never turns an error into a default value.

mod time;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{CacheNumber, CacheValue};
use crate::ports::{CacheClient, CacheError, Clock, SystemClock};

pub use time::{UNIX_TIME_MISS, from_unix_seconds, to_unix_seconds, ttl_until};

/// A cache client paired with the clock used to turn instants into TTLs.
#[derive(Debug, Clone)]
pub struct CacheExtensions<C, K = SystemClock> {
    client: C,
    clock: K,
}

impl<C: CacheClient> CacheExtensions<C, SystemClock> {
    pub fn new(client: C) -> Self {
        Self::with_clock(client, SystemClock)
    }
}

impl<C: CacheClient, K: Clock> CacheExtensions<C, K> {
    pub fn with_clock(client: C, clock: K) -> Self {
        Self { client, clock }
    }

    /// The wrapped client, for direct access to the primitives.
    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn clock(&self) -> &K {
        &self.clock
    }

    pub fn into_inner(self) -> C {
        self.client
    }

    fn ttl_until(&self, expires_at: DateTime<Utc>) -> Duration {
        ttl_until(expires_at, self.clock.now())
    }

    /// Read a value, falling back to `default` on a miss.
    pub async fn get_or<T>(&self, key: &str, default: T) -> Result<T, CacheError>
    where
        T: DeserializeOwned + Send,
    {
        Ok(self.client.get(key).await?.unwrap_or(default))
    }

    pub async fn get_all_of<T, I, S>(
        &self,
        keys: I,
    ) -> Result<HashMap<String, CacheValue<T>>, CacheError>
    where
        T: DeserializeOwned + Send,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let owned: Vec<S> = keys.into_iter().collect();
        let keys: Vec<&str> = owned.iter().map(AsRef::as_ref).collect();
        self.client.get_all(&keys).await
    }

    pub async fn add_at<T>(
        &self,
        key: &str,
        value: &T,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, CacheError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let ttl = self.ttl_until(expires_at);
        self.client.add(key, value, Some(ttl)).await
    }

    pub async fn set_at<T>(
        &self,
        key: &str,
        value: &T,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, CacheError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let ttl = self.ttl_until(expires_at);
        self.client.set(key, value, Some(ttl)).await
    }

    pub async fn replace_at<T>(
        &self,
        key: &str,
        value: &T,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, CacheError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let ttl = self.ttl_until(expires_at);
        self.client.replace(key, value, Some(ttl)).await
    }

    pub async fn set_all_at<T>(
        &self,
        values: &HashMap<String, T>,
        expires_at: DateTime<Utc>,
    ) -> Result<usize, CacheError>
    where
        T: Serialize + Sync,
    {
        let ttl = self.ttl_until(expires_at);
        self.client.set_all(values, Some(ttl)).await
    }

    pub async fn set_expiration_at(
        &self,
        key: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, CacheError> {
        let ttl = self.ttl_until(expires_at);
        self.client.set_expiration(key, ttl).await
    }

    pub async fn increment_at<N>(
        &self,
        key: &str,
        amount: N,
        expires_at: DateTime<Utc>,
    ) -> Result<N, CacheError>
    where
        N: CacheNumber,
    {
        let ttl = self.ttl_until(expires_at);
        self.client.increment(key, amount, Some(ttl)).await
    }

    pub async fn increment_one(&self, key: &str, ttl: Option<Duration>) -> Result<i64, CacheError> {
        self.client.increment(key, 1_i64, ttl).await
    }

    pub async fn decrement_one(&self, key: &str, ttl: Option<Duration>) -> Result<i64, CacheError> {
        self.client.decrement(key, 1_i64, ttl).await
    }

    pub async fn decrement_by(
        &self,
        key: &str,
        amount: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError> {
        self.client.decrement(key, amount, ttl).await
    }

    /// Store `instant` as whole seconds since the unix epoch.
    pub async fn set_unix_time(
        &self,
        key: &str,
        instant: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        self.client.set(key, &to_unix_seconds(instant), ttl).await
    }

    pub async fn set_unix_time_at(
        &self,
        key: &str,
        instant: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, CacheError> {
        let ttl = self.ttl_until(expires_at);
        self.set_unix_time(key, instant, Some(ttl)).await
    }

    /// Read an instant written by [`set_unix_time`](Self::set_unix_time).
    ///
    /// On a miss returns `default`, or [`UNIX_TIME_MISS`] when none is given.
    pub async fn get_unix_time(
        &self,
        key: &str,
        default: Option<DateTime<Utc>>,
    ) -> Result<DateTime<Utc>, CacheError> {
        match self.client.get::<i64>(key).await?.into_value() {
            Some(seconds) => from_unix_seconds(key, seconds),
            None => Ok(default.unwrap_or(UNIX_TIME_MISS)),
        }
    }

    /// Watermark on instants, compared at whole-second resolution.
    pub async fn set_if_higher_time(
        &self,
        key: &str,
        instant: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError> {
        self.client.set_if_higher(key, to_unix_seconds(instant), ttl).await
    }

    pub async fn set_if_lower_time(
        &self,
        key: &str,
        instant: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError> {
        self.client.set_if_lower(key, to_unix_seconds(instant), ttl).await
    }

    /// True if `member` was not in the set before.
    pub async fn set_add_one<T>(
        &self,
        key: &str,
        member: T,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError>
    where
        T: Serialize + Send + Sync,
    {
        Ok(self.client.set_add(key, &[member], ttl).await? > 0)
    }

    /// True if `member` was in the set and got removed.
    pub async fn set_remove_one<T>(
        &self,
        key: &str,
        member: T,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError>
    where
        T: Serialize + Send + Sync,
    {
        Ok(self.client.set_remove(key, &[member], ttl).await? > 0)
    }
}
