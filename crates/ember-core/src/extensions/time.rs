//! Instant/TTL conversions used by the convenience layer.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::ports::CacheError;

/// Returned by unix-time reads that miss when the caller supplies no default.
pub const UNIX_TIME_MISS: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

/// Relative TTL from `now` until `expires_at`.
///
/// Instants at or before `now` map to `Duration::ZERO`, which every backend treats
/// as "already expired".
pub fn ttl_until(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (expires_at - now).to_std().unwrap_or(Duration::ZERO)
}

/// Whole seconds since the unix epoch; sub-second precision is dropped.
pub fn to_unix_seconds(instant: DateTime<Utc>) -> i64 {
    instant.timestamp()
}

pub fn from_unix_seconds(key: &str, seconds: i64) -> Result<DateTime<Utc>, CacheError> {
    DateTime::from_timestamp(seconds, 0).ok_or_else(|| {
        CacheError::decode(key, format!("{seconds} is not a representable unix time"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(seconds, 0).unwrap()
    }

    #[test]
    fn test_future_expiry_gives_remaining_time() {
        let now = at(1_000);
        assert_eq!(ttl_until(now + TimeDelta::seconds(30), now), Duration::from_secs(30));
    }

    #[test]
    fn test_past_or_present_expiry_is_zero() {
        let now = at(1_000);
        assert_eq!(ttl_until(now, now), Duration::ZERO);
        assert_eq!(ttl_until(now - TimeDelta::hours(1), now), Duration::ZERO);
    }

    #[test]
    fn test_unix_seconds_truncate_sub_second_precision() {
        let instant = at(1_700_000_000) + TimeDelta::milliseconds(999);
        let seconds = to_unix_seconds(instant);
        assert_eq!(seconds, 1_700_000_000);
        assert_eq!(from_unix_seconds("k", seconds).unwrap(), at(1_700_000_000));
    }

    #[test]
    fn test_unrepresentable_seconds_fail_to_decode() {
        let err = from_unix_seconds("k", i64::MAX).unwrap_err();
        assert!(matches!(err, CacheError::Decode { .. }));
    }
}
