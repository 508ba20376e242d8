use std::fmt::{Debug, Display};
use std::ops::Neg;
use std::str::FromStr;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Representation a counter is stored with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberKind {
    Integer,
    Float,
}

/// Numeric types usable as counters and watermarks (`i64`, `f64`).
///
/// Values are stored as plain decimal text so a backend can apply its own
/// atomic arithmetic to them.
pub trait CacheNumber:
    Copy
    + PartialOrd
    + Neg<Output = Self>
    + Debug
    + Display
    + FromStr
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    const ZERO: Self;
    const KIND: NumberKind;

    /// `None` when the sum does not fit.
    fn checked_add(self, rhs: Self) -> Option<Self>;

    fn saturating_sub(self, rhs: Self) -> Self;
}

impl CacheNumber for i64 {
    const ZERO: Self = 0;
    const KIND: NumberKind = NumberKind::Integer;

    fn checked_add(self, rhs: Self) -> Option<Self> {
        i64::checked_add(self, rhs)
    }

    fn saturating_sub(self, rhs: Self) -> Self {
        i64::saturating_sub(self, rhs)
    }
}

impl CacheNumber for f64 {
    const ZERO: Self = 0.0;
    const KIND: NumberKind = NumberKind::Float;

    fn checked_add(self, rhs: Self) -> Option<Self> {
        let sum = self + rhs;
        sum.is_finite().then_some(sum)
    }

    fn saturating_sub(self, rhs: Self) -> Self {
        (self - rhs).clamp(f64::MIN, f64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_overflow_is_detected() {
        assert_eq!(CacheNumber::checked_add(i64::MAX, 1), None);
        assert_eq!(CacheNumber::checked_add(40_i64, 2), Some(42));
    }

    #[test]
    fn test_delta_saturates() {
        assert_eq!(CacheNumber::saturating_sub(i64::MAX, -1), i64::MAX);
        assert_eq!(CacheNumber::saturating_sub(f64::MAX, -f64::MAX), f64::MAX);
    }

    #[test]
    fn test_float_sum_must_stay_finite() {
        assert_eq!(CacheNumber::checked_add(f64::MAX, f64::MAX), None);
        assert_eq!(CacheNumber::checked_add(1.5_f64, 2.0), Some(3.5));
    }
}
