use serde::{Deserialize, Serialize};

/// Result of a cache read - distinguishes "found" from "not found".
///
/// A stored zero, empty string or empty collection is still a hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheValue<T> {
    value: Option<T>,
}

impl<T> CacheValue<T> {
    /// A hit carrying `value`.
    pub fn new(value: T) -> Self {
        Self { value: Some(value) }
    }

    /// A miss.
    pub fn none() -> Self {
        Self { value: None }
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn is_none(&self) -> bool {
        self.value.is_none()
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    /// The stored value, or `default` on a miss.
    pub fn unwrap_or(self, default: T) -> T {
        self.value.unwrap_or(default)
    }

    pub fn map<U, F>(self, f: F) -> CacheValue<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheValue {
            value: self.value.map(f),
        }
    }
}

impl<T> Default for CacheValue<T> {
    fn default() -> Self {
        Self::none()
    }
}

impl<T> From<Option<T>> for CacheValue<T> {
    fn from(value: Option<T>) -> Self {
        Self { value }
    }
}

impl<T> From<CacheValue<T>> for Option<T> {
    fn from(value: CacheValue<T>) -> Self {
        value.value
    }
}
