//! Domain types - values exchanged across the cache contract.

mod cache_value;
mod number;

pub use cache_value::CacheValue;
pub use number::{CacheNumber, NumberKind};
