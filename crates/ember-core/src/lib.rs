//! # Ember Core
//!
//! The cache client contract and everything that builds on it without touching a backend:
//! the [`CacheClient`] port, the [`Clock`] port, the JSON codec and the
//! [`CacheExtensions`] convenience layer.

pub mod codec;
pub mod domain;
pub mod extensions;
pub mod ports;

pub use domain::{CacheNumber, CacheValue, NumberKind};
pub use extensions::CacheExtensions;
pub use ports::{CacheClient, CacheError, Clock, FixedClock, SystemClock};
