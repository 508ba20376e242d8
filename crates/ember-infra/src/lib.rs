//! # Ember Infrastructure
//!
//! Cache client backends implementing the contract defined in `ember-core`.
//!
//! ## Feature Flags
//!
//! - `full` (default) - All features enabled
//! - `minimal` - No external dependencies, in-memory only
//! - `redis` - Redis-backed cache client

pub mod cache;

// Re-exports - In-Memory
pub use cache::InMemoryCacheClient;

// Re-exports - Redis
#[cfg(feature = "redis")]
pub use cache::{RedisCacheClient, RedisConfig};
