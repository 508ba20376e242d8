//! Cache client implementations - Redis and in-memory.

mod memory;

pub use memory::InMemoryCacheClient;

#[cfg(feature = "redis")]
mod redis;
#[cfg(feature = "redis")]
pub use self::redis::{RedisCacheClient, RedisConfig};
