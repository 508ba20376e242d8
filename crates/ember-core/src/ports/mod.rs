//! Ports - trait definitions for external dependencies.
//! These are the "interfaces" that cache backends and time sources must implement.

mod cache;
mod clock;

pub use cache::{CacheClient, CacheError};
pub use clock::{Clock, FixedClock, SystemClock};
