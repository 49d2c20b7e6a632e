//! Infrastructure event bus implementations.
//!
//! The bus abstraction lives in `meshsync-events` as pure mechanics; this
//! module provides broker-backed implementations.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsError, RedisStreamsEventBus};
