//! Session store backends.
//!
//! The in-memory store lives next to the trait in `simplepay-auth`; this
//! module holds the networked backends.

#[cfg(feature = "redis")]
pub mod redis_kv;

#[cfg(feature = "redis")]
pub use redis_kv::RedisSessionStore;
