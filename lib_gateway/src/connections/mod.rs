//! # Connections Module
//!
//! This module handles the connection to the external store shared by every
//! worker of the fleet: the connection counter and the shutdown flag.

/// Capability traits consumed by the registry and the shutdown coordinator.
pub mod store;

/// Redis-backed store used in production.
#[cfg(feature = "redis-store")]
pub mod cache_redis;

/// In-process store used by tests and single-worker runs.
pub mod memory;

pub use store::{CounterStore, FlagStore, StoreKeys};
pub use memory::MemoryStore;
#[cfg(feature = "redis-store")]
pub use cache_redis::RedisStore;
