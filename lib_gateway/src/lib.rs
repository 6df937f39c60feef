//! # lib_gateway
//!
//! Shared building blocks for the realtime gateway workers:
//!
//! - **`connections`**: the external-store capabilities (`CounterStore`, `FlagStore`)
//!   plus their Redis and in-memory implementations.
//! - **`core`**: the per-worker connection registry, the broadcast dispatcher, the
//!   periodic notifier and the fleet shutdown coordinator.
//! - **`error`**: the error types shared by both.
//!
//! Every worker process builds its own `Registry`, `Dispatcher` and
//! `ShutdownCoordinator`; the only state shared between workers lives behind the
//! store traits.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod connections;
pub mod core;
pub mod error;

pub use connections::{CounterStore, FlagStore, MemoryStore, StoreKeys};
#[cfg(feature = "redis-store")]
pub use connections::RedisStore;
pub use crate::core::{
    BroadcastReport, Connection, ConnectionId, ConnectionState, Dispatcher, DrainOutcome,
    NotifierHandle, PeriodicNotifier, Registry, ShutdownCoordinator, ShutdownPhase,
    ShutdownReport, ShutdownSettings,
};
pub use error::{ConnectionError, GatewayError, StoreError};
