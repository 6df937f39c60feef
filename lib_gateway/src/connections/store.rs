//! # Shared Store Capabilities
//!
//! Every cross-worker fact (how many clients the fleet holds, whether the fleet is
//! shutting down) lives in an external key/value store. Components never reach for
//! the store directly; they receive one of these capabilities at construction time.

use async_trait::async_trait;

use crate::error::StoreError;

/// Key used for the fleet-wide connection counter.
pub const DEFAULT_COUNTER_KEY: &str = "websocket:connections";
/// Key used for the fleet-wide shutdown flag.
pub const DEFAULT_SHUTDOWN_KEY: &str = "websocket:shutdown";

/// Names of the two keys shared by the fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKeys {
    pub counter_key: String,
    pub shutdown_key: String,
}

impl Default for StoreKeys {
    fn default() -> Self {
        Self {
            counter_key: DEFAULT_COUNTER_KEY.to_string(),
            shutdown_key: DEFAULT_SHUTDOWN_KEY.to_string(),
        }
    }
}

/// # Counter Store
///
/// An atomic, non-negative integer shared by all workers. It holds the sum of the
/// workers' local registry sizes.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically adds one and returns the new total.
    async fn incr(&self) -> Result<i64, StoreError>;

    /// Atomically subtracts one, resetting the value to zero if the decrement took it
    /// below zero. Returns the resulting total.
    async fn decr_clamped(&self) -> Result<i64, StoreError>;

    /// Returns the current total; a missing key reads as zero.
    async fn get(&self) -> Result<i64, StoreError>;
}

/// # Flag Store
///
/// The shared shutdown flag. Once set it stays set until the next generation of the
/// fleet clears it at startup.
#[async_trait]
pub trait FlagStore: Send + Sync {
    /// Sets the flag. Setting it again is a no-op.
    async fn set(&self) -> Result<(), StoreError>;

    /// True only while the flag holds the value `set` wrote.
    async fn is_set(&self) -> Result<bool, StoreError>;

    /// Removes a flag left behind by a previous generation.
    async fn clear(&self) -> Result<(), StoreError>;
}
