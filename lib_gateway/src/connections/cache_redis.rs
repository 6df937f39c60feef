//! # Redis Store Implementation
//!
//! Provides the async Redis wrapper behind the fleet counter and shutdown flag.
//! A single `ConnectionManager` is shared by all callers of one worker; it
//! reconnects on its own after transient failures.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};

use crate::connections::store::{CounterStore, FlagStore, StoreKeys};
use crate::error::StoreError;

/// DECR followed by a reset to zero when the result went negative. Runs as one
/// script so no other client can observe the negative intermediate value.
const DECR_CLAMPED_LUA: &str = r"
local value = redis.call('DECR', KEYS[1])
if value < 0 then
    redis.call('SET', KEYS[1], 0)
    return 0
end
return value
";

/// Value written by [`FlagStore::set`].
const FLAG_RAISED: &str = "1";

/// Only the exact value `set` writes counts. A key holding anything else (an
/// operator typing `SET websocket:shutdown 0`, say) reads as not raised.
fn flag_raised(value: Option<&str>) -> bool {
    value == Some(FLAG_RAISED)
}

/// A handler for the shared counter and shutdown flag kept in Redis.
#[derive(Clone)]
pub struct RedisStore {
    /// Multiplexed, auto-reconnecting connection shared by every clone.
    conn: ConnectionManager,
    keys: StoreKeys,
    decr_script: Script,
}

impl RedisStore {
    /// Opens a managed connection to the Redis server.
    ///
    /// # Arguments
    /// * `url` - The redis URL (e.g., "redis://127.0.0.1/").
    /// * `keys` - Names of the counter and shutdown keys.
    pub async fn connect(url: &str, keys: StoreKeys) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        log::info!(
            "Connected to Redis (counter key '{}', shutdown key '{}')",
            keys.counter_key,
            keys.shutdown_key
        );
        Ok(Self {
            conn,
            keys,
            decr_script: Script::new(DECR_CLAMPED_LUA),
        })
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn incr(&self) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let total: i64 = conn.incr(&self.keys.counter_key, 1i64).await?;
        Ok(total)
    }

    async fn decr_clamped(&self) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let total: i64 = self
            .decr_script
            .key(&self.keys.counter_key)
            .invoke_async(&mut conn)
            .await?;
        Ok(total)
    }

    async fn get(&self) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let total: Option<i64> = conn.get(&self.keys.counter_key).await?;
        Ok(total.unwrap_or(0).max(0))
    }
}

#[async_trait]
impl FlagStore for RedisStore {
    async fn set(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(&self.keys.shutdown_key, FLAG_RAISED).await?;
        Ok(())
    }

    async fn is_set(&self) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(&self.keys.shutdown_key).await?;
        Ok(flag_raised(value.as_deref()))
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(&self.keys.shutdown_key).await?;
        Ok(())
    }
}
