//! Error types shared by the store, registry and connection layers.

use thiserror::Error;

use crate::core::connection::ConnectionId;

/// Failures talking to the shared counter / flag store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "redis-store")]
    #[error("Redis command failed: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Failures on a single client connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Failed to send to connection {id}: {reason}")]
    Send { id: ConnectionId, reason: String },
    #[error("Failed to receive from connection {id}: {reason}")]
    Receive { id: ConnectionId, reason: String },
    #[error("Connection {0} is already closed")]
    Closed(ConnectionId),
}

/// Why a connection could not be admitted to the registry.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Worker is shutting down, connection refused")]
    ShuttingDown,
}
