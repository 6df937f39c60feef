//! # Connection Handle
//!
//! The registry does not know about sockets. It stores anything implementing
//! [`Connection`]: something with an id that can send a text frame and be closed with
//! a close code and reason.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use async_trait::async_trait;

use crate::error::ConnectionError;

/// Worker-local identifier of a client connection.
pub type ConnectionId = u64;

/// WebSocket "going away" code used when the server force-closes at shutdown.
pub const SHUTDOWN_CLOSE_CODE: u16 = 1001;
/// Reason sent alongside [`SHUTDOWN_CLOSE_CODE`].
pub const SHUTDOWN_CLOSE_REASON: &str = "Server shutting down";
/// WebSocket "internal error" code used when a connection cannot be accounted for.
pub const INTERNAL_ERROR_CLOSE_CODE: u16 = 1011;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Hands out a fresh id, unique within this process.
pub fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// # Connection
///
/// A live bidirectional channel to one client, owned by the worker that accepted it.
#[async_trait]
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;

    fn state(&self) -> ConnectionState;

    /// Sends one text frame. An error means the peer should be treated as dead.
    async fn send_text(&self, text: &str) -> Result<(), ConnectionError>;

    /// Closes the connection from the server side. Closing twice is a no-op.
    async fn close(&self, code: u16, reason: &str) -> Result<(), ConnectionError>;
}

/// Lock-free holder for a [`ConnectionState`] that only ever moves forward.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    const OPEN: u8 = 0;
    const CLOSING: u8 = 1;
    const CLOSED: u8 = 2;

    pub fn new() -> Self {
        Self(AtomicU8::new(Self::OPEN))
    }

    pub fn get(&self) -> ConnectionState {
        match self.0.load(Ordering::Acquire) {
            Self::OPEN => ConnectionState::Open,
            Self::CLOSING => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    /// Moves `Open → Closing`. Returns `false` if someone else already started closing.
    pub fn begin_closing(&self) -> bool {
        self.0
            .compare_exchange(Self::OPEN, Self::CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn mark_closed(&self) {
        self.0.store(Self::CLOSED, Ordering::Release);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
