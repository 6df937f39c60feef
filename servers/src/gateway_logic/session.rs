//! # WebSocket Session
//!
//! Bridges one axum `WebSocket` onto the library's [`Connection`] contract and runs
//! the per-client receive loop.
//!
//! The socket is split: the write half lives inside [`WsConnection`] (shared with the
//! registry, the dispatcher and the shutdown coordinator), the read half is owned by
//! the session loop. A server-side close cancels the connection's `closed` token so
//! the loop stops reading without waiting for the client.

use crate::gateway_logic::state::AppState;
use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use lib_gateway::core::connection::{
    next_connection_id, StateCell, INTERNAL_ERROR_CLOSE_CODE, SHUTDOWN_CLOSE_CODE,
    SHUTDOWN_CLOSE_REASON,
};
use lib_gateway::{Connection, ConnectionError, ConnectionId, ConnectionState, GatewayError};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub struct WsConnection {
    id: ConnectionId,
    state: StateCell,
    sink: Mutex<SplitSink<WebSocket, Message>>,
    closed: CancellationToken,
}

impl WsConnection {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            id: next_connection_id(),
            state: StateCell::new(),
            sink: Mutex::new(sink),
            closed: CancellationToken::new(),
        }
    }

    /// Cancelled once the server starts closing this connection.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}

#[async_trait]
impl Connection for WsConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    async fn send_text(&self, text: &str) -> Result<(), ConnectionError> {
        if self.state.get() != ConnectionState::Open {
            return Err(ConnectionError::Closed(self.id));
        }
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.to_string().into()))
            .await
            .map_err(|e| ConnectionError::Send {
                id: self.id,
                reason: e.to_string(),
            })
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), ConnectionError> {
        if !self.state.begin_closing() {
            return Ok(());
        }
        self.closed.cancel();

        let frame = CloseFrame {
            code,
            reason: reason.to_string().into(),
        };
        let result = {
            let mut sink = self.sink.lock().await;
            sink.send(Message::Close(Some(frame))).await
        };
        self.state.mark_closed();

        result.map_err(|e| ConnectionError::Send {
            id: self.id,
            reason: e.to_string(),
        })
    }
}

/// # Handle Socket
///
/// Full lifetime of one client on this worker:
///
/// 1.  Registers the connection (incrementing the fleet counter). If the counter
///     cannot be incremented the client is closed with 1011; if the registry was
///     already sealed by the shutdown sweep it is closed with 1001. Either way it
///     never enters the registry.
/// 2.  Runs the receive loop on its own task so a panic inside it is contained.
/// 3.  Tears down through `disconnect`, which is a no-op if a failed broadcast or the
///     shutdown sweep already removed the connection.
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, stream) = socket.split();
    let conn = Arc::new(WsConnection::new(sink));
    let id = conn.id();

    if let Err(e) = state.registry.connect(conn.clone()).await {
        let (code, reason) = match &e {
            GatewayError::ShuttingDown => (SHUTDOWN_CLOSE_CODE, SHUTDOWN_CLOSE_REASON),
            GatewayError::Store(_) => (INTERNAL_ERROR_CLOSE_CODE, "Server error"),
        };
        log::warn!("Closing client {}: {}", id, e);
        if let Err(e) = conn.close(code, reason).await {
            log::debug!("Close of rejected client {} failed: {}", id, e);
        }
        return;
    }

    let session = tokio::spawn(run_session(conn.clone(), stream, state.clone()));
    if let Err(e) = session.await {
        if e.is_panic() {
            log::error!("Session of client {} panicked: {}", id, e);
        } else {
            log::warn!("Session of client {} was cancelled: {}", id, e);
        }
        if let Err(e) = conn.close(INTERNAL_ERROR_CLOSE_CODE, "Server error").await {
            log::debug!("Close of failed client {} failed: {}", id, e);
        }
    }

    if let Err(e) = state.registry.disconnect(id).await {
        log::error!("Disconnect of client {} not counted: {}", id, e);
    }
}

async fn run_session(conn: Arc<WsConnection>, mut stream: SplitStream<WebSocket>, state: AppState) {
    let id = conn.id();
    let closed = conn.closed();

    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    log::debug!("Client {} sent: {}", id, text.as_str());
                    if let Err(e) = conn.send_text(&format!("Echo: {}", text.as_str())).await {
                        log::warn!("{}", e);
                        break;
                    }
                    if state.relay_inbound {
                        state
                            .dispatcher
                            .broadcast(&format!("Notification: {}", text.as_str()))
                            .await;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let e = ConnectionError::Receive { id, reason: e.to_string() };
                    log::warn!("{}", e);
                    break;
                }
            },
        }
    }
}
