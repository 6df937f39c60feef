#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lib_gateway::core::connection::{next_connection_id, StateCell};
use lib_gateway::{
    Connection, ConnectionError, ConnectionId, ConnectionState, CounterStore, Dispatcher,
    FlagStore, MemoryStore, Registry, ShutdownCoordinator, ShutdownSettings,
};

/// A client handle that records what it was sent and how it was closed.
pub struct FakeConnection {
    id: ConnectionId,
    state: StateCell,
    fail_sends: AtomicBool,
    sent: Mutex<Vec<String>>,
    closed_with: Mutex<Option<(u16, String)>>,
}

impl FakeConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: next_connection_id(),
            state: StateCell::new(),
            fail_sends: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            closed_with: Mutex::new(None),
        })
    }

    /// A peer whose every send fails, like a socket whose remote end vanished.
    pub fn broken() -> Arc<Self> {
        let conn = Self::new();
        conn.fail_sends.store(true, Ordering::SeqCst);
        conn
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn closed_with(&self) -> Option<(u16, String)> {
        self.closed_with.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connection for FakeConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    async fn send_text(&self, text: &str) -> Result<(), ConnectionError> {
        tokio::task::yield_now().await;
        if self.fail_sends.load(Ordering::SeqCst) || self.state.get() != ConnectionState::Open {
            return Err(ConnectionError::Send {
                id: self.id,
                reason: "peer gone".to_string(),
            });
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), ConnectionError> {
        if !self.state.begin_closing() {
            return Ok(());
        }
        *self.closed_with.lock().unwrap() = Some((code, reason.to_string()));
        self.state.mark_closed();
        Ok(())
    }
}

/// A peer that stopped reading: every send and close waits forever.
pub struct StuckConnection {
    id: ConnectionId,
}

impl StuckConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: next_connection_id(),
        })
    }
}

#[async_trait]
impl Connection for StuckConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::Open
    }

    async fn send_text(&self, _text: &str) -> Result<(), ConnectionError> {
        std::future::pending().await
    }

    async fn close(&self, _code: u16, _reason: &str) -> Result<(), ConnectionError> {
        std::future::pending().await
    }
}

/// One simulated worker process sharing `store` with its peers.
pub struct Worker {
    pub registry: Arc<Registry>,
    pub dispatcher: Arc<Dispatcher>,
    pub coordinator: Arc<ShutdownCoordinator>,
}

impl Worker {
    pub fn new(store: &Arc<MemoryStore>, settings: ShutdownSettings) -> Self {
        let counter: Arc<dyn CounterStore> = store.clone();
        let flags: Arc<dyn FlagStore> = store.clone();
        let registry = Arc::new(Registry::new(counter.clone()));
        let dispatcher = Arc::new(Dispatcher::new(registry.clone()));
        let coordinator = Arc::new(ShutdownCoordinator::new(
            settings,
            counter,
            flags,
            registry.clone(),
        ));
        Self {
            registry,
            dispatcher,
            coordinator,
        }
    }

    pub async fn accept(&self) -> Arc<FakeConnection> {
        let conn = FakeConnection::new();
        self.registry.connect(conn.clone()).await.unwrap();
        conn
    }
}

pub fn settings(timeout_secs: u64) -> ShutdownSettings {
    ShutdownSettings {
        timeout: Duration::from_secs(timeout_secs),
        flag_poll_interval: Duration::from_millis(500),
        drain_poll_interval: Duration::from_secs(1),
        close_grace: Duration::from_secs(1),
    }
}
