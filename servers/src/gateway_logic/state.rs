use lib_gateway::{Dispatcher, Registry, ShutdownCoordinator};
use std::sync::Arc;

/// Per-worker handles shared by every HTTP and WebSocket handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub dispatcher: Arc<Dispatcher>,
    pub coordinator: Arc<ShutdownCoordinator>,
    // Broadcast each inbound client message to the other local clients
    pub relay_inbound: bool,
}

impl AppState {
    pub fn new(
        registry: Arc<Registry>,
        dispatcher: Arc<Dispatcher>,
        coordinator: Arc<ShutdownCoordinator>,
        relay_inbound: bool,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            coordinator,
            relay_inbound,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.coordinator.is_shutting_down()
    }
}
