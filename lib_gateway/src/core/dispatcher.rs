//! # Broadcast Dispatcher
//!
//! Sends one text message to every connection this worker holds.
//!
//! ## Design Principles:
//!
//! 1.  **Snapshot Iteration**: the registry is copied before the first send. A
//!     connection that fails and deregisters mid-broadcast cannot disturb the loop,
//!     and a connection accepted mid-broadcast simply misses this message.
//!
//! 2.  **Dead Peers Are Pruned**: a failed send marks the connection as dead. It is
//!     routed through `Registry::disconnect` and the error stops there; one bad peer
//!     never aborts delivery to the others.
//!
//! 3.  **Local Only**: there is no relay between workers. A "fleet-wide" broadcast is
//!     every worker broadcasting to its own clients.

use std::sync::Arc;

use serde::Serialize;

use crate::core::registry::Registry;

/// Outcome of a single broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Connections in the snapshot.
    pub attempted: usize,
    /// Successful sends.
    pub delivered: usize,
    /// Connections whose send failed and that were removed from the registry.
    pub dropped: usize,
}

pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// # Broadcast
    ///
    /// Sends `message` to each connection in a snapshot of the registry. Delivery
    /// order across connections is unspecified. Calling it twice sends twice.
    pub async fn broadcast(&self, message: &str) -> BroadcastReport {
        let snapshot = self.registry.snapshot();
        let mut report = BroadcastReport {
            attempted: snapshot.len(),
            ..BroadcastReport::default()
        };

        for conn in snapshot {
            match conn.send_text(message).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.dropped += 1;
                    log::warn!("Error sending message: {}. Dropping client {}.", e, conn.id());
                    if let Err(store_err) = self.registry.disconnect(conn.id()).await {
                        log::error!(
                            "Dropped client {} but could not update the fleet counter: {}",
                            conn.id(),
                            store_err
                        );
                    }
                }
            }
        }

        if report.attempted > 0 {
            log::debug!(
                "Broadcast reached {}/{} client(s), dropped {}",
                report.delivered,
                report.attempted,
                report.dropped
            );
        }
        report
    }
}
