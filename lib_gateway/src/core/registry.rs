//! # Local Connection Registry
//!
//! The set of connections held by this worker, mirrored onto the fleet counter.
//!
//! The map is guarded by a plain `std::sync::Mutex` that is never held across an
//! `.await`. A mutation and the store call that mirrors it are therefore two separate
//! steps, and another task may run in between; the clamped decrement on the store
//! side is what keeps the counter sane when that happens.
//!
//! [`Registry::force_close_all`] seals the registry. From then on `connect` refuses
//! new handles, and a connect whose increment was still in flight during the sweep
//! undoes itself instead of being left open.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;

use crate::connections::store::CounterStore;
use crate::core::connection::{Connection, ConnectionId};
use crate::error::{GatewayError, StoreError};

#[derive(Default)]
struct Entries {
    connections: HashMap<ConnectionId, Arc<dyn Connection>>,
    /// Registered locally, counter increment not yet answered.
    pending: HashSet<ConnectionId>,
    sealed: bool,
}

pub struct Registry {
    entries: Mutex<Entries>,
    counter: Arc<dyn CounterStore>,
}

impl Registry {
    pub fn new(counter: Arc<dyn CounterStore>) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            counter,
        }
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// # Connect
    ///
    /// Registers an already-accepted connection and increments the fleet counter.
    ///
    /// If the increment fails the connection is taken out of the local set again, so
    /// the local size never runs ahead of what this worker has reported. Once the
    /// registry is sealed the handle is refused with [`GatewayError::ShuttingDown`]
    /// and the counter is left untouched. The caller closes the connection in both
    /// cases.
    pub async fn connect(&self, conn: Arc<dyn Connection>) -> Result<(), GatewayError> {
        let id = conn.id();
        let local = {
            let mut entries = self.entries();
            if entries.sealed {
                log::warn!("Client {} refused, registry already sealed", id);
                return Err(GatewayError::ShuttingDown);
            }
            entries.connections.insert(id, conn);
            entries.pending.insert(id);
            entries.connections.len()
        };

        let incremented = self.counter.incr().await;
        let (sealed, still_held) = {
            let mut entries = self.entries();
            entries.pending.remove(&id);
            let sealed = entries.sealed;
            let still_held = match (&incremented, sealed) {
                (Ok(_), false) => true,
                _ => entries.connections.remove(&id).is_some(),
            };
            (sealed, still_held)
        };

        match incremented {
            Ok(total) if !sealed => {
                log::info!(
                    "Client {} connected. Local connections: {}, fleet total: {}",
                    id,
                    local,
                    total
                );
                Ok(())
            }
            Ok(_) => {
                // Sealed while the increment was in flight; the sweep skipped this entry.
                if still_held {
                    if let Err(e) = self.counter.decr_clamped().await {
                        log::error!("Counter rollback for late client {} failed: {}", id, e);
                    }
                }
                log::warn!("Client {} refused, registry sealed during connect", id);
                Err(GatewayError::ShuttingDown)
            }
            Err(e) => {
                log::error!("Client {} rejected, counter increment failed: {}", id, e);
                Err(e.into())
            }
        }
    }

    /// # Disconnect
    ///
    /// Removes a connection and decrements the fleet counter (clamped at zero).
    ///
    /// Idempotent: an id that is not registered (never connected, or already removed
    /// by a failed broadcast or a forced close) touches neither the map nor the
    /// counter. Returns whether anything was removed.
    pub async fn disconnect(&self, id: ConnectionId) -> Result<bool, StoreError> {
        let removed = self.entries().connections.remove(&id);
        if removed.is_none() {
            log::debug!("Client {} already gone from the registry", id);
            return Ok(false);
        }

        match self.counter.decr_clamped().await {
            Ok(total) => {
                log::info!(
                    "Client {} disconnected. Local connections: {}, fleet total: {}",
                    id,
                    self.size(),
                    total
                );
                Ok(true)
            }
            Err(e) => {
                log::error!("Client {} removed locally but counter decrement failed: {}", id, e);
                Err(e)
            }
        }
    }

    /// Number of connections held by this worker. Never the fleet total.
    pub fn size(&self) -> usize {
        self.entries().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().connections.is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries().connections.contains_key(&id)
    }

    pub fn is_sealed(&self) -> bool {
        self.entries().sealed
    }

    /// Copy of the current handles, safe to iterate while the registry changes.
    pub fn snapshot(&self) -> Vec<Arc<dyn Connection>> {
        self.entries().connections.values().cloned().collect()
    }

    /// The fleet-wide total, read from the shared counter.
    pub async fn global_total(&self) -> Result<i64, StoreError> {
        self.counter.get().await
    }

    /// # Force Close All
    ///
    /// Seals the registry, empties it, and closes every handle that was in it with
    /// the given code and reason. The closes run concurrently. Each close and each
    /// counter decrement is bounded by `grace`: a peer that never acknowledges is
    /// abandoned with a warning and still decremented. Returns how many handles were
    /// removed.
    pub async fn force_close_all(&self, code: u16, reason: &str, grace: Duration) -> usize {
        let drained: Vec<Arc<dyn Connection>> = {
            let mut entries = self.entries();
            entries.sealed = true;
            let settled: Vec<ConnectionId> = entries
                .connections
                .keys()
                .filter(|id| !entries.pending.contains(*id))
                .copied()
                .collect();
            settled
                .iter()
                .filter_map(|id| entries.connections.remove(id))
                .collect()
        };

        join_all(drained.iter().map(|conn| self.close_one(conn, code, reason, grace))).await;

        if !drained.is_empty() {
            log::warn!("Force-closed {} local connection(s) ({} {})", drained.len(), code, reason);
        }
        drained.len()
    }

    async fn close_one(&self, conn: &Arc<dyn Connection>, code: u16, reason: &str, grace: Duration) {
        match tokio::time::timeout(grace, conn.close(code, reason)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Force-close of client {} failed: {}", conn.id(), e),
            Err(_) => log::warn!(
                "Client {} did not take the close frame within {:?}, abandoning it",
                conn.id(),
                grace
            ),
        }
        match tokio::time::timeout(grace, self.counter.decr_clamped()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                log::error!("Counter decrement for force-closed client {} failed: {}", conn.id(), e)
            }
            Err(_) => log::error!(
                "Counter decrement for force-closed client {} timed out after {:?}",
                conn.id(),
                grace
            ),
        }
    }
}
