//! # Core Gateway Module
//!
//! The per-worker half of the gateway. Everything in here is owned by exactly one
//! worker process; the cross-worker view is only ever read through the store
//! capabilities in `crate::connections`.
//!
//! ## Core Components:
//!
//! - **`connection`**: the contract a transport-level client handle must satisfy, and
//!   its `Open → Closing → Closed` state.
//!
//! - **`registry`**: the local set of open connections. Every insertion and removal is
//!   mirrored onto the fleet counter.
//!
//! - **`dispatcher`**: fans a text message out to a snapshot of the registry, dropping
//!   connections whose send fails.
//!
//! - **`notifier`**: the background task broadcasting a timestamped notification on a
//!   fixed interval until the worker starts shutting down.
//!
//! - **`shutdown`**: the coordinator that turns the shared flag into a local shutdown,
//!   waits for the fleet to drain, and force-closes what is left.

/// Client handle contract and connection state.
pub mod connection;
/// Local connection registry mirrored onto the fleet counter.
pub mod registry;
/// Snapshot-based broadcaster.
pub mod dispatcher;
/// Fixed-interval notification task.
pub mod notifier;
/// Fleet shutdown state machine.
pub mod shutdown;

// --- Public API Re-exports ---
pub use connection::{Connection, ConnectionId, ConnectionState};
pub use registry::Registry;
pub use dispatcher::{BroadcastReport, Dispatcher};
pub use notifier::{NotifierHandle, PeriodicNotifier};
pub use shutdown::{DrainOutcome, ShutdownCoordinator, ShutdownPhase, ShutdownReport, ShutdownSettings};
