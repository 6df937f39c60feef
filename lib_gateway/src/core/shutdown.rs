//! # Fleet Shutdown Coordinator
//!
//! One instance per worker. It turns a single fleet-wide decision (the shared
//! shutdown flag) into a bounded, per-worker drain.
//!
//! ## Phases
//!
//! `Running → ShuttingDown → (Drained | TimedOut) → Stopped`, forward only.
//!
//! - **Running**: a monitor task polls the shared flag every `flag_poll_interval`.
//!   When it reads "set", the worker's local shutdown token is cancelled. Every
//!   local component (notifier, WebSocket upgrades, the HTTP server) watches that
//!   token.
//! - **ShuttingDown**: [`ShutdownCoordinator::drain`] stops the periodic notifier,
//!   then polls the *fleet* counter every `drain_poll_interval` until it reads zero
//!   or the deadline passes. Waiting on the fleet total instead of the local size
//!   keeps a worker with no clients from finishing while its peers still drain.
//! - **Drained / TimedOut**: whichever way the wait ended, the registry is sealed and
//!   every connection still in it is force-closed with [`SHUTDOWN_CLOSE_CODE`].
//! - **Stopped**: the monitor is gone and the `stopped` token is cancelled.
//!
//! Any worker may publish the flag through [`ShutdownCoordinator::signal_shutdown`];
//! publishing it twice is harmless. The flag is only cleared by the next generation
//! at startup ([`ShutdownCoordinator::clear_stale_signal`]).

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::connections::store::{CounterStore, FlagStore};
use crate::core::connection::{SHUTDOWN_CLOSE_CODE, SHUTDOWN_CLOSE_REASON};
use crate::core::notifier::NotifierHandle;
use crate::core::registry::Registry;
use crate::error::StoreError;

/// Timing knobs for the shutdown protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownSettings {
    /// Grace period between the start of the drain and the forced close.
    pub timeout: Duration,
    /// How often the monitor reads the shared flag.
    pub flag_poll_interval: Duration,
    /// How often the drain loop reads the fleet counter.
    pub drain_poll_interval: Duration,
    /// Upper bound on each step of the final sweep (stopping the notifier, closing
    /// one client, one counter decrement).
    pub close_grace: Duration,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1800),
            flag_poll_interval: Duration::from_secs(1),
            drain_poll_interval: Duration::from_secs(5),
            close_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShutdownPhase {
    Running,
    ShuttingDown,
    Drained,
    TimedOut,
    Stopped,
}

impl ShutdownPhase {
    fn rank(self) -> u8 {
        match self {
            ShutdownPhase::Running => 0,
            ShutdownPhase::ShuttingDown => 1,
            ShutdownPhase::Drained | ShutdownPhase::TimedOut => 2,
            ShutdownPhase::Stopped => 3,
        }
    }

    /// Whether moving from `self` to `next` goes forward.
    pub fn can_advance_to(self, next: ShutdownPhase) -> bool {
        next.rank() > self.rank()
    }
}

impl fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why the drain wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DrainOutcome {
    /// The fleet counter read zero before the deadline.
    Drained,
    /// The deadline passed with connections still counted.
    TimedOut,
}

impl From<DrainOutcome> for ShutdownPhase {
    fn from(outcome: DrainOutcome) -> Self {
        match outcome {
            DrainOutcome::Drained => ShutdownPhase::Drained,
            DrainOutcome::TimedOut => ShutdownPhase::TimedOut,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub outcome: DrainOutcome,
    /// Local connections closed by the server after the wait.
    pub force_closed: usize,
    /// Time spent between the start of the drain and the end of the forced close.
    pub elapsed: Duration,
}

pub struct ShutdownCoordinator {
    settings: ShutdownSettings,
    counter: Arc<dyn CounterStore>,
    flags: Arc<dyn FlagStore>,
    registry: Arc<Registry>,
    /// In-process shutdown signal: one writer (this coordinator), many readers.
    local: CancellationToken,
    stopped: CancellationToken,
    phase: watch::Sender<ShutdownPhase>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    report: OnceCell<ShutdownReport>,
}

impl ShutdownCoordinator {
    pub fn new(
        settings: ShutdownSettings,
        counter: Arc<dyn CounterStore>,
        flags: Arc<dyn FlagStore>,
        registry: Arc<Registry>,
    ) -> Self {
        let (phase, _) = watch::channel(ShutdownPhase::Running);
        Self {
            settings,
            counter,
            flags,
            registry,
            local: CancellationToken::new(),
            stopped: CancellationToken::new(),
            phase,
            monitor: Mutex::new(None),
            report: OnceCell::new(),
        }
    }

    pub fn settings(&self) -> &ShutdownSettings {
        &self.settings
    }

    /// The worker's local shutdown signal. Cancelled once, never reset.
    pub fn local_signal(&self) -> CancellationToken {
        self.local.clone()
    }

    /// Cancelled when the coordinator reaches [`ShutdownPhase::Stopped`].
    pub fn stopped(&self) -> CancellationToken {
        self.stopped.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.local.is_cancelled()
    }

    pub fn phase(&self) -> ShutdownPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<ShutdownPhase> {
        self.phase.subscribe()
    }

    fn advance(&self, next: ShutdownPhase) {
        let moved = self.phase.send_if_modified(|current| {
            if current.can_advance_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });
        if moved {
            log::info!("Shutdown phase -> {}", next);
        }
    }

    /// Removes a flag left over from a previous generation. Call once at startup,
    /// before the monitor runs.
    pub async fn clear_stale_signal(&self) -> Result<(), StoreError> {
        self.flags.clear().await?;
        log::info!("Cleared stale shutdown flag.");
        Ok(())
    }

    /// # Signal Shutdown
    ///
    /// Publishes the fleet-wide shutdown flag and starts the local shutdown right away
    /// instead of waiting for the next monitor poll. The local shutdown starts even
    /// when the flag cannot be written; the store error is still returned.
    pub async fn signal_shutdown(&self) -> Result<(), StoreError> {
        let published = self.flags.set().await;
        match &published {
            Ok(()) => log::info!("Fleet shutdown flag published."),
            Err(e) => log::error!("Could not publish the fleet shutdown flag: {}", e),
        }
        self.begin_local_shutdown();
        published
    }

    /// Cancels the local signal and enters `ShuttingDown`. Repeated calls are no-ops.
    pub fn begin_local_shutdown(&self) {
        self.advance(ShutdownPhase::ShuttingDown);
        if !self.local.is_cancelled() {
            log::warn!("Shutdown signal received. Waiting for connections to close...");
            self.local.cancel();
        }
    }

    /// # Spawn Monitor
    ///
    /// Starts the background task polling the shared flag. The first read happens
    /// immediately; later reads are `flag_poll_interval` apart. A failed read is
    /// logged and retried on the next tick. The task ends once the local signal is
    /// cancelled, whoever cancelled it.
    pub fn spawn_monitor(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match this.flags.is_set().await {
                    Ok(true) => {
                        log::info!("Fleet shutdown flag observed.");
                        this.begin_local_shutdown();
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => log::warn!("Shutdown flag poll failed: {}", e),
                }

                tokio::select! {
                    _ = this.local.cancelled() => break,
                    _ = tokio::time::sleep(this.settings.flag_poll_interval) => {}
                }
            }
        });

        let previous = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// # Drain
    ///
    /// Runs the shutdown to completion and returns its report:
    ///
    /// 1.  Enters `ShuttingDown` (if the monitor has not already).
    /// 2.  Stops the periodic notifier and waits up to `close_grace` for it.
    /// 3.  Polls the fleet counter until it reads zero or `timeout` elapses. Each
    ///     read is itself bounded by the deadline, so the wait never outlives
    ///     `timeout` by more than one poll interval.
    /// 4.  Seals the registry and force-closes whatever is left in it, for both
    ///     outcomes. Each close is bounded by `close_grace`, so an unresponsive
    ///     client cannot hold the worker in `ShuttingDown`.
    /// 5.  Releases the monitor and enters `Stopped`.
    ///
    /// Only the first call does the work; later calls return the same report.
    pub async fn drain(&self, notifier: Option<NotifierHandle>) -> ShutdownReport {
        *self.report.get_or_init(|| self.run_drain(notifier)).await
    }

    async fn run_drain(&self, notifier: Option<NotifierHandle>) -> ShutdownReport {
        self.begin_local_shutdown();
        let started = Instant::now();

        if let Some(notifier) = notifier {
            notifier.stop(self.settings.close_grace).await;
        }

        let deadline = started + self.settings.timeout;
        let outcome = self.wait_for_fleet(deadline).await;
        match outcome {
            DrainOutcome::Drained => {
                log::info!("All connections closed across the fleet. Shutting down...")
            }
            DrainOutcome::TimedOut => log::warn!(
                "Shutdown timeout of {:?} reached with connections still open. Forcing shutdown...",
                self.settings.timeout
            ),
        }

        let force_closed = self
            .registry
            .force_close_all(SHUTDOWN_CLOSE_CODE, SHUTDOWN_CLOSE_REASON, self.settings.close_grace)
            .await;
        self.advance(outcome.into());

        self.release();
        let report = ShutdownReport {
            outcome,
            force_closed,
            elapsed: started.elapsed(),
        };
        log::info!(
            "Server shut down complete ({:?}, {} force-closed, {:?}).",
            report.outcome,
            report.force_closed,
            report.elapsed
        );
        report
    }

    async fn wait_for_fleet(&self, deadline: Instant) -> DrainOutcome {
        loop {
            match tokio::time::timeout_at(deadline, self.counter.get()).await {
                Ok(Ok(total)) if total <= 0 => return DrainOutcome::Drained,
                Ok(Ok(total)) => {
                    log::info!("Waiting for {} connection(s) across the fleet to close...", total)
                }
                Ok(Err(e)) => log::warn!("Fleet counter read failed, still waiting: {}", e),
                Err(_) => return DrainOutcome::TimedOut,
            }

            let now = Instant::now();
            if now >= deadline {
                return DrainOutcome::TimedOut;
            }
            tokio::time::sleep_until((now + self.settings.drain_poll_interval).min(deadline)).await;
        }
    }

    fn release(&self) {
        if let Some(monitor) = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            monitor.abort();
        }
        self.advance(ShutdownPhase::Stopped);
        self.stopped.cancel();
    }
}
