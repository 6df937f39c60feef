//! # Periodic Notifier
//!
//! A self-scheduling background task: sleep for a fixed interval, wake up, and if the
//! worker still holds clients, broadcast a timestamped notification to them.
//!
//! The task ends on either of two signals:
//! - the worker-wide shutdown token (set when the fleet flag is observed), or
//! - its own stop token, used by the shutdown coordinator through [`NotifierHandle`].
//!
//! Being woken out of the sleep by either token is a normal exit. A broadcast that
//! panics is logged and the loop carries on.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::dispatcher::Dispatcher;
use crate::core::registry::Registry;

/// Builds the periodic message for the given wall-clock time.
pub fn notification_message(now: DateTime<Local>) -> String {
    format!("Notification at {}", now.format("%Y-%m-%d %H:%M:%S"))
}

pub struct PeriodicNotifier {
    dispatcher: Arc<Dispatcher>,
    registry: Arc<Registry>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl PeriodicNotifier {
    /// # Arguments
    /// * `interval` - Sleep between two wake-ups.
    /// * `shutdown` - The worker's local shutdown signal.
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        registry: Arc<Registry>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            dispatcher,
            registry,
            interval,
            shutdown,
        }
    }

    /// Starts the loop on the runtime and returns the handle used to stop it.
    pub fn spawn(self) -> NotifierHandle {
        let stop = CancellationToken::new();
        let task = tokio::spawn(self.run(stop.clone()));
        NotifierHandle { stop, task }
    }

    async fn run(self, stop: CancellationToken) {
        log::info!("Periodic notifier started (every {:?}).", self.interval);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            if self.shutdown.is_cancelled() || stop.is_cancelled() {
                break;
            }
            if self.registry.is_empty() {
                continue;
            }

            let message = notification_message(Local::now());
            match AssertUnwindSafe(self.dispatcher.broadcast(&message))
                .catch_unwind()
                .await
            {
                Ok(report) => log::info!("Sent notification to {} client(s)", report.delivered),
                Err(_) => log::error!("Periodic broadcast panicked; notifier keeps running."),
            }
        }

        log::info!("Periodic notifier stopped.");
    }
}

/// Handle to a running [`PeriodicNotifier`].
pub struct NotifierHandle {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl NotifierHandle {
    /// Asks the loop to stop and waits up to `grace` for it to finish. A loop still
    /// busy after that (a broadcast stuck on a peer) is aborted. Cancellation of the
    /// task is treated as a normal stop.
    pub async fn stop(mut self, grace: Duration) {
        self.stop.cancel();
        let finished = match tokio::time::timeout(grace, &mut self.task).await {
            Ok(finished) => finished,
            Err(_) => {
                log::warn!("Periodic notifier still busy after {:?}, aborting it.", grace);
                self.task.abort();
                (&mut self.task).await
            }
        };
        match finished {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => log::error!("Periodic notifier ended abnormally: {}", e),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn message_carries_the_timestamp() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(notification_message(at), "Notification at 2024-03-09 14:05:07");
    }
}
