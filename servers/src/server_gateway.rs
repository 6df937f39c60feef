//! # Realtime Gateway Worker
//!
//! One worker process of a broadcast WebSocket gateway. Any number of identical
//! workers run side by side (optionally on one port with `SO_REUSEPORT`) and share
//! a Redis instance holding the fleet connection counter and the shutdown flag.
//!
//! ## Lifecycle
//!
//! 1.  **Startup**: configuration, logging, Redis, then the per-worker registry,
//!     dispatcher and shutdown coordinator. A shutdown flag left by the previous
//!     generation is cleared.
//! 2.  **Running**: the HTTP/WebSocket server, the periodic notifier and the flag
//!     monitor run concurrently.
//! 3.  **Shutdown**: SIGINT/SIGTERM on any worker publishes the fleet flag; every
//!     worker observes it, stops notifying, waits for the fleet counter to reach zero
//!     (or the timeout), force-closes what is left and exits.

use anyhow::{Context, Result};
use lib_gateway::{
    CounterStore, Dispatcher, FlagStore, PeriodicNotifier, RedisStore, Registry,
    ShutdownCoordinator,
};
use std::sync::Arc;
use tokio::signal;

mod gateway_logic;
use gateway_logic::{config, downstream, logger, state};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let settings = config::load_config()?;
    let log_path = logger::setup_logging(&settings.log_dir, &settings.log_level, settings.log_keep)?;
    log::info!("Worker {} logging to {}", std::process::id(), log_path.display());

    if settings.tls.is_some() {
        // Explicitly install the default crypto provider for rustls
        let _ = rustls::crypto::ring::default_provider().install_default();
    }

    let store = RedisStore::connect(&settings.redis_url, settings.keys.clone())
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", settings.redis_url))?;
    let store = Arc::new(store);
    let counter: Arc<dyn CounterStore> = store.clone();
    let flags: Arc<dyn FlagStore> = store;

    let registry = Arc::new(Registry::new(counter.clone()));
    let dispatcher = Arc::new(Dispatcher::new(registry.clone()));
    let coordinator = Arc::new(ShutdownCoordinator::new(
        settings.shutdown.clone(),
        counter,
        flags,
        registry.clone(),
    ));

    if settings.clear_stale_shutdown {
        if let Err(e) = coordinator.clear_stale_signal().await {
            log::warn!("Could not clear a stale shutdown flag: {}", e);
        }
    }
    coordinator.spawn_monitor();

    let notifier = PeriodicNotifier::new(
        dispatcher.clone(),
        registry.clone(),
        settings.notification_interval,
        coordinator.local_signal(),
    )
    .spawn();

    let app_state = state::AppState::new(
        registry,
        dispatcher,
        coordinator.clone(),
        settings.relay_inbound,
    );
    let stopped = coordinator.stopped();
    let server_settings = settings.clone();
    let mut server = tokio::spawn(async move {
        downstream::run(&server_settings, app_state, stopped).await
    });

    let local = coordinator.local_signal();
    let mut server_finished = false;
    tokio::select! {
        _ = shutdown_signal() => {
            log::info!("Termination signal received, publishing fleet shutdown.");
            if let Err(e) = coordinator.signal_shutdown().await {
                log::error!("Continuing with a local-only shutdown: {}", e);
            }
        }
        _ = local.cancelled() => {
            log::info!("Fleet shutdown requested by another worker.");
        }
        result = &mut server => {
            server_finished = true;
            match result {
                Ok(Ok(())) => log::error!("Gateway server stopped unexpectedly."),
                Ok(Err(e)) => log::error!("Gateway server failed: {:#}", e),
                Err(e) => log::error!("Gateway server task failed: {}", e),
            }
        }
    }

    let report = coordinator.drain(Some(notifier)).await;
    log::info!(
        "Drain finished: {:?}, {} force-closed in {:?}",
        report.outcome,
        report.force_closed,
        report.elapsed
    );

    if !server_finished {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("Gateway server failed during shutdown: {:#}", e),
            Err(e) => log::error!("Gateway server task failed: {}", e),
        }
    }

    log::info!("Shutdown complete.");
    Ok(())
}

/// Resolves on Ctrl-C, or on SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
