mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{settings, StuckConnection, Worker};
use lib_gateway::core::connection::{SHUTDOWN_CLOSE_CODE, SHUTDOWN_CLOSE_REASON};
use lib_gateway::{
    Connection, CounterStore, DrainOutcome, FlagStore, GatewayError, MemoryStore, PeriodicNotifier,
    ShutdownPhase,
};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn flag_published_by_one_worker_reaches_every_worker() {
    let store = Arc::new(MemoryStore::new());
    let a = Worker::new(&store, settings(10));
    let b = Worker::new(&store, settings(10));
    a.coordinator.spawn_monitor();
    b.coordinator.spawn_monitor();

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!a.coordinator.is_shutting_down());
    assert!(!b.coordinator.is_shutting_down());

    a.coordinator.signal_shutdown().await.unwrap();
    assert!(a.coordinator.is_shutting_down());
    assert_eq!(a.coordinator.phase(), ShutdownPhase::ShuttingDown);

    let poll = b.coordinator.settings().flag_poll_interval;
    tokio::time::sleep(poll + Duration::from_millis(10)).await;
    assert!(b.coordinator.is_shutting_down());
    assert_eq!(b.coordinator.phase(), ShutdownPhase::ShuttingDown);
    assert!(store.is_set().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn signalling_twice_is_harmless() {
    let store = Arc::new(MemoryStore::new());
    let worker = Worker::new(&store, settings(10));

    worker.coordinator.signal_shutdown().await.unwrap();
    worker.coordinator.signal_shutdown().await.unwrap();
    assert_eq!(worker.coordinator.phase(), ShutdownPhase::ShuttingDown);
    assert!(store.is_set().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn local_shutdown_starts_even_when_the_flag_cannot_be_written() {
    let store = Arc::new(MemoryStore::new());
    let worker = Worker::new(&store, settings(10));
    store.set_unavailable(true);

    assert!(worker.coordinator.signal_shutdown().await.is_err());
    assert!(worker.coordinator.is_shutting_down());
}

#[tokio::test(start_paused = true)]
async fn stale_flag_is_cleared_before_monitoring() {
    let store = Arc::new(MemoryStore::new());
    store.set().await.unwrap();
    let worker = Worker::new(&store, settings(10));

    worker.coordinator.clear_stale_signal().await.unwrap();
    worker.coordinator.spawn_monitor();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!worker.coordinator.is_shutting_down());
    assert_eq!(worker.coordinator.phase(), ShutdownPhase::Running);
}

#[tokio::test(start_paused = true)]
async fn empty_fleet_drains_immediately() {
    let store = Arc::new(MemoryStore::new());
    let worker = Worker::new(&store, settings(10));
    let stopped = worker.coordinator.stopped();

    let report = worker.coordinator.drain(None).await;
    assert_eq!(report.outcome, DrainOutcome::Drained);
    assert_eq!(report.force_closed, 0);
    assert!(report.elapsed < Duration::from_secs(1));
    assert_eq!(worker.coordinator.phase(), ShutdownPhase::Stopped);
    assert!(stopped.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn fleet_drains_when_every_client_leaves_before_the_deadline() {
    let store = Arc::new(MemoryStore::new());
    let a = Arc::new(Worker::new(&store, settings(10)));
    let b = Arc::new(Worker::new(&store, settings(10)));

    let mut a_conns = Vec::new();
    for _ in 0..3 {
        a_conns.push(a.accept().await);
    }
    let mut b_conns = Vec::new();
    for _ in 0..2 {
        b_conns.push(b.accept().await);
    }
    assert_eq!(store.get().await.unwrap(), 5);
    let gone = a_conns.remove(0);
    a.registry.disconnect(gone.id()).await.unwrap();
    assert_eq!(store.get().await.unwrap(), 4);

    a.coordinator.spawn_monitor();
    b.coordinator.spawn_monitor();

    let drain_b = {
        let b = Arc::clone(&b);
        tokio::spawn(async move {
            b.coordinator.local_signal().cancelled().await;
            b.coordinator.drain(None).await
        })
    };
    a.coordinator.signal_shutdown().await.unwrap();
    let drain_a = {
        let a = Arc::clone(&a);
        tokio::spawn(async move { a.coordinator.drain(None).await })
    };

    // Clients leave on their own within six seconds.
    let leavers = {
        let (a, b) = (Arc::clone(&a), Arc::clone(&b));
        let a_ids: Vec<u64> = a_conns.iter().map(|c| c.id()).collect();
        let b_ids: Vec<u64> = b_conns.iter().map(|c| c.id()).collect();
        tokio::spawn(async move {
            for id in a_ids {
                tokio::time::sleep(Duration::from_millis(1500)).await;
                a.registry.disconnect(id).await.unwrap();
            }
            for id in b_ids {
                tokio::time::sleep(Duration::from_millis(1000)).await;
                b.registry.disconnect(id).await.unwrap();
            }
        })
    };

    let report_a = drain_a.await.unwrap();
    let report_b = drain_b.await.unwrap();
    leavers.await.unwrap();

    assert_eq!(report_a.outcome, DrainOutcome::Drained);
    assert_eq!(report_b.outcome, DrainOutcome::Drained);
    assert_eq!(report_a.force_closed + report_b.force_closed, 0);
    assert!(report_a.elapsed < Duration::from_secs(10));
    assert_eq!(store.get().await.unwrap(), 0);
    assert_eq!(a.coordinator.phase(), ShutdownPhase::Stopped);
    assert_eq!(b.coordinator.phase(), ShutdownPhase::Stopped);
}

#[tokio::test(start_paused = true)]
async fn straggler_is_force_closed_when_the_deadline_passes() {
    let store = Arc::new(MemoryStore::new());
    let a = Arc::new(Worker::new(&store, settings(10)));
    let b = Arc::new(Worker::new(&store, settings(10)));

    let a_conn = a.accept().await;
    let straggler = b.accept().await;

    let drains: Vec<_> = [Arc::clone(&a), Arc::clone(&b)]
        .into_iter()
        .map(|w| tokio::spawn(async move { w.coordinator.drain(None).await }))
        .collect();
    a.coordinator.signal_shutdown().await.unwrap();

    let started = Instant::now();
    tokio::time::sleep(Duration::from_secs(2)).await;
    a.registry.disconnect(a_conn.id()).await.unwrap();

    let mut reports = Vec::new();
    for drain in drains {
        reports.push(drain.await.unwrap());
    }

    let bound = Duration::from_secs(10) + settings(10).drain_poll_interval;
    for report in &reports {
        assert_eq!(report.outcome, DrainOutcome::TimedOut);
        assert!(report.elapsed <= bound);
    }
    assert!(started.elapsed() <= bound);
    assert_eq!(reports[0].force_closed, 0);
    assert_eq!(reports[1].force_closed, 1);
    assert_eq!(
        straggler.closed_with(),
        Some((SHUTDOWN_CLOSE_CODE, SHUTDOWN_CLOSE_REASON.to_string()))
    );
    assert!(a.registry.is_empty());
    assert!(b.registry.is_empty());
    assert_eq!(store.get().await.unwrap(), 0);
    assert_eq!(b.coordinator.phase(), ShutdownPhase::Stopped);
}

#[tokio::test(start_paused = true)]
async fn flaky_counter_reads_do_not_cut_the_grace_period_short() {
    let store = Arc::new(MemoryStore::new());
    let worker = Arc::new(Worker::new(&store, settings(10)));
    let conn = worker.accept().await;
    store.fail_next_reads(3);

    let leaver = {
        let worker = Arc::clone(&worker);
        let id = conn.id();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            worker.registry.disconnect(id).await.unwrap();
        })
    };

    let report = worker.coordinator.drain(None).await;
    leaver.await.unwrap();

    assert_eq!(report.outcome, DrainOutcome::Drained);
    assert!(report.elapsed >= Duration::from_secs(5));
    assert!(report.elapsed < Duration::from_secs(10));
    assert_eq!(report.force_closed, 0);
    assert!(conn.closed_with().is_none());
}

#[tokio::test(start_paused = true)]
async fn unreachable_store_still_ends_at_the_deadline_with_a_forced_close() {
    let store = Arc::new(MemoryStore::new());
    let worker = Worker::new(&store, settings(3));
    let conn = worker.accept().await;
    store.set_unavailable(true);

    let report = worker.coordinator.drain(None).await;
    assert_eq!(report.outcome, DrainOutcome::TimedOut);
    assert_eq!(report.force_closed, 1);
    assert!(report.elapsed <= Duration::from_secs(3) + settings(3).drain_poll_interval);
    assert!(conn.closed_with().is_some());
    assert!(worker.registry.is_empty());
    assert_eq!(worker.coordinator.phase(), ShutdownPhase::Stopped);
}

#[tokio::test(start_paused = true)]
async fn second_drain_returns_the_first_report() {
    let store = Arc::new(MemoryStore::new());
    let worker = Worker::new(&store, settings(2));
    let _conn = worker.accept().await;

    let first = worker.coordinator.drain(None).await;
    let second = worker.coordinator.drain(None).await;
    assert_eq!(first, second);
    assert_eq!(first.outcome, DrainOutcome::TimedOut);
}

#[tokio::test(start_paused = true)]
async fn phase_changes_are_observable() {
    let store = Arc::new(MemoryStore::new());
    let worker = Worker::new(&store, settings(10));
    let mut phases = worker.coordinator.subscribe_phase();
    assert_eq!(*phases.borrow(), ShutdownPhase::Running);

    worker.coordinator.drain(None).await;
    assert!(phases.has_changed().unwrap());
    assert_eq!(*phases.borrow_and_update(), ShutdownPhase::Stopped);
}

#[tokio::test(start_paused = true)]
async fn unresponsive_peer_cannot_hold_the_worker_in_shutdown() {
    let store = Arc::new(MemoryStore::new());
    let worker = Worker::new(&store, settings(2));
    let healthy = worker.accept().await;
    worker.registry.connect(StuckConnection::new()).await.unwrap();
    assert_eq!(store.get().await.unwrap(), 2);

    let grace = settings(2).close_grace;
    let report = tokio::time::timeout(Duration::from_secs(3600), worker.coordinator.drain(None))
        .await
        .expect("drain must finish");

    assert_eq!(report.outcome, DrainOutcome::TimedOut);
    assert_eq!(report.force_closed, 2);
    assert!(report.elapsed <= Duration::from_secs(2) + 2 * grace);
    assert_eq!(
        healthy.closed_with(),
        Some((SHUTDOWN_CLOSE_CODE, SHUTDOWN_CLOSE_REASON.to_string()))
    );
    assert!(worker.registry.is_empty());
    assert_eq!(store.get().await.unwrap(), 0);
    assert_eq!(worker.coordinator.phase(), ShutdownPhase::Stopped);
}

#[tokio::test(start_paused = true)]
async fn notifier_stuck_in_a_broadcast_does_not_block_the_drain() {
    let store = Arc::new(MemoryStore::new());
    let worker = Worker::new(&store, settings(2));
    worker.registry.connect(StuckConnection::new()).await.unwrap();
    let notifier = PeriodicNotifier::new(
        worker.dispatcher.clone(),
        worker.registry.clone(),
        Duration::from_millis(500),
        worker.coordinator.local_signal(),
    )
    .spawn();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let report = tokio::time::timeout(
        Duration::from_secs(3600),
        worker.coordinator.drain(Some(notifier)),
    )
    .await
    .expect("drain must finish");

    assert_eq!(report.force_closed, 1);
    assert_eq!(worker.coordinator.phase(), ShutdownPhase::Stopped);
}

#[tokio::test(start_paused = true)]
async fn connect_after_the_sweep_is_refused_without_counting() {
    let store = Arc::new(MemoryStore::new());
    let worker = Worker::new(&store, settings(5));

    let report = worker.coordinator.drain(None).await;
    assert_eq!(report.outcome, DrainOutcome::Drained);
    assert!(worker.registry.is_sealed());

    let late = common::FakeConnection::new();
    let refused = worker.registry.connect(late.clone()).await;
    assert!(matches!(refused, Err(GatewayError::ShuttingDown)));
    assert!(worker.registry.is_empty());
    assert_eq!(store.get().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn connect_in_flight_during_the_sweep_undoes_itself() {
    let store = Arc::new(MemoryStore::new());
    let worker = Arc::new(Worker::new(&store, settings(5)));
    let settled = worker.accept().await;

    // The increment of this connect is still pending when the sweep runs.
    let late = common::FakeConnection::new();
    let connecting = {
        let worker = Arc::clone(&worker);
        let late = late.clone();
        tokio::spawn(async move { worker.registry.connect(late).await })
    };
    tokio::task::yield_now().await;
    let swept = worker
        .registry
        .force_close_all(SHUTDOWN_CLOSE_CODE, SHUTDOWN_CLOSE_REASON, Duration::from_secs(1))
        .await;

    let refused = connecting.await.unwrap();
    assert!(matches!(refused, Err(GatewayError::ShuttingDown)));
    assert_eq!(swept, 1);
    assert!(settled.closed_with().is_some());
    assert!(worker.registry.is_empty());
    assert_eq!(store.get().await.unwrap(), 0);
}
