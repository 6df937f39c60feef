//! # In-Memory Store
//!
//! A process-local stand-in for the shared store. Several simulated workers can share
//! one `Arc<MemoryStore>` the same way real workers share one Redis instance. Every
//! call yields to the scheduler first, so callers see the same suspension points
//! they would see against a network store.
//!
//! The store can be switched to "unavailable" or told to fail a number of upcoming
//! counter reads, which is how the store-failure paths are exercised.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::connections::store::{CounterStore, FlagStore};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Cells {
    counter: i64,
    flag: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    cells: Mutex<Cells>,
    unavailable: AtomicBool,
    failing_reads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail (`true`) or succeed again (`false`).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next `count` counter reads fail while writes keep working.
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Overwrites the counter, bypassing the clamp. Simulates a corrupted or stale key.
    pub fn force_counter(&self, value: i64) {
        self.cells().counter = value;
    }

    fn cells(&self) -> MutexGuard<'_, Cells> {
        self.cells.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn ensure_available(&self) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn incr(&self) -> Result<i64, StoreError> {
        self.ensure_available().await?;
        let mut cells = self.cells();
        cells.counter += 1;
        Ok(cells.counter)
    }

    async fn decr_clamped(&self) -> Result<i64, StoreError> {
        self.ensure_available().await?;
        let mut cells = self.cells();
        cells.counter -= 1;
        if cells.counter < 0 {
            cells.counter = 0;
        }
        Ok(cells.counter)
    }

    async fn get(&self) -> Result<i64, StoreError> {
        self.ensure_available().await?;
        let pending = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        Ok(self.cells().counter.max(0))
    }
}

#[async_trait]
impl FlagStore for MemoryStore {
    async fn set(&self) -> Result<(), StoreError> {
        self.ensure_available().await?;
        self.cells().flag = true;
        Ok(())
    }

    async fn is_set(&self) -> Result<bool, StoreError> {
        self.ensure_available().await?;
        Ok(self.cells().flag)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.ensure_available().await?;
        self.cells().flag = false;
        Ok(())
    }
}
