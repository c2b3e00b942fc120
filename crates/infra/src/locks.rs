//! Per-row mutual exclusion for stock mutations.
//!
//! A row is identified by its (product, warehouse) pair. Compound operations
//! ask for every key at once; the table sorts them and acquires in that order,
//! so two operations touching overlapping rows can never deadlock. Waiting is
//! bounded by the configured timeout.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::{Condvar, Mutex};

use stockforge_core::{ProductId, WarehouseId};
use stockforge_events::{EngineSignal, LockTimeout, SignalSink};

use crate::error::StockError;

/// Lock key. Ordering is (product, warehouse), the global acquisition order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StockKey {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
}

impl StockKey {
    pub fn new(product_id: ProductId, warehouse_id: WarehouseId) -> Self {
        Self {
            product_id,
            warehouse_id,
        }
    }
}

pub struct RowLockTable {
    held: Mutex<HashSet<StockKey>>,
    released: Condvar,
    timeout: Duration,
    signals: Arc<dyn SignalSink>,
}

impl std::fmt::Debug for RowLockTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowLockTable")
            .field("held", &self.held.lock().len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RowLockTable {
    pub fn new(timeout: Duration, signals: Arc<dyn SignalSink>) -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            timeout,
            signals,
        }
    }

    /// Lock every key (duplicates collapse) or none of them.
    ///
    /// On timeout the keys already taken are released, a `LockTimeout` signal
    /// is emitted and `StockError::LockTimeout` names the contended row.
    pub fn acquire(
        &self,
        keys: impl IntoIterator<Item = StockKey>,
    ) -> Result<RowLockGuard<'_>, StockError> {
        let mut keys: Vec<StockKey> = keys.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();

        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut guard = RowLockGuard {
            table: self,
            keys: Vec::with_capacity(keys.len()),
        };

        let mut held = self.held.lock();
        for key in keys {
            while held.contains(&key) {
                if self.released.wait_until(&mut held, deadline).timed_out() && held.contains(&key)
                {
                    drop(held);
                    drop(guard);
                    return Err(self.timed_out(key, started.elapsed()));
                }
            }
            held.insert(key);
            guard.keys.push(key);
        }

        Ok(guard)
    }

    pub fn is_locked(&self, key: &StockKey) -> bool {
        self.held.lock().contains(key)
    }

    fn timed_out(&self, key: StockKey, waited: Duration) -> StockError {
        let waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX);
        tracing::warn!(
            product_id = %key.product_id,
            warehouse_id = %key.warehouse_id,
            waited_ms,
            "row lock timeout"
        );
        self.signals.emit(EngineSignal::LockTimeout(LockTimeout {
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            waited_ms,
            occurred_at: Utc::now(),
        }));
        StockError::LockTimeout {
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            waited_ms,
        }
    }

    fn release(&self, keys: &[StockKey]) {
        if keys.is_empty() {
            return;
        }
        let mut held = self.held.lock();
        for key in keys {
            held.remove(key);
        }
        drop(held);
        self.released.notify_all();
    }
}

/// Holds a set of row locks; releasing happens on drop, including when the
/// owning operation bails out early.
#[must_use = "row locks are released as soon as the guard is dropped"]
pub struct RowLockGuard<'a> {
    table: &'a RowLockTable,
    keys: Vec<StockKey>,
}

impl RowLockGuard<'_> {
    pub fn keys(&self) -> &[StockKey] {
        &self.keys
    }
}

impl std::fmt::Debug for RowLockGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowLockGuard").field("keys", &self.keys).finish()
    }
}

impl Drop for RowLockGuard<'_> {
    fn drop(&mut self) {
        self.table.release(&self.keys);
    }
}
