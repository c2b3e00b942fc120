//! Inventory Projector: the cached quantity as a checked, repairable view of
//! the ledger.
//!
//! Reads take the fast path (the cache) unless the row has been flagged as
//! suspect or `verify_on_read` is set, in which case the ledger is replayed
//! first. A mismatch is always repaired and always reported: a `warn` log line
//! and a `DriftDetected` signal.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use stockforge_core::{CompanyId, InventoryId, ProductId, WarehouseId};
use stockforge_events::{DriftDetected, EngineSignal, SignalSink};
use stockforge_inventory::{InventoryRow, replay};

use crate::error::{StockError, StockResult};
use crate::ledger::LedgerStore;
use crate::locks::{RowLockTable, StockKey};

/// Outcome of comparing a row's cache with its ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    Consistent { quantity: i64 },
    /// The cache held `actual`; it now holds `expected`.
    Drifted { expected: i64, actual: i64 },
}

impl Reconciliation {
    /// The authoritative quantity after reconciliation.
    pub fn quantity(self) -> i64 {
        match self {
            Reconciliation::Consistent { quantity } => quantity,
            Reconciliation::Drifted { expected, .. } => expected,
        }
    }

    pub fn is_drifted(self) -> bool {
        matches!(self, Reconciliation::Drifted { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriftedRow {
    pub inventory_id: InventoryId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub expected: i64,
    pub actual: i64,
}

/// Result of a company-wide consistency sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub company_id: CompanyId,
    pub checked: usize,
    pub drifted: Vec<DriftedRow>,
}

pub struct InventoryProjector<S> {
    store: S,
    locks: Arc<RowLockTable>,
    signals: Arc<dyn SignalSink>,
    flagged: Mutex<HashSet<InventoryId>>,
    verify_on_read: bool,
}

impl<S> InventoryProjector<S> {
    pub fn new(
        store: S,
        locks: Arc<RowLockTable>,
        signals: Arc<dyn SignalSink>,
        verify_on_read: bool,
    ) -> Self {
        Self {
            store,
            locks,
            signals,
            flagged: Mutex::new(HashSet::new()),
            verify_on_read,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mark a row suspect; its next read replays the ledger.
    pub fn flag(&self, inventory_id: InventoryId) {
        if self.flagged.lock().insert(inventory_id) {
            tracing::debug!(inventory_id = %inventory_id, "inventory row flagged for reconciliation");
        }
    }

    pub fn is_flagged(&self, inventory_id: InventoryId) -> bool {
        self.flagged.lock().contains(&inventory_id)
    }
}

impl<S: LedgerStore> InventoryProjector<S> {
    /// Current quantity of a (product, warehouse) pair; 0 when no row exists.
    pub fn current_quantity(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> StockResult<i64> {
        let Some(row) = self.store.find_row(product_id, warehouse_id)? else {
            return Ok(0);
        };
        if self.needs_replay(row.id) {
            return Ok(self.reconcile_row(&row)?.quantity());
        }
        Ok(self.store.cached_quantity(row.id)?)
    }

    /// Same as [`Self::current_quantity`] for a caller already holding the
    /// row's lock.
    pub(crate) fn quantity_locked(&self, row: &InventoryRow) -> StockResult<i64> {
        if self.needs_replay(row.id) {
            return Ok(self.reconcile_locked(row)?.quantity());
        }
        Ok(self.store.cached_quantity(row.id)?)
    }

    /// Quantity rebuilt from the row's ledger, ignoring the cache. The caller
    /// holds the row's lock.
    pub(crate) fn ledger_quantity_locked(&self, row: &InventoryRow) -> StockResult<i64> {
        let ledger = self.store.read_since(row.id, 0)?;
        Ok(replay(row.id, &ledger)?.quantity)
    }

    /// Compare a row's cache with the quantity a commit just left in its
    /// ledger. A mismatch, or a cache that cannot be read, flags the row so
    /// the next read repairs it and reports the drift.
    pub(crate) fn settle_locked(&self, row: &InventoryRow, expected: i64) {
        match self.store.cached_quantity(row.id) {
            Ok(actual) if actual == expected => {}
            _ => self.flag(row.id),
        }
    }

    /// Replay the row's ledger and repair the cache if it disagrees.
    pub fn reconcile(&self, inventory_id: InventoryId) -> StockResult<Reconciliation> {
        let row = self
            .store
            .row(inventory_id)?
            .ok_or_else(|| StockError::not_found(format!("inventory row {inventory_id}")))?;
        self.reconcile_row(&row)
    }

    /// Recompute the cache from the ledger alone and return the quantity.
    pub fn rebuild(&self, inventory_id: InventoryId) -> StockResult<i64> {
        Ok(self.reconcile(inventory_id)?.quantity())
    }

    /// Reconcile every row of a company.
    pub fn reconcile_company(&self, company_id: CompanyId) -> StockResult<ReconcileReport> {
        let rows = self.store.rows_of(company_id)?;
        let mut report = ReconcileReport {
            company_id,
            checked: 0,
            drifted: Vec::new(),
        };

        for row in &rows {
            if let Reconciliation::Drifted { expected, actual } = self.reconcile_row(row)? {
                report.drifted.push(DriftedRow {
                    inventory_id: row.id,
                    product_id: row.product_id,
                    warehouse_id: row.warehouse_id,
                    expected,
                    actual,
                });
            }
            report.checked += 1;
        }

        tracing::info!(
            company_id = %company_id,
            checked = report.checked,
            drifted = report.drifted.len(),
            "inventory consistency sweep finished"
        );
        Ok(report)
    }

    fn needs_replay(&self, inventory_id: InventoryId) -> bool {
        self.verify_on_read || self.is_flagged(inventory_id)
    }

    fn reconcile_row(&self, row: &InventoryRow) -> StockResult<Reconciliation> {
        let _guard = self
            .locks
            .acquire([StockKey::new(row.product_id, row.warehouse_id)])?;
        self.reconcile_locked(row)
    }

    fn reconcile_locked(&self, row: &InventoryRow) -> StockResult<Reconciliation> {
        let expected = self.ledger_quantity_locked(row)?;
        let actual = self.store.cached_quantity(row.id)?;

        let outcome = if expected == actual {
            Reconciliation::Consistent { quantity: expected }
        } else {
            self.store.write_cached_quantity(row.id, expected)?;
            tracing::warn!(
                company_id = %row.company_id,
                inventory_id = %row.id,
                product_id = %row.product_id,
                warehouse_id = %row.warehouse_id,
                expected,
                actual,
                "inventory drift repaired"
            );
            self.signals.emit(EngineSignal::DriftDetected(DriftDetected {
                company_id: row.company_id,
                inventory_id: row.id,
                product_id: row.product_id,
                warehouse_id: row.warehouse_id,
                expected,
                actual,
                occurred_at: Utc::now(),
            }));
            Reconciliation::Drifted { expected, actual }
        };

        self.flagged.lock().remove(&row.id);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use stockforge_events::{EventBus, InMemoryEventBus, NullSink, Subscription};
    use stockforge_inventory::{ChangeType, PendingEntry};

    use crate::ledger::InMemoryLedgerStore;

    fn projector(verify_on_read: bool) -> (InventoryProjector<InMemoryLedgerStore>, Subscription<EngineSignal>) {
        let bus = Arc::new(InMemoryEventBus::<EngineSignal>::new());
        let signals = bus.subscribe();
        let locks = Arc::new(RowLockTable::new(Duration::from_millis(100), Arc::new(NullSink)));
        let projector = InventoryProjector::new(InMemoryLedgerStore::new(), locks, bus, verify_on_read);
        (projector, signals)
    }

    fn stocked_row(projector: &InventoryProjector<InMemoryLedgerStore>, quantity: i64) -> InventoryRow {
        let row = projector
            .store()
            .open_row(CompanyId::new(), ProductId::new(), WarehouseId::new())
            .unwrap();
        projector
            .store()
            .append(vec![PendingEntry::new(row.id, ChangeType::Receipt, quantity)])
            .unwrap();
        row
    }

    #[test]
    fn missing_row_reads_as_zero() {
        let (projector, _) = projector(false);
        assert_eq!(projector.current_quantity(ProductId::new(), WarehouseId::new()).unwrap(), 0);
    }

    #[test]
    fn consistent_row_reports_its_quantity_without_signals() {
        let (projector, signals) = projector(false);
        let row = stocked_row(&projector, 12);

        assert_eq!(
            projector.reconcile(row.id).unwrap(),
            Reconciliation::Consistent { quantity: 12 }
        );
        assert!(signals.drain().is_empty());
    }

    #[test]
    fn drift_is_repaired_and_signalled() {
        let (projector, signals) = projector(false);
        let row = stocked_row(&projector, 12);
        projector.store().write_cached_quantity(row.id, 40).unwrap();

        let outcome = projector.reconcile(row.id).unwrap();
        assert_eq!(outcome, Reconciliation::Drifted { expected: 12, actual: 40 });
        assert_eq!(projector.store().cached_quantity(row.id).unwrap(), 12);

        match signals.try_recv().unwrap() {
            EngineSignal::DriftDetected(d) => {
                assert_eq!((d.expected, d.actual), (12, 40));
                assert_eq!(d.inventory_id, row.id);
                assert_eq!(d.company_id, row.company_id);
            }
            other => panic!("unexpected signal {other:?}"),
        }
    }

    #[test]
    fn fast_path_trusts_the_cache_until_flagged() {
        let (projector, _) = projector(false);
        let row = stocked_row(&projector, 5);
        projector.store().write_cached_quantity(row.id, 9).unwrap();

        assert_eq!(projector.current_quantity(row.product_id, row.warehouse_id).unwrap(), 9);

        projector.flag(row.id);
        assert!(projector.is_flagged(row.id));
        assert_eq!(projector.current_quantity(row.product_id, row.warehouse_id).unwrap(), 5);
        assert!(!projector.is_flagged(row.id));
    }

    #[test]
    fn verify_on_read_always_replays() {
        let (projector, signals) = projector(true);
        let row = stocked_row(&projector, 5);
        projector.store().write_cached_quantity(row.id, 1).unwrap();

        assert_eq!(projector.current_quantity(row.product_id, row.warehouse_id).unwrap(), 5);
        assert_eq!(signals.drain().len(), 1);
    }

    #[test]
    fn company_sweep_reports_only_drifted_rows() {
        let (projector, signals) = projector(false);
        let company = CompanyId::new();
        let warehouse = WarehouseId::new();
        let mut rows = Vec::new();
        for quantity in [3, 4, 5] {
            let row = projector
                .store()
                .open_row(company, ProductId::new(), warehouse)
                .unwrap();
            projector
                .store()
                .append(vec![PendingEntry::new(row.id, ChangeType::Receipt, quantity)])
                .unwrap();
            rows.push(row);
        }
        projector.store().write_cached_quantity(rows[1].id, 0).unwrap();

        let report = projector.reconcile_company(company).unwrap();
        assert_eq!(report.checked, 3);
        assert_eq!(report.drifted.len(), 1);
        assert_eq!(report.drifted[0].inventory_id, rows[1].id);
        assert_eq!((report.drifted[0].expected, report.drifted[0].actual), (4, 0));
        assert_eq!(signals.drain().len(), 1);

        assert_eq!(projector.rebuild(rows[1].id).unwrap(), 4);
    }

    #[test]
    fn reconcile_of_unknown_row_is_not_found() {
        let (projector, _) = projector(false);
        let err = projector.reconcile(InventoryId::new()).unwrap_err();
        assert!(matches!(err, StockError::NotFound(_)));
    }
}
