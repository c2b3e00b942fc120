use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use stockforge_core::{CompanyId, InventoryId, ProductId, WarehouseId};
use stockforge_inventory::{InventoryRow, LedgerEntry, PendingEntry, TransactionId, apply_delta};

use super::r#trait::{LedgerError, LedgerStore};

#[derive(Debug)]
struct RowState {
    row: InventoryRow,
    entries: Vec<LedgerEntry>,
    /// Running sum of `entries`; what deltas are validated against.
    ledger_quantity: i64,
    /// The `inventory.quantity` column. Normally equal to `ledger_quantity`.
    cached: i64,
}

impl RowState {
    fn version(&self) -> u64 {
        self.entries.last().map(|e| e.seq).unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    rows: HashMap<InventoryId, RowState>,
    by_pair: HashMap<(ProductId, WarehouseId), InventoryId>,
    last_transaction: u64,
}

/// In-memory ledger store.
///
/// A single `RwLock` covers every row, so a batch's ledger append and cache
/// update are one critical section. Intended for tests/dev and as the
/// reference behaviour for other backends.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<LedgerState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, LedgerState>, LedgerError> {
        self.state.read().map_err(|_| LedgerError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, LedgerState>, LedgerError> {
        self.state.write().map_err(|_| LedgerError::Poisoned)
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn open_row(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<InventoryRow, LedgerError> {
        let mut state = self.write()?;
        if let Some(id) = state.by_pair.get(&(product_id, warehouse_id)).copied() {
            let existing = state
                .rows
                .get(&id)
                .map(|r| r.row)
                .ok_or(LedgerError::UnknownRow(id))?;
            if existing.company_id != company_id {
                return Err(LedgerError::Storage(format!(
                    "inventory row {id} belongs to company {}, requested for {company_id}",
                    existing.company_id
                )));
            }
            return Ok(existing);
        }

        let row = InventoryRow {
            id: InventoryId::new(),
            company_id,
            product_id,
            warehouse_id,
        };
        state.by_pair.insert((product_id, warehouse_id), row.id);
        state.rows.insert(
            row.id,
            RowState {
                row,
                entries: Vec::new(),
                ledger_quantity: 0,
                cached: 0,
            },
        );
        Ok(row)
    }

    fn find_row(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<Option<InventoryRow>, LedgerError> {
        let state = self.read()?;
        Ok(state
            .by_pair
            .get(&(product_id, warehouse_id))
            .and_then(|id| state.rows.get(id))
            .map(|r| r.row))
    }

    fn row(&self, inventory_id: InventoryId) -> Result<Option<InventoryRow>, LedgerError> {
        Ok(self.read()?.rows.get(&inventory_id).map(|r| r.row))
    }

    fn rows_of(&self, company_id: CompanyId) -> Result<Vec<InventoryRow>, LedgerError> {
        let state = self.read()?;
        let mut rows: Vec<InventoryRow> = state
            .rows
            .values()
            .map(|r| r.row)
            .filter(|r| r.company_id == company_id)
            .collect();
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }

    fn append(&self, batch: Vec<PendingEntry>) -> Result<Vec<LedgerEntry>, LedgerError> {
        if batch.is_empty() {
            return Ok(vec![]);
        }

        let mut state = self.write()?;

        // Validate the whole batch against staged copies first; nothing is
        // written unless every entry passes.
        let mut staged: HashMap<InventoryId, (i64, u64)> = HashMap::new();
        let mut next_transaction = state.last_transaction;
        let mut committed = Vec::with_capacity(batch.len());
        let recorded_at = Utc::now();

        for pending in batch {
            let row = state
                .rows
                .get(&pending.inventory_id)
                .ok_or(LedgerError::UnknownRow(pending.inventory_id))?;

            let base_version = row.version();
            if !pending.expected_version.matches(base_version) {
                return Err(LedgerError::Concurrency(format!(
                    "row {}: expected {:?}, found {base_version}",
                    pending.inventory_id, pending.expected_version
                )));
            }

            let (quantity, seq) = staged
                .get(&pending.inventory_id)
                .copied()
                .unwrap_or((row.ledger_quantity, base_version));

            let next_quantity = apply_delta(
                pending.change_type,
                quantity,
                pending.delta,
                pending.allow_negative,
            )
            .map_err(|source| LedgerError::InvalidDelta {
                inventory_id: pending.inventory_id,
                source,
            })?;

            next_transaction += 1;
            staged.insert(pending.inventory_id, (next_quantity, seq + 1));
            committed.push(LedgerEntry {
                transaction_id: TransactionId(next_transaction),
                inventory_id: pending.inventory_id,
                seq: seq + 1,
                change_type: pending.change_type,
                delta: pending.delta,
                note: pending.note,
                recorded_at,
            });
        }

        for entry in &committed {
            if let Some(row) = state.rows.get_mut(&entry.inventory_id) {
                row.ledger_quantity += entry.delta;
                row.cached = row.cached.saturating_add(entry.delta);
                row.entries.push(entry.clone());
            }
        }
        state.last_transaction = next_transaction;

        Ok(committed)
    }

    fn read_since(
        &self,
        inventory_id: InventoryId,
        after_seq: u64,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let state = self.read()?;
        let row = state
            .rows
            .get(&inventory_id)
            .ok_or(LedgerError::UnknownRow(inventory_id))?;
        // seq n lives at index n - 1.
        let start = usize::try_from(after_seq).unwrap_or(usize::MAX);
        Ok(row.entries.get(start..).map(<[_]>::to_vec).unwrap_or_default())
    }

    fn version(&self, inventory_id: InventoryId) -> Result<u64, LedgerError> {
        let state = self.read()?;
        state
            .rows
            .get(&inventory_id)
            .map(RowState::version)
            .ok_or(LedgerError::UnknownRow(inventory_id))
    }

    fn cached_quantity(&self, inventory_id: InventoryId) -> Result<i64, LedgerError> {
        let state = self.read()?;
        state
            .rows
            .get(&inventory_id)
            .map(|r| r.cached)
            .ok_or(LedgerError::UnknownRow(inventory_id))
    }

    fn write_cached_quantity(
        &self,
        inventory_id: InventoryId,
        quantity: i64,
    ) -> Result<(), LedgerError> {
        let mut state = self.write()?;
        let row = state
            .rows
            .get_mut(&inventory_id)
            .ok_or(LedgerError::UnknownRow(inventory_id))?;
        row.cached = quantity;
        Ok(())
    }

    fn discard_empty_row(&self, inventory_id: InventoryId) -> Result<(), LedgerError> {
        let mut state = self.write()?;
        let row = state
            .rows
            .get(&inventory_id)
            .ok_or(LedgerError::UnknownRow(inventory_id))?;
        if !row.entries.is_empty() {
            return Err(LedgerError::RowInUse(inventory_id));
        }
        let key = (row.row.product_id, row.row.warehouse_id);
        state.rows.remove(&inventory_id);
        state.by_pair.remove(&key);
        Ok(())
    }
}
