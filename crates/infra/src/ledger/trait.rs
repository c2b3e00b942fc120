use std::sync::Arc;

use thiserror::Error;

use stockforge_core::{CompanyId, InventoryId, ProductId, WarehouseId};
use stockforge_inventory::{DeltaError, InventoryRow, LedgerEntry, PendingEntry};

/// Ledger store operation error.
///
/// `InvalidDelta` and `Concurrency` are deterministic rejections of the batch;
/// `Storage` and `Poisoned` mean the backend itself failed and the caller cannot
/// know whether the cache is still trustworthy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("invalid delta for inventory row {inventory_id}: {source}")]
    InvalidDelta {
        inventory_id: InventoryId,
        #[source]
        source: DeltaError,
    },

    #[error("unknown inventory row {0}")]
    UnknownRow(InventoryId),

    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("inventory row {0} already has ledger entries")]
    RowInUse(InventoryId),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("ledger lock poisoned")]
    Poisoned,
}

/// Append-only quantity ledger plus the per-row current-quantity cache.
///
/// One inventory row exists per (product, warehouse) pair. Its ledger is a
/// stream of [`LedgerEntry`] values numbered 1, 2, 3, … with no gaps; the
/// cached quantity is a materialized view of that stream.
///
/// `append` commits a batch atomically: every entry is validated against its
/// row's ledger-derived quantity (see [`stockforge_inventory::apply_delta`]), then
/// all entries are written and all affected caches updated in the same step,
/// or nothing is written at all. Entries are never updated or deleted.
pub trait LedgerStore: Send + Sync {
    /// Get or create the inventory row for a (product, warehouse) pair.
    fn open_row(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<InventoryRow, LedgerError>;

    fn find_row(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<Option<InventoryRow>, LedgerError>;

    fn row(&self, inventory_id: InventoryId) -> Result<Option<InventoryRow>, LedgerError>;

    /// Every row of a company, ordered by inventory id.
    fn rows_of(&self, company_id: CompanyId) -> Result<Vec<InventoryRow>, LedgerError>;

    /// Validate and commit a batch, possibly spanning several rows.
    ///
    /// `expected_version` on each entry is checked against the row's version
    /// before the batch. Returns the committed entries in batch order.
    fn append(&self, batch: Vec<PendingEntry>) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Entries of one row with `seq > after_seq`, in order.
    fn read_since(
        &self,
        inventory_id: InventoryId,
        after_seq: u64,
    ) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Sequence number of the row's last entry (0 when empty).
    fn version(&self, inventory_id: InventoryId) -> Result<u64, LedgerError>;

    fn cached_quantity(&self, inventory_id: InventoryId) -> Result<i64, LedgerError>;

    /// Overwrite the cache. Only the projector's repair path calls this.
    fn write_cached_quantity(
        &self,
        inventory_id: InventoryId,
        quantity: i64,
    ) -> Result<(), LedgerError>;

    /// Drop a row that never received an entry (rollback of a failed
    /// onboarding). Fails with `RowInUse` otherwise.
    fn discard_empty_row(&self, inventory_id: InventoryId) -> Result<(), LedgerError>;
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn open_row(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<InventoryRow, LedgerError> {
        (**self).open_row(company_id, product_id, warehouse_id)
    }

    fn find_row(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<Option<InventoryRow>, LedgerError> {
        (**self).find_row(product_id, warehouse_id)
    }

    fn row(&self, inventory_id: InventoryId) -> Result<Option<InventoryRow>, LedgerError> {
        (**self).row(inventory_id)
    }

    fn rows_of(&self, company_id: CompanyId) -> Result<Vec<InventoryRow>, LedgerError> {
        (**self).rows_of(company_id)
    }

    fn append(&self, batch: Vec<PendingEntry>) -> Result<Vec<LedgerEntry>, LedgerError> {
        (**self).append(batch)
    }

    fn read_since(
        &self,
        inventory_id: InventoryId,
        after_seq: u64,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        (**self).read_since(inventory_id, after_seq)
    }

    fn version(&self, inventory_id: InventoryId) -> Result<u64, LedgerError> {
        (**self).version(inventory_id)
    }

    fn cached_quantity(&self, inventory_id: InventoryId) -> Result<i64, LedgerError> {
        (**self).cached_quantity(inventory_id)
    }

    fn write_cached_quantity(
        &self,
        inventory_id: InventoryId,
        quantity: i64,
    ) -> Result<(), LedgerError> {
        (**self).write_cached_quantity(inventory_id, quantity)
    }

    fn discard_empty_row(&self, inventory_id: InventoryId) -> Result<(), LedgerError> {
        (**self).discard_empty_row(inventory_id)
    }
}
