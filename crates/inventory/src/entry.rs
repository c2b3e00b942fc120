use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockforge_core::{
    CompanyId, ExpectedVersion, InventoryId, ProductId, TenantScoped, WarehouseId,
};
use stockforge_events::Event;

use crate::change_type::ChangeType;

/// Ledger-wide transaction identifier (monotonically increasing).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub u64);

impl core::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Identity of an inventory row: exactly one per (product, warehouse) pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InventoryRow {
    pub id: InventoryId,
    pub company_id: CompanyId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
}

impl TenantScoped for InventoryRow {
    fn scope_kind(&self) -> &'static str {
        "inventory"
    }

    fn company_id(&self) -> CompanyId {
        self.company_id
    }
}

/// An immutable ledger entry (`inventory_transactions` row).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub transaction_id: TransactionId,
    pub inventory_id: InventoryId,
    /// Position in this row's stream, starting at 1 with no gaps.
    pub seq: u64,
    pub change_type: ChangeType,
    pub delta: i64,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl Event for LedgerEntry {
    fn event_type(&self) -> &'static str {
        match self.change_type {
            ChangeType::Receipt => "inventory.transaction.receipt",
            ChangeType::Sale => "inventory.transaction.sale",
            ChangeType::Adjustment => "inventory.transaction.adjustment",
            ChangeType::TransferIn => "inventory.transaction.transfer_in",
            ChangeType::TransferOut => "inventory.transaction.transfer_out",
            ChangeType::BundleConsumption => "inventory.transaction.bundle_consumption",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }
}

/// An entry waiting to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub inventory_id: InventoryId,
    /// Stream version the writer observed while holding the row lock.
    pub expected_version: ExpectedVersion,
    pub change_type: ChangeType,
    pub delta: i64,
    pub note: Option<String>,
    /// Lets an `adjustment` take the quantity below zero.
    pub allow_negative: bool,
}

impl PendingEntry {
    pub fn new(inventory_id: InventoryId, change_type: ChangeType, delta: i64) -> Self {
        Self {
            inventory_id,
            expected_version: ExpectedVersion::Any,
            change_type,
            delta,
            note: None,
            allow_negative: false,
        }
    }

    pub fn expecting(mut self, version: u64) -> Self {
        self.expected_version = ExpectedVersion::Exact(version);
        self
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }

    pub fn allowing_negative(mut self, allow: bool) -> Self {
        self.allow_negative = allow;
        self
    }
}
