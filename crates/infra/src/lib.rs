//! Engine layer: ledger storage, projection, locking and the mutation
//! coordinator that ties them together.

pub mod bundles;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod locks;
pub mod projector;


pub use bundles::BundleRegistry;
pub use config::{EngineConfig, RetryPolicy};
pub use coordinator::{
    BundleConsumed, ChangeRequest, Onboarded, StockChange, StockCoordinator, Transfer,
};
pub use error::{ErrorCategory, StockError, StockResult};
pub use ledger::{InMemoryLedgerStore, LedgerError, LedgerStore, PostgresLedgerStore};
pub use locks::{RowLockGuard, RowLockTable, StockKey};
pub use projector::{DriftedRow, InventoryProjector, ReconcileReport, Reconciliation};
