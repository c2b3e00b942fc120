//! Engine-facing error taxonomy.
//!
//! Every rejected mutation surfaces as a [`StockError`]; lower layers
//! (`DeltaError`, `BundleError`, `LedgerError`, `CatalogError`) convert into it.
//! A rejection always leaves ledger and cache exactly as they were.

use thiserror::Error;

use stockforge_catalog::CatalogError;
use stockforge_core::{CrossTenantViolation, DomainError, ProductId, WarehouseId};
use stockforge_inventory::{BundleError, ChangeType, DeltaError, ReplayError};

use crate::ledger::LedgerError;

pub type StockResult<T> = Result<T, StockError>;

/// Coarse classification callers branch on (HTTP status, retry, alerting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed request; rejected before any lock is taken.
    Validation,
    /// Would break a structural invariant (cycle, tenant boundary).
    Consistency,
    /// Not enough stock, detected under lock before commit.
    Stock,
    /// Lost a race; retrying with backoff may succeed.
    Concurrency,
    NotFound,
    Infrastructure,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockError {
    #[error("invalid delta: {0}")]
    InvalidDelta(DeltaError),

    #[error("quantity must be positive, got {quantity}")]
    InvalidQuantity { quantity: i64 },

    #[error("product {0} cannot contain itself")]
    SelfReference(ProductId),

    #[error(transparent)]
    Domain(DomainError),

    #[error("bundle edge rejected: {0}")]
    Graph(BundleError),

    #[error("adding {component_id} to bundle {bundle_id} would create a cycle")]
    CycleDetected {
        bundle_id: ProductId,
        component_id: ProductId,
        path: Vec<ProductId>,
    },

    #[error(transparent)]
    CrossTenant(#[from] CrossTenantViolation),

    #[error(
        "{change_type} of {delta} on product {product_id} at warehouse {warehouse_id} \
         would take stock {current} below zero"
    )]
    NegativeStockRejected {
        product_id: ProductId,
        warehouse_id: WarehouseId,
        change_type: ChangeType,
        current: i64,
        delta: i64,
    },

    #[error(
        "insufficient stock for bundle {bundle_id}: component {component_id} needs {required}, \
         {available} available"
    )]
    InsufficientBundleStock {
        bundle_id: ProductId,
        component_id: ProductId,
        required: i64,
        available: i64,
    },

    #[error("timed out after {waited_ms}ms waiting for product {product_id} at warehouse {warehouse_id}")]
    LockTimeout {
        product_id: ProductId,
        warehouse_id: WarehouseId,
        waited_ms: u64,
    },

    #[error("concurrent modification: {0}")]
    Concurrency(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("ledger replay failed: {0}")]
    Replay(#[from] ReplayError),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl StockError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            StockError::InvalidDelta(_)
            | StockError::InvalidQuantity { .. }
            | StockError::SelfReference(_)
            | StockError::Graph(_) => ErrorCategory::Validation,
            StockError::Domain(err) => match err {
                DomainError::Validation(_) | DomainError::InvalidId(_) => ErrorCategory::Validation,
                DomainError::NotFound(_) => ErrorCategory::NotFound,
                DomainError::Conflict(_) | DomainError::InvariantViolation(_) => {
                    ErrorCategory::Consistency
                }
            },
            StockError::CycleDetected { .. } | StockError::CrossTenant(_) => {
                ErrorCategory::Consistency
            }
            StockError::NegativeStockRejected { .. } | StockError::InsufficientBundleStock { .. } => {
                ErrorCategory::Stock
            }
            StockError::LockTimeout { .. } | StockError::Concurrency(_) => ErrorCategory::Concurrency,
            StockError::NotFound(_) => ErrorCategory::NotFound,
            StockError::Replay(_) | StockError::Storage(_) => ErrorCategory::Infrastructure,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Concurrency
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        StockError::NotFound(what.into())
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        StockError::Domain(DomainError::validation(msg))
    }
}

impl From<DeltaError> for StockError {
    fn from(err: DeltaError) -> Self {
        StockError::InvalidDelta(err)
    }
}

impl From<DomainError> for StockError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound(what) => StockError::NotFound(what),
            other => StockError::Domain(other),
        }
    }
}

impl From<BundleError> for StockError {
    fn from(err: BundleError) -> Self {
        match err {
            BundleError::InvalidQuantity { quantity } => StockError::InvalidQuantity { quantity },
            BundleError::SelfReference(id) => StockError::SelfReference(id),
            BundleError::CrossTenantEdge(v) => StockError::CrossTenant(v),
            BundleError::CycleDetected {
                bundle_id,
                component_id,
                path,
            } => StockError::CycleDetected {
                bundle_id,
                component_id,
                path,
            },
            BundleError::UnknownProduct(id) => StockError::not_found(format!("product {id}")),
            BundleError::EdgeNotFound {
                bundle_id,
                component_id,
            } => StockError::not_found(format!("bundle edge {bundle_id} -> {component_id}")),
            other => StockError::Graph(other),
        }
    }
}

impl From<CatalogError> for StockError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Domain(domain) => domain.into(),
            CatalogError::CrossTenant(v) => StockError::CrossTenant(v),
        }
    }
}

impl From<LedgerError> for StockError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidDelta { source, .. } => StockError::InvalidDelta(source),
            LedgerError::UnknownRow(id) => StockError::not_found(format!("inventory row {id}")),
            LedgerError::Concurrency(msg) => StockError::Concurrency(msg),
            LedgerError::RowInUse(id) => {
                StockError::Domain(DomainError::conflict(format!("inventory row {id} has entries")))
            }
            LedgerError::Storage(msg) => StockError::Storage(msg),
            LedgerError::Poisoned => StockError::Storage("ledger lock poisoned".into()),
        }
    }
}
