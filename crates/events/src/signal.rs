//! Structured signals the engine emits for external observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockforge_core::{CompanyId, InventoryId, ProductId, WarehouseId};

use crate::bus::EventBus;
use crate::event::Event;

/// The cached quantity of an inventory row disagreed with its ledger and was
/// overwritten with the ledger value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftDetected {
    pub company_id: CompanyId,
    pub inventory_id: InventoryId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    /// Quantity obtained by replaying the ledger (authoritative).
    pub expected: i64,
    /// Quantity that was cached before repair.
    pub actual: i64,
    pub occurred_at: DateTime<Utc>,
}

/// A bundle edge was rejected because it would close a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleDetected {
    pub company_id: CompanyId,
    pub bundle_id: ProductId,
    pub component_id: ProductId,
    /// Existing path from `component_id` back to `bundle_id`.
    pub path: Vec<ProductId>,
    pub occurred_at: DateTime<Utc>,
}

/// A row lock could not be acquired within the configured bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockTimeout {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub waited_ms: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum EngineSignal {
    DriftDetected(DriftDetected),
    CycleDetected(CycleDetected),
    LockTimeout(LockTimeout),
}

impl Event for EngineSignal {
    fn event_type(&self) -> &'static str {
        match self {
            EngineSignal::DriftDetected(_) => "stock.drift_detected",
            EngineSignal::CycleDetected(_) => "bundle.cycle_detected",
            EngineSignal::LockTimeout(_) => "stock.lock_timeout",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            EngineSignal::DriftDetected(s) => s.occurred_at,
            EngineSignal::CycleDetected(s) => s.occurred_at,
            EngineSignal::LockTimeout(s) => s.occurred_at,
        }
    }
}

/// Object-safe sink the engine components hold (`Arc<dyn SignalSink>`).
///
/// Emitting never fails from the caller's point of view: a broken transport is
/// logged and the signal dropped.
pub trait SignalSink: Send + Sync {
    fn emit(&self, signal: EngineSignal);
}

impl<B> SignalSink for B
where
    B: EventBus<EngineSignal>,
{
    fn emit(&self, signal: EngineSignal) {
        let event_type = signal.event_type();
        if let Err(err) = self.publish(signal) {
            tracing::warn!(event_type, error = ?err, "failed to publish engine signal");
        }
    }
}

/// Sink that discards every signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl SignalSink for NullSink {
    fn emit(&self, _signal: EngineSignal) {}
}
