//! Inventory domain rules (pure, no IO).
//!
//! - [`change_type`]: the ledger's change tags and the delta rules they impose
//! - [`entry`]: inventory rows and immutable ledger entries
//! - [`replay`]: folding a row's ledger into its authoritative quantity
//! - [`bundle`]: the bundle-of-bundles product graph

pub mod bundle;
pub mod change_type;
pub mod entry;
pub mod replay;

pub use bundle::{
    BundleEdge, BundleError, BundleGraph, Expansion, GraphNode, availability, consumption_plan,
};
pub use change_type::{ChangeType, DeltaError, apply_delta};
pub use entry::{InventoryRow, LedgerEntry, PendingEntry, TransactionId};
pub use replay::{ReplayError, Replayed, replay};
