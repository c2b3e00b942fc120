//! Ledger Store: the append-only source of truth for stock quantities, plus
//! the per-row cached quantity it keeps in step.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use r#trait::{LedgerError, LedgerStore};
