//! Ledger replay: the authoritative quantity of a row is the fold of its entries.

use thiserror::Error;

use stockforge_core::InventoryId;

use crate::entry::LedgerEntry;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error("entry for row {found} replayed into row {expected}")]
    ForeignEntry {
        expected: InventoryId,
        found: InventoryId,
    },

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("quantity overflow while replaying seq {seq}")]
    Overflow { seq: u64 },
}

/// Result of folding a row's ledger.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Replayed {
    pub quantity: i64,
    /// Sequence number of the last entry folded (0 for an empty ledger).
    pub last_seq: u64,
    pub entries: usize,
}

/// Fold `entries` (which must be the row's full ledger from seq 1, in order)
/// into its quantity.
pub fn replay<'a>(
    inventory_id: InventoryId,
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
) -> Result<Replayed, ReplayError> {
    let mut out = Replayed::default();
    for entry in entries {
        if entry.inventory_id != inventory_id {
            return Err(ReplayError::ForeignEntry {
                expected: inventory_id,
                found: entry.inventory_id,
            });
        }
        if entry.seq != out.last_seq + 1 {
            return Err(ReplayError::NonMonotonicSequence {
                last: out.last_seq,
                found: entry.seq,
            });
        }
        out.quantity = out
            .quantity
            .checked_add(entry.delta)
            .ok_or(ReplayError::Overflow { seq: entry.seq })?;
        out.last_seq = entry.seq;
        out.entries += 1;
    }
    Ok(out)
}
