use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockforge_core::DomainError;

/// Why a quantity changed. Stored verbatim in `inventory_transactions.change_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Receipt,
    Sale,
    Adjustment,
    TransferIn,
    TransferOut,
    BundleConsumption,
}

impl ChangeType {
    pub const ALL: [ChangeType; 6] = [
        ChangeType::Receipt,
        ChangeType::Sale,
        ChangeType::Adjustment,
        ChangeType::TransferIn,
        ChangeType::TransferOut,
        ChangeType::BundleConsumption,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::Receipt => "receipt",
            ChangeType::Sale => "sale",
            ChangeType::Adjustment => "adjustment",
            ChangeType::TransferIn => "transfer_in",
            ChangeType::TransferOut => "transfer_out",
            ChangeType::BundleConsumption => "bundle_consumption",
        }
    }

    pub fn is_adjustment(self) -> bool {
        self == ChangeType::Adjustment
    }

    /// Required sign of the delta: `Some(1)` inbound, `Some(-1)` outbound,
    /// `None` for adjustments which may go either way.
    fn required_sign(self) -> Option<i64> {
        match self {
            ChangeType::Receipt | ChangeType::TransferIn => Some(1),
            ChangeType::Sale | ChangeType::TransferOut | ChangeType::BundleConsumption => Some(-1),
            ChangeType::Adjustment => None,
        }
    }

    /// Reject a zero delta or one whose sign contradicts this change type.
    pub fn check_delta(self, delta: i64) -> Result<(), DeltaError> {
        if delta == 0 {
            return Err(DeltaError::Zero);
        }
        match self.required_sign() {
            Some(sign) if delta.signum() != sign => Err(DeltaError::WrongSign {
                change_type: self,
                expected: if sign > 0 { "positive" } else { "negative" },
                delta,
            }),
            _ => Ok(()),
        }
    }
}

impl core::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChangeType::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown change_type '{s}'")))
    }
}

/// A delta the ledger refuses to record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeltaError {
    #[error("delta cannot be zero")]
    Zero,

    #[error("{change_type} requires a {expected} delta, got {delta}")]
    WrongSign {
        change_type: ChangeType,
        expected: &'static str,
        delta: i64,
    },

    #[error("{change_type} of {delta} would take quantity {current} below zero")]
    WouldGoNegative {
        change_type: ChangeType,
        current: i64,
        delta: i64,
    },

    #[error("quantity overflow applying {delta} to {current}")]
    Overflow { current: i64, delta: i64 },
}

/// Validate `delta` against `current` and return the resulting quantity.
///
/// Only an `adjustment` with `allow_negative` set may leave the quantity below
/// zero; every other change must keep it non-negative.
pub fn apply_delta(
    change_type: ChangeType,
    current: i64,
    delta: i64,
    allow_negative: bool,
) -> Result<i64, DeltaError> {
    change_type.check_delta(delta)?;

    let next = current
        .checked_add(delta)
        .ok_or(DeltaError::Overflow { current, delta })?;

    if next < 0 && !(change_type.is_adjustment() && allow_negative) {
        return Err(DeltaError::WouldGoNegative {
            change_type,
            current,
            delta,
        });
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_delta_is_rejected_for_every_type() {
        for change_type in ChangeType::ALL {
            assert_eq!(apply_delta(change_type, 10, 0, true), Err(DeltaError::Zero));
        }
    }

    #[test]
    fn sign_follows_change_type() {
        assert_eq!(apply_delta(ChangeType::Receipt, 0, 5, false), Ok(5));
        assert!(matches!(
            apply_delta(ChangeType::Receipt, 10, -5, false),
            Err(DeltaError::WrongSign { .. })
        ));
        assert!(matches!(
            apply_delta(ChangeType::Sale, 10, 5, false),
            Err(DeltaError::WrongSign { .. })
        ));
        assert_eq!(apply_delta(ChangeType::Adjustment, 10, -3, false), Ok(7));
        assert_eq!(apply_delta(ChangeType::Adjustment, 10, 3, false), Ok(13));
    }

    #[test]
    fn going_negative_needs_an_adjustment_with_override() {
        assert!(matches!(
            apply_delta(ChangeType::Sale, 2, -3, true),
            Err(DeltaError::WouldGoNegative { current: 2, delta: -3, .. })
        ));
        assert!(matches!(
            apply_delta(ChangeType::Adjustment, 2, -3, false),
            Err(DeltaError::WouldGoNegative { .. })
        ));
        assert_eq!(apply_delta(ChangeType::Adjustment, 2, -3, true), Ok(-1));
    }

    #[test]
    fn overflow_is_reported() {
        assert!(matches!(
            apply_delta(ChangeType::Receipt, i64::MAX, 1, false),
            Err(DeltaError::Overflow { .. })
        ));
    }

    #[test]
    fn change_type_round_trips_through_str() {
        for change_type in ChangeType::ALL {
            assert_eq!(change_type.as_str().parse::<ChangeType>().unwrap(), change_type);
        }
        assert!("refund".parse::<ChangeType>().is_err());
    }
}
