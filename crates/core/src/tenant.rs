//! Tenant scope guard.
//!
//! Every cross-entity write (supplier links, bundle edges, stock mutations)
//! passes through [`assert_same_company`] before touching storage. The guard is
//! explicit rather than row-level security so it can be tested without a
//! database.

use thiserror::Error;

use crate::id::CompanyId;

/// Marks records that belong to exactly one company.
pub trait TenantScoped {
    /// Short record kind used in diagnostics (e.g. `"product"`).
    fn scope_kind(&self) -> &'static str;

    fn company_id(&self) -> CompanyId;
}

/// The request scope itself: a bare company id.
impl TenantScoped for CompanyId {
    fn scope_kind(&self) -> &'static str {
        "company"
    }

    fn company_id(&self) -> CompanyId {
        *self
    }
}

/// Two records from different companies were combined.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error(
    "cross-tenant violation: {left_kind} belongs to company {left_company}, \
     {right_kind} belongs to company {right_company}"
)]
pub struct CrossTenantViolation {
    pub left_kind: &'static str,
    pub left_company: CompanyId,
    pub right_kind: &'static str,
    pub right_company: CompanyId,
}

/// Fail with [`CrossTenantViolation`] unless both records share a company.
pub fn assert_same_company<A, B>(a: &A, b: &B) -> Result<(), CrossTenantViolation>
where
    A: TenantScoped + ?Sized,
    B: TenantScoped + ?Sized,
{
    let (left, right) = (a.company_id(), b.company_id());
    if left == right {
        return Ok(());
    }
    Err(CrossTenantViolation {
        left_kind: a.scope_kind(),
        left_company: left,
        right_kind: b.scope_kind(),
        right_company: right,
    })
}
