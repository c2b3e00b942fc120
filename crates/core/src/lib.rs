//! `stockforge-core`: shared building blocks for the stock engine.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;
pub mod tenant;
pub mod version;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{CompanyId, InventoryId, ProductId, SupplierId, WarehouseId};
pub use tenant::{CrossTenantViolation, TenantScoped, assert_same_company};
pub use version::ExpectedVersion;
