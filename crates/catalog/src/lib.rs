//! Catalog records supplied by the admin service.
//!
//! The engine never creates companies, warehouses or suppliers; it reads their
//! ids and `company_id` through [`CatalogDirectory`]. Products are the one
//! exception: onboarding registers a product together with its first inventory
//! row so the two can never exist apart.

pub mod directory;
pub mod error;
pub mod records;

pub use directory::{CatalogDirectory, InMemoryCatalog};
pub use error::{CatalogError, CatalogResult};
pub use records::{
    Company, NewProduct, Product, ProductUpdate, Supplier, SupplierProduct, Warehouse, parse_price,
};
