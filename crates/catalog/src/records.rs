use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockforge_core::{
    CompanyId, DomainError, DomainResult, Entity, ProductId, SupplierId, TenantScoped, WarehouseId,
};

/// Tenant root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
}

/// A stocking location owned by one company. `(company_id, name)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub company_id: CompanyId,
    pub name: String,
    pub address: Option<String>,
}

/// A sellable item. `sku` is unique across all companies.
///
/// Products carry no warehouse: where they are stocked is expressed by
/// inventory rows, one per (product, warehouse) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub company_id: CompanyId,
    pub name: String,
    pub sku: String,
    pub description: Option<String>,
    /// Exact decimal; never a float.
    pub price: Option<Decimal>,
    pub is_bundle: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier {
    pub id: SupplierId,
    pub company_id: CompanyId,
    pub name: String,
    pub contact_email: Option<String>,
}

/// Supplier ↔ product link. Both sides must belong to the same company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierProduct {
    pub supplier_id: SupplierId,
    pub product_id: ProductId,
    pub lead_time_days: Option<u32>,
    pub cost_price: Option<Decimal>,
}

/// Input for onboarding a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub company_id: CompanyId,
    pub name: String,
    pub sku: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub is_bundle: bool,
}

impl NewProduct {
    /// Check required fields and value ranges. SKU uniqueness is checked by the
    /// directory, which is the only place that sees every company.
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if self.sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if let Some(price) = self.price {
            validate_amount("price", price)?;
        }
        Ok(())
    }

    pub fn into_product(self, id: ProductId) -> Product {
        Product {
            id,
            company_id: self.company_id,
            name: self.name.trim().to_string(),
            sku: self.sku.trim().to_string(),
            description: self.description,
            price: self.price,
            is_bundle: self.is_bundle,
        }
    }
}

/// Price/description change. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
}

/// Parse a price from request text without passing through a float.
pub fn parse_price(raw: &str) -> DomainResult<Decimal> {
    let value = Decimal::from_str(raw.trim())
        .map_err(|e| DomainError::validation(format!("price '{raw}' is not a decimal: {e}")))?;
    validate_amount("price", value)?;
    Ok(value)
}

pub(crate) fn validate_amount(field: &str, value: Decimal) -> DomainResult<()> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(DomainError::validation(format!("{field} cannot be negative")));
    }
    Ok(())
}

impl Entity for Company {
    type Id = CompanyId;

    fn id(&self) -> CompanyId {
        self.id
    }
}

impl Entity for Warehouse {
    type Id = WarehouseId;

    fn id(&self) -> WarehouseId {
        self.id
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> ProductId {
        self.id
    }
}

impl Entity for Supplier {
    type Id = SupplierId;

    fn id(&self) -> SupplierId {
        self.id
    }
}

impl TenantScoped for Warehouse {
    fn scope_kind(&self) -> &'static str {
        "warehouse"
    }

    fn company_id(&self) -> CompanyId {
        self.company_id
    }
}

impl TenantScoped for Product {
    fn scope_kind(&self) -> &'static str {
        "product"
    }

    fn company_id(&self) -> CompanyId {
        self.company_id
    }
}

impl TenantScoped for Supplier {
    fn scope_kind(&self) -> &'static str {
        "supplier"
    }

    fn company_id(&self) -> CompanyId {
        self.company_id
    }
}
