use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use stockforge_core::{
    CompanyId, DomainError, Entity, ProductId, SupplierId, TenantScoped, WarehouseId,
    assert_same_company,
};

use crate::error::{CatalogError, CatalogResult};
use crate::records::{
    Company, Product, ProductUpdate, Supplier, SupplierProduct, Warehouse, validate_amount,
};

/// Lookups the engine needs from the catalog, plus product registration for
/// onboarding.
pub trait CatalogDirectory: Send + Sync {
    fn company(&self, id: CompanyId) -> Option<Company>;
    fn warehouse(&self, id: WarehouseId) -> Option<Warehouse>;
    fn product(&self, id: ProductId) -> Option<Product>;
    fn supplier(&self, id: SupplierId) -> Option<Supplier>;

    /// Register a product. Fails on an unknown company or a duplicate SKU.
    fn register_product(&self, product: Product) -> CatalogResult<()>;

    /// Remove a product that nothing references yet (onboarding rollback).
    fn unregister_product(&self, id: ProductId) -> CatalogResult<Product>;
}

impl<S> CatalogDirectory for Arc<S>
where
    S: CatalogDirectory + ?Sized,
{
    fn company(&self, id: CompanyId) -> Option<Company> {
        (**self).company(id)
    }

    fn warehouse(&self, id: WarehouseId) -> Option<Warehouse> {
        (**self).warehouse(id)
    }

    fn product(&self, id: ProductId) -> Option<Product> {
        (**self).product(id)
    }

    fn supplier(&self, id: SupplierId) -> Option<Supplier> {
        (**self).supplier(id)
    }

    fn register_product(&self, product: Product) -> CatalogResult<()> {
        (**self).register_product(product)
    }

    fn unregister_product(&self, id: ProductId) -> CatalogResult<Product> {
        (**self).unregister_product(id)
    }
}

#[derive(Debug)]
struct Table<T: Entity> {
    kind: &'static str,
    rows: HashMap<T::Id, T>,
}

impl<T: Entity> Table<T> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            rows: HashMap::new(),
        }
    }

    fn get(&self, id: T::Id) -> Option<&T> {
        self.rows.get(&id)
    }

    fn require(&self, id: T::Id) -> CatalogResult<&T> {
        self.rows
            .get(&id)
            .ok_or_else(|| CatalogError::not_found(format!("{} {:?}", self.kind, id)))
    }

    fn insert(&mut self, row: T) -> CatalogResult<()> {
        let id = row.id();
        if self.rows.contains_key(&id) {
            return Err(CatalogError::conflict(format!("{} {:?} already exists", self.kind, id)));
        }
        self.rows.insert(id, row);
        Ok(())
    }

    fn values(&self) -> impl Iterator<Item = &T> {
        self.rows.values()
    }
}

#[derive(Debug)]
struct CatalogState {
    companies: Table<Company>,
    warehouses: Table<Warehouse>,
    products: Table<Product>,
    suppliers: Table<Supplier>,
    supplier_products: HashMap<(SupplierId, ProductId), SupplierProduct>,
}

impl Default for CatalogState {
    fn default() -> Self {
        Self {
            companies: Table::new("company"),
            warehouses: Table::new("warehouse"),
            products: Table::new("product"),
            suppliers: Table::new("supplier"),
            supplier_products: HashMap::new(),
        }
    }
}

/// In-memory catalog for tests and embedded use.
///
/// Enforces the uniqueness rules of the relational layout: company names
/// globally, warehouse and supplier names per company, SKUs globally.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> CatalogResult<RwLockReadGuard<'_, CatalogState>> {
        self.state
            .read()
            .map_err(|_| CatalogError::Domain(DomainError::invariant("catalog lock poisoned")))
    }

    fn write(&self) -> CatalogResult<RwLockWriteGuard<'_, CatalogState>> {
        self.state
            .write()
            .map_err(|_| CatalogError::Domain(DomainError::invariant("catalog lock poisoned")))
    }

    pub fn register_company(&self, company: Company) -> CatalogResult<()> {
        let name = company.name.trim();
        if name.is_empty() {
            return Err(CatalogError::validation("company name cannot be empty"));
        }
        let mut state = self.write()?;
        if state.companies.values().any(|c| c.name.eq_ignore_ascii_case(name)) {
            return Err(CatalogError::conflict(format!("company name '{name}' is taken")));
        }
        state.companies.insert(company)
    }

    pub fn register_warehouse(&self, warehouse: Warehouse) -> CatalogResult<()> {
        let name = warehouse.name.trim();
        if name.is_empty() {
            return Err(CatalogError::validation("warehouse name cannot be empty"));
        }
        let mut state = self.write()?;
        state.companies.require(warehouse.company_id)?;
        let taken = state
            .warehouses
            .values()
            .any(|w| w.company_id == warehouse.company_id && w.name == name);
        if taken {
            return Err(CatalogError::conflict(format!(
                "warehouse '{name}' already exists in company {}",
                warehouse.company_id
            )));
        }
        state.warehouses.insert(warehouse)
    }

    pub fn register_supplier(&self, supplier: Supplier) -> CatalogResult<()> {
        let name = supplier.name.trim();
        if name.is_empty() {
            return Err(CatalogError::validation("supplier name cannot be empty"));
        }
        let mut state = self.write()?;
        state.companies.require(supplier.company_id)?;
        let taken = state
            .suppliers
            .values()
            .any(|s| s.company_id == supplier.company_id && s.name == name);
        if taken {
            return Err(CatalogError::conflict(format!(
                "supplier '{name}' already exists in company {}",
                supplier.company_id
            )));
        }
        state.suppliers.insert(supplier)
    }

    /// Link a supplier to a product. Both must belong to the same company.
    pub fn link_supplier_product(&self, link: SupplierProduct) -> CatalogResult<()> {
        if let Some(cost) = link.cost_price {
            validate_amount("cost_price", cost)?;
        }
        let mut state = self.write()?;
        let supplier = state.suppliers.require(link.supplier_id)?;
        let product = state.products.require(link.product_id)?;
        assert_same_company(supplier, product)?;

        let key = (link.supplier_id, link.product_id);
        if state.supplier_products.contains_key(&key) {
            return Err(CatalogError::conflict(format!(
                "supplier {} already supplies product {}",
                link.supplier_id, link.product_id
            )));
        }
        state.supplier_products.insert(key, link);
        Ok(())
    }

    pub fn update_product(&self, id: ProductId, update: ProductUpdate) -> CatalogResult<Product> {
        if let Some(price) = update.price {
            validate_amount("price", price)?;
        }
        if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(CatalogError::validation("name cannot be empty"));
        }
        let mut state = self.write()?;
        let product = state
            .products
            .rows
            .get_mut(&id)
            .ok_or_else(|| CatalogError::not_found(format!("product {id}")))?;
        if let Some(name) = update.name {
            product.name = name.trim().to_string();
        }
        if let Some(description) = update.description {
            product.description = Some(description);
        }
        if let Some(price) = update.price {
            product.price = Some(price);
        }
        Ok(product.clone())
    }

    pub fn products_of(&self, company_id: CompanyId) -> Vec<Product> {
        let Ok(state) = self.read() else {
            return vec![];
        };
        state
            .products
            .values()
            .filter(|p| p.company_id == company_id)
            .cloned()
            .collect()
    }

    pub fn warehouses_of(&self, company_id: CompanyId) -> Vec<Warehouse> {
        let Ok(state) = self.read() else {
            return vec![];
        };
        state
            .warehouses
            .values()
            .filter(|w| w.company_id == company_id)
            .cloned()
            .collect()
    }

    /// Suppliers of a product, read within a company scope.
    pub fn suppliers_for_product(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
    ) -> CatalogResult<Vec<(Supplier, SupplierProduct)>> {
        let state = self.read()?;
        let product = state.products.require(product_id)?;
        assert_same_company(&company_id, product)?;

        let mut out = Vec::new();
        for link in state.supplier_products.values().filter(|l| l.product_id == product_id) {
            let supplier = state.suppliers.require(link.supplier_id)?;
            assert_same_company(&company_id, supplier)?;
            out.push((supplier.clone(), link.clone()));
        }
        out.sort_by_key(|(s, _)| s.id);
        Ok(out)
    }
}

impl CatalogDirectory for InMemoryCatalog {
    fn company(&self, id: CompanyId) -> Option<Company> {
        self.read().ok()?.companies.get(id).cloned()
    }

    fn warehouse(&self, id: WarehouseId) -> Option<Warehouse> {
        self.read().ok()?.warehouses.get(id).cloned()
    }

    fn product(&self, id: ProductId) -> Option<Product> {
        self.read().ok()?.products.get(id).cloned()
    }

    fn supplier(&self, id: SupplierId) -> Option<Supplier> {
        self.read().ok()?.suppliers.get(id).cloned()
    }

    fn register_product(&self, product: Product) -> CatalogResult<()> {
        if product.name.trim().is_empty() {
            return Err(CatalogError::validation("name cannot be empty"));
        }
        if product.sku.trim().is_empty() {
            return Err(CatalogError::validation("sku cannot be empty"));
        }
        if let Some(price) = product.price {
            validate_amount("price", price)?;
        }

        let mut state = self.write()?;
        state.companies.require(product.company_id)?;
        if state.products.values().any(|p| p.sku == product.sku) {
            return Err(CatalogError::conflict(format!("sku '{}' must be unique", product.sku)));
        }
        tracing::debug!(
            product_id = %product.id,
            company_id = %product.company_id(),
            sku = %product.sku,
            "product registered"
        );
        state.products.insert(product)
    }

    fn unregister_product(&self, id: ProductId) -> CatalogResult<Product> {
        let mut state = self.write()?;
        if state.supplier_products.keys().any(|(_, p)| *p == id) {
            return Err(CatalogError::conflict(format!(
                "product {id} is referenced by supplier links"
            )));
        }
        state
            .products
            .rows
            .remove(&id)
            .ok_or_else(|| CatalogError::not_found(format!("product {id}")))
    }
}
