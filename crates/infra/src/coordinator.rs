//! Stock Mutation Coordinator.
//!
//! Every stock write goes through [`StockCoordinator`]:
//!
//! ```text
//! request
//!   ↓
//! 1. Validate (delta sign, quantities)          → no lock taken yet
//!   ↓
//! 2. Scope guard (product/warehouse ∈ company)  → CrossTenantViolation
//!   ↓
//! 3. Lock every affected (product, warehouse) in global order
//!   ↓
//! 4. Check stock against the row's quantity
//!   ↓
//! 5. Append ledger entries + update caches      → one atomic commit
//!   ↓
//! 6. Release locks (guard drop)
//! ```
//!
//! A request that fails at any step before 5 has written nothing. Step 5 is
//! all-or-nothing, so a failure there leaves ledger and cache as they were.

use std::sync::Arc;
use std::thread;

use stockforge_catalog::{CatalogDirectory, NewProduct, Product, Warehouse};
use stockforge_core::{CompanyId, InventoryId, ProductId, WarehouseId, assert_same_company};
use stockforge_events::SignalSink;
use stockforge_inventory::{
    BundleEdge, ChangeType, DeltaError, Expansion, InventoryRow, LedgerEntry, PendingEntry,
    TransactionId, apply_delta, availability, consumption_plan,
};

use crate::bundles::BundleRegistry;
use crate::config::EngineConfig;
use crate::error::{StockError, StockResult};
use crate::ledger::{LedgerError, LedgerStore};
use crate::locks::{RowLockTable, StockKey};
use crate::projector::{InventoryProjector, ReconcileReport};

/// A single-row stock mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRequest {
    pub company_id: CompanyId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub change_type: ChangeType,
    pub delta: i64,
    pub note: Option<String>,
    /// Only honoured for `adjustment`.
    pub allow_negative: bool,
}

impl ChangeRequest {
    pub fn new(
        company_id: CompanyId,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        change_type: ChangeType,
        delta: i64,
    ) -> Self {
        Self {
            company_id,
            product_id,
            warehouse_id,
            change_type,
            delta,
            note: None,
            allow_negative: false,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn allowing_negative(mut self) -> Self {
        self.allow_negative = true;
        self
    }
}

/// Result of a committed [`ChangeRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockChange {
    pub inventory_id: InventoryId,
    pub transaction_id: TransactionId,
    pub new_quantity: i64,
    /// Bundles containing the product, directly or transitively. Their
    /// availability may have changed.
    pub affected_bundles: Vec<ProductId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleConsumed {
    pub bundle_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub units: i64,
    /// One `bundle_consumption` entry per base component, in component order.
    pub entries: Vec<LedgerEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub outbound: LedgerEntry,
    pub inbound: LedgerEntry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Onboarded {
    pub product_id: ProductId,
    pub inventory_id: InventoryId,
    /// The initial `receipt`, absent when the product starts at zero.
    pub transaction_id: Option<TransactionId>,
}

pub struct StockCoordinator<S, C> {
    catalog: C,
    projector: InventoryProjector<S>,
    locks: Arc<RowLockTable>,
    bundles: BundleRegistry<C>,
    config: EngineConfig,
}

impl<S, C> StockCoordinator<S, C>
where
    S: LedgerStore,
    C: CatalogDirectory + Clone,
{
    pub fn new(store: S, catalog: C, signals: Arc<dyn SignalSink>, config: EngineConfig) -> Self {
        let locks = Arc::new(RowLockTable::new(config.lock_timeout, signals.clone()));
        let projector = InventoryProjector::new(
            store,
            locks.clone(),
            signals.clone(),
            config.verify_on_read,
        );
        let bundles = BundleRegistry::new(catalog.clone(), signals);
        Self {
            catalog,
            projector,
            locks,
            bundles,
            config,
        }
    }
}

impl<S, C> StockCoordinator<S, C>
where
    S: LedgerStore,
    C: CatalogDirectory,
{
    pub fn projector(&self) -> &InventoryProjector<S> {
        &self.projector
    }

    pub fn bundles(&self) -> &BundleRegistry<C> {
        &self.bundles
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn locks(&self) -> &RowLockTable {
        &self.locks
    }

    /// Apply one delta to one (product, warehouse) pair.
    ///
    /// A decrement that would take stock below zero fails with
    /// `NegativeStockRejected`; an `adjustment` may do so only with
    /// [`ChangeRequest::allowing_negative`].
    pub fn apply_change(&self, request: ChangeRequest) -> StockResult<StockChange> {
        request.change_type.check_delta(request.delta)?;
        self.scoped_product(request.company_id, request.product_id)?;
        self.scoped_warehouse(request.company_id, request.warehouse_id)?;

        let guard = self
            .locks
            .acquire([StockKey::new(request.product_id, request.warehouse_id)])?;
        let store = self.projector.store();

        let existing = store.find_row(request.product_id, request.warehouse_id)?;
        let before = match &existing {
            Some(row) => {
                // Repairs a flagged cache before the write lands on it.
                self.projector.quantity_locked(row)?;
                self.projector.ledger_quantity_locked(row)?
            }
            None => 0,
        };
        // A refused delta never creates a row.
        let new_quantity =
            apply_delta(request.change_type, before, request.delta, request.allow_negative)
                .map_err(|err| delta_rejection(request.product_id, request.warehouse_id, err))?;
        let (row, created) = match existing {
            Some(row) => (row, false),
            None => (
                store.open_row(request.company_id, request.product_id, request.warehouse_id)?,
                true,
            ),
        };

        let entry = PendingEntry::new(row.id, request.change_type, request.delta)
            .expecting(store.version(row.id)?)
            .with_note(request.note)
            .allowing_negative(request.allow_negative);

        let committed = match store.append(vec![entry]) {
            Ok(committed) => committed,
            Err(err) => {
                if created {
                    self.discard_row(&row);
                }
                return Err(self.append_failed(err, &[row]));
            }
        };
        let transaction_id = committed
            .first()
            .map(|e| e.transaction_id)
            .ok_or_else(|| StockError::Storage("ledger returned no committed entry".into()))?;
        self.projector.settle_locked(&row, new_quantity);
        // Graph locks are never taken while holding a row lock.
        drop(guard);

        tracing::debug!(
            company_id = %request.company_id,
            product_id = %request.product_id,
            warehouse_id = %request.warehouse_id,
            inventory_id = %row.id,
            change_type = %request.change_type,
            delta = request.delta,
            new_quantity,
            transaction_id = %transaction_id,
            "stock change committed"
        );

        Ok(StockChange {
            inventory_id: row.id,
            transaction_id,
            new_quantity,
            affected_bundles: self
                .bundles
                .dependents(request.company_id, request.product_id)
                .into_iter()
                .collect(),
        })
    }

    /// [`Self::apply_change`], retrying lock timeouts with the configured
    /// backoff. Every other error is returned at once.
    pub fn apply_change_with_retry(&self, request: ChangeRequest) -> StockResult<StockChange> {
        let policy = &self.config.retry;
        let mut attempt = 1;
        loop {
            match self.apply_change(request.clone()) {
                Err(StockError::LockTimeout { .. }) if policy.should_retry(attempt) => {
                    let delay = policy.delay_for_attempt(attempt);
                    tracing::debug!(
                        product_id = %request.product_id,
                        warehouse_id = %request.warehouse_id,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "retrying stock change after lock timeout"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    /// Consume `units` of a bundle: one `bundle_consumption` entry per base
    /// component, committed together or not at all.
    ///
    /// The bundle's own row is locked but never decremented.
    pub fn consume_bundle(
        &self,
        company_id: CompanyId,
        bundle_id: ProductId,
        warehouse_id: WarehouseId,
        units: i64,
        note: Option<String>,
    ) -> StockResult<BundleConsumed> {
        if units <= 0 {
            return Err(StockError::InvalidQuantity { quantity: units });
        }
        let bundle = self.scoped_product(company_id, bundle_id)?;
        self.scoped_warehouse(company_id, warehouse_id)?;

        // Held until commit so the expansion cannot change underneath us.
        let shared = self.bundles.graph(company_id);
        let graph = shared.read();
        if !bundle.is_bundle || !graph.has_components(bundle_id) {
            return Err(StockError::validation(format!(
                "product {bundle_id} has no bundle components"
            )));
        }
        let expansion = graph.expand(bundle_id)?;
        let plan = consumption_plan(bundle_id, &expansion, units)?;

        let keys = std::iter::once(StockKey::new(bundle_id, warehouse_id)).chain(
            plan.iter()
                .map(|(component, _)| StockKey::new(*component, warehouse_id)),
        );
        let _guard = self.locks.acquire(keys)?;
        let store = self.projector.store();

        let mut rows = Vec::with_capacity(plan.len());
        let mut batch = Vec::with_capacity(plan.len());
        let mut remaining = Vec::with_capacity(plan.len());
        for &(component_id, delta) in &plan {
            let required = -delta;
            let row = store.find_row(component_id, warehouse_id)?;
            let available = match &row {
                Some(row) => self.projector.ledger_quantity_locked(row)?,
                None => 0,
            };
            let Some(row) = row.filter(|_| available >= required) else {
                return Err(StockError::InsufficientBundleStock {
                    bundle_id,
                    component_id,
                    required,
                    available,
                });
            };
            batch.push(
                PendingEntry::new(row.id, ChangeType::BundleConsumption, delta)
                    .expecting(store.version(row.id)?)
                    .with_note(note.clone()),
            );
            rows.push(row);
            remaining.push(available + delta);
        }

        let entries = store.append(batch).map_err(|err| match err {
            LedgerError::InvalidDelta {
                inventory_id,
                source: DeltaError::WouldGoNegative { current, delta, .. },
            } => match rows.iter().find(|r| r.id == inventory_id) {
                Some(row) => StockError::InsufficientBundleStock {
                    bundle_id,
                    component_id: row.product_id,
                    required: -delta,
                    available: current,
                },
                None => StockError::InvalidDelta(DeltaError::WouldGoNegative {
                    change_type: ChangeType::BundleConsumption,
                    current,
                    delta,
                }),
            },
            other => self.append_failed(other, &rows),
        })?;
        for (row, quantity) in rows.iter().zip(remaining) {
            self.projector.settle_locked(row, quantity);
        }
        drop(graph);

        tracing::info!(
            company_id = %company_id,
            bundle_id = %bundle_id,
            warehouse_id = %warehouse_id,
            units,
            components = entries.len(),
            "bundle consumed"
        );

        Ok(BundleConsumed {
            bundle_id,
            warehouse_id,
            units,
            entries,
        })
    }

    /// Move `quantity` of a product between two warehouses of its company.
    pub fn transfer(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
        from_warehouse: WarehouseId,
        to_warehouse: WarehouseId,
        quantity: i64,
        note: Option<String>,
    ) -> StockResult<Transfer> {
        if quantity <= 0 {
            return Err(StockError::InvalidQuantity { quantity });
        }
        if from_warehouse == to_warehouse {
            return Err(StockError::validation(
                "transfer source and destination must differ",
            ));
        }
        self.scoped_product(company_id, product_id)?;
        self.scoped_warehouse(company_id, from_warehouse)?;
        self.scoped_warehouse(company_id, to_warehouse)?;

        let _guard = self.locks.acquire([
            StockKey::new(product_id, from_warehouse),
            StockKey::new(product_id, to_warehouse),
        ])?;
        let store = self.projector.store();

        let Some(source) = store.find_row(product_id, from_warehouse)? else {
            return Err(StockError::NegativeStockRejected {
                product_id,
                warehouse_id: from_warehouse,
                change_type: ChangeType::TransferOut,
                current: 0,
                delta: -quantity,
            });
        };
        self.projector.quantity_locked(&source)?;
        let source_before = self.projector.ledger_quantity_locked(&source)?;

        let (destination, created, destination_before) =
            match store.find_row(product_id, to_warehouse)? {
                Some(row) => {
                    self.projector.quantity_locked(&row)?;
                    let before = self.projector.ledger_quantity_locked(&row)?;
                    (row, false, before)
                }
                None => (store.open_row(company_id, product_id, to_warehouse)?, true, 0),
            };

        let batch = vec![
            PendingEntry::new(source.id, ChangeType::TransferOut, -quantity)
                .expecting(store.version(source.id)?)
                .with_note(note.clone()),
            PendingEntry::new(destination.id, ChangeType::TransferIn, quantity)
                .expecting(store.version(destination.id)?)
                .with_note(note),
        ];

        let committed = match store.append(batch) {
            Ok(committed) => committed,
            Err(err) => {
                if created {
                    self.discard_row(&destination);
                }
                return Err(self.append_failed(err, &[source, destination]));
            }
        };
        let mut committed = committed.into_iter();
        let (Some(outbound), Some(inbound)) = (committed.next(), committed.next()) else {
            return Err(StockError::Storage("ledger returned an incomplete transfer".into()));
        };
        self.projector.settle_locked(&source, source_before - quantity);
        self.projector.settle_locked(&destination, destination_before + quantity);

        tracing::info!(
            company_id = %company_id,
            product_id = %product_id,
            from_warehouse = %from_warehouse,
            to_warehouse = %to_warehouse,
            quantity,
            "stock transferred"
        );

        Ok(Transfer { outbound, inbound })
    }

    /// Register a product together with its first inventory row.
    ///
    /// Either both exist afterwards or neither does: a failed stock write
    /// unregisters the product again.
    pub fn onboard_product(
        &self,
        product: NewProduct,
        warehouse_id: WarehouseId,
        initial_quantity: i64,
    ) -> StockResult<Onboarded> {
        product.validate()?;
        if initial_quantity < 0 {
            return Err(StockError::InvalidQuantity {
                quantity: initial_quantity,
            });
        }
        let company_id = product.company_id;
        let warehouse = self.warehouse(warehouse_id)?;
        assert_same_company(&company_id, &warehouse)?;

        let product_id = ProductId::new();
        self.catalog.register_product(product.into_product(product_id))?;

        match self.stock_new_product(company_id, product_id, warehouse_id, initial_quantity) {
            Ok(onboarded) => {
                tracing::info!(
                    company_id = %company_id,
                    product_id = %product_id,
                    warehouse_id = %warehouse_id,
                    initial_quantity,
                    "product onboarded"
                );
                Ok(onboarded)
            }
            Err(err) => {
                if let Err(rollback) = self.catalog.unregister_product(product_id) {
                    tracing::error!(
                        product_id = %product_id,
                        error = %rollback,
                        "failed to roll back product registration"
                    );
                }
                Err(err)
            }
        }
    }

    fn stock_new_product(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        initial_quantity: i64,
    ) -> StockResult<Onboarded> {
        let _guard = self.locks.acquire([StockKey::new(product_id, warehouse_id)])?;
        let store = self.projector.store();
        let row = store.open_row(company_id, product_id, warehouse_id)?;

        let mut transaction_id = None;
        if initial_quantity > 0 {
            let receipt = PendingEntry::new(row.id, ChangeType::Receipt, initial_quantity)
                .expecting(0)
                .with_note(Some("initial stock".to_string()));
            match store.append(vec![receipt]) {
                Ok(committed) => transaction_id = committed.first().map(|e| e.transaction_id),
                Err(err) => {
                    self.discard_row(&row);
                    return Err(self.append_failed(err, &[row]));
                }
            }
        }

        Ok(Onboarded {
            product_id,
            inventory_id: row.id,
            transaction_id,
        })
    }

    /// Current quantity of a pair within a company; 0 when it was never stocked.
    pub fn current_quantity(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> StockResult<i64> {
        self.scoped_product(company_id, product_id)?;
        self.scoped_warehouse(company_id, warehouse_id)?;
        self.projector.current_quantity(product_id, warehouse_id)
    }

    /// Ledger entries of a pair with `seq > after_seq`.
    pub fn history(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        after_seq: u64,
    ) -> StockResult<Vec<LedgerEntry>> {
        self.scoped_product(company_id, product_id)?;
        self.scoped_warehouse(company_id, warehouse_id)?;
        match self.projector.store().find_row(product_id, warehouse_id)? {
            Some(row) => Ok(self.projector.store().read_since(row.id, after_seq)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn add_edge(
        &self,
        company_id: CompanyId,
        bundle_id: ProductId,
        component_id: ProductId,
        quantity: i64,
    ) -> StockResult<BundleEdge> {
        self.bundles.add_edge(company_id, bundle_id, component_id, quantity)
    }

    pub fn remove_edge(
        &self,
        company_id: CompanyId,
        bundle_id: ProductId,
        component_id: ProductId,
    ) -> StockResult<BundleEdge> {
        self.bundles.remove_edge(company_id, bundle_id, component_id)
    }

    pub fn components(
        &self,
        company_id: CompanyId,
        bundle_id: ProductId,
    ) -> StockResult<Vec<BundleEdge>> {
        self.bundles.components(company_id, bundle_id)
    }

    pub fn expand(&self, company_id: CompanyId, product_id: ProductId) -> StockResult<Expansion> {
        self.bundles.expand(company_id, product_id)
    }

    /// Sellable units of `product_id` at a warehouse, computed from its
    /// components' current stock. A plain product reports its own quantity.
    pub fn availability(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> StockResult<i64> {
        self.scoped_warehouse(company_id, warehouse_id)?;
        let expansion = self.bundles.expand(company_id, product_id)?;
        availability(&expansion, |component| {
            self.projector.current_quantity(component, warehouse_id)
        })
    }

    pub fn reconcile_company(&self, company_id: CompanyId) -> StockResult<ReconcileReport> {
        self.projector.reconcile_company(company_id)
    }

    fn scoped_product(&self, company_id: CompanyId, product_id: ProductId) -> StockResult<Product> {
        let product = self
            .catalog
            .product(product_id)
            .ok_or_else(|| StockError::not_found(format!("product {product_id}")))?;
        assert_same_company(&company_id, &product)?;
        Ok(product)
    }

    fn scoped_warehouse(
        &self,
        company_id: CompanyId,
        warehouse_id: WarehouseId,
    ) -> StockResult<Warehouse> {
        let warehouse = self.warehouse(warehouse_id)?;
        assert_same_company(&company_id, &warehouse)?;
        Ok(warehouse)
    }

    fn warehouse(&self, warehouse_id: WarehouseId) -> StockResult<Warehouse> {
        self.catalog
            .warehouse(warehouse_id)
            .ok_or_else(|| StockError::not_found(format!("warehouse {warehouse_id}")))
    }

    /// Map a failed append. Backend failures leave the cache in doubt, so the
    /// rows are flagged for replay on their next read.
    fn append_failed(&self, err: LedgerError, rows: &[InventoryRow]) -> StockError {
        match err {
            LedgerError::InvalidDelta {
                inventory_id,
                source,
            } => match rows.iter().find(|r| r.id == inventory_id) {
                Some(row) => delta_rejection(row.product_id, row.warehouse_id, source),
                None => StockError::InvalidDelta(source),
            },
            LedgerError::Storage(_) | LedgerError::Poisoned => {
                for row in rows {
                    self.projector.flag(row.id);
                }
                tracing::warn!(error = %err, rows = rows.len(), "ledger append failed");
                err.into()
            }
            other => other.into(),
        }
    }

    fn discard_row(&self, row: &InventoryRow) {
        if let Err(err) = self.projector.store().discard_empty_row(row.id) {
            tracing::warn!(
                inventory_id = %row.id,
                error = %err,
                "failed to discard empty inventory row"
            );
        }
    }
}

/// A non-adjustment going negative is a stock problem; anything else the
/// ledger refuses is a malformed delta.
fn delta_rejection(product_id: ProductId, warehouse_id: WarehouseId, err: DeltaError) -> StockError {
    match err {
        DeltaError::WouldGoNegative {
            change_type,
            current,
            delta,
        } if !change_type.is_adjustment() => StockError::NegativeStockRejected {
            product_id,
            warehouse_id,
            change_type,
            current,
            delta,
        },
        other => StockError::InvalidDelta(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rust_decimal::Decimal;
    use stockforge_catalog::{Company, InMemoryCatalog};
    use stockforge_core::DomainError;
    use stockforge_events::NullSink;

    use crate::ledger::InMemoryLedgerStore;

    type Coordinator = StockCoordinator<InMemoryLedgerStore, Arc<InMemoryCatalog>>;

    struct Shop {
        coordinator: Coordinator,
        catalog: Arc<InMemoryCatalog>,
        company: CompanyId,
        warehouse: WarehouseId,
    }

    fn shop() -> Shop {
        let catalog = Arc::new(InMemoryCatalog::new());
        let company = CompanyId::new();
        catalog
            .register_company(Company {
                id: company,
                name: "Acme".into(),
            })
            .unwrap();
        let warehouse = add_warehouse(&catalog, company, "Main");
        let config = EngineConfig {
            lock_timeout: Duration::from_millis(50),
            ..EngineConfig::default()
        };
        let coordinator = StockCoordinator::new(
            InMemoryLedgerStore::new(),
            catalog.clone(),
            Arc::new(NullSink),
            config,
        );
        Shop {
            coordinator,
            catalog,
            company,
            warehouse,
        }
    }

    fn add_warehouse(catalog: &InMemoryCatalog, company_id: CompanyId, name: &str) -> WarehouseId {
        let id = WarehouseId::new();
        catalog
            .register_warehouse(Warehouse {
                id,
                company_id,
                name: name.into(),
                address: None,
            })
            .unwrap();
        id
    }

    fn add_product(shop: &Shop, sku: &str, is_bundle: bool) -> ProductId {
        let id = ProductId::new();
        shop.catalog
            .register_product(Product {
                id,
                company_id: shop.company,
                name: sku.into(),
                sku: sku.into(),
                description: None,
                price: None,
                is_bundle,
            })
            .unwrap();
        id
    }

    fn change(shop: &Shop, product: ProductId, change_type: ChangeType, delta: i64) -> ChangeRequest {
        ChangeRequest::new(shop.company, product, shop.warehouse, change_type, delta)
    }

    fn quantity(shop: &Shop, product: ProductId) -> i64 {
        shop.coordinator
            .current_quantity(shop.company, product, shop.warehouse)
            .unwrap()
    }

    #[test]
    fn receipt_then_sale_tracks_quantity() {
        let shop = shop();
        let widget = add_product(&shop, "W-1", false);

        let first = shop
            .coordinator
            .apply_change(change(&shop, widget, ChangeType::Receipt, 10).with_note("po-1"))
            .unwrap();
        assert_eq!(first.new_quantity, 10);

        let second = shop
            .coordinator
            .apply_change(change(&shop, widget, ChangeType::Sale, -4))
            .unwrap();
        assert_eq!(second.new_quantity, 6);
        assert_eq!(second.inventory_id, first.inventory_id);
        assert!(second.transaction_id > first.transaction_id);

        let history = shop
            .coordinator
            .history(shop.company, widget, shop.warehouse, 0)
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].note.as_deref(), Some("po-1"));
    }

    #[test]
    fn oversell_is_rejected_and_leaves_nothing_behind() {
        let shop = shop();
        let widget = add_product(&shop, "W-1", false);

        let err = shop
            .coordinator
            .apply_change(change(&shop, widget, ChangeType::Sale, -1))
            .unwrap_err();
        assert!(matches!(err, StockError::NegativeStockRejected { current: 0, delta: -1, .. }));
        assert!(
            shop.coordinator
                .projector()
                .store()
                .find_row(widget, shop.warehouse)
                .unwrap()
                .is_none()
        );

        shop.coordinator
            .apply_change(change(&shop, widget, ChangeType::Receipt, 2))
            .unwrap();
        let err = shop
            .coordinator
            .apply_change(change(&shop, widget, ChangeType::Sale, -3))
            .unwrap_err();
        assert_eq!(
            err,
            StockError::NegativeStockRejected {
                product_id: widget,
                warehouse_id: shop.warehouse,
                change_type: ChangeType::Sale,
                current: 2,
                delta: -3,
            }
        );
        assert_eq!(quantity(&shop, widget), 2);
    }

    #[test]
    fn adjustment_below_zero_needs_the_override() {
        let shop = shop();
        let widget = add_product(&shop, "W-1", false);
        shop.coordinator
            .apply_change(change(&shop, widget, ChangeType::Receipt, 1))
            .unwrap();

        let err = shop
            .coordinator
            .apply_change(change(&shop, widget, ChangeType::Adjustment, -3))
            .unwrap_err();
        assert!(matches!(
            err,
            StockError::InvalidDelta(DeltaError::WouldGoNegative { .. })
        ));

        let forced = shop
            .coordinator
            .apply_change(change(&shop, widget, ChangeType::Adjustment, -3).allowing_negative())
            .unwrap();
        assert_eq!(forced.new_quantity, -2);
    }

    #[test]
    fn malformed_deltas_fail_before_any_lookup() {
        let shop = shop();
        let unknown = ProductId::new();

        assert_eq!(
            shop.coordinator
                .apply_change(change(&shop, unknown, ChangeType::Receipt, 0)),
            Err(StockError::InvalidDelta(DeltaError::Zero))
        );
        assert!(matches!(
            shop.coordinator
                .apply_change(change(&shop, unknown, ChangeType::Sale, 5)),
            Err(StockError::InvalidDelta(DeltaError::WrongSign { .. }))
        ));
        assert!(matches!(
            shop.coordinator
                .apply_change(change(&shop, unknown, ChangeType::Receipt, 5)),
            Err(StockError::NotFound(_))
        ));
    }

    #[test]
    fn foreign_warehouse_is_a_tenant_violation() {
        let shop = shop();
        let widget = add_product(&shop, "W-1", false);
        let other = CompanyId::new();
        shop.catalog
            .register_company(Company {
                id: other,
                name: "Globex".into(),
            })
            .unwrap();
        let foreign = add_warehouse(&shop.catalog, other, "Remote");

        let err = shop
            .coordinator
            .apply_change(ChangeRequest::new(
                shop.company,
                widget,
                foreign,
                ChangeType::Receipt,
                5,
            ))
            .unwrap_err();
        assert!(matches!(err, StockError::CrossTenant(_)));
    }

    #[test]
    fn changes_report_dependent_bundles() {
        let shop = shop();
        let kit = add_product(&shop, "KIT", true);
        let part = add_product(&shop, "PART", false);
        shop.coordinator.add_edge(shop.company, kit, part, 2).unwrap();

        let change = shop
            .coordinator
            .apply_change(change(&shop, part, ChangeType::Receipt, 4))
            .unwrap();
        assert_eq!(change.affected_bundles, vec![kit]);
        assert_eq!(
            shop.coordinator
                .availability(shop.company, kit, shop.warehouse)
                .unwrap(),
            2
        );
    }

    #[test]
    fn bundle_consumption_is_all_or_nothing() {
        let shop = shop();
        let kit = add_product(&shop, "KIT", true);
        let a = add_product(&shop, "A", false);
        let b = add_product(&shop, "B", false);
        shop.coordinator.add_edge(shop.company, kit, a, 1).unwrap();
        shop.coordinator.add_edge(shop.company, kit, b, 2).unwrap();
        shop.coordinator
            .apply_change(change(&shop, a, ChangeType::Receipt, 10))
            .unwrap();
        shop.coordinator
            .apply_change(change(&shop, b, ChangeType::Receipt, 3))
            .unwrap();

        let err = shop
            .coordinator
            .consume_bundle(shop.company, kit, shop.warehouse, 2, None)
            .unwrap_err();
        assert_eq!(
            err,
            StockError::InsufficientBundleStock {
                bundle_id: kit,
                component_id: b,
                required: 4,
                available: 3,
            }
        );
        assert_eq!(quantity(&shop, a), 10);
        assert_eq!(quantity(&shop, b), 3);

        let consumed = shop
            .coordinator
            .consume_bundle(shop.company, kit, shop.warehouse, 1, Some("order-7".into()))
            .unwrap();
        assert_eq!(consumed.entries.len(), 2);
        assert!(
            consumed
                .entries
                .iter()
                .all(|e| e.change_type == ChangeType::BundleConsumption)
        );
        assert_eq!(quantity(&shop, a), 9);
        assert_eq!(quantity(&shop, b), 1);
        assert_eq!(quantity(&shop, kit), 0);
    }

    #[test]
    fn consuming_requires_a_bundle_with_components() {
        let shop = shop();
        let plain = add_product(&shop, "PLAIN", false);
        let empty_kit = add_product(&shop, "EMPTY", true);

        for product in [plain, empty_kit] {
            let err = shop
                .coordinator
                .consume_bundle(shop.company, product, shop.warehouse, 1, None)
                .unwrap_err();
            assert!(matches!(err, StockError::Domain(DomainError::Validation(_))));
        }
        assert_eq!(
            shop.coordinator
                .consume_bundle(shop.company, empty_kit, shop.warehouse, 0, None),
            Err(StockError::InvalidQuantity { quantity: 0 })
        );
    }

    #[test]
    fn transfer_moves_stock_atomically() {
        let shop = shop();
        let widget = add_product(&shop, "W-1", false);
        let annex = add_warehouse(&shop.catalog, shop.company, "Annex");
        shop.coordinator
            .apply_change(change(&shop, widget, ChangeType::Receipt, 5))
            .unwrap();

        let moved = shop
            .coordinator
            .transfer(shop.company, widget, shop.warehouse, annex, 3, None)
            .unwrap();
        assert_eq!(moved.outbound.delta, -3);
        assert_eq!(moved.inbound.change_type, ChangeType::TransferIn);
        assert_eq!(quantity(&shop, widget), 2);
        assert_eq!(
            shop.coordinator
                .current_quantity(shop.company, widget, annex)
                .unwrap(),
            3
        );

        let err = shop
            .coordinator
            .transfer(shop.company, widget, shop.warehouse, annex, 3, None)
            .unwrap_err();
        assert!(matches!(err, StockError::NegativeStockRejected { current: 2, .. }));
        assert_eq!(quantity(&shop, widget), 2);

        assert!(matches!(
            shop.coordinator
                .transfer(shop.company, widget, annex, annex, 1, None),
            Err(StockError::Domain(DomainError::Validation(_)))
        ));
    }

    #[test]
    fn transfer_from_an_unstocked_warehouse_creates_nothing() {
        let shop = shop();
        let widget = add_product(&shop, "W-1", false);
        let annex = add_warehouse(&shop.catalog, shop.company, "Annex");

        let err = shop
            .coordinator
            .transfer(shop.company, widget, shop.warehouse, annex, 1, None)
            .unwrap_err();
        assert!(matches!(err, StockError::NegativeStockRejected { current: 0, .. }));
        assert!(
            shop.coordinator
                .projector()
                .store()
                .rows_of(shop.company)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn onboarding_creates_product_row_and_receipt() {
        let shop = shop();
        let onboarded = shop
            .coordinator
            .onboard_product(
                NewProduct {
                    company_id: shop.company,
                    name: "Gadget".into(),
                    sku: "G-1".into(),
                    description: None,
                    price: Some(Decimal::new(1999, 2)),
                    is_bundle: false,
                },
                shop.warehouse,
                7,
            )
            .unwrap();

        assert!(onboarded.transaction_id.is_some());
        assert_eq!(quantity(&shop, onboarded.product_id), 7);
        assert_eq!(
            shop.catalog.product(onboarded.product_id).map(|p| p.sku),
            Some("G-1".to_string())
        );
    }

    #[test]
    fn onboarding_with_zero_stock_skips_the_receipt() {
        let shop = shop();
        let onboarded = shop
            .coordinator
            .onboard_product(
                NewProduct {
                    company_id: shop.company,
                    name: "Gadget".into(),
                    sku: "G-1".into(),
                    description: None,
                    price: None,
                    is_bundle: false,
                },
                shop.warehouse,
                0,
            )
            .unwrap();
        assert_eq!(onboarded.transaction_id, None);
        assert_eq!(
            shop.coordinator
                .projector()
                .store()
                .version(onboarded.inventory_id)
                .unwrap(),
            0
        );
    }

    #[test]
    fn onboarding_rejects_bad_input_without_registering() {
        let shop = shop();
        let product = NewProduct {
            company_id: shop.company,
            name: "Gadget".into(),
            sku: "G-1".into(),
            description: None,
            price: None,
            is_bundle: false,
        };

        assert_eq!(
            shop.coordinator
                .onboard_product(product.clone(), shop.warehouse, -1),
            Err(StockError::InvalidQuantity { quantity: -1 })
        );
        assert!(matches!(
            shop.coordinator.onboard_product(
                NewProduct {
                    sku: " ".into(),
                    ..product.clone()
                },
                shop.warehouse,
                1
            ),
            Err(StockError::Domain(DomainError::Validation(_)))
        ));
        assert!(matches!(
            shop.coordinator
                .onboard_product(product, WarehouseId::new(), 1),
            Err(StockError::NotFound(_))
        ));
        assert!(shop.catalog.products_of(shop.company).is_empty());
    }
}
