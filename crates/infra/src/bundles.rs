//! Per-company bundle graphs.
//!
//! Each company's graph sits behind its own `RwLock`: edge changes take the
//! write lock, so two concurrent insertions can never jointly close a cycle,
//! while expansions and availability reads share the read lock.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use stockforge_catalog::{CatalogDirectory, Product};
use stockforge_core::{CompanyId, ProductId, assert_same_company};
use stockforge_events::{CycleDetected, EngineSignal, SignalSink};
use stockforge_inventory::{BundleEdge, BundleError, BundleGraph, Expansion, GraphNode};

use crate::error::{StockError, StockResult};

pub type SharedGraph = Arc<RwLock<BundleGraph>>;

pub struct BundleRegistry<C> {
    catalog: C,
    graphs: RwLock<HashMap<CompanyId, SharedGraph>>,
    signals: Arc<dyn SignalSink>,
}

impl<C: CatalogDirectory> BundleRegistry<C> {
    pub fn new(catalog: C, signals: Arc<dyn SignalSink>) -> Self {
        Self {
            catalog,
            graphs: RwLock::new(HashMap::new()),
            signals,
        }
    }

    /// The company's graph, created empty on first use.
    pub fn graph(&self, company_id: CompanyId) -> SharedGraph {
        if let Some(graph) = self.graphs.read().get(&company_id) {
            return graph.clone();
        }
        self.graphs
            .write()
            .entry(company_id)
            .or_insert_with(|| Arc::new(RwLock::new(BundleGraph::new(company_id))))
            .clone()
    }

    /// Replace a company's graph with persisted edges (e.g. `product_bundles`
    /// rows loaded at startup). Every edge is re-validated.
    pub fn load(
        &self,
        company_id: CompanyId,
        edges: impl IntoIterator<Item = BundleEdge>,
    ) -> StockResult<usize> {
        let graph = BundleGraph::from_edges(company_id, edges, |id| {
            self.catalog.product(id).map(|p| node(&p))
        })?;
        let count = graph.len();
        *self.graph(company_id).write() = graph;
        tracing::info!(company_id = %company_id, edges = count, "bundle graph loaded");
        Ok(count)
    }

    /// Add `bundle_id → component_id × quantity` within `company_id`'s scope.
    pub fn add_edge(
        &self,
        company_id: CompanyId,
        bundle_id: ProductId,
        component_id: ProductId,
        quantity: i64,
    ) -> StockResult<BundleEdge> {
        if quantity <= 0 {
            return Err(StockError::InvalidQuantity { quantity });
        }
        if bundle_id == component_id {
            return Err(StockError::SelfReference(bundle_id));
        }

        let bundle = self.product(bundle_id)?;
        let component = self.product(component_id)?;
        assert_same_company(&company_id, &bundle)?;
        assert_same_company(&bundle, &component)?;

        let graph = self.graph(company_id);
        let mut graph = graph.write();
        match graph.add_edge(&node(&bundle), &node(&component), quantity) {
            Ok(edge) => {
                tracing::info!(
                    company_id = %company_id,
                    bundle_id = %bundle_id,
                    component_id = %component_id,
                    quantity = edge.quantity,
                    "bundle edge added"
                );
                Ok(edge)
            }
            Err(BundleError::CycleDetected {
                bundle_id,
                component_id,
                path,
            }) => {
                tracing::warn!(
                    company_id = %company_id,
                    bundle_id = %bundle_id,
                    component_id = %component_id,
                    path_len = path.len(),
                    "bundle edge rejected: cycle"
                );
                self.signals.emit(EngineSignal::CycleDetected(CycleDetected {
                    company_id,
                    bundle_id,
                    component_id,
                    path: path.clone(),
                    occurred_at: Utc::now(),
                }));
                Err(StockError::CycleDetected {
                    bundle_id,
                    component_id,
                    path,
                })
            }
            Err(other) => Err(other.into()),
        }
    }

    pub fn remove_edge(
        &self,
        company_id: CompanyId,
        bundle_id: ProductId,
        component_id: ProductId,
    ) -> StockResult<BundleEdge> {
        let bundle = self.product(bundle_id)?;
        assert_same_company(&company_id, &bundle)?;

        let edge = self.graph(company_id).write().remove_edge(bundle_id, component_id)?;
        tracing::info!(
            company_id = %company_id,
            bundle_id = %bundle_id,
            component_id = %component_id,
            "bundle edge removed"
        );
        Ok(edge)
    }

    pub fn components(&self, company_id: CompanyId, bundle_id: ProductId) -> StockResult<Vec<BundleEdge>> {
        let bundle = self.product(bundle_id)?;
        assert_same_company(&company_id, &bundle)?;
        Ok(self.graph(company_id).read().components(bundle_id))
    }

    pub fn expand(&self, company_id: CompanyId, product_id: ProductId) -> StockResult<Expansion> {
        let product = self.product(product_id)?;
        assert_same_company(&company_id, &product)?;
        Ok(self.graph(company_id).read().expand(product_id)?)
    }

    /// Bundles whose availability depends on `product_id`.
    pub fn dependents(&self, company_id: CompanyId, product_id: ProductId) -> BTreeSet<ProductId> {
        match self.graphs.read().get(&company_id) {
            Some(graph) => graph.read().dependents(product_id),
            None => BTreeSet::new(),
        }
    }

    fn product(&self, id: ProductId) -> StockResult<Product> {
        self.catalog
            .product(id)
            .ok_or_else(|| StockError::not_found(format!("product {id}")))
    }
}

fn node(product: &Product) -> GraphNode {
    GraphNode {
        product_id: product.id,
        company_id: product.company_id,
        is_bundle: product.is_bundle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use stockforge_catalog::{Company, InMemoryCatalog};
    use stockforge_events::{EventBus, InMemoryEventBus};

    struct Fixture {
        catalog: Arc<InMemoryCatalog>,
        registry: BundleRegistry<Arc<InMemoryCatalog>>,
        bus: Arc<InMemoryEventBus<EngineSignal>>,
    }

    fn fixture() -> Fixture {
        let catalog = Arc::new(InMemoryCatalog::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let registry = BundleRegistry::new(catalog.clone(), bus.clone());
        Fixture {
            catalog,
            registry,
            bus,
        }
    }

    fn company(f: &Fixture, name: &str) -> CompanyId {
        let id = CompanyId::new();
        f.catalog
            .register_company(Company {
                id,
                name: name.into(),
            })
            .unwrap();
        id
    }

    fn product(f: &Fixture, company_id: CompanyId, sku: &str, is_bundle: bool) -> ProductId {
        let id = ProductId::new();
        f.catalog
            .register_product(Product {
                id,
                company_id,
                name: sku.into(),
                sku: sku.into(),
                description: None,
                price: None,
                is_bundle,
            })
            .unwrap();
        id
    }

    #[test]
    fn cycle_rejection_emits_a_signal_and_persists_nothing() {
        let f = fixture();
        let signals = f.bus.subscribe();
        let c = company(&f, "acme");
        let x = product(&f, c, "X", true);
        let y = product(&f, c, "Y", true);
        let z = product(&f, c, "Z", true);

        f.registry.add_edge(c, y, z, 1).unwrap();
        f.registry.add_edge(c, z, x, 1).unwrap();

        let err = f.registry.add_edge(c, x, y, 1).unwrap_err();
        assert!(matches!(err, StockError::CycleDetected { .. }));
        assert!(f.registry.components(c, x).unwrap().is_empty());

        match signals.try_recv().unwrap() {
            EngineSignal::CycleDetected(signal) => {
                assert_eq!(signal.bundle_id, x);
                assert_eq!(signal.component_id, y);
                assert_eq!(signal.path, vec![y, z, x]);
            }
            other => panic!("unexpected signal {other:?}"),
        }
    }

    #[test]
    fn edges_are_validated_before_touching_the_graph() {
        let f = fixture();
        let c = company(&f, "acme");
        let other = company(&f, "globex");
        let kit = product(&f, c, "KIT", true);
        let part = product(&f, c, "PART", false);
        let foreign = product(&f, other, "FOREIGN", false);

        assert_eq!(
            f.registry.add_edge(c, kit, part, 0),
            Err(StockError::InvalidQuantity { quantity: 0 })
        );
        assert_eq!(f.registry.add_edge(c, kit, kit, 1), Err(StockError::SelfReference(kit)));
        assert!(matches!(
            f.registry.add_edge(c, kit, foreign, 1),
            Err(StockError::CrossTenant(_))
        ));
        assert!(matches!(
            f.registry.add_edge(other, kit, part, 1),
            Err(StockError::CrossTenant(_))
        ));
        assert!(matches!(
            f.registry.add_edge(c, kit, ProductId::new(), 1),
            Err(StockError::NotFound(_))
        ));
        assert!(matches!(
            f.registry.add_edge(c, part, kit, 1),
            Err(StockError::Graph(BundleError::NotABundle(_)))
        ));
        assert!(f.registry.graph(c).read().is_empty());
    }

    #[test]
    fn expand_dependents_and_removal() {
        let f = fixture();
        let c = company(&f, "acme");
        let outer = product(&f, c, "OUTER", true);
        let inner = product(&f, c, "INNER", true);
        let base = product(&f, c, "BASE", false);

        f.registry.add_edge(c, outer, inner, 2).unwrap();
        f.registry.add_edge(c, inner, base, 3).unwrap();

        let expansion = f.registry.expand(c, outer).unwrap();
        assert_eq!(expansion.get(&base), Some(&6));
        assert_eq!(f.registry.dependents(c, base), BTreeSet::from([outer, inner]));
        assert!(f.registry.dependents(CompanyId::new(), base).is_empty());

        f.registry.remove_edge(c, inner, base).unwrap();
        assert_eq!(f.registry.expand(c, outer).unwrap().get(&inner), Some(&2));
        assert!(matches!(
            f.registry.remove_edge(c, inner, base),
            Err(StockError::NotFound(_))
        ));
    }

    #[test]
    fn load_replaces_the_graph_and_revalidates() {
        let f = fixture();
        let c = company(&f, "acme");
        let kit = product(&f, c, "KIT", true);
        let part = product(&f, c, "PART", false);

        let loaded = f
            .registry
            .load(
                c,
                [BundleEdge {
                    bundle_id: kit,
                    component_id: part,
                    quantity: 4,
                }],
            )
            .unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(f.registry.expand(c, kit).unwrap().get(&part), Some(&4));

        let bad = f.registry.load(
            c,
            [BundleEdge {
                bundle_id: part,
                component_id: kit,
                quantity: 1,
            }],
        );
        assert!(matches!(bad, Err(StockError::Graph(BundleError::NotABundle(_)))));
        assert_eq!(f.registry.graph(c).read().len(), 1);
    }
}
