//! Bundle-of-bundles product graph.
//!
//! The graph is an explicit edge list (`bundle → component × quantity`) with
//! forward and reverse adjacency indexes kept in step with it. Every insertion
//! runs a reachability query so the graph stays acyclic at any depth, not just
//! free of direct self-references.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockforge_core::{
    CompanyId, CrossTenantViolation, ProductId, TenantScoped, assert_same_company,
};

/// Base component → total multiplier for one unit of the expanded product.
pub type Expansion = BTreeMap<ProductId, u64>;

/// `product_bundles` row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BundleEdge {
    pub bundle_id: ProductId,
    pub component_id: ProductId,
    pub quantity: u32,
}

/// What the graph needs to know about a product to validate an edge.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub product_id: ProductId,
    pub company_id: CompanyId,
    pub is_bundle: bool,
}

impl TenantScoped for GraphNode {
    fn scope_kind(&self) -> &'static str {
        "product"
    }

    fn company_id(&self) -> CompanyId {
        self.company_id
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BundleError {
    #[error("bundle quantity must be a positive integer, got {quantity}")]
    InvalidQuantity { quantity: i64 },

    #[error("product {0} cannot contain itself")]
    SelfReference(ProductId),

    #[error("bundle edge crosses tenants: {0}")]
    CrossTenantEdge(CrossTenantViolation),

    #[error("product {0} is not flagged as a bundle")]
    NotABundle(ProductId),

    #[error("bundle {bundle_id} already contains component {component_id}")]
    DuplicateEdge {
        bundle_id: ProductId,
        component_id: ProductId,
    },

    #[error("bundle {bundle_id} has no component {component_id}")]
    EdgeNotFound {
        bundle_id: ProductId,
        component_id: ProductId,
    },

    #[error("adding {component_id} to bundle {bundle_id} would create a cycle")]
    CycleDetected {
        bundle_id: ProductId,
        component_id: ProductId,
        /// Existing path from the component back to the bundle.
        path: Vec<ProductId>,
    },

    #[error("multiplier overflow while expanding {0}")]
    MultiplierOverflow(ProductId),

    #[error("product {0} not found")]
    UnknownProduct(ProductId),
}

/// One company's bundle graph.
#[derive(Debug, Clone)]
pub struct BundleGraph {
    company_id: CompanyId,
    edges: BTreeMap<(ProductId, ProductId), u32>,
    children: HashMap<ProductId, Vec<(ProductId, u32)>>,
    parents: HashMap<ProductId, BTreeSet<ProductId>>,
}

impl BundleGraph {
    pub fn new(company_id: CompanyId) -> Self {
        Self {
            company_id,
            edges: BTreeMap::new(),
            children: HashMap::new(),
            parents: HashMap::new(),
        }
    }

    pub fn company_id(&self) -> CompanyId {
        self.company_id
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// All edges, ordered by (bundle, component).
    pub fn edges(&self) -> Vec<BundleEdge> {
        self.edges
            .iter()
            .map(|(&(bundle_id, component_id), &quantity)| BundleEdge {
                bundle_id,
                component_id,
                quantity,
            })
            .collect()
    }

    /// Direct components of `bundle_id`, ordered by component id.
    pub fn components(&self, bundle_id: ProductId) -> Vec<BundleEdge> {
        let mut out: Vec<BundleEdge> = self
            .children
            .get(&bundle_id)
            .into_iter()
            .flatten()
            .map(|&(component_id, quantity)| BundleEdge {
                bundle_id,
                component_id,
                quantity,
            })
            .collect();
        out.sort_by_key(|e| e.component_id);
        out
    }

    /// Rebuild a graph from persisted edges, re-validating each one.
    ///
    /// `node_of` resolves a product id to its catalog facts; `None` means the
    /// product no longer exists.
    pub fn from_edges(
        company_id: CompanyId,
        edges: impl IntoIterator<Item = BundleEdge>,
        mut node_of: impl FnMut(ProductId) -> Option<GraphNode>,
    ) -> Result<Self, BundleError> {
        let mut graph = Self::new(company_id);
        for edge in edges {
            let bundle = node_of(edge.bundle_id).ok_or(BundleError::UnknownProduct(edge.bundle_id))?;
            let component =
                node_of(edge.component_id).ok_or(BundleError::UnknownProduct(edge.component_id))?;
            graph.add_edge(&bundle, &component, i64::from(edge.quantity))?;
        }
        Ok(graph)
    }

    pub fn has_components(&self, product_id: ProductId) -> bool {
        self.children.get(&product_id).is_some_and(|c| !c.is_empty())
    }

    /// Validate and insert `bundle → component × quantity`.
    ///
    /// Nothing is modified when an error is returned.
    pub fn add_edge(
        &mut self,
        bundle: &GraphNode,
        component: &GraphNode,
        quantity: i64,
    ) -> Result<BundleEdge, BundleError> {
        let quantity = u32::try_from(quantity)
            .ok()
            .filter(|q| *q > 0)
            .ok_or(BundleError::InvalidQuantity { quantity })?;

        let (bundle_id, component_id) = (bundle.product_id, component.product_id);
        if bundle_id == component_id {
            return Err(BundleError::SelfReference(bundle_id));
        }

        assert_same_company(&self.company_id, bundle).map_err(BundleError::CrossTenantEdge)?;
        assert_same_company(bundle, component).map_err(BundleError::CrossTenantEdge)?;

        if !bundle.is_bundle {
            return Err(BundleError::NotABundle(bundle_id));
        }
        if self.edges.contains_key(&(bundle_id, component_id)) {
            return Err(BundleError::DuplicateEdge {
                bundle_id,
                component_id,
            });
        }

        if let Some(path) = self.path(component_id, bundle_id) {
            return Err(BundleError::CycleDetected {
                bundle_id,
                component_id,
                path,
            });
        }

        self.edges.insert((bundle_id, component_id), quantity);
        self.children
            .entry(bundle_id)
            .or_default()
            .push((component_id, quantity));
        self.parents.entry(component_id).or_default().insert(bundle_id);

        Ok(BundleEdge {
            bundle_id,
            component_id,
            quantity,
        })
    }

    /// Remove an edge. Removal can never introduce a cycle.
    pub fn remove_edge(
        &mut self,
        bundle_id: ProductId,
        component_id: ProductId,
    ) -> Result<BundleEdge, BundleError> {
        let quantity = self
            .edges
            .remove(&(bundle_id, component_id))
            .ok_or(BundleError::EdgeNotFound {
                bundle_id,
                component_id,
            })?;

        if let Some(children) = self.children.get_mut(&bundle_id) {
            children.retain(|(c, _)| *c != component_id);
            if children.is_empty() {
                self.children.remove(&bundle_id);
            }
        }
        if let Some(parents) = self.parents.get_mut(&component_id) {
            parents.remove(&bundle_id);
            if parents.is_empty() {
                self.parents.remove(&component_id);
            }
        }

        Ok(BundleEdge {
            bundle_id,
            component_id,
            quantity,
        })
    }

    /// Shortest existing path `from → … → to`, if `to` is reachable.
    fn path(&self, from: ProductId, to: ProductId) -> Option<Vec<ProductId>> {
        let mut came_from: HashMap<ProductId, ProductId> = HashMap::new();
        let mut seen: HashSet<ProductId> = HashSet::from([from]);
        let mut queue = VecDeque::from([from]);

        while let Some(node) = queue.pop_front() {
            if node == to {
                let mut path = vec![to];
                let mut cursor = to;
                while let Some(prev) = came_from.get(&cursor) {
                    path.push(*prev);
                    cursor = *prev;
                }
                path.reverse();
                return Some(path);
            }
            for (child, _) in self.children.get(&node).into_iter().flatten() {
                if seen.insert(*child) {
                    came_from.insert(*child, node);
                    queue.push_back(*child);
                }
            }
        }
        None
    }

    /// Expand `product_id` into base components with their total multipliers.
    ///
    /// A product without components expands to itself × 1. Each sub-product is
    /// expanded once per call, so diamond-shaped graphs stay linear; multipliers
    /// reaching the same base component through different paths are summed.
    pub fn expand(&self, product_id: ProductId) -> Result<Expansion, BundleError> {
        let mut memo: HashMap<ProductId, Expansion> = HashMap::new();
        let mut visiting: HashSet<ProductId> = HashSet::new();
        self.expand_node(product_id, &mut memo, &mut visiting)
    }

    fn expand_node(
        &self,
        product_id: ProductId,
        memo: &mut HashMap<ProductId, Expansion>,
        visiting: &mut HashSet<ProductId>,
    ) -> Result<Expansion, BundleError> {
        if let Some(done) = memo.get(&product_id) {
            return Ok(done.clone());
        }

        let children = match self.children.get(&product_id) {
            Some(children) if !children.is_empty() => children,
            _ => return Ok(BTreeMap::from([(product_id, 1)])),
        };

        // Accepted graphs are acyclic; this only trips on a corrupted load.
        if !visiting.insert(product_id) {
            return Err(BundleError::CycleDetected {
                bundle_id: product_id,
                component_id: product_id,
                path: vec![product_id],
            });
        }

        let mut total = Expansion::new();
        for &(child, quantity) in children {
            let sub = self.expand_node(child, memo, visiting)?;
            for (base, multiplier) in sub {
                let add = multiplier
                    .checked_mul(u64::from(quantity))
                    .ok_or(BundleError::MultiplierOverflow(product_id))?;
                let slot = total.entry(base).or_insert(0);
                *slot = slot
                    .checked_add(add)
                    .ok_or(BundleError::MultiplierOverflow(product_id))?;
            }
        }

        visiting.remove(&product_id);
        memo.insert(product_id, total.clone());
        Ok(total)
    }

    /// Every bundle that contains `product_id`, directly or transitively.
    pub fn dependents(&self, product_id: ProductId) -> BTreeSet<ProductId> {
        let mut out = BTreeSet::new();
        let mut queue = VecDeque::from([product_id]);
        while let Some(node) = queue.pop_front() {
            for parent in self.parents.get(&node).into_iter().flatten() {
                if out.insert(*parent) {
                    queue.push_back(*parent);
                }
            }
        }
        out
    }
}

/// Units of the expanded product that current stock can cover:
/// `min(floor(quantity(c) / m))` over its base components.
///
/// Negative stock (a forced adjustment) counts as zero. An empty expansion
/// yields zero.
pub fn availability<E>(
    expansion: &Expansion,
    mut quantity_of: impl FnMut(ProductId) -> Result<i64, E>,
) -> Result<i64, E> {
    let mut best: Option<i64> = None;
    for (&component, &multiplier) in expansion {
        let on_hand = quantity_of(component)?.max(0);
        let units = i64::try_from(u64::try_from(on_hand).unwrap_or(0) / multiplier.max(1))
            .unwrap_or(i64::MAX);
        best = Some(best.map_or(units, |b| b.min(units)));
    }
    Ok(best.unwrap_or(0))
}

/// Per-component deltas for consuming `units` of an expanded bundle, in
/// component order.
pub fn consumption_plan(
    bundle_id: ProductId,
    expansion: &Expansion,
    units: i64,
) -> Result<Vec<(ProductId, i64)>, BundleError> {
    if units <= 0 {
        return Err(BundleError::InvalidQuantity { quantity: units });
    }
    expansion
        .iter()
        .map(|(&component, &multiplier)| {
            i64::try_from(multiplier)
                .ok()
                .and_then(|m| m.checked_mul(units))
                .map(|total| (component, -total))
                .ok_or(BundleError::MultiplierOverflow(bundle_id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn node(company_id: CompanyId, is_bundle: bool) -> GraphNode {
        GraphNode {
            product_id: ProductId::new(),
            company_id,
            is_bundle,
        }
    }

    #[test]
    fn expansion_and_availability_of_a_simple_bundle() {
        let company = CompanyId::new();
        let mut graph = BundleGraph::new(company);
        let kit = node(company, true);
        let (a, b) = (node(company, false), node(company, false));

        graph.add_edge(&kit, &a, 2).unwrap();
        graph.add_edge(&kit, &b, 1).unwrap();

        let expansion = graph.expand(kit.product_id).unwrap();
        assert_eq!(expansion.get(&a.product_id), Some(&2));
        assert_eq!(expansion.get(&b.product_id), Some(&1));

        let stock = HashMap::from([(a.product_id, 10_i64), (b.product_id, 7_i64)]);
        let available = availability::<()>(&expansion, |p| Ok(stock[&p])).unwrap();
        assert_eq!(available, 5);

        let plan = consumption_plan(kit.product_id, &expansion, 3).unwrap();
        let plan: HashMap<_, _> = plan.into_iter().collect();
        assert_eq!(plan[&a.product_id], -6);
        assert_eq!(plan[&b.product_id], -3);
    }

    #[test]
    fn leaf_expands_to_itself() {
        let company = CompanyId::new();
        let graph = BundleGraph::new(company);
        let leaf = ProductId::new();
        assert_eq!(graph.expand(leaf).unwrap(), BTreeMap::from([(leaf, 1)]));
    }

    #[test]
    fn nested_multipliers_multiply_and_diamonds_sum() {
        let company = CompanyId::new();
        let mut graph = BundleGraph::new(company);
        let top = node(company, true);
        let left = node(company, true);
        let right = node(company, true);
        let base = node(company, false);

        // top ⊃ left×2 ⊃ base×3, top ⊃ right×1 ⊃ base×4
        graph.add_edge(&top, &left, 2).unwrap();
        graph.add_edge(&top, &right, 1).unwrap();
        graph.add_edge(&left, &base, 3).unwrap();
        graph.add_edge(&right, &base, 4).unwrap();

        let expansion = graph.expand(top.product_id).unwrap();
        assert_eq!(expansion, BTreeMap::from([(base.product_id, 10)]));
        assert_eq!(
            graph.dependents(base.product_id),
            BTreeSet::from([top.product_id, left.product_id, right.product_id])
        );
    }

    #[test]
    fn deep_cycle_is_rejected_with_its_path() {
        let company = CompanyId::new();
        let mut graph = BundleGraph::new(company);
        let (a, b, c) = (node(company, true), node(company, true), node(company, true));

        graph.add_edge(&a, &b, 1).unwrap();
        graph.add_edge(&b, &c, 1).unwrap();

        let err = graph.add_edge(&c, &a, 1).unwrap_err();
        assert_eq!(
            err,
            BundleError::CycleDetected {
                bundle_id: c.product_id,
                component_id: a.product_id,
                path: vec![a.product_id, b.product_id, c.product_id],
            }
        );
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn edge_validation_order() {
        let company = CompanyId::new();
        let mut graph = BundleGraph::new(company);
        let kit = node(company, true);
        let plain = node(company, false);
        let part = node(company, false);
        let foreign = node(CompanyId::new(), false);

        assert_eq!(
            graph.add_edge(&kit, &part, 0),
            Err(BundleError::InvalidQuantity { quantity: 0 })
        );
        assert_eq!(
            graph.add_edge(&kit, &part, -2),
            Err(BundleError::InvalidQuantity { quantity: -2 })
        );
        assert_eq!(
            graph.add_edge(&kit, &kit, 1),
            Err(BundleError::SelfReference(kit.product_id))
        );
        assert!(matches!(
            graph.add_edge(&kit, &foreign, 1),
            Err(BundleError::CrossTenantEdge(_))
        ));
        assert_eq!(
            graph.add_edge(&plain, &part, 1),
            Err(BundleError::NotABundle(plain.product_id))
        );

        graph.add_edge(&kit, &part, 1).unwrap();
        assert!(matches!(
            graph.add_edge(&kit, &part, 5),
            Err(BundleError::DuplicateEdge { .. })
        ));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn graph_rejects_nodes_from_another_company() {
        let mut graph = BundleGraph::new(CompanyId::new());
        let other = CompanyId::new();
        let (kit, part) = (node(other, true), node(other, false));

        assert!(matches!(
            graph.add_edge(&kit, &part, 1),
            Err(BundleError::CrossTenantEdge(_))
        ));
    }

    #[test]
    fn removing_an_edge_updates_both_indexes() {
        let company = CompanyId::new();
        let mut graph = BundleGraph::new(company);
        let (kit, part) = (node(company, true), node(company, false));

        graph.add_edge(&kit, &part, 3).unwrap();
        assert_eq!(graph.components(kit.product_id).len(), 1);

        let removed = graph.remove_edge(kit.product_id, part.product_id).unwrap();
        assert_eq!(removed.quantity, 3);
        assert!(graph.components(kit.product_id).is_empty());
        assert!(graph.dependents(part.product_id).is_empty());
        assert!(!graph.has_components(kit.product_id));
        assert!(matches!(
            graph.remove_edge(kit.product_id, part.product_id),
            Err(BundleError::EdgeNotFound { .. })
        ));

        // The bundle now expands to itself.
        assert_eq!(
            graph.expand(kit.product_id).unwrap(),
            BTreeMap::from([(kit.product_id, 1)])
        );
    }

    #[test]
    fn from_edges_revalidates() {
        let company = CompanyId::new();
        let (kit, part) = (node(company, true), node(company, false));
        let nodes = HashMap::from([(kit.product_id, kit), (part.product_id, part)]);

        let edges = vec![BundleEdge {
            bundle_id: kit.product_id,
            component_id: part.product_id,
            quantity: 4,
        }];
        let graph = BundleGraph::from_edges(company, edges.clone(), |p| nodes.get(&p).copied()).unwrap();
        assert_eq!(graph.edges(), edges);

        let missing = BundleGraph::from_edges(company, edges, |_| None);
        assert!(matches!(missing, Err(BundleError::UnknownProduct(_))));
    }

    #[test]
    fn availability_edge_cases() {
        let empty = Expansion::new();
        assert_eq!(availability::<()>(&empty, |_| Ok(100)).unwrap(), 0);

        let p = ProductId::new();
        let expansion = BTreeMap::from([(p, 3)]);
        assert_eq!(availability::<()>(&expansion, |_| Ok(-4)).unwrap(), 0);
        assert_eq!(availability::<()>(&expansion, |_| Ok(8)).unwrap(), 2);
        assert_eq!(availability(&expansion, |_| Err("boom")), Err("boom"));
    }

    #[test]
    fn consumption_plan_rejects_non_positive_units() {
        let p = ProductId::new();
        let expansion = BTreeMap::from([(p, 1)]);
        assert!(matches!(
            consumption_plan(p, &expansion, 0),
            Err(BundleError::InvalidQuantity { quantity: 0 })
        ));
    }

    #[test]
    fn overflowing_multipliers_are_reported() {
        let company = CompanyId::new();
        let mut graph = BundleGraph::new(company);
        let mut chain: Vec<GraphNode> = (0..4).map(|_| node(company, true)).collect();
        chain.push(node(company, false));
        for pair in chain.windows(2) {
            graph.add_edge(&pair[0], &pair[1], i64::from(u32::MAX)).unwrap();
        }
        assert!(matches!(
            graph.expand(chain[0].product_id),
            Err(BundleError::MultiplierOverflow(_))
        ));
    }

    fn is_acyclic(graph: &BundleGraph, nodes: &[GraphNode]) -> bool {
        let mut indegree: HashMap<ProductId, usize> =
            nodes.iter().map(|n| (n.product_id, 0)).collect();
        for edge in graph.edges() {
            *indegree.entry(edge.component_id).or_default() += 1;
        }
        let mut ready: Vec<ProductId> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(p, _)| *p)
            .collect();
        let mut visited = 0;
        while let Some(p) = ready.pop() {
            visited += 1;
            for edge in graph.components(p) {
                let d = indegree.entry(edge.component_id).or_default();
                *d -= 1;
                if *d == 0 {
                    ready.push(edge.component_id);
                }
            }
        }
        visited == indegree.len()
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Whatever insertions are attempted, the accepted graph has no cycle
        /// and every product expands.
        #[test]
        fn accepted_edges_never_form_a_cycle(
            attempts in prop::collection::vec((0usize..6, 0usize..6, 1i64..5), 0..40)
        ) {
            let company = CompanyId::new();
            let nodes: Vec<GraphNode> = (0..6).map(|_| node(company, true)).collect();
            let mut graph = BundleGraph::new(company);

            for (from, to, quantity) in attempts {
                let _ = graph.add_edge(&nodes[from], &nodes[to], quantity);
            }

            prop_assert!(is_acyclic(&graph, &nodes));
            for n in &nodes {
                let expansion = graph.expand(n.product_id).unwrap();
                prop_assert!(!expansion.is_empty());
                prop_assert!(expansion.values().all(|m| *m >= 1));
            }
        }
    }
}
