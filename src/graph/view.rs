//! Derived, cached graph view.
//!
//! [`GraphSnapshot`] is a petgraph projection of the stored nodes and
//! relationships, rebuilt from the durable tables on demand. [`CachedView`]
//! holds the snapshot with a TTL: reads rebuild when stale, writes
//! invalidate eagerly, so staleness is bounded by
//! `min(ttl, time since last write)`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::error::SiaResult;

use super::{KnowledgeNode, KnowledgeRelationship, RelationshipType};

/// A cached derived value with time-based invalidation.
///
/// Concurrent readers that observe staleness simultaneously may each trigger
/// a redundant rebuild; rebuilds are idempotent, so this is tolerated rather
/// than locked against.
pub struct CachedView<T> {
    slot: RwLock<Option<(Arc<T>, Instant)>>,
    ttl: Duration,
}

impl<T> CachedView<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slot: RwLock::new(None),
            ttl,
        }
    }

    /// Drop the cached value so the next read rebuilds.
    pub fn invalidate(&self) {
        *self.slot.write().expect("view lock poisoned") = None;
    }

    /// Return the cached value while fresh, otherwise rebuild synchronously.
    pub fn get_or_rebuild<F>(&self, rebuild: F) -> SiaResult<Arc<T>>
    where
        F: FnOnce() -> SiaResult<T>,
    {
        {
            let slot = self.slot.read().expect("view lock poisoned");
            if let Some((value, built_at)) = slot.as_ref() {
                if built_at.elapsed() < self.ttl {
                    return Ok(Arc::clone(value));
                }
            }
        }

        // Built outside the lock: a concurrent rebuild may race ours, and
        // last-writer-wins is fine for an idempotent derivation.
        let value = Arc::new(rebuild()?);
        let mut slot = self.slot.write().expect("view lock poisoned");
        *slot = Some((Arc::clone(&value), Instant::now()));
        Ok(value)
    }

    #[cfg(test)]
    pub(crate) fn is_cached(&self) -> bool {
        self.slot.read().expect("view lock poisoned").is_some()
    }
}

/// Edge attributes carried into the derived graph.
#[derive(Debug, Clone)]
pub struct EdgeAttrs {
    pub id: String,
    pub rel_type: RelationshipType,
    pub strength: f64,
    pub confidence: f64,
}

/// An immutable weighted directed graph derived from the stores.
///
/// Nodes carry the full [`KnowledgeNode`] record; the id → index map gives
/// O(1) entry points for the analyzers.
pub struct GraphSnapshot {
    graph: DiGraph<KnowledgeNode, EdgeAttrs>,
    index: HashMap<String, NodeIndex>,
}

impl GraphSnapshot {
    /// Build from the full node and relationship sets. A relationship whose
    /// endpoint is missing is skipped, never a panic — the store may have
    /// been written concurrently with the load.
    pub fn build(nodes: Vec<KnowledgeNode>, relationships: Vec<KnowledgeRelationship>) -> Self {
        let mut graph = DiGraph::with_capacity(nodes.len(), relationships.len());
        let mut index = HashMap::with_capacity(nodes.len());

        for node in nodes {
            let id = node.id.clone();
            let idx = graph.add_node(node);
            index.insert(id, idx);
        }

        for rel in relationships {
            let (Some(&source), Some(&target)) =
                (index.get(&rel.source_id), index.get(&rel.target_id))
            else {
                tracing::warn!(
                    rel_id = %rel.id,
                    source = %rel.source_id,
                    target = %rel.target_id,
                    "skipping relationship with missing endpoint"
                );
                continue;
            };
            graph.add_edge(
                source,
                target,
                EdgeAttrs {
                    id: rel.id,
                    rel_type: rel.rel_type,
                    strength: rel.strength,
                    confidence: rel.confidence,
                },
            );
        }

        Self { graph, index }
    }

    pub fn graph(&self) -> &DiGraph<KnowledgeNode, EdgeAttrs> {
        &self.graph
    }

    pub fn node_index(&self, id: &str) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    pub fn id_of(&self, idx: NodeIndex) -> Option<&str> {
        self.graph.node_weight(idx).map(|n| n.id.as_str())
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Distinct undirected neighbors, excluding the node itself.
    pub fn neighbor_set(&self, idx: NodeIndex) -> HashSet<NodeIndex> {
        let mut neighbors = HashSet::new();
        for direction in [Direction::Outgoing, Direction::Incoming] {
            for n in self.graph.neighbors_directed(idx, direction) {
                if n != idx {
                    neighbors.insert(n);
                }
            }
        }
        neighbors
    }

    /// Aggregate shape statistics over the snapshot.
    pub fn statistics(&self) -> GraphStatistics {
        let n = self.graph.node_count();
        let e = self.graph.edge_count();

        let mut nodes_by_type: BTreeMap<String, usize> = BTreeMap::new();
        for node in self.graph.node_weights() {
            *nodes_by_type.entry(node.node_type.to_string()).or_default() += 1;
        }
        let mut relationships_by_type: BTreeMap<String, usize> = BTreeMap::new();
        for edge in self.graph.edge_weights() {
            *relationships_by_type
                .entry(edge.rel_type.to_string())
                .or_default() += 1;
        }

        let average_degree = if n > 0 { 2.0 * e as f64 / n as f64 } else { 0.0 };
        let density = if n > 1 {
            e as f64 / (n as f64 * (n as f64 - 1.0))
        } else {
            0.0
        };
        let connected_components = petgraph::algo::connected_components(&self.graph);

        GraphStatistics {
            total_nodes: n,
            total_relationships: e,
            nodes_by_type,
            relationships_by_type,
            average_degree,
            density,
            connected_components,
        }
    }
}

impl std::fmt::Debug for GraphSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphSnapshot")
            .field("nodes", &self.node_count())
            .field("edges", &self.edge_count())
            .finish()
    }
}

/// Aggregate counts and shape measures for the whole graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub total_nodes: usize,
    pub total_relationships: usize,
    pub nodes_by_type: BTreeMap<String, usize>,
    pub relationships_by_type: BTreeMap<String, usize>,
    /// Mean total degree (in + out), `2E / N`.
    pub average_degree: f64,
    /// Directed density `E / (N * (N - 1))`.
    pub density: f64,
    /// Weakly connected component count.
    pub connected_components: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn node(id: &str) -> KnowledgeNode {
        KnowledgeNode::new(id, NodeType::Concept, id)
    }

    fn rel(id: &str, source: &str, target: &str, strength: f64) -> KnowledgeRelationship {
        KnowledgeRelationship::new(id, source, target, RelationshipType::Causes, strength)
    }

    #[test]
    fn cached_view_reuses_fresh_value() {
        let view: CachedView<usize> = CachedView::new(Duration::from_secs(600));
        let builds = AtomicUsize::new(0);
        let build = || {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        };

        assert_eq!(*view.get_or_rebuild(build).unwrap(), 42);
        assert_eq!(*view.get_or_rebuild(build).unwrap(), 42);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cached_view_invalidate_forces_rebuild() {
        let view: CachedView<usize> = CachedView::new(Duration::from_secs(600));
        let builds = AtomicUsize::new(0);
        let build = || {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(builds.load(Ordering::SeqCst))
        };

        assert_eq!(*view.get_or_rebuild(build).unwrap(), 1);
        view.invalidate();
        assert!(!view.is_cached());
        assert_eq!(*view.get_or_rebuild(build).unwrap(), 2);
    }

    #[test]
    fn cached_view_zero_ttl_always_rebuilds() {
        let view: CachedView<usize> = CachedView::new(Duration::ZERO);
        let builds = AtomicUsize::new(0);
        let build = || Ok(builds.fetch_add(1, Ordering::SeqCst));

        view.get_or_rebuild(build).unwrap();
        view.get_or_rebuild(build).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn build_skips_dangling_relationships() {
        let snapshot = GraphSnapshot::build(
            vec![node("a"), node("b")],
            vec![rel("r1", "a", "b", 0.8), rel("r2", "a", "ghost", 0.5)],
        );
        assert_eq!(snapshot.node_count(), 2);
        assert_eq!(snapshot.edge_count(), 1);
    }

    #[test]
    fn neighbor_set_is_undirected_and_excludes_self() {
        let snapshot = GraphSnapshot::build(
            vec![node("a"), node("b"), node("c")],
            vec![
                rel("r1", "a", "b", 0.8),
                rel("r2", "c", "a", 0.5),
                rel("r3", "a", "a", 0.9),
            ],
        );
        let a = snapshot.node_index("a").unwrap();
        let neighbors = snapshot.neighbor_set(a);
        assert_eq!(neighbors.len(), 2);
        assert!(!neighbors.contains(&a));
    }

    #[test]
    fn statistics_shape() {
        let snapshot = GraphSnapshot::build(
            vec![node("a"), node("b"), node("c"), node("d")],
            vec![rel("r1", "a", "b", 0.8), rel("r2", "b", "c", 0.5)],
        );
        let stats = snapshot.statistics();
        assert_eq!(stats.total_nodes, 4);
        assert_eq!(stats.total_relationships, 2);
        assert_eq!(stats.nodes_by_type.get("concept"), Some(&4));
        assert_eq!(stats.relationships_by_type.get("causes"), Some(&2));
        assert!((stats.average_degree - 1.0).abs() < 1e-9);
        assert!((stats.density - 2.0 / 12.0).abs() < 1e-9);
        // a-b-c connected, d isolated.
        assert_eq!(stats.connected_components, 2);
    }

    #[test]
    fn empty_graph_statistics() {
        let snapshot = GraphSnapshot::build(vec![], vec![]);
        let stats = snapshot.statistics();
        assert_eq!(stats.total_nodes, 0);
        assert_eq!(stats.average_degree, 0.0);
        assert_eq!(stats.density, 0.0);
        assert_eq!(stats.connected_components, 0);
    }
}
