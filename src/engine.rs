//! Engine facade: top-level API for the pattern & knowledge store.
//!
//! The `Engine` owns all subsystems — the durable database, the pattern
//! store and its cache, the graph store and its derived view — and exposes
//! the two public surfaces consumers use: the pattern surface (store,
//! search, usage analytics, consolidation) and the graph surface (CRUD,
//! traversal, rankings, communities).
//!
//! Analytic queries are advisory: if the graph view cannot be produced, the
//! failure is logged and the query degrades to an empty result instead of
//! propagating.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::clock::unix_micros;
use crate::error::{SiaResult, ValidationError};
use crate::export::StateExport;
use crate::graph::analyze::{
    self, Community, InfluenceScore, RelatedNode, RelatedQuery, RelationshipSuggestion,
};
use crate::graph::store::GraphStore;
use crate::graph::view::{GraphSnapshot, GraphStatistics};
use crate::graph::{
    KnowledgeNode, KnowledgeRelationship, NodeCriteria, NodeType, RelationshipType,
};
use crate::pattern::cache::PatternCache;
use crate::pattern::merge::{DEFAULT_MERGE_THRESHOLD, PatternMerger};
use crate::pattern::store::PatternStore;
use crate::pattern::{Pattern, PatternAnalytics, SearchCriteria};
use crate::store::DurableStore;
use crate::value::ValueMap;

/// Configuration for the sia engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Data directory for persistence. `None` for memory-only mode.
    pub data_dir: Option<PathBuf>,
    /// Maximum entries in the pattern cache.
    pub pattern_cache_size: usize,
    /// How long a cached pattern stays fresh.
    pub pattern_cache_ttl: Duration,
    /// How long the derived graph view stays fresh without writes.
    pub graph_view_ttl: Duration,
    /// Pairwise similarity required to consolidate two patterns.
    pub merge_threshold: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            pattern_cache_size: PatternCache::DEFAULT_MAX_SIZE,
            pattern_cache_ttl: PatternCache::DEFAULT_TTL,
            graph_view_ttl: Duration::from_secs(600),
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
        }
    }
}

/// The pattern & knowledge store engine.
///
/// Owns the durable database and both stores; cheap to share behind an
/// `Arc` since all operations take `&self`.
pub struct Engine {
    config: EngineConfig,
    patterns: PatternStore,
    graph: GraphStore,
    merger: PatternMerger,
    rel_seq: AtomicU64,
}

impl Engine {
    /// Create a new engine with the given configuration.
    pub fn new(config: EngineConfig) -> SiaResult<Self> {
        if !(0.0..=1.0).contains(&config.merge_threshold) {
            return Err(ValidationError::OutOfRange {
                field: "merge_threshold",
                value: config.merge_threshold,
            }
            .into());
        }

        let store = match &config.data_dir {
            Some(dir) => DurableStore::open(dir)?,
            None => DurableStore::in_memory()?,
        };
        tracing::info!(
            persistent = config.data_dir.is_some(),
            cache_size = config.pattern_cache_size,
            "initializing sia engine"
        );

        let patterns = PatternStore::new(
            store.clone(),
            config.pattern_cache_size,
            config.pattern_cache_ttl,
        )?;
        let graph = GraphStore::new(store, config.graph_view_ttl)?;
        let merger = PatternMerger::new(config.merge_threshold);

        Ok(Self {
            config,
            patterns,
            graph,
            merger,
            rel_seq: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Pattern surface
    // -----------------------------------------------------------------------

    /// Upsert a pattern by id.
    pub fn store_pattern(&self, pattern: &Pattern) -> SiaResult<()> {
        self.patterns.store(pattern)
    }

    pub fn get_pattern(&self, id: &str) -> SiaResult<Option<Pattern>> {
        self.patterns.get(id)
    }

    /// Returns whether the pattern existed.
    pub fn delete_pattern(&self, id: &str) -> SiaResult<bool> {
        self.patterns.delete(id)
    }

    pub fn search_patterns(
        &self,
        criteria: &SearchCriteria,
        limit: usize,
    ) -> SiaResult<Vec<Pattern>> {
        self.patterns.search(criteria, limit)
    }

    pub fn all_patterns(&self) -> SiaResult<Vec<Pattern>> {
        self.patterns.get_all()
    }

    /// Record one application of a pattern, with optional before/after
    /// metrics for improvement tracking.
    pub fn record_usage(
        &self,
        id: &str,
        context: ValueMap,
        success: bool,
        metrics_before: Option<std::collections::BTreeMap<String, f64>>,
        metrics_after: Option<std::collections::BTreeMap<String, f64>>,
    ) -> SiaResult<()> {
        self.patterns
            .record_usage(id, context, success, metrics_before, metrics_after)
    }

    pub fn pattern_analytics(&self, id: &str) -> SiaResult<Option<PatternAnalytics>> {
        self.patterns.get_analytics(id)
    }

    /// Remove stale, rarely-used patterns. Returns the number removed.
    pub fn cleanup_patterns(&self, older_than_days: u64) -> SiaResult<usize> {
        self.patterns
            .cleanup(older_than_days, PatternStore::DEFAULT_MIN_USAGE)
    }

    /// Run the merger over the whole store, replacing each cluster of
    /// near-duplicates with its consolidated record. Returns the number of
    /// patterns absorbed into others.
    pub fn consolidate_patterns(&self) -> SiaResult<usize> {
        let all = self.patterns.get_all()?;
        let merged = self.merger.merge(&all);
        if merged.len() == all.len() {
            return Ok(0);
        }

        let surviving: std::collections::HashSet<&str> =
            merged.iter().map(|p| p.id.as_str()).collect();
        for pattern in &merged {
            self.patterns.store(pattern)?;
        }
        for pattern in &all {
            if !surviving.contains(pattern.id.as_str()) {
                self.patterns.delete(&pattern.id)?;
            }
        }
        let absorbed = all.len() - merged.len();
        tracing::info!(absorbed, remaining = merged.len(), "consolidated patterns");
        Ok(absorbed)
    }

    // -----------------------------------------------------------------------
    // Graph surface: storage
    // -----------------------------------------------------------------------

    pub fn add_node(&self, node: &KnowledgeNode) -> SiaResult<()> {
        self.graph.add_node(node)
    }

    pub fn get_node(&self, id: &str) -> SiaResult<Option<KnowledgeNode>> {
        self.graph.get_node(id)
    }

    pub fn set_node_importance(&self, id: &str, importance: f64) -> SiaResult<bool> {
        self.graph.set_importance(id, importance)
    }

    /// Delete a node and every relationship referencing it.
    pub fn delete_node(&self, id: &str) -> SiaResult<bool> {
        self.graph.delete_node(id)
    }

    pub fn delete_relationship(&self, id: &str) -> SiaResult<bool> {
        self.graph.delete_relationship(id)
    }

    /// Create a relationship between two stored nodes, generating its id.
    /// Returns the new id.
    pub fn add_relationship(
        &self,
        source_id: &str,
        target_id: &str,
        rel_type: RelationshipType,
        strength: f64,
        properties: Option<ValueMap>,
        confidence: Option<f64>,
    ) -> SiaResult<String> {
        let seq = self.rel_seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("rel-{}-{seq}", unix_micros());
        let mut rel = KnowledgeRelationship::new(&id, source_id, target_id, rel_type, strength);
        if let Some(properties) = properties {
            rel.properties = properties;
        }
        if let Some(confidence) = confidence {
            rel.confidence = confidence;
        }
        self.graph.add_relationship(&rel)?;
        Ok(id)
    }

    pub fn node_relationships(
        &self,
        id: &str,
        rel_type: Option<RelationshipType>,
    ) -> SiaResult<Vec<KnowledgeRelationship>> {
        self.graph.get_node_relationships(id, rel_type)
    }

    pub fn search_nodes(
        &self,
        criteria: &NodeCriteria,
        limit: usize,
    ) -> SiaResult<Vec<KnowledgeNode>> {
        self.graph.search_nodes(criteria, limit)
    }

    // -----------------------------------------------------------------------
    // Graph surface: analytics (best-effort, degrade to empty)
    // -----------------------------------------------------------------------

    /// Nodes related to `origin` within the query's depth and strength
    /// bounds, strongest first.
    pub fn find_related(&self, origin: &str, query: &RelatedQuery) -> Vec<RelatedNode> {
        match self.snapshot() {
            Some(snapshot) => analyze::find_related(&snapshot, origin, query),
            None => Vec::new(),
        }
    }

    /// Unweighted shortest path, or `None` if absent/unreachable.
    pub fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        match self.snapshot() {
            Some(snapshot) => analyze::shortest_path(&snapshot, from, to),
            None => None,
        }
    }

    /// Top-k nodes by blended centrality.
    pub fn influence_ranking(&self, k: usize) -> Vec<InfluenceScore> {
        match self.snapshot() {
            Some(snapshot) => analyze::influence_ranking(&snapshot, k),
            None => Vec::new(),
        }
    }

    /// Greedy-modularity communities on the undirected projection.
    pub fn detect_communities(&self) -> Vec<Community> {
        match self.snapshot() {
            Some(snapshot) => analyze::detect_communities(&snapshot),
            None => Vec::new(),
        }
    }

    /// Link candidates for a node, scored by shared neighbors.
    pub fn recommend_relationships(&self, id: &str, k: usize) -> Vec<RelationshipSuggestion> {
        match self.snapshot() {
            Some(snapshot) => analyze::recommend_relationships(&snapshot, id, k),
            None => Vec::new(),
        }
    }

    /// Aggregate graph statistics. Degrades to zeroed statistics if the
    /// view is unavailable.
    pub fn statistics(&self) -> GraphStatistics {
        match self.snapshot() {
            Some(snapshot) => snapshot.statistics(),
            None => GraphStatistics::default(),
        }
    }

    /// Combined node/relationship/structure query over the graph view,
    /// ordered by importance descending.
    pub fn query(&self, query: &GraphQuery) -> Vec<KnowledgeNode> {
        let Some(snapshot) = self.snapshot() else {
            return Vec::new();
        };
        let graph = snapshot.graph();

        let connected_to = query
            .connected_to
            .as_deref()
            .and_then(|id| snapshot.node_index(id));
        if query.connected_to.is_some() && connected_to.is_none() {
            return Vec::new();
        }

        let mut results: Vec<KnowledgeNode> = graph
            .node_indices()
            .filter(|idx| {
                let node = &graph[*idx];
                if !query.node_types.is_empty() && !query.node_types.contains(&node.node_type) {
                    return false;
                }
                if let Some(min) = query.min_importance {
                    if node.importance < min {
                        return false;
                    }
                }
                if let Some(needle) = &query.label_contains {
                    if !node.label.contains(needle.as_str()) {
                        return false;
                    }
                }

                let neighbors = snapshot.neighbor_set(*idx);
                if let Some(min_degree) = query.min_degree {
                    if neighbors.len() < min_degree {
                        return false;
                    }
                }
                if let Some(anchor) = connected_to {
                    if *idx == anchor || !neighbors.contains(&anchor) {
                        return false;
                    }
                }

                if !query.relationship_types.is_empty() || query.min_strength.is_some() {
                    let mut incident = graph
                        .edges_directed(*idx, petgraph::Direction::Outgoing)
                        .chain(graph.edges_directed(*idx, petgraph::Direction::Incoming));
                    let matches = incident.any(|edge| {
                        let attrs = edge.weight();
                        let type_ok = query.relationship_types.is_empty()
                            || query.relationship_types.contains(&attrs.rel_type);
                        let strength_ok =
                            query.min_strength.is_none_or(|min| attrs.strength >= min);
                        type_ok && strength_ok
                    });
                    if !matches {
                        return false;
                    }
                }
                true
            })
            .map(|idx| graph[idx].clone())
            .collect();

        results.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results
    }

    /// Full label-resolved snapshot for offline inspection.
    pub fn export_state(&self) -> SiaResult<StateExport> {
        Ok(StateExport {
            patterns: self.patterns.get_all()?,
            nodes: self.graph.all_nodes()?,
            relationships: self.graph.all_relationships()?,
            statistics: self.statistics(),
        })
    }

    fn snapshot(&self) -> Option<Arc<GraphSnapshot>> {
        match self.graph.snapshot() {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(error = %e, "graph view unavailable; degrading to empty result");
                None
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("persistent", &self.config.data_dir.is_some())
            .finish()
    }
}

/// A combined query over the graph view: node criteria, relationship
/// filters, and structure filters, all conjunctive.
#[derive(Debug, Clone, Default)]
pub struct GraphQuery {
    /// Match only these node types (empty = all).
    pub node_types: Vec<NodeType>,
    pub min_importance: Option<f64>,
    /// Substring match against the node label.
    pub label_contains: Option<String>,
    /// Node must carry at least one incident edge of these types
    /// (empty = no type constraint).
    pub relationship_types: Vec<RelationshipType>,
    /// Node must carry at least one incident edge at least this strong.
    pub min_strength: Option<f64>,
    /// Minimum number of distinct undirected neighbors.
    pub min_degree: Option<usize>,
    /// Node must be directly connected to this node.
    pub connected_to: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::new(EngineConfig::default()).unwrap()
    }

    fn node(id: &str, node_type: NodeType) -> KnowledgeNode {
        KnowledgeNode::new(id, node_type, id)
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfig {
            merge_threshold: 1.5,
            ..Default::default()
        };
        assert!(Engine::new(config).is_err());
    }

    #[test]
    fn add_relationship_generates_unique_ids() {
        let engine = engine();
        engine.add_node(&node("a", NodeType::Concept)).unwrap();
        engine.add_node(&node("b", NodeType::Concept)).unwrap();

        let id1 = engine
            .add_relationship("a", "b", RelationshipType::Causes, 0.8, None, None)
            .unwrap();
        let id2 = engine
            .add_relationship("a", "b", RelationshipType::Improves, 0.5, None, None)
            .unwrap();
        assert_ne!(id1, id2);
        assert_eq!(engine.node_relationships("a", None).unwrap().len(), 2);
    }

    #[test]
    fn shortest_path_resolves_through_the_view() {
        let engine = engine();
        for id in ["a", "b", "c"] {
            engine.add_node(&node(id, NodeType::Concept)).unwrap();
        }
        engine
            .add_relationship("a", "b", RelationshipType::LeadsTo, 0.5, None, None)
            .unwrap();
        engine
            .add_relationship("b", "c", RelationshipType::LeadsTo, 0.5, None, None)
            .unwrap();

        assert_eq!(
            engine.shortest_path("a", "c"),
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
        // Edges are directed; the reverse walk has no path.
        assert_eq!(engine.shortest_path("c", "a"), None);
        assert_eq!(engine.shortest_path("a", "ghost"), None);
    }

    #[test]
    fn consolidate_replaces_near_duplicates() {
        let engine = engine();
        let a = Pattern::new("a", "testing", "a")
            .with_action("kind", "parallelize".into())
            .with_success_rate(0.9)
            .with_usage_count(10);
        let b = Pattern::new("b", "testing", "b")
            .with_action("kind", "parallelize".into())
            .with_success_rate(0.8)
            .with_usage_count(4);
        engine.store_pattern(&a).unwrap();
        engine.store_pattern(&b).unwrap();

        let absorbed = engine.consolidate_patterns().unwrap();
        assert_eq!(absorbed, 1);
        assert!(engine.get_pattern("b").unwrap().is_none());
        let merged = engine.get_pattern("a").unwrap().unwrap();
        assert_eq!(merged.usage_count, 14);
    }

    #[test]
    fn query_combines_filters() {
        let engine = engine();
        engine
            .add_node(&node("c1", NodeType::Concept).with_importance(0.9))
            .unwrap();
        engine
            .add_node(&node("c2", NodeType::Concept).with_importance(0.2))
            .unwrap();
        engine
            .add_node(&node("f1", NodeType::Failure).with_importance(0.8))
            .unwrap();
        engine
            .add_relationship("c1", "f1", RelationshipType::Causes, 0.9, None, None)
            .unwrap();

        // Type + importance.
        let results = engine.query(&GraphQuery {
            node_types: vec![NodeType::Concept],
            min_importance: Some(0.5),
            ..Default::default()
        });
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "c1");

        // Relationship filter: only endpoints of a Causes edge qualify.
        let results = engine.query(&GraphQuery {
            relationship_types: vec![RelationshipType::Causes],
            ..Default::default()
        });
        let ids: Vec<&str> = results.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "f1"]);

        // Structure filter: direct connection to f1.
        let results = engine.query(&GraphQuery {
            connected_to: Some("f1".into()),
            ..Default::default()
        });
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "c1");
    }

    #[test]
    fn statistics_reflect_graph_contents() {
        let engine = engine();
        engine.add_node(&node("a", NodeType::Concept)).unwrap();
        engine.add_node(&node("b", NodeType::Failure)).unwrap();
        engine
            .add_relationship("a", "b", RelationshipType::Causes, 0.8, None, None)
            .unwrap();

        let stats = engine.statistics();
        assert_eq!(stats.total_nodes, 2);
        assert_eq!(stats.total_relationships, 1);
        assert_eq!(stats.nodes_by_type.get("concept"), Some(&1));
        assert_eq!(stats.connected_components, 1);
    }

    #[test]
    fn export_state_includes_everything() {
        let engine = engine();
        engine
            .store_pattern(&Pattern::new("p1", "testing", "t"))
            .unwrap();
        engine.add_node(&node("a", NodeType::Concept)).unwrap();

        let export = engine.export_state().unwrap();
        assert_eq!(export.patterns.len(), 1);
        assert_eq!(export.nodes.len(), 1);
        let json = export.to_json().unwrap();
        assert!(json.contains("\"p1\""));
    }
}
