//! Durable node and relationship tables with secondary indices.
//!
//! Five redb tables: `nodes` and `relationships` hold the records;
//! `nodes_by_type`, `relationships_by_source`, and `relationships_by_target`
//! are multimap indices kept in step inside the same write transaction as
//! the record they index. Deleting a node cascades to every relationship
//! referencing it, all in one transaction.
//!
//! Every successful write invalidates the derived graph view, so the next
//! read rebuilds it.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use redb::{MultimapTableDefinition, ReadableMultimapTable, ReadableTable, TableDefinition};

use crate::clock::unix_secs;
use crate::error::{SiaResult, ValidationError};
use crate::store::{DurableStore, decode, encode, redb_error};

use super::view::{CachedView, GraphSnapshot};
use super::{KnowledgeNode, KnowledgeRelationship, NodeCriteria, RelationshipType};

const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");
const RELATIONSHIPS: TableDefinition<&str, &[u8]> = TableDefinition::new("relationships");
const NODES_BY_TYPE: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("nodes_by_type");
const RELS_BY_SOURCE: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("relationships_by_source");
const RELS_BY_TARGET: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("relationships_by_target");

/// Durable store of [`KnowledgeNode`]s and [`KnowledgeRelationship`]s.
pub struct GraphStore {
    store: DurableStore,
    view: CachedView<GraphSnapshot>,
}

impl GraphStore {
    /// Open the graph tables, creating them if absent.
    pub fn new(store: DurableStore, view_ttl: Duration) -> SiaResult<Self> {
        let txn = store.begin_write()?;
        txn.open_table(NODES)
            .map_err(|e| redb_error("open nodes table", e))?;
        txn.open_table(RELATIONSHIPS)
            .map_err(|e| redb_error("open relationships table", e))?;
        txn.open_multimap_table(NODES_BY_TYPE)
            .map_err(|e| redb_error("open nodes_by_type index", e))?;
        txn.open_multimap_table(RELS_BY_SOURCE)
            .map_err(|e| redb_error("open relationships_by_source index", e))?;
        txn.open_multimap_table(RELS_BY_TARGET)
            .map_err(|e| redb_error("open relationships_by_target index", e))?;
        txn.commit().map_err(|e| redb_error("commit schema", e))?;

        Ok(Self {
            store,
            view: CachedView::new(view_ttl),
        })
    }

    /// Upsert a node by id, keeping the type index in step.
    pub fn add_node(&self, node: &KnowledgeNode) -> SiaResult<()> {
        node.validate()?;
        let bytes = encode("node", node)?;

        let txn = self.store.begin_write()?;
        {
            let mut nodes = txn
                .open_table(NODES)
                .map_err(|e| redb_error("open nodes table", e))?;
            let mut by_type = txn
                .open_multimap_table(NODES_BY_TYPE)
                .map_err(|e| redb_error("open nodes_by_type index", e))?;

            let previous = nodes
                .get(node.id.as_str())
                .map_err(|e| redb_error("get node", e))?
                .map(|g| g.value().to_vec());
            if let Some(previous) = previous {
                let old: KnowledgeNode = decode("node", &previous)?;
                if old.node_type != node.node_type {
                    by_type
                        .remove(old.node_type.as_str(), old.id.as_str())
                        .map_err(|e| redb_error("update nodes_by_type index", e))?;
                }
            }

            nodes
                .insert(node.id.as_str(), bytes.as_slice())
                .map_err(|e| redb_error("insert node", e))?;
            by_type
                .insert(node.node_type.as_str(), node.id.as_str())
                .map_err(|e| redb_error("insert nodes_by_type index", e))?;
        }
        txn.commit()
            .map_err(|e| redb_error("commit node", e))
            .inspect_err(|e| tracing::error!(node_id = %node.id, error = %e, "node write failed"))?;

        self.view.invalidate();
        tracing::debug!(node_id = %node.id, node_type = %node.node_type, "stored node");
        Ok(())
    }

    /// `Ok(None)` for unknown ids.
    pub fn get_node(&self, id: &str) -> SiaResult<Option<KnowledgeNode>> {
        let txn = self.store.begin_read()?;
        let nodes = txn
            .open_table(NODES)
            .map_err(|e| redb_error("open nodes table", e))?;
        match nodes.get(id).map_err(|e| redb_error("get node", e))? {
            Some(guard) => Ok(Some(decode("node", guard.value())?)),
            None => Ok(None),
        }
    }

    /// Update a node's importance in place. Returns whether the node exists.
    pub fn set_importance(&self, id: &str, importance: f64) -> SiaResult<bool> {
        if !(0.0..=1.0).contains(&importance) {
            return Err(ValidationError::OutOfRange {
                field: "importance",
                value: importance,
            }
            .into());
        }

        let txn = self.store.begin_write()?;
        let existed = {
            let mut nodes = txn
                .open_table(NODES)
                .map_err(|e| redb_error("open nodes table", e))?;
            let bytes = nodes
                .get(id)
                .map_err(|e| redb_error("get node", e))?
                .map(|g| g.value().to_vec());
            match bytes {
                None => false,
                Some(bytes) => {
                    let mut node: KnowledgeNode = decode("node", &bytes)?;
                    node.importance = importance;
                    node.last_updated = unix_secs();
                    let updated = encode("node", &node)?;
                    nodes
                        .insert(id, updated.as_slice())
                        .map_err(|e| redb_error("update node", e))?;
                    true
                }
            }
        };
        txn.commit()
            .map_err(|e| redb_error("commit importance", e))?;

        if existed {
            self.view.invalidate();
        }
        Ok(existed)
    }

    /// Store a relationship. Fails with a validation error if a scalar is
    /// out of range or either endpoint is missing — checked inside the write
    /// transaction, so a failure persists nothing.
    pub fn add_relationship(&self, rel: &KnowledgeRelationship) -> SiaResult<()> {
        rel.validate()?;
        let bytes = encode("relationship", rel)?;

        let txn = self.store.begin_write()?;
        {
            let nodes = txn
                .open_table(NODES)
                .map_err(|e| redb_error("open nodes table", e))?;
            for endpoint in [&rel.source_id, &rel.target_id] {
                if nodes
                    .get(endpoint.as_str())
                    .map_err(|e| redb_error("get node", e))?
                    .is_none()
                {
                    // Dropping the transaction rolls back; nothing persists.
                    return Err(ValidationError::MissingEndpoint {
                        node_id: endpoint.clone(),
                    }
                    .into());
                }
            }

            let mut rels = txn
                .open_table(RELATIONSHIPS)
                .map_err(|e| redb_error("open relationships table", e))?;
            rels.insert(rel.id.as_str(), bytes.as_slice())
                .map_err(|e| redb_error("insert relationship", e))?;

            let mut by_source = txn
                .open_multimap_table(RELS_BY_SOURCE)
                .map_err(|e| redb_error("open relationships_by_source index", e))?;
            by_source
                .insert(rel.source_id.as_str(), rel.id.as_str())
                .map_err(|e| redb_error("insert source index", e))?;
            let mut by_target = txn
                .open_multimap_table(RELS_BY_TARGET)
                .map_err(|e| redb_error("open relationships_by_target index", e))?;
            by_target
                .insert(rel.target_id.as_str(), rel.id.as_str())
                .map_err(|e| redb_error("insert target index", e))?;
        }
        txn.commit()
            .map_err(|e| redb_error("commit relationship", e))
            .inspect_err(
                |e| tracing::error!(rel_id = %rel.id, error = %e, "relationship write failed"),
            )?;

        self.view.invalidate();
        tracing::debug!(
            rel_id = %rel.id,
            source = %rel.source_id,
            target = %rel.target_id,
            rel_type = %rel.rel_type,
            "stored relationship"
        );
        Ok(())
    }

    pub fn get_relationship(&self, id: &str) -> SiaResult<Option<KnowledgeRelationship>> {
        let txn = self.store.begin_read()?;
        let rels = txn
            .open_table(RELATIONSHIPS)
            .map_err(|e| redb_error("open relationships table", e))?;
        match rels.get(id).map_err(|e| redb_error("get relationship", e))? {
            Some(guard) => Ok(Some(decode("relationship", guard.value())?)),
            None => Ok(None),
        }
    }

    /// Remove a single relationship. Returns whether it existed.
    pub fn delete_relationship(&self, id: &str) -> SiaResult<bool> {
        let txn = self.store.begin_write()?;
        let existed = {
            let mut rels = txn
                .open_table(RELATIONSHIPS)
                .map_err(|e| redb_error("open relationships table", e))?;
            let bytes = rels
                .remove(id)
                .map_err(|e| redb_error("remove relationship", e))?
                .map(|g| g.value().to_vec());
            match bytes {
                None => false,
                Some(bytes) => {
                    let rel: KnowledgeRelationship = decode("relationship", &bytes)?;
                    let mut by_source = txn
                        .open_multimap_table(RELS_BY_SOURCE)
                        .map_err(|e| redb_error("open relationships_by_source index", e))?;
                    by_source
                        .remove(rel.source_id.as_str(), id)
                        .map_err(|e| redb_error("remove source index", e))?;
                    let mut by_target = txn
                        .open_multimap_table(RELS_BY_TARGET)
                        .map_err(|e| redb_error("open relationships_by_target index", e))?;
                    by_target
                        .remove(rel.target_id.as_str(), id)
                        .map_err(|e| redb_error("remove target index", e))?;
                    true
                }
            }
        };
        txn.commit()
            .map_err(|e| redb_error("commit delete relationship", e))?;

        if existed {
            self.view.invalidate();
        }
        Ok(existed)
    }

    /// Delete a node and, first, every relationship where it is source or
    /// target — one transaction, so a failure leaves everything in place.
    /// Returns whether the node existed.
    pub fn delete_node(&self, id: &str) -> SiaResult<bool> {
        let txn = self.store.begin_write()?;
        let existed = {
            let mut rels = txn
                .open_table(RELATIONSHIPS)
                .map_err(|e| redb_error("open relationships table", e))?;
            let mut by_source = txn
                .open_multimap_table(RELS_BY_SOURCE)
                .map_err(|e| redb_error("open relationships_by_source index", e))?;
            let mut by_target = txn
                .open_multimap_table(RELS_BY_TARGET)
                .map_err(|e| redb_error("open relationships_by_target index", e))?;

            let mut rel_ids: BTreeSet<String> = BTreeSet::new();
            for index in [&by_source, &by_target] {
                for value in index
                    .get(id)
                    .map_err(|e| redb_error("scan relationship index", e))?
                {
                    let value = value.map_err(|e| redb_error("scan relationship index", e))?;
                    rel_ids.insert(value.value().to_string());
                }
            }

            for rel_id in &rel_ids {
                let bytes = rels
                    .remove(rel_id.as_str())
                    .map_err(|e| redb_error("remove relationship", e))?
                    .map(|g| g.value().to_vec());
                if let Some(bytes) = bytes {
                    let rel: KnowledgeRelationship = decode("relationship", &bytes)?;
                    by_source
                        .remove(rel.source_id.as_str(), rel_id.as_str())
                        .map_err(|e| redb_error("remove source index", e))?;
                    by_target
                        .remove(rel.target_id.as_str(), rel_id.as_str())
                        .map_err(|e| redb_error("remove target index", e))?;
                }
            }

            let mut nodes = txn
                .open_table(NODES)
                .map_err(|e| redb_error("open nodes table", e))?;
            let removed = nodes
                .remove(id)
                .map_err(|e| redb_error("remove node", e))?
                .map(|g| g.value().to_vec());
            match removed {
                None => false,
                Some(bytes) => {
                    let node: KnowledgeNode = decode("node", &bytes)?;
                    let mut by_type = txn
                        .open_multimap_table(NODES_BY_TYPE)
                        .map_err(|e| redb_error("open nodes_by_type index", e))?;
                    by_type
                        .remove(node.node_type.as_str(), id)
                        .map_err(|e| redb_error("remove nodes_by_type index", e))?;
                    true
                }
            }
        };
        txn.commit()
            .map_err(|e| redb_error("commit delete node", e))
            .inspect_err(|e| tracing::error!(node_id = %id, error = %e, "node delete failed"))?;

        self.view.invalidate();
        Ok(existed)
    }

    /// Search stored nodes, ordered by importance descending.
    pub fn search_nodes(
        &self,
        criteria: &NodeCriteria,
        limit: usize,
    ) -> SiaResult<Vec<KnowledgeNode>> {
        let txn = self.store.begin_read()?;
        let nodes = txn
            .open_table(NODES)
            .map_err(|e| redb_error("open nodes table", e))?;

        let mut candidates: Vec<KnowledgeNode> = match criteria.node_type {
            Some(node_type) => {
                let by_type = txn
                    .open_multimap_table(NODES_BY_TYPE)
                    .map_err(|e| redb_error("open nodes_by_type index", e))?;
                let mut found = Vec::new();
                for value in by_type
                    .get(node_type.as_str())
                    .map_err(|e| redb_error("scan nodes_by_type index", e))?
                {
                    let value = value.map_err(|e| redb_error("scan nodes_by_type index", e))?;
                    if let Some(guard) = nodes
                        .get(value.value())
                        .map_err(|e| redb_error("get node", e))?
                    {
                        found.push(decode("node", guard.value())?);
                    }
                }
                found
            }
            None => {
                let mut found = Vec::new();
                for entry in nodes.iter().map_err(|e| redb_error("scan nodes", e))? {
                    let (_, value) = entry.map_err(|e| redb_error("scan nodes", e))?;
                    found.push(decode("node", value.value())?);
                }
                found
            }
        };

        if let Some(min) = criteria.min_importance {
            candidates.retain(|n| n.importance >= min);
        }
        candidates.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    /// Relationships where the node is either endpoint, optionally filtered
    /// by type. A self-loop appears once.
    pub fn get_node_relationships(
        &self,
        id: &str,
        rel_type: Option<RelationshipType>,
    ) -> SiaResult<Vec<KnowledgeRelationship>> {
        let txn = self.store.begin_read()?;
        let rels = txn
            .open_table(RELATIONSHIPS)
            .map_err(|e| redb_error("open relationships table", e))?;
        let by_source = txn
            .open_multimap_table(RELS_BY_SOURCE)
            .map_err(|e| redb_error("open relationships_by_source index", e))?;
        let by_target = txn
            .open_multimap_table(RELS_BY_TARGET)
            .map_err(|e| redb_error("open relationships_by_target index", e))?;

        let mut rel_ids: BTreeSet<String> = BTreeSet::new();
        for index in [&by_source, &by_target] {
            for value in index
                .get(id)
                .map_err(|e| redb_error("scan relationship index", e))?
            {
                let value = value.map_err(|e| redb_error("scan relationship index", e))?;
                rel_ids.insert(value.value().to_string());
            }
        }

        let mut found = Vec::new();
        for rel_id in rel_ids {
            if let Some(guard) = rels
                .get(rel_id.as_str())
                .map_err(|e| redb_error("get relationship", e))?
            {
                let rel: KnowledgeRelationship = decode("relationship", guard.value())?;
                if rel_type.is_none_or(|t| rel.rel_type == t) {
                    found.push(rel);
                }
            }
        }
        Ok(found)
    }

    /// All stored nodes (view rebuild feed).
    pub fn all_nodes(&self) -> SiaResult<Vec<KnowledgeNode>> {
        let txn = self.store.begin_read()?;
        let nodes = txn
            .open_table(NODES)
            .map_err(|e| redb_error("open nodes table", e))?;
        let mut found = Vec::new();
        for entry in nodes.iter().map_err(|e| redb_error("scan nodes", e))? {
            let (_, value) = entry.map_err(|e| redb_error("scan nodes", e))?;
            found.push(decode("node", value.value())?);
        }
        Ok(found)
    }

    /// All stored relationships (view rebuild feed).
    pub fn all_relationships(&self) -> SiaResult<Vec<KnowledgeRelationship>> {
        let txn = self.store.begin_read()?;
        let rels = txn
            .open_table(RELATIONSHIPS)
            .map_err(|e| redb_error("open relationships table", e))?;
        let mut found = Vec::new();
        for entry in rels.iter().map_err(|e| redb_error("scan relationships", e))? {
            let (_, value) = entry.map_err(|e| redb_error("scan relationships", e))?;
            found.push(decode("relationship", value.value())?);
        }
        Ok(found)
    }

    /// The derived graph view, rebuilt if stale or invalidated.
    pub fn snapshot(&self) -> SiaResult<Arc<GraphSnapshot>> {
        self.view.get_or_rebuild(|| {
            let nodes = self.all_nodes()?;
            let rels = self.all_relationships()?;
            tracing::debug!(
                nodes = nodes.len(),
                relationships = rels.len(),
                "rebuilding graph view"
            );
            Ok(GraphSnapshot::build(nodes, rels))
        })
    }

    #[cfg(test)]
    pub(crate) fn view(&self) -> &CachedView<GraphSnapshot> {
        &self.view
    }
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SiaError;
    use crate::graph::NodeType;

    fn test_store() -> GraphStore {
        GraphStore::new(DurableStore::in_memory().unwrap(), Duration::from_secs(600)).unwrap()
    }

    fn node(id: &str, node_type: NodeType) -> KnowledgeNode {
        KnowledgeNode::new(id, node_type, id)
    }

    #[test]
    fn node_round_trip() {
        let store = test_store();
        let n = node("n1", NodeType::Concept).with_importance(0.9);
        store.add_node(&n).unwrap();
        assert_eq!(store.get_node("n1").unwrap().unwrap(), n);
        assert!(store.get_node("missing").unwrap().is_none());
    }

    #[test]
    fn relationship_requires_existing_endpoints() {
        let store = test_store();
        store.add_node(&node("a", NodeType::Concept)).unwrap();

        let rel = KnowledgeRelationship::new("r1", "a", "ghost", RelationshipType::Causes, 0.5);
        let err = store.add_relationship(&rel).unwrap_err();
        assert!(matches!(
            err,
            SiaError::Validation(ValidationError::MissingEndpoint { .. })
        ));
        // Nothing was persisted.
        assert!(store.get_relationship("r1").unwrap().is_none());
        assert!(store.all_relationships().unwrap().is_empty());
    }

    #[test]
    fn relationship_rejects_out_of_range_strength() {
        let store = test_store();
        store.add_node(&node("a", NodeType::Concept)).unwrap();
        store.add_node(&node("b", NodeType::Concept)).unwrap();

        let rel = KnowledgeRelationship::new("r1", "a", "b", RelationshipType::Causes, 1.5);
        assert!(store.add_relationship(&rel).is_err());
        assert!(store.get_relationship("r1").unwrap().is_none());
    }

    #[test]
    fn delete_node_cascades_relationships() {
        let store = test_store();
        for id in ["a", "b", "c"] {
            store.add_node(&node(id, NodeType::Concept)).unwrap();
        }
        store
            .add_relationship(&KnowledgeRelationship::new(
                "r1",
                "a",
                "b",
                RelationshipType::Causes,
                0.8,
            ))
            .unwrap();
        store
            .add_relationship(&KnowledgeRelationship::new(
                "r2",
                "c",
                "a",
                RelationshipType::Improves,
                0.6,
            ))
            .unwrap();
        store
            .add_relationship(&KnowledgeRelationship::new(
                "r3",
                "b",
                "c",
                RelationshipType::LeadsTo,
                0.7,
            ))
            .unwrap();

        assert!(store.delete_node("a").unwrap());
        assert!(store.get_node("a").unwrap().is_none());
        // Both relationships touching "a" are gone, r3 survives.
        assert!(store.get_relationship("r1").unwrap().is_none());
        assert!(store.get_relationship("r2").unwrap().is_none());
        assert!(store.get_relationship("r3").unwrap().is_some());
        // No dangling entries on the remaining endpoints.
        assert!(store.get_node_relationships("b", None).unwrap().len() == 1);
        assert!(store.get_node_relationships("c", None).unwrap().len() == 1);
    }

    #[test]
    fn delete_missing_node_is_false() {
        let store = test_store();
        assert!(!store.delete_node("ghost").unwrap());
    }

    #[test]
    fn search_nodes_by_type_and_importance() {
        let store = test_store();
        store
            .add_node(&node("c1", NodeType::Concept).with_importance(0.9))
            .unwrap();
        store
            .add_node(&node("c2", NodeType::Concept).with_importance(0.3))
            .unwrap();
        store
            .add_node(&node("f1", NodeType::Failure).with_importance(0.95))
            .unwrap();

        let results = store
            .search_nodes(
                &NodeCriteria {
                    node_type: Some(NodeType::Concept),
                    min_importance: Some(0.5),
                },
                10,
            )
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "c1");

        // Without a type filter, ordered by importance desc.
        let all = store.search_nodes(&NodeCriteria::default(), 10).unwrap();
        assert_eq!(all[0].id, "f1");
    }

    #[test]
    fn upsert_fixes_type_index() {
        let store = test_store();
        store.add_node(&node("n1", NodeType::Concept)).unwrap();
        store.add_node(&node("n1", NodeType::Failure)).unwrap();

        let concepts = store
            .search_nodes(
                &NodeCriteria {
                    node_type: Some(NodeType::Concept),
                    min_importance: None,
                },
                10,
            )
            .unwrap();
        assert!(concepts.is_empty());
        let failures = store
            .search_nodes(
                &NodeCriteria {
                    node_type: Some(NodeType::Failure),
                    min_importance: None,
                },
                10,
            )
            .unwrap();
        assert_eq!(failures.len(), 1);
    }

    #[test]
    fn node_relationships_filter_by_type() {
        let store = test_store();
        for id in ["a", "b", "c"] {
            store.add_node(&node(id, NodeType::Concept)).unwrap();
        }
        store
            .add_relationship(&KnowledgeRelationship::new(
                "r1",
                "a",
                "b",
                RelationshipType::Causes,
                0.8,
            ))
            .unwrap();
        store
            .add_relationship(&KnowledgeRelationship::new(
                "r2",
                "c",
                "a",
                RelationshipType::Improves,
                0.6,
            ))
            .unwrap();

        assert_eq!(store.get_node_relationships("a", None).unwrap().len(), 2);
        let causes = store
            .get_node_relationships("a", Some(RelationshipType::Causes))
            .unwrap();
        assert_eq!(causes.len(), 1);
        assert_eq!(causes[0].id, "r1");
    }

    #[test]
    fn set_importance_updates_in_place() {
        let store = test_store();
        store.add_node(&node("n1", NodeType::Concept)).unwrap();
        assert!(store.set_importance("n1", 0.95).unwrap());
        let n = store.get_node("n1").unwrap().unwrap();
        assert!((n.importance - 0.95).abs() < f64::EPSILON);

        assert!(!store.set_importance("ghost", 0.5).unwrap());
        assert!(store.set_importance("n1", 1.5).is_err());
    }

    #[test]
    fn writes_invalidate_the_view() {
        let store = test_store();
        store.add_node(&node("a", NodeType::Concept)).unwrap();
        let before = store.snapshot().unwrap();
        assert_eq!(before.node_count(), 1);

        store.add_node(&node("b", NodeType::Concept)).unwrap();
        let after = store.snapshot().unwrap();
        assert_eq!(after.node_count(), 2);
    }
}
