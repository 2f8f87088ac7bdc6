//! Knowledge graph: typed nodes and weighted, directed relationships.
//!
//! - [`store::GraphStore`] — durable node/relationship tables with
//!   secondary indices and cascading delete
//! - [`view`] — derived petgraph snapshot with TTL + write-through
//!   invalidation
//! - [`analyze`] — traversal, centrality, community, and recommendation
//!   algorithms over the snapshot

pub mod analyze;
pub mod store;
pub mod view;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::clock::unix_secs;
use crate::error::ValidationError;
use crate::value::ValueMap;

/// What kind of entity a knowledge node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Pattern,
    Failure,
    Memory,
    Metric,
    Concept,
    Agent,
    Task,
    Context,
}

impl NodeType {
    /// Stable string tag, used as the secondary-index key and in
    /// statistics breakdowns.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Pattern => "pattern",
            NodeType::Failure => "failure",
            NodeType::Memory => "memory",
            NodeType::Metric => "metric",
            NodeType::Concept => "concept",
            NodeType::Agent => "agent",
            NodeType::Task => "task",
            NodeType::Context => "context",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How two knowledge nodes relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipType {
    Causes,
    Prevents,
    Improves,
    DependsOn,
    SimilarTo,
    PartOf,
    LeadsTo,
    ConflictsWith,
    Enhances,
    DerivedFrom,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Causes => "causes",
            RelationshipType::Prevents => "prevents",
            RelationshipType::Improves => "improves",
            RelationshipType::DependsOn => "depends_on",
            RelationshipType::SimilarTo => "similar_to",
            RelationshipType::PartOf => "part_of",
            RelationshipType::LeadsTo => "leads_to",
            RelationshipType::ConflictsWith => "conflicts_with",
            RelationshipType::Enhances => "enhances",
            RelationshipType::DerivedFrom => "derived_from",
        }
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed entity in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeNode {
    pub id: String,
    pub node_type: NodeType,
    pub label: String,
    pub properties: ValueMap,
    /// Seconds since UNIX epoch.
    pub created_at: u64,
    pub last_updated: u64,
    /// Relative importance in [0.0, 1.0].
    pub importance: f64,
    pub tags: Vec<String>,
}

impl KnowledgeNode {
    /// Create a node with default importance (0.5) and current timestamps.
    pub fn new(
        id: impl Into<String>,
        node_type: NodeType,
        label: impl Into<String>,
    ) -> Self {
        let now = unix_secs();
        Self {
            id: id.into(),
            node_type,
            label: label.into(),
            properties: BTreeMap::new(),
            created_at: now,
            last_updated: now,
            importance: 0.5,
            tags: Vec::new(),
        }
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: crate::value::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::MissingId { entity: "node" });
        }
        if self.label.is_empty() {
            return Err(ValidationError::MissingLabel {
                id: self.id.clone(),
            });
        }
        if !(0.0..=1.0).contains(&self.importance) {
            return Err(ValidationError::OutOfRange {
                field: "importance",
                value: self.importance,
            });
        }
        Ok(())
    }
}

/// A directed, weighted edge between two knowledge nodes.
///
/// Self-loops are legal at this level; traversals may exclude them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRelationship {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub rel_type: RelationshipType,
    /// Edge weight in [0.0, 1.0].
    pub strength: f64,
    /// Confidence in the relationship in [0.0, 1.0].
    pub confidence: f64,
    pub properties: ValueMap,
    pub created_at: u64,
}

impl KnowledgeRelationship {
    /// Create a relationship with default confidence (0.8).
    pub fn new(
        id: impl Into<String>,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        rel_type: RelationshipType,
        strength: f64,
    ) -> Self {
        Self {
            id: id.into(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            rel_type,
            strength,
            confidence: 0.8,
            properties: BTreeMap::new(),
            created_at: unix_secs(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: crate::value::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Scalar-range validation. Endpoint existence is checked inside the
    /// store's write transaction.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::MissingId {
                entity: "relationship",
            });
        }
        if !(0.0..=1.0).contains(&self.strength) {
            return Err(ValidationError::OutOfRange {
                field: "strength",
                value: self.strength,
            });
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ValidationError::OutOfRange {
                field: "confidence",
                value: self.confidence,
            });
        }
        Ok(())
    }
}

/// Search criteria for stored nodes.
#[derive(Debug, Clone, Default)]
pub struct NodeCriteria {
    pub node_type: Option<NodeType>,
    pub min_importance: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_defaults() {
        let node = KnowledgeNode::new("n1", NodeType::Concept, "ownership");
        assert!((node.importance - 0.5).abs() < f64::EPSILON);
        assert_eq!(node.created_at, node.last_updated);
        assert!(node.validate().is_ok());
    }

    #[test]
    fn node_validation() {
        let node = KnowledgeNode::new("", NodeType::Concept, "x");
        assert!(matches!(
            node.validate(),
            Err(ValidationError::MissingId { .. })
        ));

        let node = KnowledgeNode::new("n1", NodeType::Concept, "");
        assert!(matches!(
            node.validate(),
            Err(ValidationError::MissingLabel { .. })
        ));

        let node = KnowledgeNode::new("n1", NodeType::Concept, "x").with_importance(1.5);
        assert!(matches!(
            node.validate(),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn relationship_defaults_and_validation() {
        let rel = KnowledgeRelationship::new("r1", "a", "b", RelationshipType::Causes, 0.7);
        assert!((rel.confidence - 0.8).abs() < f64::EPSILON);
        assert!(rel.validate().is_ok());

        let rel = KnowledgeRelationship::new("r1", "a", "b", RelationshipType::Causes, 1.1);
        assert!(matches!(
            rel.validate(),
            Err(ValidationError::OutOfRange {
                field: "strength",
                ..
            })
        ));

        let rel = KnowledgeRelationship::new("r1", "a", "b", RelationshipType::Causes, 0.5)
            .with_confidence(-0.2);
        assert!(matches!(
            rel.validate(),
            Err(ValidationError::OutOfRange {
                field: "confidence",
                ..
            })
        ));
    }

    #[test]
    fn type_tags_are_stable() {
        assert_eq!(NodeType::Pattern.as_str(), "pattern");
        assert_eq!(RelationshipType::DependsOn.as_str(), "depends_on");
        assert_eq!(format!("{}", RelationshipType::SimilarTo), "similar_to");
    }
}
