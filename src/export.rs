//! Serializable export of the full engine state.
//!
//! The export is a plain JSON document intended for offline inspection,
//! backup, and diffing between runs. It resolves nothing lazily: patterns,
//! nodes, relationships, and the statistics computed at export time are all
//! embedded.

use serde::{Deserialize, Serialize};

use crate::error::{SiaResult, StoreError};
use crate::graph::view::GraphStatistics;
use crate::graph::{KnowledgeNode, KnowledgeRelationship};
use crate::pattern::Pattern;

/// A complete, self-contained dump of the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateExport {
    pub patterns: Vec<Pattern>,
    pub nodes: Vec<KnowledgeNode>,
    pub relationships: Vec<KnowledgeRelationship>,
    pub statistics: GraphStatistics,
}

impl StateExport {
    /// Pretty-printed JSON rendering.
    pub fn to_json(&self) -> SiaResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            StoreError::Serialization {
                message: format!("state export: {e}"),
            }
            .into()
        })
    }

    /// Parse a document previously produced by [`StateExport::to_json`].
    pub fn from_json(json: &str) -> SiaResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            StoreError::Serialization {
                message: format!("state import: {e}"),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeType, RelationshipType};

    #[test]
    fn json_round_trip() {
        let export = StateExport {
            patterns: vec![Pattern::new("p1", "testing", "parallel tests")],
            nodes: vec![KnowledgeNode::new("n1", NodeType::Concept, "retries")],
            relationships: vec![KnowledgeRelationship::new(
                "r1",
                "n1",
                "n1",
                RelationshipType::SimilarTo,
                0.5,
            )],
            statistics: GraphStatistics::default(),
        };

        let json = export.to_json().unwrap();
        let parsed = StateExport::from_json(&json).unwrap();
        assert_eq!(parsed.patterns[0].id, "p1");
        assert_eq!(parsed.nodes[0].label, "retries");
        assert_eq!(parsed.relationships[0].rel_type, RelationshipType::SimilarTo);
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(StateExport::from_json("not json").is_err());
    }
}
