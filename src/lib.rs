//! sia: an embedded pattern & knowledge store.
//!
//! sia persists two kinds of records in a single [redb] database and keeps
//! fast derived structures on top of them:
//!
//! - **Patterns** are reusable problem→action records with success
//!   statistics, searched through a TTL/LRU cache and consolidated when
//!   near-duplicates accumulate.
//! - **Knowledge nodes and relationships** form a typed, weighted directed
//!   graph, projected into [petgraph] on demand for traversal, centrality
//!   rankings, community detection, and link recommendation.
//!
//! Everything is reached through the [`Engine`] facade:
//!
//! ```
//! use sia::{Engine, EngineConfig, NodeType, Pattern, RelationshipType};
//!
//! # fn main() -> sia::SiaResult<()> {
//! // Memory-only engine; set `data_dir` for persistence.
//! let engine = Engine::new(EngineConfig::default())?;
//!
//! engine.store_pattern(&Pattern::new("p-retry", "resilience", "retry with backoff"))?;
//! assert!(engine.get_pattern("p-retry")?.is_some());
//!
//! engine.add_node(&sia::KnowledgeNode::new("timeouts", NodeType::Concept, "timeouts"))?;
//! engine.add_node(&sia::KnowledgeNode::new("flaky-ci", NodeType::Failure, "flaky CI"))?;
//! engine.add_relationship("timeouts", "flaky-ci", RelationshipType::Causes, 0.9, None, None)?;
//!
//! assert_eq!(engine.statistics().total_relationships, 1);
//! # Ok(())
//! # }
//! ```
//!
//! [redb]: https://docs.rs/redb
//! [petgraph]: https://docs.rs/petgraph

mod clock;
pub mod engine;
pub mod error;
pub mod export;
pub mod graph;
pub mod pattern;
pub mod store;
pub mod value;

pub use engine::{Engine, EngineConfig, GraphQuery};
pub use error::{SiaError, SiaResult, StoreError, ValidationError};
pub use export::StateExport;
pub use graph::analyze::{
    Community, InfluenceScore, RelatedNode, RelatedQuery, RelationshipSuggestion,
};
pub use graph::view::GraphStatistics;
pub use graph::{
    KnowledgeNode, KnowledgeRelationship, NodeCriteria, NodeType, RelationshipType,
};
pub use pattern::merge::PatternMerger;
pub use pattern::{Pattern, PatternAnalytics, SearchCriteria};
pub use value::{Value, ValueMap};
