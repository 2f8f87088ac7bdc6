//! Reusable strategy patterns with observed success statistics.
//!
//! A [`Pattern`] records a strategy that worked: the conditions it applies
//! under (`context`), the change it prescribes (`action`), and the effect it
//! had (`outcome`), plus success statistics accumulated through usage
//! recording.
//!
//! - [`store::PatternStore`] — durable table + append-only usage log
//! - [`cache::PatternCache`] — bounded TTL/LRU cache fronting reads
//! - [`merge::PatternMerger`] — near-duplicate consolidation

pub mod cache;
pub mod merge;
pub mod store;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::clock::unix_secs;
use crate::error::ValidationError;
use crate::value::{Value, ValueMap};

/// A recorded strategy with applicability context and success statistics.
///
/// `id` uniquely identifies one logical pattern; writes are upsert-by-id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub category: String,
    pub name: String,
    pub description: String,
    /// Applicability conditions. Values may be scalars, lists, or ranges.
    pub context: ValueMap,
    /// The prescribed change.
    pub action: ValueMap,
    /// The expected effect.
    pub outcome: ValueMap,
    /// Observed success rate in [0.0, 1.0].
    pub success_rate: f64,
    pub usage_count: u64,
    /// Seconds since UNIX epoch.
    pub created_at: u64,
    pub last_used: Option<u64>,
    pub tags: Vec<String>,
    /// Confidence in the pattern in [0.0, 1.0].
    pub confidence: f64,
    /// Ids of patterns that must apply first.
    pub prerequisites: Vec<String>,
    /// Ids of patterns this one conflicts with.
    pub conflicts: Vec<String>,
}

impl Pattern {
    /// Create a pattern with neutral statistics and the current timestamp.
    pub fn new(
        id: impl Into<String>,
        category: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            name: name.into(),
            description: String::new(),
            context: BTreeMap::new(),
            action: BTreeMap::new(),
            outcome: BTreeMap::new(),
            success_rate: 0.0,
            usage_count: 0,
            created_at: unix_secs(),
            last_used: None,
            tags: Vec::new(),
            confidence: 0.5,
            prerequisites: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_action(mut self, key: impl Into<String>, value: Value) -> Self {
        self.action.insert(key.into(), value);
        self
    }

    pub fn with_outcome(mut self, key: impl Into<String>, value: Value) -> Self {
        self.outcome.insert(key.into(), value);
        self
    }

    pub fn with_success_rate(mut self, success_rate: f64) -> Self {
        self.success_rate = success_rate;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_usage_count(mut self, usage_count: u64) -> Self {
        self.usage_count = usage_count;
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

    /// Check structural validity before any durable write.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::MissingId { entity: "pattern" });
        }
        if !(0.0..=1.0).contains(&self.success_rate) {
            return Err(ValidationError::OutOfRange {
                field: "success_rate",
                value: self.success_rate,
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

    /// Whether a concrete situation satisfies this pattern's applicability
    /// conditions. Every context key must be present in the probe and
    /// accepted by the condition value (ranges accept contained numbers,
    /// lists accept members, scalars require equality).
    pub fn matches_context(&self, probe: &ValueMap) -> bool {
        self.context.iter().all(|(key, condition)| {
            probe
                .get(key)
                .is_some_and(|concrete| condition.accepts(concrete))
        })
    }

    /// The timestamp cleanup measures age against: last use, falling back to
    /// creation time for never-used patterns.
    pub(crate) fn recency_anchor(&self) -> u64 {
        self.last_used.unwrap_or(self.created_at)
    }
}

/// One immutable entry in a pattern's usage history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub pattern_id: String,
    /// Microseconds since UNIX epoch (log ordering key).
    pub timestamp: u64,
    /// The situation the pattern was applied in.
    pub context: ValueMap,
    pub success: bool,
    pub metrics_before: Option<BTreeMap<String, f64>>,
    pub metrics_after: Option<BTreeMap<String, f64>>,
}

/// Conjunctive search criteria over stored patterns.
///
/// The tag filter is disjunctive within itself: a pattern matches if it
/// carries any of the listed tags.
#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    pub category: Option<String>,
    pub min_success_rate: Option<f64>,
    pub min_confidence: Option<f64>,
    pub tags: Vec<String>,
}

impl SearchCriteria {
    pub fn matches(&self, pattern: &Pattern) -> bool {
        if let Some(category) = &self.category {
            if pattern.category != *category {
                return false;
            }
        }
        if let Some(min) = self.min_success_rate {
            if pattern.success_rate < min {
                return false;
            }
        }
        if let Some(min) = self.min_confidence {
            if pattern.confidence < min {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| pattern.tags.contains(t)) {
            return false;
        }
        true
    }
}

/// Aggregated usage history for one pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternAnalytics {
    pub total_uses: u64,
    /// Fraction of recorded uses that succeeded.
    pub success_rate: f64,
    /// Uses within the trailing 7-day window.
    pub recent_uses: u64,
    /// Mean relative metric delta `(after - before) / before` across events
    /// that carried overlapping numeric metrics. 0.0 when no event qualifies.
    pub avg_improvement: f64,
}
