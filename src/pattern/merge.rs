//! Similarity scoring and consolidation of near-duplicate patterns.
//!
//! Two patterns are similar when they share a category, agree on their
//! context and action maps, and overlap in tags. Clusters of similar
//! patterns collapse into a single record that pools their statistics.

use std::collections::BTreeSet;

use crate::value::ValueMap;

use super::Pattern;

/// Default pairwise similarity required to merge two patterns.
pub const DEFAULT_MERGE_THRESHOLD: f64 = 0.8;

/// Clusters patterns by similarity and consolidates each cluster.
#[derive(Debug, Clone, Copy)]
pub struct PatternMerger {
    /// Minimum pairwise similarity for two patterns to share a cluster.
    pub threshold: f64,
}

impl Default for PatternMerger {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MERGE_THRESHOLD,
        }
    }
}

impl PatternMerger {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Similarity in [0.0, 1.0]: the unweighted mean of category equality,
    /// context agreement, action agreement, and tag Jaccard overlap.
    pub fn similarity(&self, a: &Pattern, b: &Pattern) -> f64 {
        let category = if a.category == b.category { 1.0 } else { 0.0 };
        let context = map_similarity(&a.context, &b.context);
        let action = map_similarity(&a.action, &b.action);
        let tags = jaccard(&a.tags, &b.tags);
        (category + context + action + tags) / 4.0
    }

    /// Cluster and consolidate. Each pass picks the first unmerged pattern
    /// and groups every still-unmerged pattern whose similarity to it meets
    /// the threshold; singleton clusters pass through unchanged.
    pub fn merge(&self, patterns: &[Pattern]) -> Vec<Pattern> {
        let mut merged: Vec<Pattern> = Vec::new();
        let mut consumed = vec![false; patterns.len()];

        for pivot_idx in 0..patterns.len() {
            if consumed[pivot_idx] {
                continue;
            }
            consumed[pivot_idx] = true;
            let pivot = &patterns[pivot_idx];

            let mut cluster: Vec<&Pattern> = vec![pivot];
            for other_idx in (pivot_idx + 1)..patterns.len() {
                if consumed[other_idx] {
                    continue;
                }
                if self.similarity(pivot, &patterns[other_idx]) >= self.threshold {
                    consumed[other_idx] = true;
                    cluster.push(&patterns[other_idx]);
                }
            }

            if cluster.len() > 1 {
                tracing::debug!(
                    pivot = %pivot.id,
                    members = cluster.len(),
                    "consolidating similar patterns"
                );
                merged.push(consolidate(&cluster));
            } else {
                merged.push(pivot.clone());
            }
        }
        merged
    }
}

/// Fraction of the key union on which both maps agree exactly. Two empty
/// maps are identical, so they score 1.0.
fn map_similarity(a: &ValueMap, b: &ValueMap) -> f64 {
    let union: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    if union.is_empty() {
        return 1.0;
    }
    let agreeing = union
        .iter()
        .filter(|key| match (a.get(**key), b.get(**key)) {
            (Some(va), Some(vb)) => va == vb,
            _ => false,
        })
        .count();
    agreeing as f64 / union.len() as f64
}

/// Tag-set Jaccard overlap. Two empty sets score 1.0.
fn jaccard(a: &[String], b: &[String]) -> f64 {
    let set_a: BTreeSet<&String> = a.iter().collect();
    let set_b: BTreeSet<&String> = b.iter().collect();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    intersection as f64 / union as f64
}

/// Collapse a cluster into one record: the first member supplies the id and
/// descriptive fields; statistics pool across members.
fn consolidate(cluster: &[&Pattern]) -> Pattern {
    let first = cluster[0];
    let count = cluster.len() as f64;

    let mut merged = first.clone();
    merged.usage_count = cluster.iter().map(|p| p.usage_count).sum();
    merged.success_rate = cluster.iter().map(|p| p.success_rate).sum::<f64>() / count;
    merged.confidence = cluster.iter().map(|p| p.confidence).sum::<f64>() / count;
    merged.last_used = cluster.iter().filter_map(|p| p.last_used).max();

    // Tag union, preserving first-seen order for determinism.
    let mut seen: BTreeSet<&String> = BTreeSet::new();
    let mut tags: Vec<String> = Vec::new();
    for pattern in cluster {
        for tag in &pattern.tags {
            if seen.insert(tag) {
                tags.push(tag.clone());
            }
        }
    }
    merged.tags = tags;
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn testing_pattern(id: &str) -> Pattern {
        Pattern::new(id, "testing", id)
            .with_context("suite", Value::String("unit".into()))
            .with_action("kind", Value::String("parallelize".into()))
    }

    #[test]
    fn identical_patterns_score_one() {
        let merger = PatternMerger::default();
        let a = testing_pattern("a").with_tags(["fast"]);
        let b = testing_pattern("b").with_tags(["fast"]);
        assert!((merger.similarity(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn disjoint_patterns_score_low() {
        let merger = PatternMerger::default();
        let a = testing_pattern("a").with_tags(["fast"]);
        let b = Pattern::new("b", "deploy", "b")
            .with_context("stage", Value::String("prod".into()))
            .with_action("kind", Value::String("rollback".into()))
            .with_tags(["slow"]);
        assert!(merger.similarity(&a, &b) < 0.2);
    }

    #[test]
    fn map_similarity_counts_agreement_over_union() {
        let mut a = ValueMap::new();
        a.insert("x".into(), Value::Number(1.0));
        a.insert("y".into(), Value::Number(2.0));
        let mut b = ValueMap::new();
        b.insert("x".into(), Value::Number(1.0));
        b.insert("z".into(), Value::Number(3.0));
        // union {x, y, z}, agreement only on x.
        assert!((map_similarity(&a, &b) - 1.0 / 3.0).abs() < 1e-9);
        assert!((map_similarity(&ValueMap::new(), &ValueMap::new()) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn merge_pools_statistics() {
        let merger = PatternMerger::default();
        let mut a = testing_pattern("a")
            .with_success_rate(0.9)
            .with_confidence(0.9)
            .with_usage_count(10)
            .with_tags(["shared", "a-only"]);
        a.last_used = Some(1000);
        let mut b = testing_pattern("b")
            .with_success_rate(0.8)
            .with_confidence(0.7)
            .with_usage_count(4)
            .with_tags(["shared", "b-only"]);
        b.last_used = Some(2000);

        let merged = merger.merge(&[a, b]);
        assert_eq!(merged.len(), 1);
        let m = &merged[0];
        assert_eq!(m.id, "a");
        assert_eq!(m.usage_count, 14);
        assert!((m.success_rate - 0.85).abs() < 1e-9);
        assert!((m.confidence - 0.8).abs() < 1e-9);
        assert_eq!(m.last_used, Some(2000));
        assert_eq!(m.tags, vec!["shared", "a-only", "b-only"]);
    }

    #[test]
    fn dissimilar_patterns_pass_through() {
        let merger = PatternMerger::default();
        let a = testing_pattern("a");
        let b = Pattern::new("b", "deploy", "b")
            .with_context("stage", Value::String("prod".into()))
            .with_action("kind", Value::String("rollback".into()));
        let merged = merger.merge(&[a.clone(), b.clone()]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], a);
        assert_eq!(merged[1], b);
    }

    #[test]
    fn merge_is_idempotent() {
        let merger = PatternMerger::default();
        let a = testing_pattern("a")
            .with_success_rate(0.9)
            .with_usage_count(10)
            .with_tags(["shared"]);
        let b = testing_pattern("b")
            .with_success_rate(0.8)
            .with_usage_count(4)
            .with_tags(["shared"]);

        let once = merger.merge(&[a, b]);
        let twice = merger.merge(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn clustering_continues_past_merged_groups() {
        let merger = PatternMerger::default();
        // Two similar "testing" patterns plus two similar "deploy" patterns.
        let t1 = testing_pattern("t1");
        let t2 = testing_pattern("t2");
        let d1 = Pattern::new("d1", "deploy", "d1")
            .with_action("kind", Value::String("rollback".into()));
        let d2 = Pattern::new("d2", "deploy", "d2")
            .with_action("kind", Value::String("rollback".into()));

        let merged = merger.merge(&[t1, d1, t2, d2]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, "t1");
        assert_eq!(merged[1].id, "d1");
    }
}
