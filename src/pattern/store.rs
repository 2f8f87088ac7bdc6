//! Durable pattern table with usage analytics.
//!
//! Three redb tables: `patterns` (id → record), `pattern_usage` (an
//! append-only log keyed by `(pattern_id, timestamp µs, sequence)`), and
//! `pattern_relationships` (reserved in the schema for pattern-to-pattern
//! links; created at open, not yet populated or queried).
//!
//! Reads go through a [`PatternCache`]; the tables stay authoritative.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use redb::{ReadableTable, TableDefinition};

use crate::clock::{unix_micros, unix_secs};
use crate::error::{SiaResult, ValidationError};
use crate::store::{DurableStore, decode, encode, redb_error};
use crate::value::ValueMap;

use super::cache::PatternCache;
use super::{Pattern, PatternAnalytics, SearchCriteria, UsageEvent};

const PATTERNS: TableDefinition<&str, &[u8]> = TableDefinition::new("patterns");
const PATTERN_USAGE: TableDefinition<(&str, u64, u64), &[u8]> =
    TableDefinition::new("pattern_usage");
const PATTERN_LINKS: TableDefinition<&str, &[u8]> = TableDefinition::new("pattern_relationships");

/// Window for `recent_uses` in [`PatternAnalytics`].
const RECENT_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

/// Durable store of [`Pattern`] records with cache-fronted reads.
pub struct PatternStore {
    store: DurableStore,
    cache: PatternCache,
    /// Disambiguates usage-log keys within one microsecond.
    usage_seq: AtomicU64,
}

impl PatternStore {
    /// Patterns used fewer times than this are eligible for cleanup.
    pub const DEFAULT_MIN_USAGE: u64 = 2;

    /// Open the pattern tables, creating them if absent.
    pub fn new(store: DurableStore, cache_size: usize, cache_ttl: Duration) -> SiaResult<Self> {
        let txn = store.begin_write()?;
        txn.open_table(PATTERNS)
            .map_err(|e| redb_error("open patterns table", e))?;
        txn.open_table(PATTERN_USAGE)
            .map_err(|e| redb_error("open pattern_usage table", e))?;
        // Reserved surface: schema parity only.
        txn.open_table(PATTERN_LINKS)
            .map_err(|e| redb_error("open pattern_relationships table", e))?;
        txn.commit().map_err(|e| redb_error("commit schema", e))?;

        Ok(Self {
            store,
            cache: PatternCache::new(cache_size, cache_ttl),
            usage_seq: AtomicU64::new(0),
        })
    }

    /// Upsert a pattern by id. Validation precedes the write; the cache is
    /// updated only after the transaction commits.
    pub fn store(&self, pattern: &Pattern) -> SiaResult<()> {
        pattern.validate()?;
        let bytes = encode("pattern", pattern)?;

        let txn = self.store.begin_write()?;
        {
            let mut table = txn
                .open_table(PATTERNS)
                .map_err(|e| redb_error("open patterns table", e))?;
            table
                .insert(pattern.id.as_str(), bytes.as_slice())
                .map_err(|e| redb_error("insert pattern", e))?;
        }
        txn.commit()
            .map_err(|e| redb_error("commit pattern", e))
            .inspect_err(|e| tracing::error!(pattern_id = %pattern.id, error = %e, "pattern write failed"))?;

        self.cache.put(pattern.clone());
        tracing::debug!(pattern_id = %pattern.id, "stored pattern");
        Ok(())
    }

    /// Cache-first read. A miss reads durable storage and repopulates the
    /// cache. Returns `Ok(None)` for unknown ids.
    pub fn get(&self, id: &str) -> SiaResult<Option<Pattern>> {
        if let Some(hit) = self.cache.get(id) {
            return Ok(Some(hit));
        }

        let txn = self.store.begin_read()?;
        let table = txn
            .open_table(PATTERNS)
            .map_err(|e| redb_error("open patterns table", e))?;
        let Some(guard) = table.get(id).map_err(|e| redb_error("get pattern", e))? else {
            return Ok(None);
        };
        let pattern: Pattern = decode("pattern", guard.value())?;
        self.cache.put(pattern.clone());
        Ok(Some(pattern))
    }

    /// Remove a pattern and its usage history. Returns whether it existed.
    pub fn delete(&self, id: &str) -> SiaResult<bool> {
        let txn = self.store.begin_write()?;
        let existed = {
            let mut table = txn
                .open_table(PATTERNS)
                .map_err(|e| redb_error("open patterns table", e))?;
            let removed = table
                .remove(id)
                .map_err(|e| redb_error("remove pattern", e))?;

            let mut usage = txn
                .open_table(PATTERN_USAGE)
                .map_err(|e| redb_error("open pattern_usage table", e))?;
            for key in usage_keys_for(&usage, id)? {
                usage
                    .remove((key.0.as_str(), key.1, key.2))
                    .map_err(|e| redb_error("remove usage event", e))?;
            }
            removed.is_some()
        };
        txn.commit()
            .map_err(|e| redb_error("commit delete", e))
            .inspect_err(|e| tracing::error!(pattern_id = %id, error = %e, "pattern delete failed"))?;

        self.cache.invalidate(id);
        Ok(existed)
    }

    /// All stored patterns, in key order.
    pub fn get_all(&self) -> SiaResult<Vec<Pattern>> {
        let txn = self.store.begin_read()?;
        let table = txn
            .open_table(PATTERNS)
            .map_err(|e| redb_error("open patterns table", e))?;
        let mut patterns = Vec::new();
        for entry in table.iter().map_err(|e| redb_error("scan patterns", e))? {
            let (_, value) = entry.map_err(|e| redb_error("scan patterns", e))?;
            patterns.push(decode("pattern", value.value())?);
        }
        Ok(patterns)
    }

    /// Multi-criteria search, ordered by success rate then usage count,
    /// both descending, truncated to `limit`.
    pub fn search(&self, criteria: &SearchCriteria, limit: usize) -> SiaResult<Vec<Pattern>> {
        let mut matches: Vec<Pattern> = self
            .get_all()?
            .into_iter()
            .filter(|p| criteria.matches(p))
            .collect();
        matches.sort_by(|a, b| {
            b.success_rate
                .partial_cmp(&a.success_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.usage_count.cmp(&a.usage_count))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    /// Append a usage event and bump the pattern's statistics in one
    /// transaction. Unknown ids are rejected before anything is written.
    pub fn record_usage(
        &self,
        id: &str,
        context: ValueMap,
        success: bool,
        metrics_before: Option<std::collections::BTreeMap<String, f64>>,
        metrics_after: Option<std::collections::BTreeMap<String, f64>>,
    ) -> SiaResult<()> {
        let txn = self.store.begin_write()?;
        let updated = {
            let mut table = txn
                .open_table(PATTERNS)
                .map_err(|e| redb_error("open patterns table", e))?;
            let bytes = table
                .get(id)
                .map_err(|e| redb_error("get pattern", e))?
                .map(|g| g.value().to_vec());
            let Some(bytes) = bytes else {
                // Dropping the transaction rolls back; nothing was written.
                return Err(ValidationError::UnknownPattern { id: id.to_string() }.into());
            };
            let mut pattern: Pattern = decode("pattern", &bytes)?;

            let event = UsageEvent {
                pattern_id: id.to_string(),
                timestamp: unix_micros(),
                context,
                success,
                metrics_before,
                metrics_after,
            };
            let seq = self.usage_seq.fetch_add(1, Ordering::Relaxed);
            let event_bytes = encode("usage event", &event)?;
            let mut usage = txn
                .open_table(PATTERN_USAGE)
                .map_err(|e| redb_error("open pattern_usage table", e))?;
            usage
                .insert((id, event.timestamp, seq), event_bytes.as_slice())
                .map_err(|e| redb_error("append usage event", e))?;

            pattern.usage_count += 1;
            pattern.last_used = Some(unix_secs());
            let pattern_bytes = encode("pattern", &pattern)?;
            table
                .insert(id, pattern_bytes.as_slice())
                .map_err(|e| redb_error("update pattern", e))?;
            pattern
        };
        txn.commit()
            .map_err(|e| redb_error("commit usage", e))
            .inspect_err(|e| tracing::error!(pattern_id = %id, error = %e, "usage write failed"))?;

        self.cache.put(updated);
        Ok(())
    }

    /// Aggregate a pattern's usage history. `Ok(None)` for unknown ids.
    pub fn get_analytics(&self, id: &str) -> SiaResult<Option<PatternAnalytics>> {
        let txn = self.store.begin_read()?;
        let table = txn
            .open_table(PATTERNS)
            .map_err(|e| redb_error("open patterns table", e))?;
        if table
            .get(id)
            .map_err(|e| redb_error("get pattern", e))?
            .is_none()
        {
            return Ok(None);
        }

        let usage = txn
            .open_table(PATTERN_USAGE)
            .map_err(|e| redb_error("open pattern_usage table", e))?;
        let mut events: Vec<UsageEvent> = Vec::new();
        let range = usage
            .range((id, 0u64, 0u64)..=(id, u64::MAX, u64::MAX))
            .map_err(|e| redb_error("scan usage events", e))?;
        for entry in range {
            let (_, value) = entry.map_err(|e| redb_error("scan usage events", e))?;
            events.push(decode("usage event", value.value())?);
        }

        Ok(Some(aggregate(&events)))
    }

    /// Delete stale, rarely-used patterns: those last used (or created, if
    /// never used) before the cutoff *and* used fewer than `min_usage`
    /// times. Returns the number removed.
    pub fn cleanup(&self, older_than_days: u64, min_usage: u64) -> SiaResult<usize> {
        let cutoff = unix_secs().saturating_sub(older_than_days * 24 * 60 * 60);

        let txn = self.store.begin_write()?;
        let removed = {
            let mut table = txn
                .open_table(PATTERNS)
                .map_err(|e| redb_error("open patterns table", e))?;
            let mut stale: Vec<String> = Vec::new();
            for entry in table.iter().map_err(|e| redb_error("scan patterns", e))? {
                let (key, value) = entry.map_err(|e| redb_error("scan patterns", e))?;
                let pattern: Pattern = decode("pattern", value.value())?;
                if pattern.recency_anchor() < cutoff && pattern.usage_count < min_usage {
                    stale.push(key.value().to_string());
                }
            }

            let mut usage = txn
                .open_table(PATTERN_USAGE)
                .map_err(|e| redb_error("open pattern_usage table", e))?;
            for id in &stale {
                table
                    .remove(id.as_str())
                    .map_err(|e| redb_error("remove pattern", e))?;
                for key in usage_keys_for(&usage, id)? {
                    usage
                        .remove((key.0.as_str(), key.1, key.2))
                        .map_err(|e| redb_error("remove usage event", e))?;
                }
            }
            stale.len()
        };
        txn.commit()
            .map_err(|e| redb_error("commit cleanup", e))
            .inspect_err(|e| tracing::error!(error = %e, "pattern cleanup failed"))?;

        self.cache.clear();
        tracing::info!(removed, older_than_days, "pattern cleanup complete");
        Ok(removed)
    }

    pub(crate) fn cache(&self) -> &PatternCache {
        &self.cache
    }
}

fn usage_keys_for(
    usage: &impl ReadableTable<(&'static str, u64, u64), &'static [u8]>,
    id: &str,
) -> SiaResult<Vec<(String, u64, u64)>> {
    let mut keys = Vec::new();
    let range = usage
        .range((id, 0u64, 0u64)..=(id, u64::MAX, u64::MAX))
        .map_err(|e| redb_error("scan usage events", e))?;
    for entry in range {
        let (key, _) = entry.map_err(|e| redb_error("scan usage events", e))?;
        let (pattern_id, ts, seq) = key.value();
        keys.push((pattern_id.to_string(), ts, seq));
    }
    Ok(keys)
}

fn aggregate(events: &[UsageEvent]) -> PatternAnalytics {
    let total_uses = events.len() as u64;
    let successes = events.iter().filter(|e| e.success).count() as u64;
    let success_rate = if total_uses > 0 {
        successes as f64 / total_uses as f64
    } else {
        0.0
    };

    let recent_cutoff = unix_secs().saturating_sub(RECENT_WINDOW_SECS) * 1_000_000;
    let recent_uses = events.iter().filter(|e| e.timestamp >= recent_cutoff).count() as u64;

    // Mean of per-event relative deltas across the overlapping numeric keys.
    // An event contributes only if at least one overlapping key has a
    // positive "before" denominator.
    let mut improvements: Vec<f64> = Vec::new();
    for event in events {
        let (Some(before), Some(after)) = (&event.metrics_before, &event.metrics_after) else {
            continue;
        };
        let deltas: Vec<f64> = before
            .iter()
            .filter(|(_, b)| **b > 0.0)
            .filter_map(|(key, b)| after.get(key).map(|a| (a - b) / b))
            .collect();
        if !deltas.is_empty() {
            improvements.push(deltas.iter().sum::<f64>() / deltas.len() as f64);
        }
    }
    let avg_improvement = if improvements.is_empty() {
        0.0
    } else {
        improvements.iter().sum::<f64>() / improvements.len() as f64
    };

    PatternAnalytics {
        total_uses,
        success_rate,
        recent_uses,
        avg_improvement,
    }
}
