//! Per-module usage patterns: the raw substrate for sequence prediction.
//!
//! Every module-rendered event updates exactly one pattern and bumps the
//! `followed_by` counter of every *other* pattern used inside the lookback
//! window. The store is written only by the usage tracker; everything else
//! reads snapshots.

use std::collections::HashMap;

use crate::registry::ModuleId;

/// How far back a prior usage counts as "followed by" the current one.
pub const DEFAULT_LOOKBACK_MS: u64 = 10_000;

/// Observed usage history of one module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsagePattern {
    /// Times this module was rendered this session.
    pub usage_count: u64,
    /// Timestamp (ms since epoch) of the most recent render.
    pub last_used_at_ms: u64,
    /// For each module B: how often B rendered within the lookback window
    /// after this module.
    pub followed_by: HashMap<ModuleId, u32>,
}

impl UsagePattern {
    /// Count of times `next` followed this module.
    pub fn followed_count(&self, next: &ModuleId) -> u32 {
        self.followed_by.get(next).copied().unwrap_or(0)
    }
}

/// Store of usage patterns keyed by module id.
#[derive(Debug, Default)]
pub struct PatternStore {
    patterns: HashMap<ModuleId, UsagePattern>,
    lookback_ms: u64,
}

impl PatternStore {
    /// Create a store with the given lookback window.
    pub fn new(lookback_ms: u64) -> Self {
        Self {
            patterns: HashMap::new(),
            lookback_ms,
        }
    }

    /// Record that `module` rendered at `at_ms`.
    ///
    /// Scans all other patterns last used within the lookback window and
    /// increments their `followed_by[module]` counters, then updates the
    /// module's own pattern.
    pub fn record_rendered(&mut self, module: &ModuleId, at_ms: u64) {
        let window_start = at_ms.saturating_sub(self.lookback_ms);
        for (other_id, other) in self.patterns.iter_mut() {
            if other_id == module {
                continue;
            }
            if other.usage_count > 0 && other.last_used_at_ms >= window_start {
                *other.followed_by.entry(module.clone()).or_insert(0) += 1;
            }
        }

        let pattern = self.patterns.entry(module.clone()).or_default();
        pattern.usage_count += 1;
        pattern.last_used_at_ms = at_ms;
    }

    /// Pattern for `module`, if it was ever used.
    pub fn get(&self, module: &ModuleId) -> Option<&UsagePattern> {
        self.patterns.get(module)
    }

    /// Ids used at least once, most recent first.
    pub fn recently_used(&self, limit: usize) -> Vec<ModuleId> {
        let mut used: Vec<(&ModuleId, u64)> = self
            .patterns
            .iter()
            .filter(|(_, p)| p.usage_count > 0)
            .map(|(id, p)| (id, p.last_used_at_ms))
            .collect();
        used.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        used.into_iter().take(limit).map(|(id, _)| id.clone()).collect()
    }

    /// Whether `module` was used within `window_ms` of `now_ms`.
    pub fn used_within(&self, module: &ModuleId, now_ms: u64, window_ms: u64) -> bool {
        self.get(module)
            .map(|p| p.usage_count > 0 && p.last_used_at_ms >= now_ms.saturating_sub(window_ms))
            .unwrap_or(false)
    }

    /// Highest usage count across all patterns (for frequency normalization).
    pub fn max_usage_count(&self) -> u64 {
        self.patterns.values().map(|p| p.usage_count).max().unwrap_or(0)
    }

    /// Number of tracked patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether no pattern was recorded yet.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_followed_by_within_window() {
        let mut store = PatternStore::new(DEFAULT_LOOKBACK_MS);
        store.record_rendered(&"a".into(), 1_000);
        store.record_rendered(&"b".into(), 5_000);

        let a = store.get(&"a".into()).expect("pattern a");
        assert_eq!(a.followed_count(&"b".into()), 1);
        // b was not followed by anything.
        let b = store.get(&"b".into()).expect("pattern b");
        assert!(b.followed_by.is_empty());
    }

    #[test]
    fn test_followed_by_outside_window_ignored() {
        let mut store = PatternStore::new(DEFAULT_LOOKBACK_MS);
        store.record_rendered(&"a".into(), 1_000);
        store.record_rendered(&"b".into(), 20_000);

        let a = store.get(&"a".into()).expect("pattern a");
        assert_eq!(a.followed_count(&"b".into()), 0);
    }

    #[test]
    fn test_repeated_sequence_accumulates() {
        // A then B within 5s, five times over.
        let mut store = PatternStore::new(DEFAULT_LOOKBACK_MS);
        for round in 0..5u64 {
            let base = round * 60_000;
            store.record_rendered(&"a".into(), base);
            store.record_rendered(&"b".into(), base + 5_000);
        }
        let a = store.get(&"a".into()).expect("pattern a");
        assert!(a.followed_count(&"b".into()) >= 5);
        assert_eq!(a.usage_count, 5);
    }

    #[test]
    fn test_recently_used_ordering() {
        let mut store = PatternStore::new(DEFAULT_LOOKBACK_MS);
        store.record_rendered(&"old".into(), 1_000);
        store.record_rendered(&"mid".into(), 50_000);
        store.record_rendered(&"new".into(), 90_000);

        assert_eq!(
            store.recently_used(2),
            vec!["new".into(), "mid".into()]
        );
    }

    #[test]
    fn test_used_within() {
        let mut store = PatternStore::new(DEFAULT_LOOKBACK_MS);
        store.record_rendered(&"a".into(), 10_000);
        assert!(store.used_within(&"a".into(), 12_000, 5_000));
        assert!(!store.used_within(&"a".into(), 30_000, 5_000));
        assert!(!store.used_within(&"never".into(), 12_000, 5_000));
    }
}
