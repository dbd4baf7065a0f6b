//! Hierarchy level assignment by fixed-point iteration.
//!
//! Modules with no dependencies sit at level 0; every other module sits one
//! level above the highest of its dependencies. A pass assigns levels to any
//! module whose dependencies are fully leveled and repeats until a pass
//! changes nothing. The iteration is capped at the node count: a true cycle
//! can never converge, so whatever remains unresolved at the cap is
//! classified [`HierarchyLevel::Cyclic`] and logged, never looped on.
//!
//! Levels are the primary tie-break for load sequencing: within a priority
//! tier, a dependency is requested no later than its dependents.

use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use crate::registry::ModuleId;

/// Level of one module in the dependency hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HierarchyLevel {
    /// Converged level; 0 means no dependencies.
    Ranked(u32),
    /// Sentinel for ids on (or downstream of) a dependency cycle.
    ///
    /// Sorts after every ranked level so cyclic modules are requested last
    /// within their tier instead of stalling the queue.
    Cyclic,
}

impl HierarchyLevel {
    /// The numeric level, `None` for cyclic ids.
    pub fn rank(&self) -> Option<u32> {
        match self {
            HierarchyLevel::Ranked(n) => Some(*n),
            HierarchyLevel::Cyclic => None,
        }
    }

    /// Sort key placing cyclic ids after all ranked ones.
    pub fn sort_key(&self) -> u64 {
        match self {
            HierarchyLevel::Ranked(n) => *n as u64,
            HierarchyLevel::Cyclic => u64::MAX,
        }
    }
}

impl PartialOrd for HierarchyLevel {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HierarchyLevel {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl std::fmt::Display for HierarchyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HierarchyLevel::Ranked(n) => write!(f, "{n}"),
            HierarchyLevel::Cyclic => write!(f, "cyclic"),
        }
    }
}

/// Immutable level assignment for every known module id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HierarchyLevels {
    levels: HashMap<ModuleId, HierarchyLevel>,
}

impl HierarchyLevels {
    /// Level of `id`, `None` when the id is unknown.
    pub fn get(&self, id: &ModuleId) -> Option<HierarchyLevel> {
        self.levels.get(id).copied()
    }

    /// Number of leveled ids.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Whether any id was leveled.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// The highest ranked level present, ignoring cyclic sentinels.
    pub fn max_rank(&self) -> u32 {
        self.levels
            .values()
            .filter_map(HierarchyLevel::rank)
            .max()
            .unwrap_or(0)
    }

    /// Ids flagged as cyclic.
    pub fn cyclic_ids(&self) -> Vec<ModuleId> {
        let mut ids: Vec<ModuleId> = self
            .levels
            .iter()
            .filter(|(_, l)| **l == HierarchyLevel::Cyclic)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Group the given ids by ascending level; cyclic ids form the final
    /// group. Ids unknown to the assignment are treated as level 0.
    pub fn group_by_level(&self, ids: &[ModuleId]) -> Vec<Vec<ModuleId>> {
        let mut keyed: Vec<(u64, ModuleId)> = ids
            .iter()
            .map(|id| {
                let key = self
                    .get(id)
                    .map(|l| l.sort_key())
                    .unwrap_or(0);
                (key, id.clone())
            })
            .collect();
        keyed.sort();

        let mut groups: Vec<Vec<ModuleId>> = Vec::new();
        let mut last_key: Option<u64> = None;
        for (key, id) in keyed {
            if last_key != Some(key) {
                groups.push(Vec::new());
                last_key = Some(key);
            }
            if let Some(group) = groups.last_mut() {
                group.push(id);
            }
        }
        groups
    }
}

/// Compute levels for a dependency snapshot.
///
/// `deps` maps each id to its direct dependency set; ids appearing only as
/// dependencies must already be present as keys (the graph guarantees this).
pub(super) fn compute_levels(deps: &HashMap<ModuleId, BTreeSet<ModuleId>>) -> HierarchyLevels {
    let mut levels: HashMap<ModuleId, HierarchyLevel> = HashMap::with_capacity(deps.len());

    // Seed: every zero-dependency module is level 0.
    for (id, dep_set) in deps {
        if dep_set.is_empty() {
            levels.insert(id.clone(), HierarchyLevel::Ranked(0));
        }
    }

    // Fixed point: level any module whose dependencies are fully leveled.
    // A converging assignment needs at most one pass per hierarchy level,
    // so node-count passes suffice; anything left is on a cycle.
    let max_passes = deps.len().max(1);
    for _ in 0..max_passes {
        let mut changed = false;
        for (id, dep_set) in deps {
            if levels.contains_key(id) {
                continue;
            }
            let mut highest: u32 = 0;
            let mut complete = true;
            for dep in dep_set {
                match levels.get(dep) {
                    Some(HierarchyLevel::Ranked(n)) => highest = highest.max(*n),
                    _ => {
                        complete = false;
                        break;
                    }
                }
            }
            if complete {
                levels.insert(id.clone(), HierarchyLevel::Ranked(highest + 1));
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // Unresolved ids are on a cycle or depend on one.
    let unresolved: Vec<&ModuleId> = deps.keys().filter(|id| !levels.contains_key(*id)).collect();
    if !unresolved.is_empty() {
        warn!(
            count = unresolved.len(),
            "dependency cycle detected; affected modules scheduled last"
        );
        for id in unresolved {
            levels.insert(id.clone(), HierarchyLevel::Cyclic);
        }
    }

    HierarchyLevels { levels }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(pairs: &[(&str, &[&str])]) -> HashMap<ModuleId, BTreeSet<ModuleId>> {
        let mut map: HashMap<ModuleId, BTreeSet<ModuleId>> = HashMap::new();
        for (id, ds) in pairs {
            map.insert((*id).into(), ds.iter().map(|d| (*d).into()).collect());
            for d in *ds {
                map.entry((*d).into()).or_default();
            }
        }
        map
    }

    #[test]
    fn test_linear_chain_levels() {
        let levels = compute_levels(&deps(&[("b", &["a"]), ("c", &["b"])]));
        assert_eq!(levels.get(&"a".into()), Some(HierarchyLevel::Ranked(0)));
        assert_eq!(levels.get(&"b".into()), Some(HierarchyLevel::Ranked(1)));
        assert_eq!(levels.get(&"c".into()), Some(HierarchyLevel::Ranked(2)));
        assert_eq!(levels.max_rank(), 2);
    }

    #[test]
    fn test_diamond_takes_max_dependency_level() {
        // d -> {b, c}; b -> a; c -> a; e -> {c}
        let levels = compute_levels(&deps(&[
            ("b", &["a"]),
            ("c", &["a"]),
            ("d", &["b", "c"]),
            ("e", &["c"]),
        ]));
        assert_eq!(levels.get(&"d".into()), Some(HierarchyLevel::Ranked(2)));
        assert_eq!(levels.get(&"e".into()), Some(HierarchyLevel::Ranked(2)));
    }

    #[test]
    fn test_cycle_flagged_without_poisoning_rest() {
        let levels = compute_levels(&deps(&[
            ("p", &["q"]),
            ("q", &["p"]),
            ("child", &["p"]),
            ("solo", &[]),
        ]));
        assert_eq!(levels.get(&"p".into()), Some(HierarchyLevel::Cyclic));
        assert_eq!(levels.get(&"q".into()), Some(HierarchyLevel::Cyclic));
        // Downstream of a cycle cannot converge either.
        assert_eq!(levels.get(&"child".into()), Some(HierarchyLevel::Cyclic));
        assert_eq!(levels.get(&"solo".into()), Some(HierarchyLevel::Ranked(0)));
        assert_eq!(levels.cyclic_ids().len(), 3);
    }

    #[test]
    fn test_cyclic_sorts_after_ranked() {
        assert!(HierarchyLevel::Ranked(1000) < HierarchyLevel::Cyclic);
        assert!(HierarchyLevel::Ranked(0) < HierarchyLevel::Ranked(1));
    }

    #[test]
    fn test_group_by_level_orders_and_buckets() {
        let levels = compute_levels(&deps(&[("b", &["a"]), ("c", &["b"]), ("d", &["a"])]));
        let groups = levels.group_by_level(&["c".into(), "a".into(), "d".into(), "b".into()]);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0], vec!["a".into()]);
        assert_eq!(groups[1], vec!["b".into(), "d".into()]);
        assert_eq!(groups[2], vec!["c".into()]);
    }

    #[test]
    fn test_empty_graph() {
        let levels = compute_levels(&HashMap::new());
        assert!(levels.is_empty());
        assert_eq!(levels.max_rank(), 0);
    }
}
