//! Dependency graph over module ids.
//!
//! The graph keeps two adjacency maps, `dependencies` and `dependents`, as
//! exact inverses of each other; both sides of an edge are inserted under a
//! single write lock, so readers never observe half an edge. Self-edges are
//! rejected. Cycles are tolerated as pathological input: traversals carry
//! visited sets so they terminate, and leveling classifies unresolved ids
//! as cyclic rather than iterating forever (see [`hierarchy`]).

mod hierarchy;

pub use hierarchy::{HierarchyLevel, HierarchyLevels};

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use parking_lot::RwLock;
use tracing::warn;

use crate::registry::ModuleId;

#[derive(Debug, Default, Clone)]
struct Node {
    dependencies: BTreeSet<ModuleId>,
    dependents: BTreeSet<ModuleId>,
}

/// Directed dependency graph with inverse-edge bookkeeping and cached
/// hierarchy levels.
///
/// Reads are lock-shared and cheap; edge insertion invalidates the level
/// cache, which is recomputed lazily on the next [`levels`](Self::levels)
/// call.
pub struct DependencyGraph {
    nodes: RwLock<HashMap<ModuleId, Node>>,
    levels: RwLock<Option<HierarchyLevels>>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            levels: RwLock::new(None),
        }
    }

    /// Insert dependency edges `id -> dep` for each dep.
    ///
    /// Both adjacency directions are updated under one write lock.
    /// Self-dependencies are skipped with a warning. Inserting an edge that
    /// already exists is a no-op and does not invalidate cached levels.
    pub fn add_dependencies(&self, id: &ModuleId, deps: &[ModuleId]) {
        if deps.is_empty() {
            // Still make the node known so leveling sees it at level 0.
            let mut nodes = self.nodes.write();
            if !nodes.contains_key(id) {
                nodes.insert(id.clone(), Node::default());
                drop(nodes);
                self.invalidate_levels();
            }
            return;
        }

        let mut changed = false;
        {
            let mut nodes = self.nodes.write();
            nodes.entry(id.clone()).or_default();
            for dep in deps {
                if dep == id {
                    warn!(module = %id, "ignoring self-dependency");
                    continue;
                }
                nodes.entry(dep.clone()).or_default();
                let inserted = nodes
                    .get_mut(id)
                    .map(|n| n.dependencies.insert(dep.clone()))
                    .unwrap_or(false);
                if inserted {
                    if let Some(n) = nodes.get_mut(dep) {
                        n.dependents.insert(id.clone());
                    }
                    changed = true;
                }
            }
        }

        if changed {
            self.invalidate_levels();
        }
    }

    /// Whether `a` depends on `b`, directly or transitively.
    ///
    /// Visited-set DFS; diamond shapes and cycles terminate.
    pub fn depends_on(&self, a: &ModuleId, b: &ModuleId) -> bool {
        let nodes = self.nodes.read();
        let mut visited: HashSet<ModuleId> = HashSet::new();
        let mut stack: Vec<ModuleId> = vec![a.clone()];

        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(node) = nodes.get(&current) {
                if node.dependencies.contains(b) {
                    return true;
                }
                stack.extend(node.dependencies.iter().cloned());
            }
        }
        false
    }

    /// Direct dependencies of `id`.
    pub fn direct_dependencies(&self, id: &ModuleId) -> Vec<ModuleId> {
        self.nodes
            .read()
            .get(id)
            .map(|n| n.dependencies.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Full dependency closure of `id`, deduplicated, excluding `id` itself.
    pub fn all_dependencies(&self, id: &ModuleId) -> Vec<ModuleId> {
        self.closure(id, |node| &node.dependencies)
    }

    /// Direct dependents of `id` (modules that declare `id` as a dependency).
    pub fn direct_dependents(&self, id: &ModuleId) -> Vec<ModuleId> {
        self.nodes
            .read()
            .get(id)
            .map(|n| n.dependents.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Full dependent closure of `id`, deduplicated, excluding `id` itself.
    pub fn all_dependents(&self, id: &ModuleId) -> Vec<ModuleId> {
        self.closure(id, |node| &node.dependents)
    }

    /// Shortest dependency chain from `from` to `to`, if any.
    ///
    /// BFS over dependency edges; the returned path includes both
    /// endpoints. Returns `None` when `to` is unreachable.
    pub fn shortest_chain(&self, from: &ModuleId, to: &ModuleId) -> Option<Vec<ModuleId>> {
        if from == to {
            return Some(vec![from.clone()]);
        }
        let nodes = self.nodes.read();
        let mut parents: HashMap<ModuleId, ModuleId> = HashMap::new();
        let mut queue: VecDeque<ModuleId> = VecDeque::new();
        queue.push_back(from.clone());
        parents.insert(from.clone(), from.clone());

        while let Some(current) = queue.pop_front() {
            let Some(node) = nodes.get(&current) else {
                continue;
            };
            for dep in &node.dependencies {
                if parents.contains_key(dep) {
                    continue;
                }
                parents.insert(dep.clone(), current.clone());
                if dep == to {
                    // Walk back to reconstruct the path.
                    let mut path = vec![dep.clone()];
                    let mut cursor = current.clone();
                    while cursor != *from {
                        path.push(cursor.clone());
                        cursor = parents[&cursor].clone();
                    }
                    path.push(from.clone());
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(dep.clone());
            }
        }
        None
    }

    /// Complexity score: direct dependency count plus half the indirect one.
    ///
    /// Monotonically non-decreasing as edges are added; used to prioritize
    /// deeper subtrees.
    pub fn complexity(&self, id: &ModuleId) -> f64 {
        let direct = self.direct_dependencies(id).len() as f64;
        let all = self.all_dependencies(id).len() as f64;
        direct + 0.5 * (all - direct)
    }

    /// Hierarchy levels for every known module id.
    ///
    /// Cached; recomputed after any edge insertion. Cyclic ids carry the
    /// [`HierarchyLevel::Cyclic`] sentinel.
    pub fn levels(&self) -> HierarchyLevels {
        if let Some(levels) = self.levels.read().as_ref() {
            return levels.clone();
        }

        let snapshot: HashMap<ModuleId, BTreeSet<ModuleId>> = {
            let nodes = self.nodes.read();
            nodes
                .iter()
                .map(|(id, node)| (id.clone(), node.dependencies.clone()))
                .collect()
        };
        let computed = hierarchy::compute_levels(&snapshot);
        *self.levels.write() = Some(computed.clone());
        computed
    }

    /// Hierarchy level of a single id, `None` when unknown.
    pub fn level(&self, id: &ModuleId) -> Option<HierarchyLevel> {
        self.levels().get(id)
    }

    /// All known module ids.
    pub fn ids(&self) -> Vec<ModuleId> {
        self.nodes.read().keys().cloned().collect()
    }

    fn invalidate_levels(&self) {
        *self.levels.write() = None;
    }

    fn closure(&self, id: &ModuleId, edges: impl Fn(&Node) -> &BTreeSet<ModuleId>) -> Vec<ModuleId> {
        let nodes = self.nodes.read();
        let mut visited: HashSet<ModuleId> = HashSet::new();
        let mut result: Vec<ModuleId> = Vec::new();
        let mut stack: Vec<ModuleId> = nodes
            .get(id)
            .map(|n| edges(n).iter().cloned().collect())
            .unwrap_or_default();

        while let Some(current) = stack.pop() {
            if current == *id || !visited.insert(current.clone()) {
                continue;
            }
            if let Some(node) = nodes.get(&current) {
                stack.extend(edges(node).iter().cloned());
            }
            result.push(current);
        }
        result.sort();
        result
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("nodes", &self.nodes.read().len())
            .finish()
    }
}
