//! Module registry: the catalog of loadable UI modules.
//!
//! The registry is the authoritative source for [`ModuleDescriptor`]s. It is
//! populated once at startup from a static catalog and extended at runtime
//! when a previously unknown module-bearing element appears (dynamic
//! auto-registration). Dependency edges declared on descriptors are mirrored
//! into the [`DependencyGraph`](crate::graph::DependencyGraph) on insertion,
//! so the registry is the single write path for the dependency relation.
//!
//! # Example
//!
//! ```
//! use preflight::registry::{ModuleDescriptor, ModulePriority, ModuleRegistry};
//! use preflight::graph::DependencyGraph;
//! use std::sync::Arc;
//!
//! let graph = Arc::new(DependencyGraph::new());
//! let registry = ModuleRegistry::new(Arc::clone(&graph));
//!
//! registry.register(
//!     ModuleDescriptor::new("hero-banner", "/modules/hero-banner.js")
//!         .with_priority(ModulePriority::Critical),
//! );
//! assert!(registry.get(&"hero-banner".into()).is_some());
//! ```

mod descriptor;

pub use descriptor::{ModuleDescriptor, ModuleId, ModulePriority};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::graph::DependencyGraph;

/// Thread-safe catalog of module descriptors.
///
/// Registration is idempotent: re-registering an identical descriptor leaves
/// the registry, the dependency graph, and hierarchy levels unchanged.
/// Dependency ids that have never been registered are auto-created as stub
/// descriptors at `Medium` priority so the graph stays closed over its edges.
pub struct ModuleRegistry {
    modules: RwLock<HashMap<ModuleId, ModuleDescriptor>>,
    graph: Arc<DependencyGraph>,
}

impl ModuleRegistry {
    /// Create an empty registry writing its edges into `graph`.
    pub fn new(graph: Arc<DependencyGraph>) -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
            graph,
        }
    }

    /// Register a module descriptor (idempotent upsert).
    ///
    /// If the id is already present, the stored descriptor's dependency set
    /// is extended with the incoming one (idempotent union); other fields
    /// keep their first-registered values unless the existing entry is a
    /// stub, in which case the richer descriptor replaces it.
    pub fn register(&self, descriptor: ModuleDescriptor) {
        let deps: Vec<ModuleId> = descriptor.dependencies.iter().cloned().collect();
        let id = descriptor.id.clone();

        {
            let mut modules = self.modules.write();
            match modules.get_mut(&id) {
                Some(existing) if existing.stub && !descriptor.stub => {
                    let mut merged = descriptor;
                    merged
                        .dependencies
                        .extend(existing.dependencies.iter().cloned());
                    *existing = merged;
                }
                Some(existing) => {
                    existing.dependencies.extend(deps.iter().cloned());
                }
                None => {
                    debug!(module = %id, deps = deps.len(), "registering module");
                    modules.insert(id.clone(), descriptor);
                }
            }
        }

        self.ensure_stubs(&deps);
        self.graph.add_dependencies(&id, &deps);
    }

    /// Add dependencies to an existing module (idempotent union).
    ///
    /// Unknown dependency ids are auto-registered as stubs. The edge
    /// insertion invalidates any cached hierarchy level downstream of `id`.
    pub fn add_dependencies(&self, id: &ModuleId, deps: &[ModuleId]) {
        {
            let mut modules = self.modules.write();
            let entry = modules
                .entry(id.clone())
                .or_insert_with(|| ModuleDescriptor::stub(id.clone()));
            entry.dependencies.extend(deps.iter().cloned());
        }

        self.ensure_stubs(deps);
        self.graph.add_dependencies(id, deps);
    }

    /// Look up a descriptor by id.
    pub fn get(&self, id: &ModuleId) -> Option<ModuleDescriptor> {
        self.modules.read().get(id).cloned()
    }

    /// Whether the id is known to the registry.
    pub fn contains(&self, id: &ModuleId) -> bool {
        self.modules.read().contains_key(id)
    }

    /// All descriptors declared at the given priority tier.
    pub fn all_by_priority(&self, tier: ModulePriority) -> Vec<ModuleDescriptor> {
        let mut found: Vec<ModuleDescriptor> = self
            .modules
            .read()
            .values()
            .filter(|d| d.priority == tier)
            .cloned()
            .collect();
        // Deterministic order for scheduling and tests.
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    /// All registered module ids.
    pub fn ids(&self) -> Vec<ModuleId> {
        self.modules.read().keys().cloned().collect()
    }

    /// Number of registered modules (stubs included).
    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }

    /// Access the dependency graph this registry writes into.
    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    /// Auto-create stub descriptors for dependency ids never registered.
    fn ensure_stubs(&self, deps: &[ModuleId]) {
        let mut modules = self.modules.write();
        for dep in deps {
            modules
                .entry(dep.clone())
                .or_insert_with(|| ModuleDescriptor::stub(dep.clone()));
        }
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ModuleRegistry {
        ModuleRegistry::new(Arc::new(DependencyGraph::new()))
    }

    #[test]
    fn test_register_and_get() {
        let reg = registry();
        reg.register(
            ModuleDescriptor::new("navbar", "/modules/navbar.js")
                .with_priority(ModulePriority::Critical)
                .with_estimated_size(32 * 1024),
        );

        let d = reg.get(&"navbar".into()).expect("descriptor");
        assert_eq!(d.priority, ModulePriority::Critical);
        assert_eq!(d.estimated_size_bytes, 32 * 1024);
        assert!(!d.stub);
    }

    #[test]
    fn test_registration_is_idempotent() {
        let reg = registry();
        let desc = ModuleDescriptor::new("card", "/modules/card.js")
            .with_dependency("theme")
            .with_priority(ModulePriority::High);

        reg.register(desc.clone());
        let levels_before = reg.graph().levels();
        reg.register(desc);

        assert_eq!(reg.len(), 2); // card + theme stub
        assert_eq!(reg.graph().levels(), levels_before);
    }

    #[test]
    fn test_unknown_dependency_becomes_stub() {
        let reg = registry();
        reg.register(ModuleDescriptor::new("blog-list", "/modules/blog-list.js").with_dependency("pagination"));

        let stub = reg.get(&"pagination".into()).expect("stub");
        assert!(stub.stub);
        assert_eq!(stub.priority, ModulePriority::Medium);
    }

    #[test]
    fn test_stub_upgraded_by_real_registration() {
        let reg = registry();
        reg.register(ModuleDescriptor::new("form", "/modules/form.js").with_dependency("validator"));
        reg.register(
            ModuleDescriptor::new("validator", "/modules/validator.js")
                .with_priority(ModulePriority::High),
        );

        let d = reg.get(&"validator".into()).expect("descriptor");
        assert!(!d.stub);
        assert_eq!(d.priority, ModulePriority::High);
        assert_eq!(d.load_path, "/modules/validator.js");
    }

    #[test]
    fn test_add_dependencies_is_union() {
        let reg = registry();
        reg.register(ModuleDescriptor::new("gallery", "/modules/gallery.js"));
        reg.add_dependencies(&"gallery".into(), &["lightbox".into(), "thumbs".into()]);
        reg.add_dependencies(&"gallery".into(), &["thumbs".into()]);

        let d = reg.get(&"gallery".into()).expect("descriptor");
        assert_eq!(d.dependencies.len(), 2);
    }

    #[test]
    fn test_all_by_priority_sorted() {
        let reg = registry();
        reg.register(ModuleDescriptor::new("b", "/b.js").with_priority(ModulePriority::High));
        reg.register(ModuleDescriptor::new("a", "/a.js").with_priority(ModulePriority::High));
        reg.register(ModuleDescriptor::new("c", "/c.js").with_priority(ModulePriority::Low));

        let high = reg.all_by_priority(ModulePriority::High);
        let ids: Vec<_> = high.iter().map(|d| d.id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
