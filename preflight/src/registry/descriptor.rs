//! Module identity and descriptor types.
//!
//! A [`ModuleId`] is a cheap-to-clone interned string; descriptors are the
//! immutable facts the catalog knows about a loadable module. Only the
//! dependency set may grow after creation (idempotent union through the
//! registry).

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Serialize, Serializer};

/// Stable identifier for a loadable UI module.
///
/// Backed by `Arc<str>` so ids can be cloned freely across the scheduler,
/// cache and tracker without allocation.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(Arc<str>);

impl ModuleId {
    /// Create an id from any string-like value.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ModuleId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ModuleId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleId({})", self.0)
    }
}

impl Serialize for ModuleId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Declared priority tier of a module.
///
/// Critical modules are loaded during bootstrap before anything else;
/// the lower tiers roll out progressively afterwards, gated by the
/// operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModulePriority {
    /// Loaded during bootstrap, gates the rest of the pipeline.
    Critical,
    /// Loaded shortly after bootstrap completes.
    High,
    /// Loaded in the background on capable devices.
    Medium,
    /// Loaded last, only in balanced/aggressive modes.
    Low,
}

impl ModulePriority {
    /// All tiers in rollout order.
    pub const TIERS: [ModulePriority; 4] = [
        ModulePriority::Critical,
        ModulePriority::High,
        ModulePriority::Medium,
        ModulePriority::Low,
    ];

    /// Cache-eviction boost for this tier (higher survives longer).
    pub fn cache_boost(&self) -> f64 {
        match self {
            ModulePriority::Critical => 3.0,
            ModulePriority::High => 2.0,
            ModulePriority::Medium => 1.0,
            ModulePriority::Low => 0.0,
        }
    }

    /// Normalized weight in [0, 1] for prediction scoring.
    pub fn weight(&self) -> f64 {
        self.cache_boost() / 3.0
    }

    /// Short name for display and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModulePriority::Critical => "critical",
            ModulePriority::High => "high",
            ModulePriority::Medium => "medium",
            ModulePriority::Low => "low",
        }
    }
}

impl fmt::Display for ModulePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ModulePriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(ModulePriority::Critical),
            "high" => Ok(ModulePriority::High),
            "medium" => Ok(ModulePriority::Medium),
            "low" => Ok(ModulePriority::Low),
            other => Err(format!("unknown priority tier: {other}")),
        }
    }
}

/// Everything the catalog knows about a loadable module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    /// Stable module id.
    pub id: ModuleId,

    /// Where the loader fetches the module from.
    pub load_path: String,

    /// Declared priority tier.
    pub priority: ModulePriority,

    /// Ids of modules that must be available before this one renders.
    pub dependencies: BTreeSet<ModuleId>,

    /// Estimated artifact size, used for cache budgeting before first load.
    pub estimated_size_bytes: u64,

    /// Estimated load duration, used for scheduling heuristics.
    pub estimated_load_ms: u64,

    /// Whether the module is lazily loaded (viewport/interaction driven).
    pub lazy: bool,

    /// True when auto-created from a dependency reference; replaced on the
    /// first real registration of the id.
    pub stub: bool,
}

impl ModuleDescriptor {
    /// Create a descriptor with default `Medium` priority and no deps.
    pub fn new(id: impl Into<ModuleId>, load_path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            load_path: load_path.into(),
            priority: ModulePriority::Medium,
            dependencies: BTreeSet::new(),
            estimated_size_bytes: 0,
            estimated_load_ms: 0,
            lazy: false,
            stub: false,
        }
    }

    /// Create a stub for an id only ever seen as a dependency.
    ///
    /// The load path follows the conventional `/modules/{id}.js` layout so
    /// a stub is still loadable if scheduled before its real registration.
    pub fn stub(id: ModuleId) -> Self {
        let load_path = format!("/modules/{id}.js");
        Self {
            stub: true,
            ..Self::new(id, load_path)
        }
    }

    /// Set the priority tier.
    pub fn with_priority(mut self, priority: ModulePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Declare a dependency on another module id.
    pub fn with_dependency(mut self, dep: impl Into<ModuleId>) -> Self {
        self.dependencies.insert(dep.into());
        self
    }

    /// Declare several dependencies at once.
    pub fn with_dependencies<I, T>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ModuleId>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Set the estimated artifact size in bytes.
    pub fn with_estimated_size(mut self, bytes: u64) -> Self {
        self.estimated_size_bytes = bytes;
        self
    }

    /// Set the estimated load duration in milliseconds.
    pub fn with_estimated_load_ms(mut self, ms: u64) -> Self {
        self.estimated_load_ms = ms;
        self
    }

    /// Mark the module as lazily loaded.
    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_id_interning() {
        let a: ModuleId = "hero".into();
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "hero");
    }

    #[test]
    fn test_priority_ordering_matches_rollout() {
        assert!(ModulePriority::Critical < ModulePriority::High);
        assert!(ModulePriority::High < ModulePriority::Medium);
        assert!(ModulePriority::Medium < ModulePriority::Low);
    }

    #[test]
    fn test_priority_round_trip() {
        for tier in ModulePriority::TIERS {
            assert_eq!(tier.as_str().parse::<ModulePriority>().unwrap(), tier);
        }
        assert!("urgent".parse::<ModulePriority>().is_err());
    }

    #[test]
    fn test_builder_accumulates_dependencies() {
        let d = ModuleDescriptor::new("comments", "/modules/comments.js")
            .with_dependency("avatar")
            .with_dependencies(["markdown", "avatar"]);
        assert_eq!(d.dependencies.len(), 2);
    }

    #[test]
    fn test_stub_has_conventional_path() {
        let s = ModuleDescriptor::stub("avatar".into());
        assert!(s.stub);
        assert_eq!(s.load_path, "/modules/avatar.js");
        assert_eq!(s.priority, ModulePriority::Medium);
    }
}
