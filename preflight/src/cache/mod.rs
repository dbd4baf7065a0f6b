//! Value-scored, size-bounded artifact cache.
//!
//! Entries track recency, frequency and declared priority; when an insert
//! pushes total size over budget, `prune` evicts lowest-value entries until
//! usage falls to the prune target (80% of budget). Per-id miss counters
//! feed the periodic `optimize` pass, which is the engine's self-correction
//! loop: a poor hit ratio turns the most-missed ids into forced preloads.
//!
//! Entry state is owned exclusively by the cache; callers only ever see the
//! artifact behind an `Arc`. Hit/miss/eviction counters use atomics so stat
//! reads never contend with the entry lock.

mod score;

pub use score::{value_score, ScoreWeights};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use crate::loader::LoadedModule;
use crate::registry::{ModuleId, ModulePriority};

/// Default cache budget before device scaling (20MB).
pub const DEFAULT_BUDGET_BYTES: u64 = 20 * 1024 * 1024;

/// Fraction of the budget pruning shrinks usage down to.
pub const PRUNE_TARGET_RATIO: f64 = 0.8;

/// Hit ratio below which `optimize` forces preloads of missed ids.
pub const OPTIMIZE_HIT_RATIO_THRESHOLD: f64 = 0.5;

/// How many most-missed ids one optimize pass surfaces.
const OPTIMIZE_CANDIDATES: usize = 5;

/// Tuning knobs for the artifact cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Total size budget in bytes.
    pub budget_bytes: u64,
    /// Prune shrinks usage to this fraction of the budget.
    pub prune_target_ratio: f64,
    /// Value-score weights for eviction ranking.
    pub weights: ScoreWeights,
    /// Hit ratio below which optimize surfaces forced preloads.
    pub optimize_threshold: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            budget_bytes: DEFAULT_BUDGET_BYTES,
            prune_target_ratio: PRUNE_TARGET_RATIO,
            weights: ScoreWeights::default(),
            optimize_threshold: OPTIMIZE_HIT_RATIO_THRESHOLD,
        }
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct CacheStats {
    /// Total hits since creation.
    pub hits: u64,
    /// Total misses since creation.
    pub misses: u64,
    /// Entries evicted by pruning.
    pub evictions: u64,
    /// Entries currently resident.
    pub entries: usize,
    /// Bytes currently resident.
    pub total_bytes: u64,
    /// Configured budget in bytes.
    pub budget_bytes: u64,
}

impl CacheStats {
    /// Hit ratio over all lookups, 0.0 when nothing was looked up.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheEntry {
    artifact: Arc<LoadedModule>,
    priority: ModulePriority,
    last_accessed: Instant,
    access_count: u32,
    size_bytes: u64,
}

struct CacheState {
    entries: HashMap<ModuleId, CacheEntry>,
    total_bytes: u64,
    miss_counts: HashMap<ModuleId, u32>,
    budget_bytes: u64,
}

/// Outcome of one `optimize` pass.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizeOutcome {
    /// Hit ratio at the time of the pass.
    pub hit_ratio: f64,
    /// Most-missed ids to force-preload, empty when the ratio is healthy.
    pub force_preload: Vec<ModuleId>,
}

/// The artifact cache.
pub struct ArtifactCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ArtifactCache {
    /// Create a cache with the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        let budget_bytes = config.budget_bytes;
        Self {
            config,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                total_bytes: 0,
                miss_counts: HashMap::new(),
                budget_bytes,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Replace the budget (device-derived scaling) and prune if the new
    /// budget is already exceeded.
    pub fn set_budget(&self, budget_bytes: u64) {
        let mut state = self.state.lock();
        state.budget_bytes = budget_bytes;
        self.prune_locked(&mut state);
    }

    /// Read-through lookup.
    ///
    /// A hit refreshes recency and frequency; a miss bumps the per-id miss
    /// counter consumed by `optimize`.
    pub fn get(&self, id: &ModuleId) -> Option<Arc<LoadedModule>> {
        let mut state = self.state.lock();
        match state.entries.get_mut(id) {
            Some(entry) => {
                entry.last_accessed = Instant::now();
                entry.access_count = entry.access_count.saturating_add(1);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(&entry.artifact))
            }
            None => {
                *state.miss_counts.entry(id.clone()).or_insert(0) += 1;
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Whether the artifact is resident (no stat side effects).
    pub fn contains(&self, id: &ModuleId) -> bool {
        self.state.lock().entries.contains_key(id)
    }

    /// Insert an artifact, pruning afterwards if the budget is exceeded.
    pub fn put(&self, artifact: Arc<LoadedModule>, priority: ModulePriority) {
        let id = artifact.id.clone();
        let size_bytes = artifact.size_bytes;
        let mut state = self.state.lock();

        if let Some(old) = state.entries.remove(&id) {
            state.total_bytes = state.total_bytes.saturating_sub(old.size_bytes);
        }
        state.entries.insert(
            id.clone(),
            CacheEntry {
                artifact,
                priority,
                last_accessed: Instant::now(),
                access_count: 0,
                size_bytes,
            },
        );
        state.total_bytes += size_bytes;
        state.miss_counts.remove(&id);

        if state.total_bytes > state.budget_bytes {
            self.prune_locked(&mut state);
        }
    }

    /// Evict lowest-value entries until usage is at or below the prune
    /// target. Public so hosts can shed memory on demand.
    pub fn prune(&self) {
        let mut state = self.state.lock();
        self.prune_locked(&mut state);
    }

    /// Periodic self-correction pass.
    ///
    /// When the running hit ratio is below the threshold, returns the
    /// most-missed ids for forced preloading and resets miss counters.
    pub fn optimize(&self) -> OptimizeOutcome {
        let hit_ratio = self.stats().hit_ratio();
        let mut state = self.state.lock();

        let lookups = self.hits.load(Ordering::Relaxed) + self.misses.load(Ordering::Relaxed);
        if lookups == 0 || hit_ratio >= self.config.optimize_threshold {
            return OptimizeOutcome {
                hit_ratio,
                force_preload: Vec::new(),
            };
        }

        let mut missed: Vec<(ModuleId, u32)> = state
            .miss_counts
            .iter()
            .map(|(id, count)| (id.clone(), *count))
            .collect();
        missed.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let force_preload: Vec<ModuleId> = missed
            .into_iter()
            .take(OPTIMIZE_CANDIDATES)
            .map(|(id, _)| id)
            .collect();
        state.miss_counts.clear();

        debug!(
            hit_ratio,
            candidates = force_preload.len(),
            "cache hit ratio below threshold; forcing preloads"
        );
        OptimizeOutcome {
            hit_ratio,
            force_preload,
        }
    }

    /// Current statistics snapshot.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: state.entries.len(),
            total_bytes: state.total_bytes,
            budget_bytes: state.budget_bytes,
        }
    }

    /// Bytes currently resident.
    pub fn total_bytes(&self) -> u64 {
        self.state.lock().total_bytes
    }

    /// Drop every entry and reset miss counters.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.miss_counts.clear();
        state.total_bytes = 0;
    }

    fn prune_locked(&self, state: &mut CacheState) {
        let target = (state.budget_bytes as f64 * self.config.prune_target_ratio) as u64;
        if state.total_bytes <= state.budget_bytes {
            return;
        }

        let now = Instant::now();
        let mut ranked: Vec<(f64, ModuleId, u64)> = state
            .entries
            .iter()
            .map(|(id, entry)| {
                let score = value_score(
                    now.duration_since(entry.last_accessed),
                    entry.access_count,
                    entry.priority.cache_boost(),
                    entry.size_bytes,
                    &self.config.weights,
                );
                (score, id.clone(), entry.size_bytes)
            })
            .collect();
        // Lowest value first; ties broken by id for determinism.
        ranked.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });

        for (score, id, size) in ranked {
            if state.total_bytes <= target {
                break;
            }
            state.entries.remove(&id);
            state.total_bytes = state.total_bytes.saturating_sub(size);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(module = %id, score, size, "evicted from cache");
        }
    }

    /// Backdate an entry's last access (tests exercise recency decay
    /// without sleeping).
    #[cfg(test)]
    fn backdate(&self, id: &ModuleId, age: std::time::Duration) {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get_mut(id) {
            entry.last_accessed = Instant::now() - age;
        }
    }
}

impl Default for ArtifactCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl std::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("stats", &self.stats())
            .finish()
    }
}
