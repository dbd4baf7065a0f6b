//! Confidence-scored predictions of upcoming module needs.
//!
//! Two independent estimators feed the same scheduler gate:
//!
//! - **Interaction-batch**: after each usage-tracker flush, modules that
//!   historically follow the recently used ones are scored from recency,
//!   frequency and sequence strength.
//! - **Route-entry**: on navigation, modules are scored from route
//!   relevance, declared priority and dependency affinity to recent usage.
//!
//! Weights and thresholds are configuration ([`PredictionWeights`]), not
//! literals; tests assert monotonicity rather than exact values.
//! Predictions are derived per cycle and never stored.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::trace;

use crate::graph::DependencyGraph;
use crate::registry::{ModuleId, ModulePriority, ModuleRegistry};
use crate::usage::{InteractionBatch, InteractionKind, UsageTracker};

/// How many recently used modules seed a prediction cycle.
const RECENT_SEED_COUNT: usize = 5;

/// A confidence-scored prediction that a module will be needed soon.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// The module expected to be needed.
    pub module_id: ModuleId,
    /// Heuristic confidence in [0, 1].
    pub confidence: f64,
}

/// Estimator weights and gating thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionWeights {
    /// Interaction estimator: weight of seed recency.
    pub recency: f64,
    /// Interaction estimator: weight of candidate usage frequency.
    pub frequency: f64,
    /// Interaction estimator: weight of sequence strength.
    pub sequence: f64,
    /// Route estimator: weight of route relevance.
    pub route_relevance: f64,
    /// Route estimator: weight of declared priority.
    pub priority: f64,
    /// Route estimator: weight of dependency affinity.
    pub dependency: f64,
    /// Window over which seed recency decays to zero (ms).
    pub recency_window_ms: u64,
    /// Gate threshold for critical/high-priority candidates.
    pub threshold_high: f64,
    /// Gate threshold for medium-priority candidates.
    pub threshold_medium: f64,
    /// Gate threshold for low-priority candidates.
    pub threshold_low: f64,
}

impl Default for PredictionWeights {
    fn default() -> Self {
        Self {
            recency: 0.3,
            frequency: 0.3,
            sequence: 0.4,
            route_relevance: 0.4,
            priority: 0.3,
            dependency: 0.3,
            recency_window_ms: 30_000,
            threshold_high: 0.3,
            threshold_medium: 0.4,
            threshold_low: 0.5,
        }
    }
}

impl PredictionWeights {
    /// Gate threshold for a candidate's declared tier.
    pub fn threshold_for(&self, priority: ModulePriority) -> f64 {
        match priority {
            ModulePriority::Critical | ModulePriority::High => self.threshold_high,
            ModulePriority::Medium => self.threshold_medium,
            ModulePriority::Low => self.threshold_low,
        }
    }
}

/// Combines usage patterns, the dependency graph and navigation context
/// into gated predictions.
pub struct PredictionEngine {
    registry: Arc<ModuleRegistry>,
    graph: Arc<DependencyGraph>,
    tracker: Arc<UsageTracker>,
    weights: PredictionWeights,
}

impl PredictionEngine {
    /// Create an engine over the shared services.
    pub fn new(
        registry: Arc<ModuleRegistry>,
        graph: Arc<DependencyGraph>,
        tracker: Arc<UsageTracker>,
        weights: PredictionWeights,
    ) -> Self {
        Self {
            registry,
            graph,
            tracker,
            weights,
        }
    }

    /// The configured weights.
    pub fn weights(&self) -> &PredictionWeights {
        &self.weights
    }

    /// Predictions for one flushed interaction batch.
    ///
    /// Seeds are the modules rendered in the batch plus the most recently
    /// used ones; candidates are everything that historically followed a
    /// seed. Gated by the tier-dependent threshold, sorted by descending
    /// confidence.
    pub fn predict_from_batch(&self, batch: &InteractionBatch) -> Vec<Prediction> {
        let rendered_in_batch: HashSet<ModuleId> = batch
            .events
            .iter()
            .filter_map(|e| match &e.kind {
                InteractionKind::ModuleRendered { module } => Some(module.clone()),
                _ => None,
            })
            .collect();
        let mut seeds: Vec<ModuleId> = rendered_in_batch.iter().cloned().collect();
        for recent in self.tracker.recently_used(RECENT_SEED_COUNT) {
            if !seeds.contains(&recent) {
                seeds.push(recent);
            }
        }
        if seeds.is_empty() {
            return Vec::new();
        }

        let now_ms = batch.flushed_at_ms;
        let max_usage = self.tracker.max_usage_count().max(1) as f64;
        let mut best: HashMap<ModuleId, f64> = HashMap::new();

        for seed in &seeds {
            let Some(pattern) = self.tracker.pattern(seed) else {
                continue;
            };
            let age_ms = now_ms.saturating_sub(pattern.last_used_at_ms) as f64;
            let recency =
                (1.0 - age_ms / self.weights.recency_window_ms.max(1) as f64).max(0.0);

            for (candidate, follow_count) in &pattern.followed_by {
                // Modules that just rendered are already resident; only
                // what might come next is worth predicting.
                if rendered_in_batch.contains(candidate) {
                    continue;
                }
                let sequence =
                    (f64::from(*follow_count) / pattern.usage_count.max(1) as f64).min(1.0);
                let frequency = self
                    .tracker
                    .pattern(candidate)
                    .map(|p| p.usage_count as f64 / max_usage)
                    .unwrap_or(0.0);

                let confidence = (self.weights.recency * recency
                    + self.weights.frequency * frequency
                    + self.weights.sequence * sequence)
                    .clamp(0.0, 1.0);
                let entry = best.entry(candidate.clone()).or_insert(0.0);
                *entry = entry.max(confidence);
            }
        }

        self.gate(best)
    }

    /// Predictions for entering a route.
    ///
    /// Every registered module is scored; relevance comes from matching
    /// route segments against the module id, dependency affinity from
    /// overlap between the module's dependency closure and recent usage.
    pub fn predict_for_route(&self, route: &str) -> Vec<Prediction> {
        let segments = route_segments(route);
        let recent: HashSet<ModuleId> =
            self.tracker.recently_used(RECENT_SEED_COUNT).into_iter().collect();

        let mut scored: HashMap<ModuleId, f64> = HashMap::new();
        for id in self.registry.ids() {
            let Some(descriptor) = self.registry.get(&id) else {
                continue;
            };
            let relevance = route_relevance(&id, &segments);
            let dependency = self.dependency_affinity(&id, &recent);
            let confidence = (self.weights.route_relevance * relevance
                + self.weights.priority * descriptor.priority.weight()
                + self.weights.dependency * dependency)
                .clamp(0.0, 1.0);
            scored.insert(id, confidence);
        }

        self.gate(scored)
    }

    /// Overlap between a module's dependency closure (plus the module's
    /// dependents relation) and the recently used set.
    fn dependency_affinity(&self, id: &ModuleId, recent: &HashSet<ModuleId>) -> f64 {
        if recent.is_empty() {
            return 0.0;
        }
        // Directly depending on something just used is the strongest signal.
        for r in recent {
            if self.graph.depends_on(id, r) {
                return 1.0;
            }
        }
        let deps = self.graph.all_dependencies(id);
        if deps.is_empty() {
            return 0.0;
        }
        let shared = deps.iter().filter(|d| recent.contains(*d)).count() as f64;
        shared / deps.len() as f64
    }

    fn gate(&self, scored: HashMap<ModuleId, f64>) -> Vec<Prediction> {
        let mut predictions: Vec<Prediction> = scored
            .into_iter()
            .filter(|(id, confidence)| {
                let tier = self
                    .registry
                    .get(id)
                    .map(|d| d.priority)
                    .unwrap_or(ModulePriority::Medium);
                *confidence > self.weights.threshold_for(tier)
            })
            .map(|(module_id, confidence)| Prediction {
                module_id,
                confidence,
            })
            .collect();
        predictions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.module_id.cmp(&b.module_id))
        });
        trace!(count = predictions.len(), "prediction cycle complete");
        predictions
    }
}

/// Normalize a route into lowercase path segments.
pub(crate) fn route_segments(route: &str) -> Vec<String> {
    route
        .split(|c: char| c == '/' || c == '?' || c == '#')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_ascii_lowercase())
        .collect()
}

/// Route relevance of a module id against normalized route segments.
///
/// Exact segment match scores 1.0; containment either way scores 0.7;
/// otherwise 0.
pub(crate) fn route_relevance(id: &ModuleId, segments: &[String]) -> f64 {
    let id_lower = id.as_str().to_ascii_lowercase();
    let mut best: f64 = 0.0;
    for segment in segments {
        if *segment == id_lower {
            return 1.0;
        }
        if id_lower.contains(segment.as_str()) || segment.contains(id_lower.as_str()) {
            best = best.max(0.7);
        }
    }
    best
}
