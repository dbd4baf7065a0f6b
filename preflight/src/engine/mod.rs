//! The preload engine: public facade wiring every service together.
//!
//! [`PreloadEngine`] owns the registry, dependency graph, usage tracker,
//! environment profiler, prediction engine, viewport trigger, artifact
//! cache, metrics collector and scheduler, and runs the background tasks
//! that connect them:
//!
//! - a dispatch loop draining the scheduler's request queue,
//! - the critical bootstrap followed by the tiered rollout,
//! - a periodic usage flush that feeds flushed batches to the prediction
//!   engine and queues the resulting preloads with a stagger,
//! - a periodic cache optimize pass that re-preloads the most-missed
//!   modules when the hit ratio degrades,
//! - an idle ticker that grants idle-lane slots while the scheduler is
//!   quiet.
//!
//! All tasks stop when [`PreloadEngine::shutdown`] cancels the shared
//! token. The engine takes its collaborators by construction and holds
//! them behind `Arc`, so tests can reach in with their own probes and
//! loaders.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{broadcast, watch};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::{ArtifactCache, CacheConfig};
use crate::graph::DependencyGraph;
use crate::loader::{LoadError, LoadedModule, ModuleLoader};
use crate::metrics::{MetricsCollector, Report};
use crate::predict::{PredictionEngine, PredictionWeights};
use crate::profile::{ConnectionInfo, EnvironmentProbe, EnvironmentProfile, EnvironmentProfiler};
use crate::registry::{ModuleDescriptor, ModuleId, ModulePriority, ModuleRegistry};
use crate::scheduler::{
    LoadFailure, PreloadOptions, Scheduler, SchedulerConfig,
};
use crate::usage::{InteractionKind, UsageTracker, DEFAULT_BUFFER_CAPACITY, DEFAULT_LOOKBACK_MS};
use crate::viewport::{
    ElementGeometry, TriggerUrgency, ViewportConfig, ViewportState, ViewportTrigger,
};

/// Engine tuning. Defaults match interactive-session pacing; tests
/// shrink the intervals.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cache sizing and eviction weights. The budget is overridden by the
    /// environment-derived budget unless `respect_cache_budget` is set.
    pub cache: CacheConfig,
    /// Keep `cache.budget_bytes` instead of deriving it from device memory.
    pub respect_cache_budget: bool,
    /// Scheduler pacing.
    pub scheduler: SchedulerConfig,
    /// Prediction weights and thresholds.
    pub prediction: PredictionWeights,
    /// Viewport trigger thresholds.
    pub viewport: ViewportConfig,
    /// Usage ring capacity.
    pub usage_capacity: usize,
    /// Followed-by learning window in ms.
    pub usage_lookback_ms: u64,
    /// Period of the usage flush / prediction task.
    pub flush_interval: Duration,
    /// Period of the cache optimize pass.
    pub optimize_interval: Duration,
    /// Period of the idle-lane grant ticker.
    pub idle_tick: Duration,
    /// In-flight load count at or below which idle slots are granted.
    pub idle_grant_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            respect_cache_budget: false,
            scheduler: SchedulerConfig::default(),
            prediction: PredictionWeights::default(),
            viewport: ViewportConfig::default(),
            usage_capacity: DEFAULT_BUFFER_CAPACITY,
            usage_lookback_ms: DEFAULT_LOOKBACK_MS,
            flush_interval: Duration::from_secs(5),
            optimize_interval: Duration::from_secs(60),
            idle_tick: Duration::from_millis(500),
            idle_grant_threshold: 2,
        }
    }
}

impl EngineConfig {
    /// Override the cache config and pin its budget (skips the
    /// environment-derived budget).
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self.respect_cache_budget = true;
        self
    }

    /// Override scheduler pacing.
    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Override prediction weights and thresholds.
    pub fn with_prediction(mut self, prediction: PredictionWeights) -> Self {
        self.prediction = prediction;
        self
    }

    /// Override viewport trigger thresholds.
    pub fn with_viewport(mut self, viewport: ViewportConfig) -> Self {
        self.viewport = viewport;
        self
    }

    /// Override the usage flush period.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Override the cache optimize period.
    pub fn with_optimize_interval(mut self, interval: Duration) -> Self {
        self.optimize_interval = interval;
        self
    }
}

/// The engine facade. See the module docs for the task topology.
pub struct PreloadEngine {
    registry: Arc<ModuleRegistry>,
    graph: Arc<DependencyGraph>,
    cache: Arc<ArtifactCache>,
    tracker: Arc<UsageTracker>,
    profiler: Arc<EnvironmentProfiler>,
    predictor: Arc<PredictionEngine>,
    viewport: Arc<ViewportTrigger>,
    metrics: Arc<MetricsCollector>,
    scheduler: Arc<Scheduler>,
    cancel: CancellationToken,
    config: EngineConfig,
}

impl PreloadEngine {
    /// Build the engine and spawn its background tasks.
    ///
    /// Bootstrap starts immediately; await [`critical_ready`]
    /// (Self::critical_ready) to synchronize with it.
    pub fn start(
        loader: Arc<dyn ModuleLoader>,
        probe: Arc<dyn EnvironmentProbe>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let graph = Arc::new(DependencyGraph::new());
        let registry = Arc::new(ModuleRegistry::new(Arc::clone(&graph)));
        let tracker = Arc::new(UsageTracker::new(
            config.usage_capacity,
            config.usage_lookback_ms,
        ));
        let profiler = Arc::new(EnvironmentProfiler::new(probe));
        let metrics = Arc::new(MetricsCollector::new());

        let mut cache_config = config.cache.clone();
        let profile = profiler.profile();
        if !config.respect_cache_budget {
            cache_config.budget_bytes = profile.cache_budget_bytes();
        }
        let cache = Arc::new(ArtifactCache::new(cache_config));

        let predictor = Arc::new(PredictionEngine::new(
            Arc::clone(&registry),
            Arc::clone(&graph),
            Arc::clone(&tracker),
            config.prediction.clone(),
        ));
        let viewport = Arc::new(ViewportTrigger::new(config.viewport.clone()));

        let (scheduler, request_rx) = Scheduler::new(
            Arc::clone(&registry),
            Arc::clone(&graph),
            Arc::clone(&cache),
            loader,
            Arc::clone(&tracker),
            Arc::clone(&metrics),
            profiler.subscribe(),
            config.scheduler.clone(),
        );

        metrics.snapshot(
            "environment",
            json!({
                "mode": profile.mode,
                "memory_gb": profile.memory_gb,
                "cores": profile.cores,
                "network": profile.network,
                "low_end_device": profile.low_end_device,
                "cache_budget_bytes": profile.cache_budget_bytes(),
            }),
        );
        info!(mode = %profile.mode, "preload engine starting");

        let engine = Arc::new(Self {
            registry,
            graph,
            cache,
            tracker,
            profiler,
            predictor,
            viewport,
            metrics,
            scheduler,
            cancel: CancellationToken::new(),
            config,
        });

        tokio::spawn(
            Arc::clone(&engine.scheduler).run_dispatch(request_rx, engine.cancel.clone()),
        );
        tokio::spawn(Arc::clone(&engine).run_flush_loop());
        tokio::spawn(Arc::clone(&engine).run_optimize_loop());
        tokio::spawn(Arc::clone(&engine).run_idle_ticker());
        engine
    }

    /// Run the critical bootstrap and then the tiered rollout.
    ///
    /// Callers typically spawn this right after `start`, once registration
    /// is done. Registering critical modules after calling it is a race.
    pub async fn run_startup(self: Arc<Self>) {
        self.scheduler.run_bootstrap().await;
        Arc::clone(&self.scheduler)
            .run_rollout(self.cancel.clone())
            .await;
    }

    /// Stop every background task.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register (or upgrade) a module descriptor.
    pub fn register_module(&self, descriptor: ModuleDescriptor) {
        self.registry.register(descriptor);
    }

    /// Declare dependencies for an already-registered module. Unknown
    /// dependency ids are stubbed.
    pub fn add_dependencies(&self, id: &ModuleId, deps: &[ModuleId]) {
        self.registry.add_dependencies(id, deps);
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Preload one module with explicit options, awaiting the artifact.
    pub async fn preload(
        &self,
        id: &ModuleId,
        options: PreloadOptions,
    ) -> Result<Arc<LoadedModule>, LoadError> {
        self.scheduler.preload(id, options).await
    }

    /// Whether the module's artifact is resident.
    pub fn is_preloaded(&self, id: &ModuleId) -> bool {
        self.scheduler.is_preloaded(id)
    }

    /// Resolves once the critical bootstrap has settled.
    pub async fn critical_ready(&self) {
        let mut rx = self.scheduler.critical_ready();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Subscribe to load-failure notifications.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<LoadFailure> {
        self.scheduler.subscribe_failures()
    }

    // ------------------------------------------------------------------
    // Signals in
    // ------------------------------------------------------------------

    /// Record a user interaction. Navigation events additionally trigger
    /// route-entry predictions.
    pub fn record_interaction(&self, kind: InteractionKind) {
        let navigated = matches!(kind, InteractionKind::Navigation { .. });
        self.tracker.record(kind);
        if navigated {
            if let Some(route) = self.tracker.current_route() {
                self.queue_route_predictions(&route);
            }
        }
    }

    /// A module finished rendering; feeds the usage patterns and metrics.
    pub fn on_module_rendered(&self, id: &ModuleId, render_ms: u64) {
        self.tracker
            .record(InteractionKind::ModuleRendered { module: id.clone() });
        self.metrics.render_completed(id, render_ms);
    }

    /// Start watching a placeholder element for viewport proximity.
    pub fn observe_element(&self, id: ModuleId, geometry: ElementGeometry) {
        self.viewport.observe(id, geometry);
    }

    /// Stop watching an element.
    pub fn unobserve_element(&self, id: &ModuleId) {
        self.viewport.unobserve(id);
    }

    /// Feed a scroll/viewport sample. Imminent signals preload inline;
    /// approaching signals take the idle lane, dependencies first.
    pub fn on_viewport_update(&self, state: ViewportState) {
        self.tracker.record(InteractionKind::Scroll {
            direction: state.direction,
            velocity_px_s: state.velocity_px_s,
        });
        for signal in self.viewport.update(state) {
            let options = match signal.urgency {
                TriggerUrgency::Imminent => PreloadOptions::immediate(ModulePriority::High),
                TriggerUrgency::Approaching => PreloadOptions::idle(ModulePriority::Medium),
            };
            debug!(module = %signal.module_id, urgency = ?signal.urgency, "viewport trigger");
            for dep in self.graph.all_dependencies(&signal.module_id) {
                self.scheduler.request(dep, options);
            }
            self.scheduler.request(signal.module_id, options);
        }
    }

    /// Connectivity changed; re-derives the operating mode and cache
    /// budget. Tier gates pick the new mode up at the next chunk boundary.
    pub fn on_connection_change(&self, connection: ConnectionInfo) {
        self.profiler.connection_changed(connection);
        let profile = self.profiler.profile();
        if !self.config.respect_cache_budget {
            self.cache.set_budget(profile.cache_budget_bytes());
        }
        self.metrics.snapshot(
            "connection-change",
            json!({ "mode": profile.mode, "network": profile.network }),
        );
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Current environment profile.
    pub fn profile(&self) -> EnvironmentProfile {
        self.profiler.profile()
    }

    /// Watch the profile for changes.
    pub fn subscribe_profile(&self) -> watch::Receiver<EnvironmentProfile> {
        self.profiler.subscribe()
    }

    /// The artifact cache.
    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    /// The metrics collector.
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// The usage tracker.
    pub fn tracker(&self) -> &Arc<UsageTracker> {
        &self.tracker
    }

    /// The module registry.
    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Build a point-in-time session report.
    pub fn generate_report(&self) -> Report {
        Report::build(
            &self.metrics,
            self.registry.len(),
            self.tracker.interaction_count(),
            self.cache.stats(),
            self.profiler.profile().mode,
        )
    }

    // ------------------------------------------------------------------
    // Background tasks
    // ------------------------------------------------------------------

    /// Flush the usage buffer on a period and queue batch predictions.
    async fn run_flush_loop(self: Arc<Self>) {
        let mut ticker = interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let batch = self.tracker.flush();
            if batch.events.is_empty() {
                continue;
            }
            let predictions = self.predictor.predict_from_batch(&batch);
            self.queue_predictions(predictions).await;
        }
    }

    /// Periodic cache self-correction and resource snapshotting. A degraded
    /// hit ratio promotes the most-missed modules to immediate
    /// high-priority preloads.
    async fn run_optimize_loop(self: Arc<Self>) {
        let mut ticker = interval(self.config.optimize_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.record_resource_snapshot();
            let outcome = self.cache.optimize();
            if outcome.force_preload.is_empty() {
                continue;
            }
            info!(
                hit_ratio = outcome.hit_ratio,
                modules = outcome.force_preload.len(),
                "cache hit ratio degraded, forcing preloads"
            );
            for id in outcome.force_preload {
                self.scheduler
                    .request(id, PreloadOptions::immediate(ModulePriority::High));
            }
        }
    }

    /// Grant idle-lane slots while the scheduler is quiet.
    async fn run_idle_ticker(self: Arc<Self>) {
        let mut ticker = interval(self.config.idle_tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if self.scheduler.inflight_count() <= self.config.idle_grant_threshold {
                self.scheduler.idle_lane().grant();
            }
        }
    }

    /// Record a named snapshot of the mode, cache and load counters.
    fn record_resource_snapshot(&self) {
        let profile = self.profiler.profile();
        let cache = self.cache.stats();
        let (started, completed, failed) = self.metrics.load_counts();
        self.metrics.snapshot(
            "resources",
            json!({
                "mode": profile.mode,
                "cache_entries": cache.entries,
                "cache_bytes": cache.total_bytes,
                "cache_hit_ratio": cache.hit_ratio(),
                "loads_started": started,
                "loads_completed": completed,
                "loads_failed": failed,
                "inflight": self.scheduler.inflight_count(),
                "interactions": self.tracker.interaction_count(),
            }),
        );
    }

    fn queue_route_predictions(&self, route: &str) {
        let predictions = self.predictor.predict_for_route(route);
        if predictions.is_empty() {
            return;
        }
        debug!(route, count = predictions.len(), "route-entry predictions");
        for prediction in predictions {
            self.scheduler
                .request(prediction.module_id, PreloadOptions::idle(ModulePriority::Medium));
        }
    }

    /// Submit predictions one at a time with a stagger so a burst of
    /// predicted loads does not crowd out interactive requests.
    async fn queue_predictions(&self, predictions: Vec<crate::predict::Prediction>) {
        let stagger = self.config.scheduler.prediction_stagger;
        for prediction in predictions {
            if self.cancel.is_cancelled() {
                return;
            }
            debug!(
                module = %prediction.module_id,
                confidence = prediction.confidence,
                "queuing predicted preload"
            );
            self.scheduler
                .request(prediction.module_id, PreloadOptions::idle(ModulePriority::Medium));
            tokio::time::sleep(stagger).await;
        }
    }
}

impl Drop for PreloadEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for PreloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreloadEngine")
            .field("modules", &self.registry.len())
            .field("mode", &self.profiler.profile().mode)
            .finish()
    }
}
