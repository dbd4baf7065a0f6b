//! The scheduler/preloader: orchestration core of the engine.
//!
//! Responsibilities:
//!
//! - **Dedup**: at most one in-flight load per module id, enforced by
//!   storing the pending shared future in a concurrent map before the
//!   fetch starts. The dedup check is the first step of every load path,
//!   which makes check-then-act atomic with respect to interleaved tasks.
//! - **Lanes**: immediate (inline), idle (bounded low-priority slot) and
//!   deferred (yield once) execution paths per request.
//! - **Critical bootstrap**: critical modules and their dependency
//!   closures load in hierarchy-level order behind a barrier that gates
//!   the tiered rollout.
//! - **Tiered rollout**: high tier after a short delay, medium/low only in
//!   balanced/aggressive modes, chunked with tier-scaled pauses.
//! - **Dependent cascade**: a finished load enqueues likely-needed direct
//!   dependents on the idle lane at medium priority.
//!
//! Failure semantics: a failed fetch is recorded in metrics, its dedup
//! entry is cleared so callers may retry, and sibling in-flight loads are
//! untouched. The scheduler never retries on its own.

mod lane;

pub use lane::{IdleLane, Lane, DEFAULT_IDLE_TIMEOUT};

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::ArtifactCache;
use crate::graph::DependencyGraph;
use crate::loader::{LoadError, LoadedModule, ModuleLoader};
use crate::metrics::MetricsCollector;
use crate::predict::{route_relevance, route_segments};
use crate::profile::EnvironmentProfile;
use crate::registry::{ModuleId, ModulePriority, ModuleRegistry};
use crate::usage::{InteractionKind, UsageTracker};

/// A pending load shared by every requester of the same id.
type SharedLoad = Shared<BoxFuture<'static, Result<Arc<LoadedModule>, LoadError>>>;

/// How a preload request should be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreloadOptions {
    /// Requested priority tier (affects cache retention and cascades).
    pub priority: ModulePriority,
    /// Run inline instead of taking a lane.
    pub immediate: bool,
    /// Park on the idle lane when not immediate.
    pub use_idle_slot: bool,
}

impl PreloadOptions {
    /// Inline execution at the given tier.
    pub fn immediate(priority: ModulePriority) -> Self {
        Self {
            priority,
            immediate: true,
            use_idle_slot: false,
        }
    }

    /// Idle-lane execution at the given tier.
    pub fn idle(priority: ModulePriority) -> Self {
        Self {
            priority,
            immediate: false,
            use_idle_slot: true,
        }
    }

    /// Deferred (yield-once) execution at the given tier.
    pub fn deferred(priority: ModulePriority) -> Self {
        Self {
            priority,
            immediate: false,
            use_idle_slot: false,
        }
    }

    /// The lane these options select.
    pub fn lane(&self) -> Lane {
        if self.immediate {
            Lane::Immediate
        } else if self.use_idle_slot {
            Lane::Idle
        } else {
            Lane::Deferred
        }
    }
}

impl Default for PreloadOptions {
    fn default() -> Self {
        Self::deferred(ModulePriority::Medium)
    }
}

/// An asynchronous preload request queued to the dispatch loop.
#[derive(Debug, Clone)]
pub struct PreloadRequest {
    /// Target module.
    pub module_id: ModuleId,
    /// Execution options.
    pub options: PreloadOptions,
}

/// Outbound notification that a load failed.
#[derive(Debug, Clone)]
pub struct LoadFailure {
    /// The module whose load failed.
    pub module_id: ModuleId,
    /// Error message for consumers.
    pub message: String,
}

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pause between bootstrap completion and the high tier.
    pub high_tier_delay: Duration,
    /// Bound on idle-lane waits.
    pub idle_timeout: Duration,
    /// Recent-usage window consulted by the dependent cascade (ms).
    pub likely_needed_window_ms: u64,
    /// Delay between submitting individual prediction-driven preloads.
    pub prediction_stagger: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            high_tier_delay: Duration::from_millis(500),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            likely_needed_window_ms: 30_000,
            prediction_stagger: Duration::from_millis(150),
        }
    }
}

impl SchedulerConfig {
    /// Rollout batch size per tier.
    pub fn chunk_size(&self, tier: ModulePriority) -> usize {
        match tier {
            ModulePriority::Critical | ModulePriority::High => 5,
            ModulePriority::Medium => 3,
            ModulePriority::Low => 2,
        }
    }

    /// Pause between rollout chunks, scaled by tier.
    pub fn inter_chunk_delay(&self, tier: ModulePriority) -> Duration {
        match tier {
            ModulePriority::Critical => Duration::ZERO,
            ModulePriority::High => Duration::from_millis(250),
            ModulePriority::Medium => Duration::from_secs(1),
            ModulePriority::Low => Duration::from_secs(2),
        }
    }
}

/// The scheduler/preloader.
pub struct Scheduler {
    registry: Arc<ModuleRegistry>,
    graph: Arc<DependencyGraph>,
    cache: Arc<ArtifactCache>,
    loader: Arc<dyn ModuleLoader>,
    tracker: Arc<UsageTracker>,
    metrics: Arc<MetricsCollector>,
    inflight: Arc<DashMap<ModuleId, SharedLoad>>,
    idle: IdleLane,
    profile_rx: watch::Receiver<EnvironmentProfile>,
    request_tx: mpsc::UnboundedSender<PreloadRequest>,
    critical_ready: watch::Sender<bool>,
    failures: broadcast::Sender<LoadFailure>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Build a scheduler over the shared services.
    ///
    /// Returns the scheduler and the receiving end of its request queue;
    /// the caller is expected to drive [`run_dispatch`](Self::run_dispatch)
    /// with it.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ModuleRegistry>,
        graph: Arc<DependencyGraph>,
        cache: Arc<ArtifactCache>,
        loader: Arc<dyn ModuleLoader>,
        tracker: Arc<UsageTracker>,
        metrics: Arc<MetricsCollector>,
        profile_rx: watch::Receiver<EnvironmentProfile>,
        config: SchedulerConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PreloadRequest>) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (critical_ready, _) = watch::channel(false);
        let (failures, _) = broadcast::channel(64);
        let scheduler = Arc::new(Self {
            registry,
            graph,
            cache,
            loader,
            tracker,
            metrics,
            inflight: Arc::new(DashMap::new()),
            idle: IdleLane::new(),
            profile_rx,
            request_tx,
            critical_ready,
            failures,
            config,
        });
        (scheduler, request_rx)
    }

    /// Preload one module.
    ///
    /// Dedup invariant: if a load for `id` is pending, the caller becomes
    /// a subscriber of that load; N concurrent calls cause exactly one
    /// underlying fetch. Completed loads are served from the cache.
    pub async fn preload(
        &self,
        id: &ModuleId,
        options: PreloadOptions,
    ) -> Result<Arc<LoadedModule>, LoadError> {
        // Dedup check first: check-then-act must be atomic per load path.
        let pending = self.inflight.get(id).map(|entry| entry.value().clone());
        if let Some(pending) = pending {
            return pending.await;
        }

        let Some(descriptor) = self.registry.get(id) else {
            warn!(module = %id, "preload requested for unregistered module");
            return Err(LoadError::UnknownModule(id.clone()));
        };

        if let Some(artifact) = self.cache.get(id) {
            return Ok(artifact);
        }

        match options.lane() {
            Lane::Immediate => {}
            Lane::Idle => self.idle.slot(self.config.idle_timeout).await,
            Lane::Deferred => tokio::task::yield_now().await,
        }

        // The lane wait may have let another task finish this id.
        if self.cache.contains(id) {
            if let Some(artifact) = self.cache.get(id) {
                return Ok(artifact);
            }
        }

        let (shared, created) = match self.inflight.entry(id.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let load = self.build_load(descriptor);
                entry.insert(load.clone());
                (load, true)
            }
        };
        if created {
            self.spawn_completion(id.clone(), shared.clone());
        }
        shared.await
    }

    /// Queue a preload for the dispatch loop (fire and forget).
    pub fn request(&self, module_id: ModuleId, options: PreloadOptions) {
        let _ = self.request_tx.send(PreloadRequest { module_id, options });
    }

    /// Whether the artifact is resident in the cache.
    pub fn is_preloaded(&self, id: &ModuleId) -> bool {
        self.cache.contains(id)
    }

    /// Number of in-flight loads.
    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }

    /// The idle lane (the engine's idle ticker grants its slots).
    pub fn idle_lane(&self) -> &IdleLane {
        &self.idle
    }

    /// Barrier that flips to `true` once the critical bootstrap settles.
    pub fn critical_ready(&self) -> watch::Receiver<bool> {
        self.critical_ready.subscribe()
    }

    /// Subscribe to load-failure notifications.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<LoadFailure> {
        self.failures.subscribe()
    }

    /// Drain the request queue, spawning one task per request.
    pub async fn run_dispatch(
        self: Arc<Self>,
        mut request_rx: mpsc::UnboundedReceiver<PreloadRequest>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                request = request_rx.recv() => {
                    let Some(request) = request else { break };
                    let scheduler = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(err) = scheduler
                            .preload(&request.module_id, request.options)
                            .await
                        {
                            debug!(module = %request.module_id, %err, "queued preload failed");
                        }
                    });
                }
            }
        }
    }

    /// Load every critical module (and its dependency closure) in
    /// hierarchy-level order, then resolve the bootstrap barrier.
    ///
    /// Within a level loads run in parallel; level boundaries are awaited,
    /// so a dependency is always requested before its dependents. A failed
    /// critical load is logged and does not hold up its siblings.
    pub async fn run_bootstrap(&self) {
        let seeds = self.registry.all_by_priority(ModulePriority::Critical);
        let mut ids: Vec<ModuleId> = Vec::new();
        for descriptor in &seeds {
            for dep in self.graph.all_dependencies(&descriptor.id) {
                if !ids.contains(&dep) {
                    ids.push(dep);
                }
            }
            if !ids.contains(&descriptor.id) {
                ids.push(descriptor.id.clone());
            }
        }

        let levels = self.graph.levels();
        for group in levels.group_by_level(&ids) {
            let loads = group
                .iter()
                .map(|id| self.preload(id, PreloadOptions::immediate(ModulePriority::Critical)));
            for result in join_all(loads).await {
                if let Err(err) = result {
                    warn!(%err, "critical module failed during bootstrap");
                }
            }
        }

        self.metrics.critical_path_completed();
        info!(modules = ids.len(), "critical bootstrap complete");
        self.critical_ready.send_replace(true);
    }

    /// Tiered rollout: high after a fixed delay, medium/low only while the
    /// operating mode allows background tiers. Runs until done or
    /// cancelled; re-checks the mode at every chunk boundary so a
    /// connection change takes effect mid-rollout.
    pub async fn run_rollout(self: Arc<Self>, cancel: CancellationToken) {
        let mut ready = self.critical_ready.subscribe();
        while !*ready.borrow() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                changed = ready.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }

        if !self.current_mode_allows_post_bootstrap() {
            info!("minimal mode: tiered rollout skipped");
            return;
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(self.config.high_tier_delay) => {}
        }
        self.rollout_tier(ModulePriority::High, &cancel).await;

        for tier in [ModulePriority::Medium, ModulePriority::Low] {
            if !self.current_mode_allows_background() {
                debug!(mode = %self.current_profile().mode, "background tiers gated off");
                return;
            }
            self.rollout_tier(tier, &cancel).await;
        }
    }

    /// Current environment profile.
    pub fn current_profile(&self) -> EnvironmentProfile {
        *self.profile_rx.borrow()
    }

    async fn rollout_tier(&self, tier: ModulePriority, cancel: &CancellationToken) {
        let pending: Vec<ModuleId> = self
            .registry
            .all_by_priority(tier)
            .into_iter()
            .map(|d| d.id)
            .filter(|id| !self.cache.contains(id))
            .collect();
        if pending.is_empty() {
            return;
        }

        let levels = self.graph.levels();
        let ordered: Vec<ModuleId> = levels.group_by_level(&pending).into_iter().flatten().collect();
        let background = tier > ModulePriority::High;
        let options = if background {
            PreloadOptions::idle(tier)
        } else {
            PreloadOptions::deferred(tier)
        };

        debug!(tier = %tier, modules = ordered.len(), "tier rollout starting");
        for chunk in ordered.chunks(self.config.chunk_size(tier)) {
            if cancel.is_cancelled() || !self.current_mode_allows_post_bootstrap() {
                return;
            }
            if background && !self.current_mode_allows_background() {
                return;
            }

            let loads = chunk.iter().map(|id| self.preload(id, options));
            for result in join_all(loads).await {
                if let Err(err) = result {
                    debug!(%err, "rollout load failed");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(self.config.inter_chunk_delay(tier)) => {}
            }
        }
    }

    fn current_mode_allows_post_bootstrap(&self) -> bool {
        self.current_profile().mode.allows_post_bootstrap()
    }

    fn current_mode_allows_background(&self) -> bool {
        self.current_profile().mode.allows_background_tiers()
    }

    /// Build the shared load future for a descriptor. Metrics and cache
    /// writes happen inside the future, so every subscriber observes a
    /// fully recorded load.
    fn build_load(&self, descriptor: crate::registry::ModuleDescriptor) -> SharedLoad {
        let metrics = Arc::clone(&self.metrics);
        let cache = Arc::clone(&self.cache);
        let id = descriptor.id.clone();
        let priority = descriptor.priority;
        let load = self.loader.load(&descriptor);

        async move {
            metrics.load_started(&id);
            let started = Instant::now();
            match load.await {
                Ok(loaded) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    metrics.load_completed(&id, duration_ms);
                    let artifact = Arc::new(loaded);
                    cache.put(Arc::clone(&artifact), priority);
                    Ok(artifact)
                }
                Err(err) => {
                    metrics.load_failed(&id, err.to_string());
                    Err(err)
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Drive a created load to completion: clear the dedup entry, record
    /// usage, notify failures, and cascade to dependents.
    fn spawn_completion(&self, id: ModuleId, load: SharedLoad) {
        let inflight = Arc::clone(&self.inflight);
        let graph = Arc::clone(&self.graph);
        let registry = Arc::clone(&self.registry);
        let cache = Arc::clone(&self.cache);
        let tracker = Arc::clone(&self.tracker);
        let request_tx = self.request_tx.clone();
        let failures = self.failures.clone();
        let window_ms = self.config.likely_needed_window_ms;

        tokio::spawn(async move {
            let result = load.await;
            inflight.remove(&id);
            match result {
                Ok(_) => {
                    tracker.record(InteractionKind::ModuleLoaded { module: id.clone() });
                    cascade_dependents(
                        &id,
                        &graph,
                        &registry,
                        &cache,
                        &tracker,
                        window_ms,
                        &request_tx,
                    );
                }
                Err(err) => {
                    let _ = failures.send(LoadFailure {
                        module_id: id.clone(),
                        message: err.to_string(),
                    });
                }
            }
        });
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("inflight", &self.inflight.len())
            .field("critical_ready", &*self.critical_ready.borrow())
            .finish()
    }
}

/// Enqueue likely-needed direct dependents of a finished load.
///
/// A dependent qualifies when all its dependencies are resident and it was
/// used recently, carries high declared priority, or matches the current
/// route. Qualifying dependents go to the idle lane at medium priority.
fn cascade_dependents(
    id: &ModuleId,
    graph: &DependencyGraph,
    registry: &ModuleRegistry,
    cache: &ArtifactCache,
    tracker: &UsageTracker,
    window_ms: u64,
    request_tx: &mpsc::UnboundedSender<PreloadRequest>,
) {
    let route_segs = tracker.current_route().map(|r| route_segments(&r));

    for dependent in graph.direct_dependents(id) {
        if cache.contains(&dependent) {
            continue;
        }
        let deps = graph.direct_dependencies(&dependent);
        if !deps.iter().all(|d| cache.contains(d)) {
            continue;
        }
        let Some(descriptor) = registry.get(&dependent) else {
            continue;
        };

        let route_relevant = route_segs
            .as_ref()
            .map(|segs| route_relevance(&dependent, segs) > 0.0)
            .unwrap_or(false);
        let likely = tracker.used_recently(&dependent, window_ms)
            || matches!(
                descriptor.priority,
                ModulePriority::Critical | ModulePriority::High
            )
            || route_relevant;
        if likely {
            debug!(module = %dependent, after = %id, "cascading dependent preload");
            let _ = request_tx.send(PreloadRequest {
                module_id: dependent,
                options: PreloadOptions::idle(ModulePriority::Medium),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::loader::MockLoader;
    use crate::profile::{EnvironmentProfiler, StaticProbe};
    use crate::registry::ModuleDescriptor;
    use crate::usage::{UsageTracker, DEFAULT_LOOKBACK_MS};
    use parking_lot::Mutex;

    /// Loader that records request order on top of a mock.
    struct RecordingLoader {
        inner: MockLoader,
        order: Mutex<Vec<ModuleId>>,
    }

    impl RecordingLoader {
        fn new(inner: MockLoader) -> Self {
            Self {
                inner,
                order: Mutex::new(Vec::new()),
            }
        }

        fn order(&self) -> Vec<ModuleId> {
            self.order.lock().clone()
        }
    }

    impl ModuleLoader for RecordingLoader {
        fn load(
            &self,
            descriptor: &ModuleDescriptor,
        ) -> BoxFuture<'static, Result<LoadedModule, LoadError>> {
            self.order.lock().push(descriptor.id.clone());
            self.inner.load(descriptor)
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    struct Fixture {
        registry: Arc<ModuleRegistry>,
        cache: Arc<ArtifactCache>,
        scheduler: Arc<Scheduler>,
        request_rx: Option<mpsc::UnboundedReceiver<PreloadRequest>>,
        metrics: Arc<MetricsCollector>,
    }

    fn fixture_with(loader: Arc<dyn ModuleLoader>, probe: StaticProbe) -> Fixture {
        let graph = Arc::new(DependencyGraph::new());
        let registry = Arc::new(ModuleRegistry::new(Arc::clone(&graph)));
        let cache = Arc::new(ArtifactCache::new(CacheConfig::default()));
        let tracker = Arc::new(UsageTracker::new(256, DEFAULT_LOOKBACK_MS));
        let metrics = Arc::new(MetricsCollector::new());
        let profiler = EnvironmentProfiler::new(Arc::new(probe));
        let config = SchedulerConfig {
            high_tier_delay: Duration::from_millis(10),
            idle_timeout: Duration::from_millis(10),
            ..SchedulerConfig::default()
        };
        let (scheduler, request_rx) = Scheduler::new(
            Arc::clone(&registry),
            Arc::clone(&graph),
            Arc::clone(&cache),
            loader,
            tracker,
            Arc::clone(&metrics),
            profiler.subscribe(),
            config,
        );
        Fixture {
            registry,
            cache,
            scheduler,
            request_rx: Some(request_rx),
            metrics,
        }
    }

    fn fixture(loader: Arc<dyn ModuleLoader>) -> Fixture {
        fixture_with(loader, StaticProbe::default())
    }

    #[tokio::test]
    async fn test_dedup_one_fetch_for_concurrent_preloads() {
        let loader = Arc::new(MockLoader::new().with_latency("hero", Duration::from_millis(50)));
        let f = fixture(Arc::clone(&loader) as Arc<dyn ModuleLoader>);
        f.registry
            .register(ModuleDescriptor::new("hero", "/hero.js"));

        let id: ModuleId = "hero".into();
        let loads = (0..5).map(|_| {
            f.scheduler
                .preload(&id, PreloadOptions::immediate(ModulePriority::High))
        });
        let results = join_all(loads).await;

        assert_eq!(loader.fetch_count(), 1, "exactly one underlying fetch");
        let first = results[0].as_ref().expect("load ok").clone();
        for result in &results {
            let artifact = result.as_ref().expect("load ok");
            assert!(Arc::ptr_eq(artifact, &first) || artifact.id == first.id);
        }
    }

    #[tokio::test]
    async fn test_unknown_module_is_error_not_fetch() {
        let loader = Arc::new(MockLoader::new());
        let f = fixture(Arc::clone(&loader) as Arc<dyn ModuleLoader>);

        let err = f
            .scheduler
            .preload(&"ghost".into(), PreloadOptions::default())
            .await
            .expect_err("unknown module");
        assert!(matches!(err, LoadError::UnknownModule(_)));
        assert_eq!(loader.fetch_count(), 0);
        assert_eq!(f.metrics.load_counts(), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_failure_clears_dedup_and_allows_retry() {
        let loader = Arc::new(MockLoader::new().with_failure("flaky"));
        let f = fixture(Arc::clone(&loader) as Arc<dyn ModuleLoader>);
        f.registry
            .register(ModuleDescriptor::new("flaky", "/flaky.js"));

        let id: ModuleId = "flaky".into();
        let err = f
            .scheduler
            .preload(&id, PreloadOptions::immediate(ModulePriority::High))
            .await
            .expect_err("injected failure");
        assert!(matches!(err, LoadError::Fetch { .. }));
        assert!(!f.cache.contains(&id), "failures are not cached");

        // Completion task clears the dedup entry.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(f.scheduler.inflight_count(), 0);

        loader.clear_failure(&id);
        let loaded = f
            .scheduler
            .preload(&id, PreloadOptions::immediate(ModulePriority::High))
            .await
            .expect("retry succeeds");
        assert_eq!(loaded.id, id);
        assert_eq!(loader.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_failure_notification_emitted() {
        let loader = Arc::new(MockLoader::new().with_failure("broken"));
        let f = fixture(Arc::clone(&loader) as Arc<dyn ModuleLoader>);
        f.registry
            .register(ModuleDescriptor::new("broken", "/broken.js"));
        let mut failures = f.scheduler.subscribe_failures();

        let _ = f
            .scheduler
            .preload(&"broken".into(), PreloadOptions::immediate(ModulePriority::High))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let failure = failures.try_recv().expect("failure notification");
        assert_eq!(failure.module_id, "broken".into());
    }

    #[tokio::test]
    async fn test_bootstrap_requests_dependencies_first() {
        // A <- B <- C with C critical; bootstrap requests
        // A and B before (never after) C.
        let recording = Arc::new(RecordingLoader::new(MockLoader::new()));
        let f = fixture(Arc::clone(&recording) as Arc<dyn ModuleLoader>);
        f.registry.register(ModuleDescriptor::new("a", "/a.js"));
        f.registry
            .register(ModuleDescriptor::new("b", "/b.js").with_dependency("a"));
        f.registry.register(
            ModuleDescriptor::new("c", "/c.js")
                .with_priority(ModulePriority::Critical)
                .with_dependency("b"),
        );

        f.scheduler.run_bootstrap().await;

        let order = recording.order();
        let position = |id: &str| {
            order
                .iter()
                .position(|m| *m == id.into())
                .unwrap_or_else(|| panic!("{id} was never requested"))
        };
        assert!(position("a") < position("b"));
        assert!(position("b") < position("c"));
        assert!(*f.scheduler.critical_ready().borrow());
        assert_eq!(f.metrics.critical_path_ms().is_some(), true);
    }

    #[tokio::test]
    async fn test_bootstrap_failure_does_not_block_siblings() {
        let loader = Arc::new(MockLoader::new().with_failure("bad"));
        let f = fixture(Arc::clone(&loader) as Arc<dyn ModuleLoader>);
        f.registry.register(
            ModuleDescriptor::new("bad", "/bad.js").with_priority(ModulePriority::Critical),
        );
        f.registry.register(
            ModuleDescriptor::new("good", "/good.js").with_priority(ModulePriority::Critical),
        );

        f.scheduler.run_bootstrap().await;

        assert!(f.cache.contains(&"good".into()));
        assert!(!f.cache.contains(&"bad".into()));
        assert!(*f.scheduler.critical_ready().borrow());
    }

    #[tokio::test]
    async fn test_minimal_mode_skips_rollout() {
        let loader = Arc::new(MockLoader::new());
        let f = fixture_with(
            Arc::clone(&loader) as Arc<dyn ModuleLoader>,
            StaticProbe::save_data(),
        );
        f.registry.register(
            ModuleDescriptor::new("crit", "/crit.js").with_priority(ModulePriority::Critical),
        );
        f.registry
            .register(ModuleDescriptor::new("med", "/med.js").with_priority(ModulePriority::Medium));
        f.registry
            .register(ModuleDescriptor::new("low", "/low.js").with_priority(ModulePriority::Low));

        f.scheduler.run_bootstrap().await;
        let cancel = CancellationToken::new();
        Arc::clone(&f.scheduler).run_rollout(cancel.clone()).await;

        assert!(f.cache.contains(&"crit".into()));
        assert!(!f.cache.contains(&"med".into()));
        assert!(!f.cache.contains(&"low".into()));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_conservative_mode_loads_high_but_not_background() {
        let loader = Arc::new(MockLoader::new());
        let f = fixture_with(
            Arc::clone(&loader) as Arc<dyn ModuleLoader>,
            StaticProbe::low_end(),
        );
        f.registry
            .register(ModuleDescriptor::new("hi", "/hi.js").with_priority(ModulePriority::High));
        f.registry
            .register(ModuleDescriptor::new("med", "/med.js").with_priority(ModulePriority::Medium));

        f.scheduler.run_bootstrap().await;
        let cancel = CancellationToken::new();
        Arc::clone(&f.scheduler).run_rollout(cancel.clone()).await;

        assert!(f.cache.contains(&"hi".into()));
        assert!(!f.cache.contains(&"med".into()));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_aggressive_mode_rolls_out_all_tiers() {
        let loader = Arc::new(MockLoader::new());
        let f = fixture(Arc::clone(&loader) as Arc<dyn ModuleLoader>);
        f.registry
            .register(ModuleDescriptor::new("hi", "/hi.js").with_priority(ModulePriority::High));
        f.registry
            .register(ModuleDescriptor::new("med", "/med.js").with_priority(ModulePriority::Medium));
        f.registry
            .register(ModuleDescriptor::new("low", "/low.js").with_priority(ModulePriority::Low));

        f.scheduler.run_bootstrap().await;
        let cancel = CancellationToken::new();
        Arc::clone(&f.scheduler).run_rollout(cancel.clone()).await;

        for id in ["hi", "med", "low"] {
            assert!(f.cache.contains(&id.into()), "{id} should be loaded");
        }
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_cascade_enqueues_ready_high_priority_dependent() {
        let loader = Arc::new(MockLoader::new());
        let mut f = fixture(Arc::clone(&loader) as Arc<dyn ModuleLoader>);
        f.registry
            .register(ModuleDescriptor::new("base", "/base.js"));
        f.registry.register(
            ModuleDescriptor::new("panel", "/panel.js")
                .with_priority(ModulePriority::High)
                .with_dependency("base"),
        );

        let cancel = CancellationToken::new();
        let request_rx = f.request_rx.take().expect("request queue");
        tokio::spawn(Arc::clone(&f.scheduler).run_dispatch(request_rx, cancel.clone()));

        f.scheduler
            .preload(&"base".into(), PreloadOptions::immediate(ModulePriority::Medium))
            .await
            .expect("base loads");

        // Cascade goes through the queue and the idle lane (10ms timeout).
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(f.scheduler.is_preloaded(&"panel".into()));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_cascade_skips_unlikely_dependent() {
        let loader = Arc::new(MockLoader::new());
        let mut f = fixture(Arc::clone(&loader) as Arc<dyn ModuleLoader>);
        f.registry
            .register(ModuleDescriptor::new("base", "/base.js"));
        f.registry.register(
            ModuleDescriptor::new("rarely-used", "/rarely-used.js")
                .with_priority(ModulePriority::Low)
                .with_dependency("base"),
        );

        let cancel = CancellationToken::new();
        let request_rx = f.request_rx.take().expect("request queue");
        tokio::spawn(Arc::clone(&f.scheduler).run_dispatch(request_rx, cancel.clone()));

        f.scheduler
            .preload(&"base".into(), PreloadOptions::immediate(ModulePriority::Medium))
            .await
            .expect("base loads");
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!f.scheduler.is_preloaded(&"rarely-used".into()));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_idle_lane_request_completes_via_timeout() {
        let loader = Arc::new(MockLoader::new());
        let f = fixture(Arc::clone(&loader) as Arc<dyn ModuleLoader>);
        f.registry
            .register(ModuleDescriptor::new("widget", "/widget.js"));

        // No idle grants: the bounded timeout must still admit the load.
        let loaded = f
            .scheduler
            .preload(&"widget".into(), PreloadOptions::idle(ModulePriority::Medium))
            .await
            .expect("load via timeout fallback");
        assert_eq!(loaded.id, "widget".into());
    }
}
