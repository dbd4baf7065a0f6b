//! Append-only metrics collection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

use crate::registry::ModuleId;

/// One recorded metric event.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    /// A load was issued.
    LoadStart { module: ModuleId, at_ms: u64 },
    /// A load finished successfully.
    LoadComplete {
        module: ModuleId,
        at_ms: u64,
        duration_ms: u64,
    },
    /// A module finished rendering.
    RenderComplete {
        module: ModuleId,
        at_ms: u64,
        duration_ms: u64,
    },
    /// A load failed.
    Error {
        module: ModuleId,
        at_ms: u64,
        message: String,
    },
    /// Named point-in-time snapshot of environment/resource counters.
    Snapshot {
        name: String,
        at_ms: u64,
        data: serde_json::Value,
    },
}

/// Per-module aggregate view.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModuleMetrics {
    /// Most recent successful load duration.
    pub load_ms: Option<u64>,
    /// Most recent render duration.
    pub render_ms: Option<u64>,
    /// Number of failed loads.
    pub errors: u64,
}

/// Load-time distribution over all completed loads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LoadTimeStats {
    pub count: usize,
    pub min_ms: u64,
    pub median_ms: u64,
    pub avg_ms: u64,
    pub max_ms: u64,
}

#[derive(Default)]
struct CollectorState {
    events: Vec<MetricEvent>,
    per_module: HashMap<ModuleId, ModuleMetrics>,
    load_durations_ms: Vec<u64>,
    critical_path_ms: Option<u64>,
}

/// The metrics collector.
///
/// All recording methods are infallible and cheap; aggregation happens in
/// the query methods.
pub struct MetricsCollector {
    epoch: Instant,
    state: Mutex<CollectorState>,
    loads_started: AtomicU64,
    loads_completed: AtomicU64,
    errors: AtomicU64,
}

impl MetricsCollector {
    /// Create a collector; the session clock starts now.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            state: Mutex::new(CollectorState::default()),
            loads_started: AtomicU64::new(0),
            loads_completed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Milliseconds since collector creation.
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Record a load being issued.
    pub fn load_started(&self, module: &ModuleId) {
        self.loads_started.fetch_add(1, Ordering::Relaxed);
        let at_ms = self.now_ms();
        self.state.lock().events.push(MetricEvent::LoadStart {
            module: module.clone(),
            at_ms,
        });
    }

    /// Record a successful load.
    pub fn load_completed(&self, module: &ModuleId, duration_ms: u64) {
        self.loads_completed.fetch_add(1, Ordering::Relaxed);
        let at_ms = self.now_ms();
        let mut state = self.state.lock();
        state.events.push(MetricEvent::LoadComplete {
            module: module.clone(),
            at_ms,
            duration_ms,
        });
        state.load_durations_ms.push(duration_ms);
        state.per_module.entry(module.clone()).or_default().load_ms = Some(duration_ms);
    }

    /// Record a completed render.
    pub fn render_completed(&self, module: &ModuleId, duration_ms: u64) {
        let at_ms = self.now_ms();
        let mut state = self.state.lock();
        state.events.push(MetricEvent::RenderComplete {
            module: module.clone(),
            at_ms,
            duration_ms,
        });
        state.per_module.entry(module.clone()).or_default().render_ms = Some(duration_ms);
    }

    /// Record a failed load.
    pub fn load_failed(&self, module: &ModuleId, message: impl Into<String>) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        let at_ms = self.now_ms();
        let mut state = self.state.lock();
        state.events.push(MetricEvent::Error {
            module: module.clone(),
            at_ms,
            message: message.into(),
        });
        state.per_module.entry(module.clone()).or_default().errors += 1;
    }

    /// Record a named environment/resource snapshot.
    pub fn snapshot(&self, name: impl Into<String>, data: serde_json::Value) {
        let at_ms = self.now_ms();
        self.state.lock().events.push(MetricEvent::Snapshot {
            name: name.into(),
            at_ms,
            data,
        });
    }

    /// Record when the critical bootstrap finished (first call wins).
    pub fn critical_path_completed(&self) {
        let at_ms = self.now_ms();
        let mut state = self.state.lock();
        state.critical_path_ms.get_or_insert(at_ms);
    }

    /// Critical-path completion time, if bootstrap finished.
    pub fn critical_path_ms(&self) -> Option<u64> {
        self.state.lock().critical_path_ms
    }

    /// Per-module metrics, default-zeroed for unknown ids.
    pub fn module_metrics(&self, module: &ModuleId) -> ModuleMetrics {
        self.state
            .lock()
            .per_module
            .get(module)
            .cloned()
            .unwrap_or_default()
    }

    /// Load-time distribution across all successful loads.
    pub fn load_time_stats(&self) -> LoadTimeStats {
        let state = self.state.lock();
        let mut sorted = state.load_durations_ms.clone();
        drop(state);
        if sorted.is_empty() {
            return LoadTimeStats::default();
        }
        sorted.sort_unstable();
        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        LoadTimeStats {
            count,
            min_ms: sorted[0],
            median_ms: sorted[count / 2],
            avg_ms: sum / count as u64,
            max_ms: sorted[count - 1],
        }
    }

    /// Copy of the full event log.
    pub fn events(&self) -> Vec<MetricEvent> {
        self.state.lock().events.clone()
    }

    /// Counts: (started, completed, failed).
    pub fn load_counts(&self) -> (u64, u64, u64) {
        (
            self.loads_started.load(Ordering::Relaxed),
            self.loads_completed.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
        )
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (started, completed, failed) = self.load_counts();
        f.debug_struct("MetricsCollector")
            .field("loads_started", &started)
            .field("loads_completed", &completed)
            .field("errors", &failed)
            .finish()
    }
}
