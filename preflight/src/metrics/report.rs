//! Consolidated session report.

use serde::Serialize;

use crate::cache::CacheStats;
use crate::profile::OperatingMode;

use super::collector::{LoadTimeStats, MetricsCollector};

/// Consolidated, serializable view of a session.
///
/// Built on demand from the collector plus engine-owned context (cache
/// stats, mode, interaction count). Fields the session never produced are
/// zeroed or `None`.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Modules known to the registry.
    pub total_modules: usize,
    /// Successful loads this session.
    pub loaded_modules: u64,
    /// Failed loads this session.
    pub error_modules: u64,
    /// Milliseconds from engine start to critical bootstrap completion.
    pub critical_path_ms: Option<u64>,
    /// Session duration in milliseconds.
    pub session_ms: u64,
    /// Interactions recorded by the usage tracker.
    pub interaction_count: u64,
    /// Load-time distribution.
    pub load_times: LoadTimeStats,
    /// Cache statistics snapshot.
    pub cache: CacheStats,
    /// Cache hit ratio at report time.
    pub cache_hit_ratio: f64,
    /// Operating mode at report time.
    pub mode: OperatingMode,
}

impl Report {
    /// Build a report from the collector and surrounding context.
    pub fn build(
        collector: &MetricsCollector,
        total_modules: usize,
        interaction_count: u64,
        cache: CacheStats,
        mode: OperatingMode,
    ) -> Self {
        let (_, completed, failed) = collector.load_counts();
        Self {
            total_modules,
            loaded_modules: completed,
            error_modules: failed,
            critical_path_ms: collector.critical_path_ms(),
            session_ms: collector.now_ms(),
            interaction_count,
            load_times: collector.load_time_stats(),
            cache_hit_ratio: cache.hit_ratio(),
            cache,
            mode,
        }
    }
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "modules: {} total, {} loaded, {} failed", self.total_modules, self.loaded_modules, self.error_modules)?;
        match self.critical_path_ms {
            Some(ms) => writeln!(f, "critical path: {ms}ms")?,
            None => writeln!(f, "critical path: not completed")?,
        }
        writeln!(
            f,
            "load times: min {}ms / median {}ms / avg {}ms / max {}ms over {} loads",
            self.load_times.min_ms,
            self.load_times.median_ms,
            self.load_times.avg_ms,
            self.load_times.max_ms,
            self.load_times.count,
        )?;
        writeln!(
            f,
            "cache: {} entries, {}/{} bytes, hit ratio {:.2}, {} evictions",
            self.cache.entries,
            self.cache.total_bytes,
            self.cache.budget_bytes,
            self.cache_hit_ratio,
            self.cache.evictions,
        )?;
        write!(
            f,
            "session: {}ms, {} interactions, mode {}",
            self.session_ms, self.interaction_count, self.mode
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_from_empty_session() {
        let collector = MetricsCollector::new();
        let report = Report::build(
            &collector,
            0,
            0,
            CacheStats::default(),
            OperatingMode::Balanced,
        );
        assert_eq!(report.loaded_modules, 0);
        assert_eq!(report.critical_path_ms, None);
        assert_eq!(report.load_times, LoadTimeStats::default());
    }

    #[test]
    fn test_report_serializes() {
        let collector = MetricsCollector::new();
        collector.load_started(&"a".into());
        collector.load_completed(&"a".into(), 12);
        let report = Report::build(
            &collector,
            3,
            7,
            CacheStats::default(),
            OperatingMode::Aggressive,
        );
        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["loaded_modules"], 1);
        assert_eq!(json["mode"], "aggressive");
        assert_eq!(json["interaction_count"], 7);
    }

    #[test]
    fn test_report_display_is_stable() {
        let collector = MetricsCollector::new();
        let report = Report::build(
            &collector,
            1,
            0,
            CacheStats::default(),
            OperatingMode::Minimal,
        );
        let text = report.to_string();
        assert!(text.contains("mode minimal"));
        assert!(text.contains("critical path: not completed"));
    }
}
