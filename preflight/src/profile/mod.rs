//! Environment profiling and operating-mode derivation.
//!
//! The engine adapts how aggressively it preloads to the device and network
//! it is running against. Detection happens once at startup and again on
//! every connection-change notification; the derived profile is published
//! through a watch channel so the scheduler always reads current policy,
//! never a stale snapshot.
//!
//! Environment facts are consumed through the [`EnvironmentProbe`]
//! capability rather than read directly, which keeps the profiler a pure
//! function of its inputs and makes every mode reachable from tests.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

/// Coarse effective network type, mirroring connection hints exposed by
/// the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EffectiveType {
    Slow2g,
    TwoG,
    ThreeG,
    FourG,
}

/// Read-only connection facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Effective connection type hint.
    pub effective_type: EffectiveType,
    /// User requested reduced data usage.
    pub save_data: bool,
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            effective_type: EffectiveType::FourG,
            save_data: false,
        }
    }
}

/// Coarse network speed bucket derived from [`ConnectionInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkSpeed {
    Slow,
    Medium,
    Fast,
}

/// Operating mode gating which scheduling layers run at all.
///
/// Derived strictly from save-data and device memory; see
/// [`EnvironmentProfile::derive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// Save-data is on: only critical modules load.
    Minimal,
    /// Low-memory device: critical and high tiers only.
    Conservative,
    /// Mid-range device: all tiers, smaller batches.
    Balanced,
    /// Capable device: all tiers, full batches.
    Aggressive,
}

impl OperatingMode {
    /// Whether the medium/low rollout tiers run in this mode.
    pub fn allows_background_tiers(&self) -> bool {
        matches!(self, OperatingMode::Balanced | OperatingMode::Aggressive)
    }

    /// Whether anything beyond the critical bootstrap runs.
    pub fn allows_post_bootstrap(&self) -> bool {
        *self != OperatingMode::Minimal
    }

    /// Short name for logs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::Minimal => "minimal",
            OperatingMode::Conservative => "conservative",
            OperatingMode::Balanced => "balanced",
            OperatingMode::Aggressive => "aggressive",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Capability for reading environment facts.
///
/// The engine never mutates these; implementations are free to return
/// fixed values ([`StaticProbe`]) or best-effort host detection
/// ([`SystemProbe`]).
pub trait EnvironmentProbe: Send + Sync {
    /// Device memory in gigabytes, if known.
    fn device_memory_gb(&self) -> Option<f64>;

    /// Number of logical CPU cores available.
    fn hardware_concurrency(&self) -> usize;

    /// Current connection facts.
    fn connection(&self) -> ConnectionInfo;

    /// User prefers reduced motion (disables animation-heavy modules'
    /// speculative loading).
    fn prefers_reduced_motion(&self) -> bool {
        false
    }
}

/// Probe returning fixed values; used by tests and the session simulator.
#[derive(Debug, Clone)]
pub struct StaticProbe {
    /// Reported device memory in GB.
    pub memory_gb: f64,
    /// Reported logical core count.
    pub cores: usize,
    /// Reported connection facts.
    pub connection: ConnectionInfo,
    /// Reported reduced-motion preference.
    pub reduced_motion: bool,
}

impl Default for StaticProbe {
    fn default() -> Self {
        Self {
            memory_gb: 8.0,
            cores: 8,
            connection: ConnectionInfo::default(),
            reduced_motion: false,
        }
    }
}

impl StaticProbe {
    /// Probe describing a constrained device on a slow connection.
    pub fn low_end() -> Self {
        Self {
            memory_gb: 2.0,
            cores: 2,
            connection: ConnectionInfo {
                effective_type: EffectiveType::TwoG,
                save_data: false,
            },
            reduced_motion: false,
        }
    }

    /// Probe with save-data enabled.
    pub fn save_data() -> Self {
        Self {
            connection: ConnectionInfo {
                effective_type: EffectiveType::FourG,
                save_data: true,
            },
            ..Self::default()
        }
    }
}

impl EnvironmentProbe for StaticProbe {
    fn device_memory_gb(&self) -> Option<f64> {
        Some(self.memory_gb)
    }

    fn hardware_concurrency(&self) -> usize {
        self.cores
    }

    fn connection(&self) -> ConnectionInfo {
        self.connection
    }

    fn prefers_reduced_motion(&self) -> bool {
        self.reduced_motion
    }
}

/// Best-effort host detection.
///
/// Core count comes from the runtime; total memory is read from
/// `/proc/meminfo` where available. Connection hints have no portable
/// source, so this probe assumes a fast connection until a
/// connection-change notification says otherwise.
#[derive(Debug, Default)]
pub struct SystemProbe;

impl EnvironmentProbe for SystemProbe {
    fn device_memory_gb(&self) -> Option<f64> {
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        let kb: f64 = meminfo
            .lines()
            .find(|l| l.starts_with("MemTotal:"))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()?;
        Some(kb / (1024.0 * 1024.0))
    }

    fn hardware_concurrency(&self) -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    fn connection(&self) -> ConnectionInfo {
        ConnectionInfo::default()
    }
}

/// Derived environment snapshot: the policy inputs the scheduler consumes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnvironmentProfile {
    /// Device memory in GB (8.0 assumed when unknown).
    pub memory_gb: f64,
    /// Logical core count.
    pub cores: usize,
    /// Under 4GB memory or under 4 cores.
    pub low_end_device: bool,
    /// Coarse network speed bucket.
    pub network: NetworkSpeed,
    /// Save-data was requested.
    pub save_data: bool,
    /// Reduced-motion preference.
    pub reduced_motion: bool,
    /// The operating mode gating scheduler layers.
    pub mode: OperatingMode,
}

/// Memory assumed when the probe cannot report it.
const DEFAULT_MEMORY_GB: f64 = 8.0;

impl EnvironmentProfile {
    /// Derive a profile from probe readings. Pure function; re-run on every
    /// connection change.
    pub fn derive(probe: &dyn EnvironmentProbe) -> Self {
        let memory_gb = probe.device_memory_gb().unwrap_or(DEFAULT_MEMORY_GB);
        let cores = probe.hardware_concurrency();
        let connection = probe.connection();
        Self::from_parts(memory_gb, cores, connection, probe.prefers_reduced_motion())
    }

    fn from_parts(
        memory_gb: f64,
        cores: usize,
        connection: ConnectionInfo,
        reduced_motion: bool,
    ) -> Self {
        let network = if connection.save_data
            || matches!(
                connection.effective_type,
                EffectiveType::Slow2g | EffectiveType::TwoG
            ) {
            NetworkSpeed::Slow
        } else if connection.effective_type == EffectiveType::ThreeG {
            NetworkSpeed::Medium
        } else {
            NetworkSpeed::Fast
        };

        let mode = if connection.save_data {
            OperatingMode::Minimal
        } else if memory_gb < 4.0 {
            OperatingMode::Conservative
        } else if memory_gb < 8.0 {
            OperatingMode::Balanced
        } else {
            OperatingMode::Aggressive
        };

        Self {
            memory_gb,
            cores,
            low_end_device: memory_gb < 4.0 || cores < 4,
            network,
            save_data: connection.save_data,
            reduced_motion,
            mode,
        }
    }

    /// Cache budget in bytes scaled by device memory: 20MB base, up to
    /// 100MB on large-memory devices.
    pub fn cache_budget_bytes(&self) -> u64 {
        const MB: u64 = 1024 * 1024;
        let scaled = (20.0 * (self.memory_gb / 4.0).max(1.0)) as u64 * MB;
        scaled.min(100 * MB)
    }
}

/// Publishes the current [`EnvironmentProfile`] and re-derives it on
/// connection changes.
pub struct EnvironmentProfiler {
    probe: Arc<dyn EnvironmentProbe>,
    tx: watch::Sender<EnvironmentProfile>,
}

impl EnvironmentProfiler {
    /// Run one-shot detection against the probe and start publishing.
    pub fn new(probe: Arc<dyn EnvironmentProbe>) -> Self {
        let profile = EnvironmentProfile::derive(probe.as_ref());
        info!(
            mode = %profile.mode,
            memory_gb = profile.memory_gb,
            cores = profile.cores,
            network = ?profile.network,
            "environment profiled"
        );
        let (tx, _) = watch::channel(profile);
        Self { probe, tx }
    }

    /// Current profile snapshot.
    pub fn profile(&self) -> EnvironmentProfile {
        *self.tx.borrow()
    }

    /// Subscribe to profile updates.
    pub fn subscribe(&self) -> watch::Receiver<EnvironmentProfile> {
        self.tx.subscribe()
    }

    /// React to a connection change: re-read device facts from the probe,
    /// re-derive with the reported connection, and publish when anything
    /// shifted.
    pub fn connection_changed(&self, connection: ConnectionInfo) {
        let current = self.profile();
        let memory_gb = self
            .probe
            .device_memory_gb()
            .unwrap_or(current.memory_gb);
        let next = EnvironmentProfile::from_parts(
            memory_gb,
            self.probe.hardware_concurrency(),
            connection,
            self.probe.prefers_reduced_motion(),
        );
        if next != current {
            debug!(old = %current.mode, new = %next.mode, "connection change re-profiled");
            // send_replace never fails even with no subscribers.
            self.tx.send_replace(next);
        }
    }
}

impl std::fmt::Debug for EnvironmentProfiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentProfiler")
            .field("profile", &self.profile())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_data_forces_minimal() {
        let profile = EnvironmentProfile::derive(&StaticProbe::save_data());
        assert_eq!(profile.mode, OperatingMode::Minimal);
        assert_eq!(profile.network, NetworkSpeed::Slow);
        assert!(!profile.mode.allows_post_bootstrap());
        assert!(!profile.mode.allows_background_tiers());
    }

    #[test]
    fn test_memory_thresholds() {
        let probe = |gb: f64| StaticProbe {
            memory_gb: gb,
            ..StaticProbe::default()
        };
        assert_eq!(
            EnvironmentProfile::derive(&probe(2.0)).mode,
            OperatingMode::Conservative
        );
        assert_eq!(
            EnvironmentProfile::derive(&probe(6.0)).mode,
            OperatingMode::Balanced
        );
        assert_eq!(
            EnvironmentProfile::derive(&probe(16.0)).mode,
            OperatingMode::Aggressive
        );
    }

    #[test]
    fn test_low_end_detection() {
        assert!(EnvironmentProfile::derive(&StaticProbe::low_end()).low_end_device);
        let few_cores = StaticProbe {
            cores: 2,
            ..StaticProbe::default()
        };
        assert!(EnvironmentProfile::derive(&few_cores).low_end_device);
        assert!(!EnvironmentProfile::derive(&StaticProbe::default()).low_end_device);
    }

    #[test]
    fn test_network_buckets() {
        let with_type = |t: EffectiveType| StaticProbe {
            connection: ConnectionInfo {
                effective_type: t,
                save_data: false,
            },
            ..StaticProbe::default()
        };
        assert_eq!(
            EnvironmentProfile::derive(&with_type(EffectiveType::Slow2g)).network,
            NetworkSpeed::Slow
        );
        assert_eq!(
            EnvironmentProfile::derive(&with_type(EffectiveType::ThreeG)).network,
            NetworkSpeed::Medium
        );
        assert_eq!(
            EnvironmentProfile::derive(&with_type(EffectiveType::FourG)).network,
            NetworkSpeed::Fast
        );
    }

    #[test]
    fn test_connection_change_republishes() {
        let profiler = EnvironmentProfiler::new(Arc::new(StaticProbe::default()));
        assert_eq!(profiler.profile().mode, OperatingMode::Aggressive);

        profiler.connection_changed(ConnectionInfo {
            effective_type: EffectiveType::FourG,
            save_data: true,
        });
        assert_eq!(profiler.profile().mode, OperatingMode::Minimal);

        profiler.connection_changed(ConnectionInfo::default());
        assert_eq!(profiler.profile().mode, OperatingMode::Aggressive);
    }

    #[test]
    fn test_connection_change_rereads_device_facts() {
        use std::sync::Mutex;

        struct ShiftingProbe {
            memory_gb: Mutex<f64>,
        }

        impl EnvironmentProbe for ShiftingProbe {
            fn device_memory_gb(&self) -> Option<f64> {
                Some(*self.memory_gb.lock().unwrap())
            }

            fn hardware_concurrency(&self) -> usize {
                8
            }

            fn connection(&self) -> ConnectionInfo {
                ConnectionInfo::default()
            }
        }

        let probe = Arc::new(ShiftingProbe {
            memory_gb: Mutex::new(16.0),
        });
        let profiler = EnvironmentProfiler::new(probe.clone());
        assert_eq!(profiler.profile().mode, OperatingMode::Aggressive);

        // Available memory dropped since startup; the next connection
        // change must pick that up, not replay the cached reading.
        *probe.memory_gb.lock().unwrap() = 2.0;
        profiler.connection_changed(ConnectionInfo::default());
        assert_eq!(profiler.profile().mode, OperatingMode::Conservative);
        assert!(profiler.profile().low_end_device);
    }

    #[test]
    fn test_cache_budget_scales_with_memory() {
        const MB: u64 = 1024 * 1024;
        let at = |gb: f64| {
            EnvironmentProfile::derive(&StaticProbe {
                memory_gb: gb,
                ..StaticProbe::default()
            })
            .cache_budget_bytes()
        };
        assert_eq!(at(2.0), 20 * MB);
        assert_eq!(at(8.0), 40 * MB);
        assert_eq!(at(64.0), 100 * MB);
    }
}
