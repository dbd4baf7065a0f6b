//! Engine metrics for observability and reporting.
//!
//! ```text
//! Scheduler / Cache ────► MetricsCollector ────► Report / LoadTimeStats
//!                         (atomics + event log)  (on-demand aggregates)
//! ```
//!
//! The collector is append-only: load/render/error events and named
//! environment snapshots accumulate in an event log, with hot counters on
//! atomics so recording never contends with report generation. Aggregate
//! queries never fail; missing data yields zeroed or `None` fields.

mod collector;
mod report;

pub use collector::{LoadTimeStats, MetricEvent, MetricsCollector, ModuleMetrics};
pub use report::Report;
