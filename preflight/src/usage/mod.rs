//! Interaction and usage tracking.
//!
//! The tracker records timestamped interaction events into a bounded ring
//! buffer (oldest evicted first), maintains per-module [`UsagePattern`]s,
//! and periodically flushes the events recorded since the last checkpoint
//! to batch subscribers over unbounded channels. Derived state, the current
//! scroll direction/velocity and navigational route, is kept as the most
//! recent sample of each kind.
//!
//! All writes funnel through [`UsageTracker::record`]; readers take cheap
//! snapshots under a short-lived lock.

mod event;
mod pattern;

pub use event::{InteractionEvent, InteractionKind, ScrollDirection};
pub use pattern::{PatternStore, UsagePattern, DEFAULT_LOOKBACK_MS};

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::registry::ModuleId;

/// Default ring buffer capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

/// Current scroll state derived from the latest scroll sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollState {
    /// Direction of the last observed scroll.
    pub direction: ScrollDirection,
    /// Velocity of the last observed scroll in px/s.
    pub velocity_px_s: f64,
}

/// A flushed batch of events since the previous checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionBatch {
    /// Events in record order.
    pub events: Vec<InteractionEvent>,
    /// Tracker time at flush, ms since epoch.
    pub flushed_at_ms: u64,
}

struct TrackerState {
    buffer: VecDeque<(u64, InteractionEvent)>,
    next_seq: u64,
    flushed_seq: u64,
    patterns: PatternStore,
    scroll: ScrollState,
    route: Option<String>,
    interaction_count: u64,
    subscribers: Vec<mpsc::UnboundedSender<InteractionBatch>>,
}

/// Bounded-buffer interaction tracker with periodic batch flushing.
pub struct UsageTracker {
    epoch: Instant,
    capacity: usize,
    state: Mutex<TrackerState>,
}

impl UsageTracker {
    /// Create a tracker with the given buffer capacity and followed-by
    /// lookback window.
    pub fn new(capacity: usize, lookback_ms: u64) -> Self {
        Self {
            epoch: Instant::now(),
            capacity: capacity.max(1),
            state: Mutex::new(TrackerState {
                buffer: VecDeque::with_capacity(capacity.max(1)),
                next_seq: 0,
                flushed_seq: 0,
                patterns: PatternStore::new(lookback_ms),
                scroll: ScrollState::default(),
                route: None,
                interaction_count: 0,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Milliseconds since the tracker epoch.
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Record an event stamped with the current tracker time.
    pub fn record(&self, kind: InteractionKind) {
        let at_ms = self.now_ms();
        self.record_at(kind, at_ms);
    }

    /// Record an event with an explicit timestamp.
    ///
    /// Hosts forwarding original event timestamps use this; tests use it to
    /// exercise time-window behavior without sleeping.
    pub fn record_at(&self, kind: InteractionKind, at_ms: u64) {
        let mut state = self.state.lock();
        state.interaction_count += 1;

        match &kind {
            InteractionKind::Scroll {
                direction,
                velocity_px_s,
            } => {
                state.scroll = ScrollState {
                    direction: *direction,
                    velocity_px_s: *velocity_px_s,
                };
            }
            InteractionKind::Navigation { route } => {
                state.route = Some(route.clone());
            }
            InteractionKind::ModuleRendered { module } => {
                let module = module.clone();
                state.patterns.record_rendered(&module, at_ms);
            }
            _ => {}
        }

        trace!(kind = kind.label(), at_ms, "interaction recorded");
        let seq = state.next_seq;
        state.next_seq += 1;
        if state.buffer.len() == self.capacity {
            state.buffer.pop_front();
        }
        state.buffer.push_back((seq, InteractionEvent { at_ms, kind }));
    }

    /// Subscribe to flushed batches.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<InteractionBatch> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().subscribers.push(tx);
        rx
    }

    /// Flush events recorded since the last checkpoint to all subscribers.
    ///
    /// Returns the flushed batch (empty batches are not delivered but are
    /// returned, so callers can observe the checkpoint advancing).
    pub fn flush(&self) -> InteractionBatch {
        let flushed_at_ms = self.now_ms();
        let mut state = self.state.lock();
        let flushed_seq = state.flushed_seq;
        let events: Vec<InteractionEvent> = state
            .buffer
            .iter()
            .filter(|(seq, _)| *seq >= flushed_seq)
            .map(|(_, e)| e.clone())
            .collect();
        state.flushed_seq = state.next_seq;

        let batch = InteractionBatch {
            events,
            flushed_at_ms,
        };
        if !batch.events.is_empty() {
            state.subscribers.retain(|tx| tx.send(batch.clone()).is_ok());
        }
        batch
    }

    /// Current scroll state.
    pub fn scroll_state(&self) -> ScrollState {
        self.state.lock().scroll
    }

    /// Current navigational route, if any navigation was recorded.
    pub fn current_route(&self) -> Option<String> {
        self.state.lock().route.clone()
    }

    /// Total interactions recorded this session.
    pub fn interaction_count(&self) -> u64 {
        self.state.lock().interaction_count
    }

    /// Snapshot of a module's usage pattern.
    pub fn pattern(&self, module: &ModuleId) -> Option<UsagePattern> {
        self.state.lock().patterns.get(module).cloned()
    }

    /// Most recently used module ids, newest first.
    pub fn recently_used(&self, limit: usize) -> Vec<ModuleId> {
        self.state.lock().patterns.recently_used(limit)
    }

    /// Whether `module` was used within `window_ms` of now.
    pub fn used_recently(&self, module: &ModuleId, window_ms: u64) -> bool {
        let now = self.now_ms();
        self.state.lock().patterns.used_within(module, now, window_ms)
    }

    /// Highest per-module usage count (frequency normalization).
    pub fn max_usage_count(&self) -> u64 {
        self.state.lock().patterns.max_usage_count()
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY, DEFAULT_LOOKBACK_MS)
    }
}

impl std::fmt::Debug for UsageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("UsageTracker")
            .field("buffered", &state.buffer.len())
            .field("patterns", &state.patterns.len())
            .field("interactions", &state.interaction_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(id: &str) -> InteractionKind {
        InteractionKind::ModuleRendered { module: id.into() }
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let tracker = UsageTracker::new(3, DEFAULT_LOOKBACK_MS);
        for i in 0..5u64 {
            tracker.record_at(
                InteractionKind::Click { module: None },
                i * 100,
            );
        }
        let batch = tracker.flush();
        // Capacity 3: only the last three events survive.
        assert_eq!(batch.events.len(), 3);
        assert_eq!(batch.events[0].at_ms, 200);
        assert_eq!(tracker.interaction_count(), 5);
    }

    #[test]
    fn test_flush_checkpoint_advances() {
        let tracker = UsageTracker::default();
        tracker.record(rendered("a"));
        assert_eq!(tracker.flush().events.len(), 1);
        // Nothing new since the checkpoint.
        assert!(tracker.flush().events.is_empty());
        tracker.record(rendered("b"));
        assert_eq!(tracker.flush().events.len(), 1);
    }

    #[test]
    fn test_subscriber_receives_batches() {
        let tracker = UsageTracker::default();
        let mut rx = tracker.subscribe();
        tracker.record(rendered("a"));
        tracker.flush();

        let batch = rx.try_recv().expect("batch delivered");
        assert_eq!(batch.events.len(), 1);
        // Empty flush is not delivered.
        tracker.flush();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_derived_scroll_and_route() {
        let tracker = UsageTracker::default();
        tracker.record(InteractionKind::Scroll {
            direction: ScrollDirection::Up,
            velocity_px_s: 640.0,
        });
        tracker.record(InteractionKind::Navigation {
            route: "/blog".into(),
        });

        let scroll = tracker.scroll_state();
        assert_eq!(scroll.direction, ScrollDirection::Up);
        assert!((scroll.velocity_px_s - 640.0).abs() < f64::EPSILON);
        assert_eq!(tracker.current_route().as_deref(), Some("/blog"));
    }

    #[test]
    fn test_patterns_updated_on_rendered() {
        let tracker = UsageTracker::default();
        tracker.record_at(rendered("a"), 1_000);
        tracker.record_at(rendered("b"), 4_000);

        let a = tracker.pattern(&"a".into()).expect("pattern");
        assert_eq!(a.followed_count(&"b".into()), 1);
        assert_eq!(tracker.recently_used(1), vec!["b".into()]);
    }
}
