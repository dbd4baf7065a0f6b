//! Execution lanes for preload requests.
//!
//! The idle lane is a generic yield-point primitive: low-priority work
//! parks on a semaphore that an idle ticker refills when the system has
//! spare capacity, with a bounded timeout so a slot is eventually granted
//! even when no confirmed idle period arrives. Critical work never touches
//! the lane, so it can never wait behind idle backlog.

use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::sleep;

/// Which execution path a preload request takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Run inline, ahead of everything else.
    Immediate,
    /// Wait for an idle slot (bounded by the idle timeout).
    Idle,
    /// Yield to the runtime once, then run.
    Deferred,
}

/// Default bound on waiting for an idle slot.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on banked idle permits.
const MAX_BANKED_PERMITS: usize = 8;

/// Low-priority slot source for the idle lane.
///
/// Permits are granted by the engine's idle ticker while load activity is
/// low; a waiter that sees no permit within the timeout runs anyway. Slots
/// are consumed, not returned: each grant admits exactly one deferred task.
#[derive(Debug)]
pub struct IdleLane {
    permits: Semaphore,
}

impl IdleLane {
    /// Create a lane with no banked permits.
    pub fn new() -> Self {
        Self {
            permits: Semaphore::new(0),
        }
    }

    /// Grant one idle slot, up to the banked cap.
    pub fn grant(&self) {
        if self.permits.available_permits() < MAX_BANKED_PERMITS {
            self.permits.add_permits(1);
        }
    }

    /// Currently banked slots.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for an idle slot or the timeout, whichever comes first.
    ///
    /// After engine teardown the ticker stops granting; waiters then run
    /// on the timeout path, which is the soft-cancellation contract: idle
    /// work may be arbitrarily late but is never lost while the runtime
    /// lives.
    pub async fn slot(&self, timeout: Duration) {
        tokio::select! {
            permit = self.permits.acquire() => {
                if let Ok(permit) = permit {
                    permit.forget();
                }
            }
            _ = sleep(timeout) => {}
        }
    }
}

impl Default for IdleLane {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_granted_slot_admits_immediately() {
        let lane = IdleLane::new();
        lane.grant();
        let start = Instant::now();
        lane.slot(Duration::from_secs(5)).await;
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(lane.available(), 0);
    }

    #[tokio::test]
    async fn test_timeout_bounds_the_wait() {
        let lane = IdleLane::new();
        let start = Instant::now();
        lane.slot(Duration::from_millis(50)).await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_permits_capped() {
        let lane = IdleLane::new();
        for _ in 0..100 {
            lane.grant();
        }
        assert_eq!(lane.available(), 8);
    }
}
