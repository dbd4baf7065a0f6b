//! Value scoring for cache eviction ranking.
//!
//! The score is a pure function of an entry's recency, access frequency,
//! declared priority and size, so eviction order can be asserted without
//! constructing a cache. Weights live in [`ScoreWeights`] rather than
//! literals; tests assert monotonicity, not exact constants.

use std::time::Duration;

/// Weights and horizons for the composite value score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreWeights {
    /// Weight of the recency component.
    pub recency: f64,
    /// Weight of the frequency component.
    pub frequency: f64,
    /// Weight of the declared-priority boost.
    pub priority: f64,
    /// Penalty per megabyte of entry size.
    pub size_penalty_per_mb: f64,
    /// Window over which recency decays linearly to zero.
    pub recency_horizon: Duration,
    /// Access count at which frequency saturates.
    pub frequency_cap: u32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            recency: 0.4,
            frequency: 0.3,
            priority: 0.3,
            size_penalty_per_mb: 0.1,
            recency_horizon: Duration::from_secs(3600),
            frequency_cap: 20,
        }
    }
}

/// Composite value score of one cache entry; higher survives longer.
///
/// `recency*w_r + frequency*w_f + priority_boost*w_p - size_mb*penalty`
/// where recency decays linearly from 1 to 0 over the horizon, frequency is
/// the access count normalized against the cap, and the boost is the
/// priority tier's 0..=3 value.
pub fn value_score(
    since_last_access: Duration,
    access_count: u32,
    priority_boost: f64,
    size_bytes: u64,
    weights: &ScoreWeights,
) -> f64 {
    let horizon = weights.recency_horizon.as_secs_f64().max(f64::EPSILON);
    let recency = (1.0 - since_last_access.as_secs_f64() / horizon).max(0.0);
    let frequency = f64::from(access_count.min(weights.frequency_cap))
        / f64::from(weights.frequency_cap.max(1));
    let size_mb = size_bytes as f64 / (1024.0 * 1024.0);

    weights.recency * recency + weights.frequency * frequency + weights.priority * priority_boost
        - weights.size_penalty_per_mb * size_mb
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn score(age_secs: u64, count: u32, boost: f64, bytes: u64) -> f64 {
        value_score(
            Duration::from_secs(age_secs),
            count,
            boost,
            bytes,
            &ScoreWeights::default(),
        )
    }

    #[test]
    fn test_older_entry_scores_lower() {
        assert!(score(10, 5, 1.0, 1024) > score(1800, 5, 1.0, 1024));
    }

    #[test]
    fn test_colder_entry_scores_lower() {
        assert!(score(10, 10, 1.0, 1024) > score(10, 2, 1.0, 1024));
    }

    #[test]
    fn test_frequency_saturates_at_cap() {
        assert_eq!(score(10, 20, 1.0, 1024), score(10, 400, 1.0, 1024));
    }

    #[test]
    fn test_priority_boost_raises_score() {
        assert!(score(10, 5, 3.0, 1024) > score(10, 5, 0.0, 1024));
    }

    #[test]
    fn test_size_penalty() {
        assert!(score(10, 5, 1.0, 1024) > score(10, 5, 1.0, 8 * 1024 * 1024));
    }

    #[test]
    fn test_recency_floor_at_horizon() {
        // Beyond the horizon, recency contributes zero, not negative.
        assert_eq!(score(3600, 0, 0.0, 0), score(7200, 0, 0.0, 0));
    }

    proptest! {
        /// Higher recency (smaller age) never decreases the score.
        #[test]
        fn prop_recency_monotone(age in 0u64..7200, delta in 0u64..3600, count in 0u32..50) {
            let newer = score(age, count, 1.0, 1024);
            let older = score(age + delta, count, 1.0, 1024);
            prop_assert!(newer >= older);
        }

        /// More accesses never decrease the score.
        #[test]
        fn prop_frequency_monotone(count in 0u32..100, extra in 0u32..100) {
            prop_assert!(score(60, count + extra, 1.0, 1024) >= score(60, count, 1.0, 1024));
        }
    }
}
