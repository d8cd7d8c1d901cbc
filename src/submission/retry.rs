//! Exponential backoff policy for on-chain submissions.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::SubmissionConfig;
use crate::utils::constants::*;

/// Bounded exponential backoff with optional jitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, first one included
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub min_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub factor: f64,
    /// Multiply each delay by a random value in `[1, 2)`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_SUBMIT_MAX_ATTEMPTS,
            min_delay: DEFAULT_SUBMIT_MIN_BACKOFF,
            max_delay: DEFAULT_SUBMIT_MAX_BACKOFF,
            factor: DEFAULT_SUBMIT_BACKOFF_FACTOR,
            jitter: true,
        }
    }
}

impl From<&SubmissionConfig> for RetryPolicy {
    fn from(config: &SubmissionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            min_delay: Duration::from_millis(config.min_backoff_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
            factor: config.backoff_factor,
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// Policy without jitter, for deterministic timing
    pub fn fixed(max_attempts: u32, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            min_delay,
            max_delay,
            factor: DEFAULT_SUBMIT_BACKOFF_FACTOR,
            jitter: false,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    /// [`delay_for`](Self::delay_for) with a caller-supplied RNG
    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let mut millis = self.min_delay.as_millis() as f64 * self.factor.powi(exponent);
        if self.jitter {
            millis *= rng.gen_range(1.0..2.0);
        }

        let cap = self.max_delay.as_millis() as f64;
        Duration::from_millis(millis.min(cap).round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_exponential_growth_and_cap() {
        let policy = RetryPolicy::fixed(5, Duration::from_secs(1), Duration::from_secs(60));
        let delays: Vec<u64> = (1..=8).map(|a| policy.delay_for(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy::default();
        let mut rng = StdRng::seed_from_u64(5);
        for attempt in 1..=4 {
            let base = 1_000u64 << (attempt - 1);
            for _ in 0..100 {
                let delay = policy.delay_with(attempt, &mut rng).as_millis() as u64;
                assert!(delay >= base && delay <= 2 * base, "attempt {}: {}", attempt, delay);
            }
        }
        assert!(policy.delay_for(20) <= policy.max_delay);
    }

    #[test]
    fn test_from_config() {
        let policy = RetryPolicy::from(&SubmissionConfig::default());
        assert_eq!(policy, RetryPolicy::default());
    }
}
