//! Per-batch exponential backoff.
//!
//! `delay(n) = min(initial * multiplier^(n-1) * (1 + jitter), max)` where `n`
//! is the number of consecutive retryable failures and `jitter` is drawn
//! from `[0, jitter_ratio)`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tq_config::BackoffSettings;

/// The backoff curve.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
}

impl BackoffPolicy {
    pub fn from_settings(settings: &BackoffSettings) -> Self {
        BackoffPolicy {
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            multiplier: settings.multiplier,
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter_ratio: settings.jitter_ratio,
        }
    }

    pub fn with_jitter(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio;
        self
    }

    /// Delay before the retry following the `attempt`-th consecutive failure.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_ratio > 0.0 {
            rand::rng().random_range(0.0..self.jitter_ratio)
        } else {
            0.0
        };
        self.delay_with_jitter(attempt, jitter)
    }

    /// Deterministic form of [`delay`](Self::delay).
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        let secs = (base * (1.0 + jitter)).min(max);
        if secs.is_finite() && secs >= 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            self.max_delay
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_settings(&BackoffSettings::default())
    }
}

/// Retry bookkeeping for one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryState {
    /// Consecutive retryable failures.
    pub attempts: u32,
    /// The delay most recently scheduled.
    pub last_delay: Duration,
    /// Earliest time the next attempt may start.
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: String,
}

impl RetryState {
    /// Record a retryable failure at `now` and schedule the next attempt.
    pub fn record_failure(
        previous: Option<&RetryState>,
        policy: &BackoffPolicy,
        now: DateTime<Utc>,
        error: String,
    ) -> Self {
        let attempts = previous.map_or(0, |p| p.attempts).saturating_add(1);
        let delay = policy.delay(attempts);
        let next_attempt_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now);
        RetryState {
            attempts,
            last_delay: delay,
            next_attempt_at,
            last_error: error,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_attempt_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter_ratio: 0.0,
        }
    }

    #[test]
    fn test_delay_doubles_until_capped() {
        let p = policy();
        assert_eq!(p.delay(1), Duration::from_secs(1));
        assert_eq!(p.delay(2), Duration::from_secs(2));
        assert_eq!(p.delay(3), Duration::from_secs(4));
        assert_eq!(p.delay(7), Duration::from_secs(60));
        assert_eq!(p.delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_never_exceeds_max() {
        let p = policy();
        assert_eq!(p.delay_with_jitter(6, 0.99), Duration::from_secs(60));
        assert_eq!(
            p.delay_with_jitter(1, 0.5),
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn test_record_failure_counts_attempts() {
        let p = policy();
        let now = Utc::now();
        let first = RetryState::record_failure(None, &p, now, "503".into());
        assert_eq!(first.attempts, 1);
        assert!(!first.is_due(now));
        assert!(first.is_due(now + chrono::Duration::seconds(1)));

        let second = RetryState::record_failure(Some(&first), &p, now, "503".into());
        assert_eq!(second.attempts, 2);
        assert_eq!(second.last_delay, Duration::from_secs(2));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Below the cap, each failure waits strictly longer than the last,
        /// whatever jitter is drawn.
        #[test]
        fn delay_strictly_increases_below_cap(
            attempt in 1u32..5,
            jitter_a in 0.0f64..0.2,
            jitter_b in 0.0f64..0.2,
        ) {
            let p = BackoffPolicy {
                initial_delay: Duration::from_millis(100),
                multiplier: 2.0,
                max_delay: Duration::from_secs(3600),
                jitter_ratio: 0.2,
            };
            let earlier = p.delay_with_jitter(attempt, jitter_a);
            let later = p.delay_with_jitter(attempt + 1, jitter_b);
            prop_assert!(later > earlier);
        }
    }
}
