//! Retry and tracking policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff applied to transient remote errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay after the first consecutive failure (milliseconds).
    pub base_delay_ms: u64,
    /// Upper bound on any single delay (milliseconds).
    pub max_delay_ms: u64,
    /// Consecutive transient failures tolerated before giving up.
    pub max_consecutive_failures: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_consecutive_failures: 10,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the `failures`-th consecutive failure (1-based).
    pub fn backoff(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(32);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// True once `failures` consecutive failures exceed the budget.
    pub fn exhausted(&self, failures: u32) -> bool {
        failures > self.max_consecutive_failures
    }
}

/// Configuration for the job tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Maximum remote calls in flight at once.
    pub concurrency: usize,
    /// Delay between polls of a healthy job (milliseconds).
    pub poll_interval_ms: u64,
    /// Timeout for any single remote call (milliseconds).
    pub call_timeout_ms: u64,
    /// Housekeeping interval for time-budget checks (milliseconds).
    pub tick_interval_ms: u64,
    pub retry: RetryPolicy,
    /// Cap on Submitted + Running jobs; submission waits at the cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_active_jobs: Option<usize>,
    /// Time a Running job's log may stay unchanged before it is timed out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stall_timeout_secs: Option<u64>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            poll_interval_ms: 10_000,
            call_timeout_ms: 30_000,
            tick_interval_ms: 1_000,
            retry: RetryPolicy::default(),
            max_active_jobs: None,
            stall_timeout_secs: None,
        }
    }
}

impl TrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn stall_timeout(&self) -> Option<Duration> {
        self.stall_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(6), Duration::from_secs(32));
        assert_eq!(policy.backoff(7), Duration::from_secs(60));
        assert_eq!(policy.backoff(200), Duration::from_secs(60));
    }

    #[test]
    fn eleventh_failure_exhausts_default_budget() {
        let policy = RetryPolicy::default();
        assert!(!policy.exhausted(10));
        assert!(policy.exhausted(11));
    }

    #[test]
    fn config_fills_missing_fields_from_defaults() {
        let cfg: TrackerConfig = serde_json::from_str(r#"{"concurrency": 2}"#).unwrap();
        assert_eq!(cfg.concurrency, 2);
        assert_eq!(cfg.retry, RetryPolicy::default());
        assert_eq!(cfg.poll_interval(), Duration::from_secs(10));
    }
}
