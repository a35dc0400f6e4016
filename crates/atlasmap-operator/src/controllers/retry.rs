//! Requeue policy for failed passes
//!
//! Transient failures back off exponentially per AtlasMap until the attempt
//! budget runs out. Permanent failures, and exhausted budgets, wait for the
//! AtlasMap to change.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use kube::runtime::controller::Action;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Remote API failures that may succeed on a later attempt
    Transient,
    /// Invalid input that only a change to the AtlasMap can fix
    Permanent,
}

/// Exponential backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Attempt at which transient failures stop being retried on a timer
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(3600),
            max_attempts: 10,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base, 2x base, 4x base, ...
    pub fn delay(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1 << doublings)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Requeue action after failure number `attempt`
    pub fn action(&self, attempt: u32, kind: ErrorKind) -> Action {
        match kind {
            ErrorKind::Permanent => Action::await_change(),
            ErrorKind::Transient if attempt >= self.max_attempts => {
                warn!(
                    attempt,
                    max_attempts = self.max_attempts,
                    "Retry budget spent, waiting for a change"
                );
                Action::await_change()
            }
            ErrorKind::Transient => {
                let delay = self.delay(attempt);
                debug!(attempt, delay_secs = delay.as_secs(), "Backing off");
                Action::requeue(delay)
            }
        }
    }
}

/// Consecutive failures per AtlasMap.
///
/// The error policy is synchronous, so a std mutex is enough; it is never
/// held across an `.await`.
#[derive(Debug, Default)]
pub struct RetryTracker {
    failures: Mutex<HashMap<String, u32>>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn failures_map(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count a failure and return how many happened in a row
    pub fn record_failure(&self, key: &str) -> u32 {
        let mut failures = self.failures_map();
        let count = failures.entry(key.to_string()).or_default();
        *count = count.saturating_add(1);
        *count
    }

    pub fn clear(&self, key: &str) {
        self.failures_map().remove(key);
    }

    pub fn failures(&self, key: &str) -> u32 {
        self.failures_map().get(key).copied().unwrap_or_default()
    }
}
