//! Bounded retry with incremental backoff.
//!
//! One policy object is shared by every backend-touching operation,
//! replacing per-backend ad hoc retry loops.

use std::time::Duration;

/// Retry schedule: up to `attempts` tries, sleeping
/// `attempt * backoff_unit + backoff_floor` between them.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts before the last error is surfaced.
    pub attempts: u32,
    /// Per-attempt increment of the backoff delay.
    pub backoff_unit: Duration,
    /// Minimum delay between attempts.
    pub backoff_floor: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 6,
            backoff_unit: Duration::from_secs(2),
            backoff_floor: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep after the given zero-based attempt fails.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff_unit * attempt + self.backoff_floor
    }
}
