//! Bounded retry policy for transient store failures.
//!
//! A fixed backoff and a fixed attempt count: exhaustion must converge to
//! the same terminal outcome no matter which replica runs the handler.

use std::time::Duration;

/// How many times to attempt a store operation and how long to wait
/// between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Fixed backoff of 0.5 s, up to 5 attempts.
    pub const fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }

    /// True when `attempt` (0-based) was the last permitted one.
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt + 1 >= self.attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(500))
    }
}
