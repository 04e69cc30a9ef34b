//! Exponential backoff between helper probes

use std::time::Duration;

/// Delays that double with each attempt, capped at a maximum.
///
/// ```
/// use dbnet_dbt::BackoffStrategy;
/// use std::time::Duration;
///
/// let backoff = BackoffStrategy::new(250, 2_000);
/// assert_eq!(backoff.calculate_delay(0), Duration::from_millis(250));
/// assert_eq!(backoff.calculate_delay(1), Duration::from_millis(500));
/// assert_eq!(backoff.calculate_delay(10), Duration::from_millis(2_000));
/// ```
#[derive(Debug, Clone)]
pub struct BackoffStrategy {
    initial_ms: u64,
    max_ms: u64,
}

impl BackoffStrategy {
    pub fn new(initial_ms: u64, max_ms: u64) -> Self {
        Self {
            initial_ms: initial_ms.max(1),
            max_ms: max_ms.max(initial_ms),
        }
    }

    /// Delay before retry `attempt` (zero-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = 1u64
            .checked_shl(attempt)
            .and_then(|factor| self.initial_ms.checked_mul(factor))
            .map_or(self.max_ms, |ms| ms.min(self.max_ms));
        Duration::from_millis(delay_ms)
    }
}
