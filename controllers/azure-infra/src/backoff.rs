//! # Fibonacci requeue backoff
//!
//! Each object that keeps failing is requeued after a growing delay that
//! follows the Fibonacci sequence, capped at a maximum. A successful pass
//! resets the sequence.
//!
//! With the defaults (30s step, 10m cap) the delays are
//! 30s, 30s, 1m, 1m30s, 2m30s, 4m, 6m30s, 10m, 10m, ...

use std::time::Duration;

/// Delay unit of the default sequence
pub const DEFAULT_STEP: Duration = Duration::from_secs(30);

/// Longest delay of the default sequence
pub const DEFAULT_MAX: Duration = Duration::from_secs(600);

/// Stateful Fibonacci delay generator
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    step: Duration,
    max: Duration,
    prev: Duration,
    current: Duration,
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_STEP, DEFAULT_MAX)
    }
}

impl FibonacciBackoff {
    /// Sequence starting at `step, step` and never exceeding `max`
    #[must_use]
    pub fn new(step: Duration, max: Duration) -> Self {
        Self {
            step,
            max,
            prev: Duration::ZERO,
            current: step.min(max),
        }
    }

    /// Current delay; advances the sequence
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let next = self.prev.saturating_add(self.current).min(self.max);
        self.prev = self.current;
        self.current = next;
        delay
    }

    /// Back to the first delay
    pub fn reset(&mut self) {
        self.prev = Duration::ZERO;
        self.current = self.step.min(self.max);
    }
}
