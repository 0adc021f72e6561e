//! # Fibonacci Backoff
//!
//! Progressive delay for clusters whose reconcile keeps failing. Grows more
//! slowly than exponential backoff so a briefly unavailable API server does
//! not push a cluster out to the cap after a handful of attempts.
//!
//! Sequence with the defaults: 3s, 3s, 6s, 9s, 15s, 24s, ... 300s (max).

use std::time::Duration;

pub const MIN_BACKOFF_SECS: u64 = 3;
pub const MAX_BACKOFF_SECS: u64 = 300;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, capped at `max_secs`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_secs: u64,
    prev_secs: u64,
    current_secs: u64,
    max_secs: u64,
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(MIN_BACKOFF_SECS, MAX_BACKOFF_SECS)
    }
}

impl FibonacciBackoff {
    /// Creates a backoff starting at `min_secs` and capped at `max_secs`
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            min_secs,
            prev_secs: 0,
            current_secs: min_secs,
            max_secs,
        }
    }

    /// Returns the current delay and advances the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_secs;
        let next = self.prev_secs.saturating_add(self.current_secs);
        self.prev_secs = self.current_secs;
        self.current_secs = next.min(self.max_secs);
        Duration::from_secs(result)
    }

    pub fn reset(&mut self) {
        self.prev_secs = 0;
        self.current_secs = self.min_secs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(backoff: &mut FibonacciBackoff) -> u64 {
        backoff.next_backoff().as_secs()
    }

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::default();
        let seq: Vec<u64> = (0..8).map(|_| secs(&mut backoff)).collect();
        assert_eq!(seq, vec![3, 3, 6, 9, 15, 24, 39, 63]);
    }

    #[test]
    fn test_fibonacci_backoff_caps_at_max() {
        let mut backoff = FibonacciBackoff::new(3, 10);
        let seq: Vec<u64> = (0..7).map(|_| secs(&mut backoff)).collect();
        assert_eq!(seq, vec![3, 3, 6, 9, 10, 10, 10]);
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::default();
        for _ in 0..5 {
            backoff.next_backoff();
        }
        backoff.reset();
        assert_eq!(secs(&mut backoff), 3);
        assert_eq!(secs(&mut backoff), 3);
        assert_eq!(secs(&mut backoff), 6);
    }
}
