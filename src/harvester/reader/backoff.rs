// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Wait policy for reads that return no new bytes.
///
/// Each empty read waits the current interval and then multiplies it by
/// `factor`, capped at `max`. Any read that returns data resets it to `min`.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    factor: u32,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration, factor: u32) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            factor: factor.max(1),
            current: min,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Interval to wait now; grows the interval for the next empty read.
    pub fn next_wait(&mut self) -> Duration {
        let wait = self.current;
        self.current = self
            .current
            .checked_mul(self.factor)
            .map_or(self.max, |next| next.min(self.max));
        wait
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_up_to_max() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10), 2);
        let waits: Vec<u64> = (0..6).map(|_| backoff.next_wait().as_secs()).collect();
        assert_eq!(waits, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_non_decreasing_until_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(3), Duration::from_millis(500), 3);
        let mut previous = Duration::ZERO;
        for _ in 0..20 {
            let wait = backoff.next_wait();
            assert!(wait >= previous);
            assert!(wait <= Duration::from_millis(500));
            previous = wait;
        }

        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_millis(3));
        assert_eq!(backoff.next_wait(), Duration::from_millis(3));
    }

    #[test]
    fn test_factor_one_is_constant() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1), 1);
        for _ in 0..5 {
            assert_eq!(backoff.next_wait(), Duration::from_millis(100));
        }
    }

    #[test]
    fn test_overflow_saturates_at_max() {
        let mut backoff = Backoff::new(Duration::from_secs(u64::MAX / 2), Duration::MAX, u32::MAX);
        backoff.next_wait();
        assert_eq!(backoff.current(), Duration::MAX);
    }
}
