/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Capped exponential delay counter.
//!
//! The same counter drives the retry delay and the connect timeout. The
//! delay stays at its base value for the first [`FLAT_ATTEMPTS`] attempts
//! and doubles on every attempt after that, capped at the larger of
//! [`MAX_DELAY_MS`] and the base.

/// Ceiling applied to every counter whose base is below it.
pub const MAX_DELAY_MS: u64 = 60_000;

/// Number of attempts kept at the base delay before doubling starts.
pub const FLAT_ATTEMPTS: u32 = 9;

/// Capped exponential delay counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffCounter {
    current: u64,
    min: u64,
    max: u64,
    attempts: u32,
}

impl BackoffCounter {
    /// Creates a counter starting at `base` milliseconds.
    ///
    /// # Arguments
    /// * `base` - The initial and minimum delay in milliseconds
    #[must_use]
    pub fn new(base: u64) -> Self {
        Self {
            current: base,
            min: base,
            max: base.max(MAX_DELAY_MS),
            attempts: 0,
        }
    }

    /// Returns the current delay in milliseconds.
    #[inline]
    #[must_use]
    pub const fn current(&self) -> u64 {
        self.current
    }

    /// Returns the minimum delay in milliseconds.
    #[inline]
    #[must_use]
    pub const fn min(&self) -> u64 {
        self.min
    }

    /// Returns the maximum delay in milliseconds.
    #[inline]
    #[must_use]
    pub const fn max(&self) -> u64 {
        self.max
    }

    /// Returns the number of recorded attempts.
    #[inline]
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Records a failed attempt, doubling the delay once the flat phase is over.
    pub fn increase(&mut self) {
        if self.attempts >= FLAT_ATTEMPTS {
            self.current = self.current.saturating_mul(2).min(self.max);
        }
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Jumps straight to the maximum delay.
    pub fn increase_to_max(&mut self) {
        self.current = self.max;
    }

    /// Restarts the counter from a new base.
    pub fn reset(&mut self, base: u64) {
        *self = Self::new(base);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_counter() {
        let counter = BackoffCounter::new(4000);
        assert_eq!(counter.current(), 4000);
        assert_eq!(counter.min(), 4000);
        assert_eq!(counter.max(), MAX_DELAY_MS);
        assert_eq!(counter.attempts(), 0);
    }

    #[test]
    fn test_base_above_ceiling_becomes_max() {
        let counter = BackoffCounter::new(90_000);
        assert_eq!(counter.max(), 90_000);
    }

    #[test]
    fn test_flat_then_doubling() {
        let mut counter = BackoffCounter::new(4000);
        for _ in 0..FLAT_ATTEMPTS {
            counter.increase();
            assert_eq!(counter.current(), 4000);
        }
        counter.increase();
        assert_eq!(counter.current(), 8000);
        counter.increase();
        assert_eq!(counter.current(), 16_000);
        counter.increase();
        assert_eq!(counter.current(), 32_000);
        counter.increase();
        assert_eq!(counter.current(), MAX_DELAY_MS);
        counter.increase();
        assert_eq!(counter.current(), MAX_DELAY_MS);
    }

    #[test]
    fn test_never_exceeds_max() {
        let mut counter = BackoffCounter::new(1);
        for _ in 0..200 {
            counter.increase();
            assert!(counter.current() <= counter.max());
            assert!(counter.current() >= counter.min());
        }
    }

    #[test]
    fn test_increase_to_max_and_reset() {
        let mut counter = BackoffCounter::new(3000);
        counter.increase_to_max();
        assert_eq!(counter.current(), MAX_DELAY_MS);
        counter.reset(2000);
        assert_eq!(counter.current(), 2000);
        assert_eq!(counter.attempts(), 0);
    }
}
