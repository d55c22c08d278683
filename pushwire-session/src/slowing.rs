/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Slow client detection from `SYNC` notifications.
//!
//! The server periodically reports the seconds elapsed since the stream
//! started. Comparing that with local elapsed time gives the delay the
//! client accumulates while reading; a smoothed mean of the delay above the
//! high threshold marks the client as slow.

/// Weight of the newest sample in the smoothed mean.
pub const MOMENTUM: f64 = 0.5;

/// Mean below which the client is considered in sync, in milliseconds.
pub const LOW_THRESHOLD_MS: f64 = 60.0;

/// Mean above which the client is considered slow, in milliseconds.
pub const HIGH_THRESHOLD_MS: f64 = 7000.0;

/// Verdict after a `SYNC` sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncVerdict {
    /// First sample of the stream; sets the reference time.
    Calibrated,
    /// The client keeps up.
    Normal,
    /// A single huge sample, held until confirmed by the next one.
    Outlier,
    /// The client is falling behind.
    Slow,
}

/// Smoothed read-delay estimator.
#[derive(Debug, Clone, Default)]
pub struct SlowClientDetector {
    /// Local time corresponding to server second zero.
    base_ms: Option<u64>,
    mean_ms: f64,
    outlier_pending: bool,
}

impl SlowClientDetector {
    /// Creates a detector awaiting its first sample.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets every sample; called when a new stream starts.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Returns the smoothed delay in milliseconds.
    #[inline]
    #[must_use]
    pub const fn mean_ms(&self) -> f64 {
        self.mean_ms
    }

    /// Processes a `SYNC` sample.
    ///
    /// # Arguments
    /// * `seconds` - Seconds since stream start as reported by the server
    /// * `now` - Current time in milliseconds
    pub fn on_sync(&mut self, seconds: u64, now: u64) -> SyncVerdict {
        let server_ms = seconds.saturating_mul(1000);
        let Some(base) = self.base_ms else {
            self.base_ms = Some(now.saturating_sub(server_ms));
            return SyncVerdict::Calibrated;
        };
        let local_ms = now.saturating_sub(base);
        if local_ms < server_ms {
            self.base_ms = Some(now.saturating_sub(server_ms));
            return SyncVerdict::Normal;
        }
        let delay = (local_ms - server_ms) as f64;

        if delay > HIGH_THRESHOLD_MS && delay > 2.0 * self.mean_ms && !self.outlier_pending {
            self.outlier_pending = true;
            return SyncVerdict::Outlier;
        }
        self.outlier_pending = false;

        self.mean_ms = MOMENTUM * delay + (1.0 - MOMENTUM) * self.mean_ms;
        if self.mean_ms < LOW_THRESHOLD_MS {
            self.mean_ms = 0.0;
            SyncVerdict::Normal
        } else if self.mean_ms > HIGH_THRESHOLD_MS {
            SyncVerdict::Slow
        } else {
            SyncVerdict::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_calibrates() {
        let mut detector = SlowClientDetector::new();
        assert_eq!(detector.on_sync(0, 1000), SyncVerdict::Calibrated);
        assert_eq!(detector.on_sync(5, 6010), SyncVerdict::Normal);
        assert_eq!(detector.mean_ms(), 0.0);
    }

    #[test]
    fn test_single_spike_is_held() {
        let mut detector = SlowClientDetector::new();
        detector.on_sync(0, 0);
        assert_eq!(detector.on_sync(1, 21_000), SyncVerdict::Outlier);
        assert_eq!(detector.mean_ms(), 0.0);
        // Back in sync: the spike is dropped.
        assert_eq!(detector.on_sync(22, 22_000), SyncVerdict::Normal);
        assert_eq!(detector.mean_ms(), 0.0);
        // A later spike needs its own confirmation.
        assert_eq!(detector.on_sync(23, 43_000), SyncVerdict::Outlier);
    }

    #[test]
    fn test_confirmed_spike_is_slow() {
        let mut detector = SlowClientDetector::new();
        detector.on_sync(0, 0);
        assert_eq!(detector.on_sync(1, 21_000), SyncVerdict::Outlier);
        assert_eq!(detector.on_sync(2, 32_000), SyncVerdict::Slow);
        assert!(detector.mean_ms() > HIGH_THRESHOLD_MS);
    }

    #[test]
    fn test_moderate_delay_is_normal() {
        let mut detector = SlowClientDetector::new();
        detector.on_sync(0, 0);
        assert_eq!(detector.on_sync(10, 11_000), SyncVerdict::Normal);
        assert_eq!(detector.mean_ms(), 500.0);
    }

    #[test]
    fn test_server_ahead_recalibrates() {
        let mut detector = SlowClientDetector::new();
        detector.on_sync(0, 5000);
        assert_eq!(detector.on_sync(10, 9000), SyncVerdict::Normal);
        assert_eq!(detector.on_sync(11, 10_000), SyncVerdict::Normal);
    }
}
