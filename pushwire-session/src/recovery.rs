/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Session recovery time window.
//!
//! A window is either idle or recovering. While recovering it remembers when
//! the current recovery run started; the run keeps going across consecutive
//! failed attempts until the configured recovery timeout elapses.

/// Tracks how long the current recovery run has been going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveryWindow {
    started_at: Option<u64>,
}

impl RecoveryWindow {
    /// Creates an idle window.
    #[must_use]
    pub const fn new() -> Self {
        Self { started_at: None }
    }

    /// Derives the window for the next session attempt.
    ///
    /// # Arguments
    /// * `start_recovery` - Whether the next attempt is a recovery attempt
    /// * `prev` - The window of the previous attempt
    /// * `now` - Current time in milliseconds
    #[must_use]
    pub fn next(start_recovery: bool, prev: &Self, now: u64) -> Self {
        match (start_recovery, prev.started_at) {
            (false, _) => Self::new(),
            (true, None) => Self {
                started_at: Some(now),
            },
            (true, Some(started)) => Self {
                started_at: Some(started),
            },
        }
    }

    /// Returns true while a recovery run is in progress.
    #[inline]
    #[must_use]
    pub const fn is_recovering(&self) -> bool {
        self.started_at.is_some()
    }

    /// Returns the start of the current recovery run.
    #[inline]
    #[must_use]
    pub const fn started_at(&self) -> Option<u64> {
        self.started_at
    }

    /// Ends the recovery run after the session was recovered.
    pub fn restore_time_left(&mut self) {
        self.started_at = None;
    }

    /// Returns the milliseconds left before recovery gives up.
    ///
    /// An idle window reports the full `max_ms`. The result may be negative
    /// once the timeout has elapsed.
    ///
    /// # Arguments
    /// * `max_ms` - The session recovery timeout
    /// * `now` - Current time in milliseconds
    #[must_use]
    pub fn time_left(&self, max_ms: u64, now: u64) -> i64 {
        let max = i64::try_from(max_ms).unwrap_or(i64::MAX);
        match self.started_at {
            None => max,
            Some(started) => {
                let elapsed = i64::try_from(now.saturating_sub(started)).unwrap_or(i64::MAX);
                max.saturating_sub(elapsed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_transition_table() {
        let idle = RecoveryWindow::new();
        let running = RecoveryWindow::next(true, &idle, 1000);
        assert_eq!(running.started_at(), Some(1000));

        let again = RecoveryWindow::next(true, &running, 5000);
        assert_eq!(again.started_at(), Some(1000));

        assert!(!RecoveryWindow::next(false, &running, 5000).is_recovering());
        assert!(!RecoveryWindow::next(false, &idle, 5000).is_recovering());
    }

    #[test]
    fn test_time_left() {
        let idle = RecoveryWindow::new();
        assert_eq!(idle.time_left(15_000, 99_999), 15_000);

        let running = RecoveryWindow::next(true, &idle, 1000);
        assert_eq!(running.time_left(15_000, 1000), 15_000);
        assert_eq!(running.time_left(15_000, 11_000), 5000);
        assert_eq!(running.time_left(15_000, 17_000), -1000);
    }

    #[test]
    fn test_restore_time_left() {
        let mut window = RecoveryWindow::next(true, &RecoveryWindow::new(), 10);
        window.restore_time_left();
        assert!(!window.is_recovering());
        assert_eq!(window.time_left(500, 1_000_000), 500);
    }
}
