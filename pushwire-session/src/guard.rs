/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Session creation rate guard.
//!
//! One guard is shared by every machine of a client. It refuses a creation
//! when too many were attempted within a short window, which stops a
//! misbehaving retry loop from hammering the server.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Creations allowed within one window.
pub const DEFAULT_BURST: usize = 5;

/// Length of the window, in milliseconds.
pub const DEFAULT_WINDOW_MS: u64 = 1000;

/// Answer of the guard to a creation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationPermit {
    /// The creation may proceed.
    Granted,
    /// The creation is refused.
    Refused {
        /// Creations already attempted within the window.
        attempts: usize,
        /// Window length in milliseconds.
        window_ms: u64,
    },
}

/// Sliding window of recent creation attempts.
#[derive(Debug, Clone)]
pub struct CreationGuard {
    attempts: VecDeque<u64>,
    burst: usize,
    window_ms: u64,
}

impl CreationGuard {
    /// Creates a guard allowing `burst` creations per `window_ms`.
    #[must_use]
    pub fn new(burst: usize, window_ms: u64) -> Self {
        Self {
            attempts: VecDeque::with_capacity(burst),
            burst,
            window_ms,
        }
    }

    /// Records a creation attempt if the window allows it.
    pub fn try_acquire(&mut self, now: u64) -> CreationPermit {
        while let Some(&oldest) = self.attempts.front() {
            if now.saturating_sub(oldest) >= self.window_ms {
                self.attempts.pop_front();
            } else {
                break;
            }
        }
        if self.attempts.len() >= self.burst {
            return CreationPermit::Refused {
                attempts: self.attempts.len(),
                window_ms: self.window_ms,
            };
        }
        self.attempts.push_back(now);
        CreationPermit::Granted
    }
}

impl Default for CreationGuard {
    fn default() -> Self {
        Self::new(DEFAULT_BURST, DEFAULT_WINDOW_MS)
    }
}

/// Guard handle shared by the machines of one client.
#[derive(Debug, Clone, Default)]
pub struct SharedCreationGuard {
    inner: Arc<Mutex<CreationGuard>>,
}

impl SharedCreationGuard {
    /// Wraps a guard for sharing.
    #[must_use]
    pub fn new(guard: CreationGuard) -> Self {
        Self {
            inner: Arc::new(Mutex::new(guard)),
        }
    }

    /// Records a creation attempt if the window allows it.
    pub fn try_acquire(&self, now: u64) -> CreationPermit {
        self.inner.lock().try_acquire(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_is_refused() {
        let mut guard = CreationGuard::default();
        for i in 0..5 {
            assert_eq!(guard.try_acquire(i * 10), CreationPermit::Granted);
        }
        assert_eq!(
            guard.try_acquire(100),
            CreationPermit::Refused {
                attempts: 5,
                window_ms: 1000
            }
        );
    }

    #[test]
    fn test_window_slides() {
        let mut guard = CreationGuard::new(2, 1000);
        assert_eq!(guard.try_acquire(0), CreationPermit::Granted);
        assert_eq!(guard.try_acquire(500), CreationPermit::Granted);
        assert!(matches!(guard.try_acquire(900), CreationPermit::Refused { .. }));
        assert_eq!(guard.try_acquire(1000), CreationPermit::Granted);
    }

    #[test]
    fn test_shared_guard_counts_across_clones() {
        let guard = SharedCreationGuard::new(CreationGuard::new(1, 1000));
        let other = guard.clone();
        assert_eq!(guard.try_acquire(0), CreationPermit::Granted);
        assert!(matches!(other.try_acquire(1), CreationPermit::Refused { .. }));
    }
}
