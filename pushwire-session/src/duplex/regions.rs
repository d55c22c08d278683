/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Regions of a streaming duplex session.
//!
//! While streaming, the session runs independent regions side by side: the
//! main region tracks stream health and pending transport changes, the
//! slowing region measures read delay, and the progress region reconciles
//! countable messages. The reverse heartbeat region lives in the session
//! context because its configuration outlives a single bind.

use crate::progress::ProgressRegion;
use crate::slowing::SlowClientDetector;
use pushwire_core::TransportKind;

/// Main region of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainRegion {
    /// Data flowing.
    Receiving,
    /// Silence beyond the keepalive.
    Stalling,
    /// Silence beyond the stalled timeout.
    Stalled,
    /// Waiting for the rebind that completes a transport switch.
    Switching {
        /// Transport to switch to.
        target: TransportKind,
    },
    /// Waiting for the rebind that moves a slow client to polling.
    Slowing,
}

impl MainRegion {
    /// Returns true when no transport change is in progress.
    #[must_use]
    pub const fn is_steady(self) -> bool {
        matches!(self, Self::Receiving | Self::Stalling | Self::Stalled)
    }
}

/// Regions that exist only while streaming.
#[derive(Debug, Clone)]
pub struct StreamingRegions {
    /// Stream health and transport changes.
    pub main: MainRegion,
    /// Read delay measurement.
    pub slowing: SlowClientDetector,
    /// Countable reconciliation.
    pub progress: ProgressRegion,
}

impl StreamingRegions {
    /// Enters the regions after a successful create or bind.
    #[must_use]
    pub fn new(recovering: bool, data_count: u64) -> Self {
        Self {
            main: MainRegion::Receiving,
            slowing: SlowClientDetector::new(),
            progress: ProgressRegion::on_bind(recovering, data_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regions_start_receiving() {
        let regions = StreamingRegions::new(false, 4);
        assert_eq!(regions.main, MainRegion::Receiving);
        assert!(!regions.progress.is_unconfirmed());
        assert!(StreamingRegions::new(true, 4).progress.is_unconfirmed());
    }

    #[test]
    fn test_steady_states() {
        assert!(MainRegion::Stalled.is_steady());
        assert!(!MainRegion::Slowing.is_steady());
        assert!(
            !MainRegion::Switching {
                target: TransportKind::HttpPolling
            }
            .is_steady()
        );
    }
}
