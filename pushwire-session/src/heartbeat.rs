/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Reverse heartbeat scheduling.
//!
//! The client promises the server, at bind time, to write at least once per
//! interval. This module decides when a heartbeat must be written:
//! - The effective interval honours both the user request and the promise
//! - Any control request written on the session counts as a heartbeat
//! - Each scheduled check carries a phase; changing the interval or losing
//!   the bind invalidates outstanding checks

/// A heartbeat check to be scheduled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatTimer {
    /// Phase the check belongs to.
    pub phase: u64,
    /// Delay before the check fires, in milliseconds.
    pub delay_ms: u64,
}

/// Outcome of a fired heartbeat check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatTick {
    /// The check belongs to an old phase or the scheduler is not armed.
    Stale,
    /// A heartbeat must be written now; the next check is scheduled.
    Send(HeartbeatTimer),
    /// Traffic was written recently; the next check is scheduled.
    Wait(HeartbeatTimer),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Unbound,
    Bound { last_sent: u64, armed: bool },
    Closed,
}

/// Reverse heartbeat scheduler.
#[derive(Debug, Clone)]
pub struct ReverseHeartbeat {
    /// Interval requested by the user, 0 for none.
    requested_ms: u64,
    /// Interval promised to the server, 0 for no promise.
    max_interval_ms: u64,
    /// Effective interval, 0 when disabled.
    current_ms: u64,
    phase: u64,
    binding: Binding,
}

impl ReverseHeartbeat {
    /// Creates an unbound scheduler.
    ///
    /// # Arguments
    /// * `requested_ms` - Interval requested by the user, 0 for none
    /// * `max_interval_ms` - Interval promised to the server, 0 for none
    #[must_use]
    pub fn new(requested_ms: u64, max_interval_ms: u64) -> Self {
        Self {
            requested_ms,
            max_interval_ms,
            current_ms: effective_interval(requested_ms, max_interval_ms),
            phase: 0,
            binding: Binding::Unbound,
        }
    }

    /// Returns the effective interval in milliseconds, 0 when disabled.
    #[inline]
    #[must_use]
    pub const fn interval_ms(&self) -> u64 {
        self.current_ms
    }

    /// Returns the interval requested by the user.
    #[inline]
    #[must_use]
    pub const fn requested_ms(&self) -> u64 {
        self.requested_ms
    }

    /// Returns the interval promised to the server.
    #[inline]
    #[must_use]
    pub const fn max_interval_ms(&self) -> u64 {
        self.max_interval_ms
    }

    /// Returns the current phase.
    #[inline]
    #[must_use]
    pub const fn phase(&self) -> u64 {
        self.phase
    }

    /// Returns true once the scheduler has been closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.binding == Binding::Closed
    }

    /// Returns true while a check chain is running.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        matches!(self.binding, Binding::Bound { armed: true, .. })
    }

    /// Records a successful bind and arms the first check if enabled.
    ///
    /// A bind while the check chain is running counts as traffic and keeps
    /// the chain.
    pub fn on_bind(&mut self, now: u64) -> Option<HeartbeatTimer> {
        if self.is_closed() {
            return None;
        }
        if let Binding::Bound {
            last_sent,
            armed: true,
        } = &mut self.binding
        {
            *last_sent = now;
            return None;
        }
        self.binding = Binding::Bound {
            last_sent: now,
            armed: false,
        };
        self.phase += 1;
        self.reschedule(now)
    }

    /// Records the loss of the bind; outstanding checks become stale.
    pub fn on_unbind(&mut self) {
        if !self.is_closed() {
            self.binding = Binding::Unbound;
        }
        self.phase += 1;
    }

    /// Records that a control request was written.
    #[inline]
    pub fn on_control_sent(&mut self, now: u64) {
        if let Binding::Bound { last_sent, .. } = &mut self.binding {
            *last_sent = now;
        }
    }

    /// Handles a fired check.
    ///
    /// # Arguments
    /// * `phase` - Phase carried by the fired check
    /// * `now` - Current time in milliseconds
    pub fn on_timer(&mut self, phase: u64, now: u64) -> HeartbeatTick {
        if phase != self.phase || self.current_ms == 0 {
            return HeartbeatTick::Stale;
        }
        let Binding::Bound {
            last_sent,
            armed: true,
        } = &mut self.binding
        else {
            return HeartbeatTick::Stale;
        };
        let elapsed = now.saturating_sub(*last_sent);
        if elapsed >= self.current_ms {
            *last_sent = now;
            HeartbeatTick::Send(HeartbeatTimer {
                phase,
                delay_ms: self.current_ms,
            })
        } else {
            HeartbeatTick::Wait(HeartbeatTimer {
                phase,
                delay_ms: self.current_ms - elapsed,
            })
        }
    }

    /// Changes the user requested interval.
    ///
    /// Returns a replacement check when the effective interval changed while
    /// bound.
    pub fn set_requested(&mut self, requested_ms: u64, now: u64) -> Option<HeartbeatTimer> {
        self.requested_ms = requested_ms;
        self.refresh(now)
    }

    /// Changes the interval promised to the server.
    pub fn set_max(&mut self, max_interval_ms: u64, now: u64) -> Option<HeartbeatTimer> {
        self.max_interval_ms = max_interval_ms;
        self.refresh(now)
    }

    /// Disables scheduling for good.
    pub fn close(&mut self) {
        self.binding = Binding::Closed;
        self.phase += 1;
    }

    fn refresh(&mut self, now: u64) -> Option<HeartbeatTimer> {
        let current = effective_interval(self.requested_ms, self.max_interval_ms);
        if current == self.current_ms {
            return None;
        }
        self.current_ms = current;
        if matches!(self.binding, Binding::Bound { .. }) {
            self.phase += 1;
            self.reschedule(now)
        } else {
            None
        }
    }

    fn reschedule(&mut self, now: u64) -> Option<HeartbeatTimer> {
        let current = self.current_ms;
        let phase = self.phase;
        let Binding::Bound { last_sent, armed } = &mut self.binding else {
            return None;
        };
        if current == 0 {
            *armed = false;
            return None;
        }
        *armed = true;
        let elapsed = now.saturating_sub(*last_sent);
        Some(HeartbeatTimer {
            phase,
            delay_ms: current.saturating_sub(elapsed),
        })
    }
}

fn effective_interval(requested_ms: u64, max_interval_ms: u64) -> u64 {
    match (requested_ms, max_interval_ms) {
        (requested, 0) => requested,
        (0, max) => max,
        (requested, max) => requested.min(max),
    }
}
