/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Common interface of the session machines.

use crate::action::{Action, Handoff};
use crate::clock::SharedClock;
use crate::config::SessionConfig;
use crate::duplex::DuplexSessionMachine;
use crate::event::Event;
use crate::guard::SharedCreationGuard;
use crate::request::RequestSessionMachine;
use pushwire_core::{HighLevelStatus, SessionId, TransportKind};

/// A session machine driven by events.
///
/// Every event is processed to completion before the next; effects are
/// collected with [`SessionMachine::take_actions`].
pub trait SessionMachine: Send + std::fmt::Debug {
    /// Processes one event.
    fn dispatch(&mut self, event: Event);

    /// Drains the actions produced so far.
    fn take_actions(&mut self) -> Vec<Action>;

    /// Returns the high-level status.
    fn status(&self) -> HighLevelStatus;

    /// Returns the transport the machine currently uses.
    fn transport(&self) -> TransportKind;

    /// Returns the current session id.
    fn session_id(&self) -> Option<SessionId>;

    /// Returns the number of countable messages processed.
    fn data_count(&self) -> u64;

    /// Returns true once the session was handed to another machine.
    fn is_handed_off(&self) -> bool;
}

/// Builds a fresh machine for the given transport.
#[must_use]
pub fn new_machine(
    config: SessionConfig,
    transport: TransportKind,
    clock: SharedClock,
    guard: SharedCreationGuard,
) -> Box<dyn SessionMachine> {
    if transport.is_duplex() {
        Box::new(DuplexSessionMachine::new(config, transport, clock, guard))
    } else {
        Box::new(RequestSessionMachine::new(config, transport, clock, guard))
    }
}

/// Builds the machine that continues a handed-off session.
#[must_use]
pub fn resume_machine(
    config: SessionConfig,
    handoff: Handoff,
    clock: SharedClock,
    guard: SharedCreationGuard,
) -> Box<dyn SessionMachine> {
    let Handoff {
        target,
        recover,
        snapshot,
        ..
    } = handoff;
    if target.is_duplex() {
        Box::new(DuplexSessionMachine::resume(
            config, target, clock, guard, snapshot, recover,
        ))
    } else {
        Box::new(RequestSessionMachine::resume(
            config, target, clock, guard, snapshot, recover,
        ))
    }
}
