/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Inputs of the session machines.

use crate::action::{ConnId, Timer};
use crate::pending::ControlRequest;
use pushwire_core::{Bandwidth, ReqId, TransportKind};
use std::time::Duration;

/// Request from the client layer.
#[derive(Debug, Clone)]
pub enum Command {
    /// Create a new session.
    CreateSession,
    /// Bind to the session carried by a hand-off.
    BindSession,
    /// Close the session.
    CloseSession,
    /// Move the session to another transport.
    RequestSwitch(TransportKind),
    /// Slow the session down by moving to polling.
    RequestSlow,
    /// Change the requested bandwidth.
    ChangeBandwidth(Bandwidth),
    /// Change the reverse heartbeat interval.
    ChangeReverseHeartbeat(Duration),
    /// Write a control request.
    Send(ControlRequest),
}

/// Callback from a transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A duplex channel is open.
    Opened {
        /// Connection generation.
        conn: ConnId,
    },
    /// Data arrived on a stream or channel.
    Received {
        /// Connection generation.
        conn: ConnId,
        /// One or more `\r\n` terminated lines.
        frame: String,
    },
    /// The stream or channel ended.
    Ended {
        /// Connection generation.
        conn: ConnId,
    },
    /// The stream or channel failed.
    Failed {
        /// Connection generation.
        conn: ConnId,
        /// Failure description.
        reason: String,
    },
    /// Response to a control request.
    ControlReply {
        /// Response body.
        frame: String,
    },
    /// A control request failed.
    ControlFailed {
        /// Correlated request id, if any.
        req_id: Option<ReqId>,
        /// Failure description.
        reason: String,
    },
}

/// Input of a session machine.
#[derive(Debug, Clone)]
pub enum Event {
    /// Client layer request.
    Command(Command),
    /// Transport callback.
    Transport(TransportEvent),
    /// Fired timer.
    Timer(Timer),
}

impl From<Command> for Event {
    fn from(command: Command) -> Self {
        Self::Command(command)
    }
}

impl From<TransportEvent> for Event {
    fn from(event: TransportEvent) -> Self {
        Self::Transport(event)
    }
}

impl From<Timer> for Event {
    fn from(timer: Timer) -> Self {
        Self::Timer(timer)
    }
}
