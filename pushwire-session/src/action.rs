/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Effects requested by the session machines.
//!
//! Machines never perform I/O. Each dispatch appends [`Action`]s to an
//! outbox that the driver drains and executes.

use crate::pending::{ControlRequest, RequestKind};
use crate::recovery::RecoveryWindow;
use pushwire_core::{Bandwidth, HighLevelStatus, ReqId, SessionError, SessionId, TransportKind};
use pushwire_protocol::{ControlBatch, ServerMessage};
use std::fmt;

/// Generation of a transport connection.
///
/// Every connection a machine opens gets a fresh id; callbacks carrying an
/// older id are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Purpose of a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// No answer to a connection, creation or bind attempt.
    ConnectTimeout,
    /// Silence on a receiving stream.
    KeepaliveCheck,
    /// Silence on a stalling stream.
    StalledCheck,
    /// Silence on a stalled stream.
    ReconnectCheck,
    /// Pause between two binds.
    Pause,
    /// Backoff before the next creation or recovery attempt.
    Retry,
    /// A transport switch took too long.
    SwitchTimeout,
    /// Reverse heartbeat check.
    Heartbeat {
        /// Heartbeat phase the check belongs to.
        phase: u64,
    },
}

/// A timer to be scheduled by the driver and fed back when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    /// Purpose of the timer.
    pub kind: TimerKind,
    /// Delay in milliseconds.
    pub delay_ms: u64,
    /// Phase epoch captured when the timer was scheduled.
    pub epoch: u64,
}

/// Request/response transport effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpAction {
    /// Open a streaming or polling request.
    Open {
        /// Connection generation.
        conn: ConnId,
        /// Server address to post to.
        address: String,
        /// Request body.
        batch: ControlBatch,
    },
    /// Abort a request.
    Close {
        /// Connection generation.
        conn: ConnId,
    },
}

/// Duplex channel effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelAction {
    /// Open a channel.
    Open {
        /// Connection generation.
        conn: ConnId,
        /// Server address.
        address: String,
    },
    /// Write a batch on an open channel.
    Send {
        /// Connection generation.
        conn: ConnId,
        /// Batch to write.
        batch: ControlBatch,
    },
    /// Close a channel.
    Close {
        /// Connection generation.
        conn: ConnId,
    },
}

/// Control link effects of the request/response transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    /// Post a control request.
    Send {
        /// Control link address.
        address: String,
        /// Request body.
        batch: ControlBatch,
        /// Correlated request id, if any.
        req_id: Option<ReqId>,
    },
}

/// Outcome of a control request.
///
/// Requests that expect no reply succeed as soon as they are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Accepted by the server.
    Ok,
    /// Refused by the server.
    Err {
        /// Server error code.
        code: i32,
        /// Server error message.
        message: String,
    },
    /// Dropped because the session went away.
    Aborted,
}

/// Why a machine hands its session over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffReason {
    /// A transport switch was requested.
    Switch,
    /// The client is slow and moves to polling.
    Slow,
    /// The preferred transport is not viable.
    StreamSense,
}

/// Session state carried from one machine to the next.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Session id, if a session exists.
    pub session_id: Option<SessionId>,
    /// Server address, possibly replaced by a control link.
    pub server_address: String,
    /// Bandwidth granted by the server.
    pub bandwidth: Option<Bandwidth>,
    /// Requested bandwidth.
    pub requested_bandwidth: Bandwidth,
    /// Countable messages processed.
    pub data_count: u64,
    /// Recovery window of the session.
    pub recovery: RecoveryWindow,
    /// Whether recovery was disabled after a sync error.
    pub recovery_disabled: bool,
    /// Requested reverse heartbeat interval.
    pub reverse_heartbeat_ms: u64,
    /// Requests not yet written.
    pub waiting: Vec<ControlRequest>,
}

/// Hand-off of a session to a machine of another transport.
#[derive(Debug, Clone)]
pub struct Handoff {
    /// Transport the next machine must use.
    pub target: TransportKind,
    /// Why the hand-off happened.
    pub reason: HandoffReason,
    /// Whether the next machine must bind in recovery mode.
    pub recover: bool,
    /// Carried session state.
    pub snapshot: SessionSnapshot,
}

/// Event reported to the client layer.
#[derive(Debug, Clone)]
pub enum Notification {
    /// The high-level status changed.
    StatusChanged(HighLevelStatus),
    /// A session was created.
    SessionCreated {
        /// Session id.
        session_id: SessionId,
        /// Keepalive interval agreed by the server.
        keepalive_ms: u64,
        /// Maximum control request length.
        request_limit: u64,
    },
    /// A broken session was recovered.
    SessionRecovered {
        /// Session id.
        session_id: SessionId,
    },
    /// Server instance name.
    ServerName(String),
    /// Client address as seen by the server.
    ClientIp(String),
    /// Bandwidth granted by the server.
    BandwidthGranted(Bandwidth),
    /// Data to deliver to collaborators.
    Data(ServerMessage),
    /// A correlated request was resolved.
    RequestOutcome {
        /// Request id.
        req_id: ReqId,
        /// Request category.
        kind: RequestKind,
        /// Outcome.
        outcome: RequestOutcome,
    },
    /// A message request was written.
    MessageSent {
        /// Message sequence.
        sequence: String,
        /// Progressive within the sequence.
        prog: u64,
    },
    /// The session ended for good.
    Failed(SessionError),
    /// The session moves to another transport.
    Handoff(Box<Handoff>),
}

/// Effect requested by a machine.
#[derive(Debug, Clone)]
pub enum Action {
    /// Schedule a timer.
    Schedule(Timer),
    /// Request/response transport effect.
    Http(HttpAction),
    /// Duplex channel effect.
    Channel(ChannelAction),
    /// Control link effect.
    Control(ControlAction),
    /// Notify the client layer.
    Notify(Notification),
}
