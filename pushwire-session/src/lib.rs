/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! # PushWire Session
//!
//! Session lifecycle for the PushWire push client.
//!
//! This crate provides:
//! - **State machines**: One machine for request/response transports and
//!   one for duplex channels, both free of I/O
//! - **Effects**: Timers, transport operations and notifications returned
//!   as [`Action`]s
//! - **Recovery**: Recovery window, progress reconciliation and retries
//!   with capped exponential backoff
//! - **Heartbeats**: Reverse heartbeat scheduling
//! - **Control requests**: Correlation of requests with server replies

pub mod action;
pub mod backoff;
pub mod clock;
pub mod config;
mod context;
pub mod duplex;
pub mod event;
pub mod guard;
pub mod heartbeat;
pub mod machine;
pub mod pending;
pub mod progress;
pub mod recovery;
pub mod request;
pub mod slowing;

pub use action::{
    Action, ChannelAction, ConnId, ControlAction, Handoff, HandoffReason, HttpAction,
    Notification, RequestOutcome, SessionSnapshot, Timer, TimerKind,
};
pub use backoff::BackoffCounter;
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{CLIENT_ID, SessionConfig, SessionConfigBuilder};
pub use duplex::regions::MainRegion;
pub use duplex::{DuplexSessionMachine, DuplexState, Purpose};
pub use event::{Command, Event, TransportEvent};
pub use guard::{CreationGuard, CreationPermit, SharedCreationGuard};
pub use heartbeat::{HeartbeatTick, HeartbeatTimer, ReverseHeartbeat};
pub use machine::{SessionMachine, new_machine, resume_machine};
pub use pending::{ControlRequest, Dispatch, MessageTag, PendingRequestTable, RequestKind};
pub use progress::{Countable, ProgOutcome, ProgressRegion};
pub use recovery::RecoveryWindow;
pub use request::{RequestPhase, RequestSessionMachine};
pub use slowing::{SlowClientDetector, SyncVerdict};
