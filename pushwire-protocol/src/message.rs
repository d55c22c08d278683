/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Protocol message types.
//!
//! This module provides:
//! - [`Operation`]: Outbound request operation names
//! - [`ServerMessage`]: Decoded inbound server lines
//! - [`ConOk`]: Payload of a successful session creation or bind

use pushwire_core::types::{Bandwidth, ReqId, SessionId};
use std::fmt;

/// Outbound request operation, sent as the first line of a control batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Subscription, reconfiguration, constrain, destroy and MPN requests.
    Control,
    /// Creation of a new session.
    CreateSession,
    /// Bind of a connection to an existing session.
    BindSession,
    /// Client message.
    Msg,
    /// Client log forwarding.
    SendLog,
    /// Reverse heartbeat.
    Heartbeat,
    /// Channel-level readiness probe.
    Wsok,
}

impl Operation {
    /// Returns the operation name as sent on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::CreateSession => "create_session",
            Self::BindSession => "bind_session",
            Self::Msg => "msg",
            Self::SendLog => "send_log",
            Self::Heartbeat => "heartbeat",
            Self::Wsok => "wsok",
        }
    }

    /// Parses an operation name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "control" => Some(Self::Control),
            "create_session" => Some(Self::CreateSession),
            "bind_session" => Some(Self::BindSession),
            "msg" => Some(Self::Msg),
            "send_log" => Some(Self::SendLog),
            "heartbeat" => Some(Self::Heartbeat),
            "wsok" => Some(Self::Wsok),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of `CONOK`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConOk {
    /// Session identifier.
    pub session_id: SessionId,
    /// Maximum length of a control request accepted by the server.
    pub request_limit: u64,
    /// Keepalive interval agreed by the server, in milliseconds.
    pub keepalive_ms: u64,
    /// Address to use for control requests and rebinds, if it differs.
    pub control_link: Option<String>,
}

/// A decoded inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Session created or bound.
    ConOk(ConOk),
    /// Session creation or bind refused.
    ConErr {
        /// Cause code.
        code: i32,
        /// Server text.
        message: String,
    },
    /// Control request accepted.
    ReqOk {
        /// Correlated request.
        req_id: ReqId,
    },
    /// Control request refused.
    ReqErr {
        /// Correlated request.
        req_id: ReqId,
        /// Cause code.
        code: i32,
        /// Server text.
        message: String,
    },
    /// Generic error not tied to a request.
    Error {
        /// Cause code.
        code: i32,
        /// Server text.
        message: String,
    },
    /// Subscription activated.
    SubOk {
        /// Subscription identifier.
        sub_id: u64,
        /// Number of items.
        items: u64,
        /// Number of fields.
        fields: u64,
    },
    /// Subscription in command mode activated.
    SubCmd {
        /// Subscription identifier.
        sub_id: u64,
        /// Number of items.
        items: u64,
        /// Number of fields.
        fields: u64,
        /// Position of the key field.
        key_pos: u64,
        /// Position of the command field.
        command_pos: u64,
    },
    /// Real-time update; values are left encoded for the field updaters.
    Update {
        /// Subscription identifier.
        sub_id: u64,
        /// Item index.
        item: u64,
        /// Raw `|`-separated values.
        values: String,
    },
    /// Subscription deactivated.
    Unsub {
        /// Subscription identifier.
        sub_id: u64,
    },
    /// End of snapshot.
    Eos {
        /// Subscription identifier.
        sub_id: u64,
        /// Item index.
        item: u64,
    },
    /// Clear snapshot.
    Cs {
        /// Subscription identifier.
        sub_id: u64,
        /// Item index.
        item: u64,
    },
    /// Updates lost due to buffer overflow.
    Ov {
        /// Subscription identifier.
        sub_id: u64,
        /// Item index.
        item: u64,
        /// Number of lost updates.
        lost: u64,
    },
    /// Subscription frequency reconfigured.
    Conf {
        /// Subscription identifier.
        sub_id: u64,
        /// Frequency granted, as sent by the server.
        frequency: String,
    },
    /// Bandwidth granted.
    Cons(Bandwidth),
    /// Server instance name.
    ServName(String),
    /// Client address as seen by the server.
    ClientIp(String),
    /// Connection probe.
    Probe,
    /// Filler line, carries no information.
    Noop,
    /// The server asks the client to rebind after the given delay.
    Loop {
        /// Suggested delay before rebinding, in milliseconds.
        delay_ms: u64,
    },
    /// Server clock reference for slow-client detection.
    Sync {
        /// Seconds elapsed on the server since the stream began.
        seconds: u64,
    },
    /// Progressive of data notifications sent so far in the session.
    Prog {
        /// Progressive count.
        count: u64,
    },
    /// Session closed by the server.
    End {
        /// Cause code.
        code: i32,
        /// Server text.
        message: String,
    },
    /// Client message processed.
    MsgDone {
        /// Message sequence name.
        sequence: String,
        /// Message progressive within the sequence.
        prog: u64,
        /// Response supplied by the Metadata Adapter.
        response: String,
    },
    /// Client message refused or failed.
    MsgFail {
        /// Message sequence name.
        sequence: String,
        /// Message progressive within the sequence.
        prog: u64,
        /// Cause code.
        code: i32,
        /// Server text.
        message: String,
    },
    /// Push notification device registered.
    MpnReg {
        /// Device identifier.
        device_id: String,
        /// Adapter name.
        adapter_name: String,
    },
    /// Push notification subscription activated.
    MpnOk {
        /// Subscription identifier.
        sub_id: u64,
        /// Push notification subscription identifier.
        pn_sub_id: String,
    },
    /// Push notification subscription deleted.
    MpnDel {
        /// Push notification subscription identifier.
        pn_sub_id: String,
    },
    /// Channel-level readiness confirmation.
    WsOk,
}

impl ServerMessage {
    /// Returns the message type token.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ConOk(_) => "CONOK",
            Self::ConErr { .. } => "CONERR",
            Self::ReqOk { .. } => "REQOK",
            Self::ReqErr { .. } => "REQERR",
            Self::Error { .. } => "ERROR",
            Self::SubOk { .. } => "SUBOK",
            Self::SubCmd { .. } => "SUBCMD",
            Self::Update { .. } => "U",
            Self::Unsub { .. } => "UNSUB",
            Self::Eos { .. } => "EOS",
            Self::Cs { .. } => "CS",
            Self::Ov { .. } => "OV",
            Self::Conf { .. } => "CONF",
            Self::Cons(_) => "CONS",
            Self::ServName(_) => "SERVNAME",
            Self::ClientIp(_) => "CLIENTIP",
            Self::Probe => "PROBE",
            Self::Noop => "NOOP",
            Self::Loop { .. } => "LOOP",
            Self::Sync { .. } => "SYNC",
            Self::Prog { .. } => "PROG",
            Self::End { .. } => "END",
            Self::MsgDone { .. } => "MSGDONE",
            Self::MsgFail { .. } => "MSGFAIL",
            Self::MpnReg { .. } => "MPNREG",
            Self::MpnOk { .. } => "MPNOK",
            Self::MpnDel { .. } => "MPNDEL",
            Self::WsOk => "WSOK",
        }
    }

    /// Returns true if the message counts towards the session progressive.
    ///
    /// Countable messages are the ones the server replays on recovery; they
    /// are the only ones subject to duplicate skipping.
    #[must_use]
    pub const fn is_countable(&self) -> bool {
        matches!(
            self,
            Self::SubOk { .. }
                | Self::SubCmd { .. }
                | Self::Update { .. }
                | Self::Unsub { .. }
                | Self::Eos { .. }
                | Self::Cs { .. }
                | Self::Ov { .. }
                | Self::Conf { .. }
                | Self::MsgDone { .. }
                | Self::MsgFail { .. }
                | Self::MpnReg { .. }
                | Self::MpnOk { .. }
                | Self::MpnDel { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names() {
        for op in [
            Operation::Control,
            Operation::CreateSession,
            Operation::BindSession,
            Operation::Msg,
            Operation::SendLog,
            Operation::Heartbeat,
            Operation::Wsok,
        ] {
            assert_eq!(Operation::from_name(op.as_str()), Some(op));
        }
        assert_eq!(Operation::from_name("destroy"), None);
    }

    #[test]
    fn test_countable() {
        let update = ServerMessage::Update {
            sub_id: 1,
            item: 1,
            values: "a|b".to_string(),
        };
        assert!(update.is_countable());
        assert!(!ServerMessage::Noop.is_countable());
        assert!(!ServerMessage::Prog { count: 3 }.is_countable());
        assert!(!ServerMessage::ReqOk { req_id: ReqId::new(1) }.is_countable());
    }
}
