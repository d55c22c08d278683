/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Control batch encoder.
//!
//! An outbound request is the operation name, a line terminator, and the
//! `&`-joined `LS_`-prefixed parameters:
//!
//! ```text
//! control\r\nLS_reqId=3&LS_op=add&LS_subId=1
//! ```

use crate::message::Operation;
use crate::percent;
use std::borrow::Cow;

/// Line terminator between the operation name and its parameters.
pub const LINE_END: &str = "\r\n";

/// Parameter names used by the session engine.
pub mod params {
    /// Correlation identifier of a control request.
    pub const REQ_ID: &str = "LS_reqId";
    /// Control operation.
    pub const OP: &str = "LS_op";
    /// Session identifier.
    pub const SESSION: &str = "LS_session";
    /// Client identifier.
    pub const CID: &str = "LS_cid";
    /// Adapter set name.
    pub const ADAPTER_SET: &str = "LS_adapter_set";
    /// User name.
    pub const USER: &str = "LS_user";
    /// Password.
    pub const PASSWORD: &str = "LS_password";
    /// Requested maximum bandwidth.
    pub const REQUESTED_MAX_BANDWIDTH: &str = "LS_requested_max_bandwidth";
    /// Requested keepalive interval.
    pub const KEEPALIVE_MILLIS: &str = "LS_keepalive_millis";
    /// Maximum interval between reverse heartbeats the server may expect.
    pub const INACTIVITY_MILLIS: &str = "LS_inactivity_millis";
    /// Polling mode flag.
    pub const POLLING: &str = "LS_polling";
    /// Polling interval.
    pub const POLLING_MILLIS: &str = "LS_polling_millis";
    /// Idle time the server may wait for data in polling mode.
    pub const IDLE_MILLIS: &str = "LS_idle_millis";
    /// Streaming response content length.
    pub const CONTENT_LENGTH: &str = "LS_content_length";
    /// Whether the server should send `SYNC` notifications.
    pub const SEND_SYNC: &str = "LS_send_sync";
    /// Session time-to-live hint after a server-busy refusal.
    pub const TTL_MILLIS: &str = "LS_ttl_millis";
    /// Previous session identifier on a plain retry.
    pub const OLD_SESSION: &str = "LS_old_session";
    /// Progressive to resume from on recovery.
    pub const RECOVERY_FROM: &str = "LS_recovery_from";
    /// Cause of a forced rebind.
    pub const CAUSE: &str = "LS_cause";
    /// Subscription identifier.
    pub const SUB_ID: &str = "LS_subId";
    /// Client message text.
    pub const MESSAGE: &str = "LS_message";
    /// Client message sequence.
    pub const SEQUENCE: &str = "LS_sequence";
    /// Client message progressive.
    pub const MSG_PROG: &str = "LS_msg_prog";
    /// Whether a message outcome is requested.
    pub const OUTCOME: &str = "LS_outcome";
    /// Whether a message acknowledgement is requested.
    pub const ACK: &str = "LS_ack";
    /// Maximum delay before a message may be processed out of order.
    pub const MAX_WAIT: &str = "LS_max_wait";
    /// Log line forwarded to the server.
    pub const LOG: &str = "LS_log1";
}

/// Builder for an outbound control batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlBatch {
    /// Operation the batch performs.
    op: Operation,
    /// Encoded `name=value&name=value` parameters.
    body: String,
}

impl ControlBatch {
    /// Creates an empty batch for the given operation.
    #[must_use]
    pub fn new(op: Operation) -> Self {
        Self {
            op,
            body: String::with_capacity(128),
        }
    }

    /// Appends a parameter with a string value, percent-encoding it.
    ///
    /// # Arguments
    /// * `name` - The parameter name (see [`params`])
    /// * `value` - The unencoded value
    #[inline]
    pub fn put_str(&mut self, name: &str, value: &str) {
        self.put_raw(name, &percent::encode(value));
    }

    /// Appends a parameter with an unsigned integer value.
    #[inline]
    pub fn put_uint(&mut self, name: &str, value: u64) {
        let mut buf = itoa::Buffer::new();
        let s = buf.format(value);
        self.put_raw(name, s);
    }

    /// Appends a parameter with a boolean value (`true`/`false`).
    #[inline]
    pub fn put_bool(&mut self, name: &str, value: bool) {
        self.put_raw(name, if value { "true" } else { "false" });
    }

    #[inline]
    fn put_raw(&mut self, name: &str, value: &str) {
        if !self.body.is_empty() {
            self.body.push('&');
        }
        self.body.push_str(name);
        self.body.push('=');
        self.body.push_str(value);
    }

    /// Returns the operation.
    #[inline]
    #[must_use]
    pub const fn operation(&self) -> Operation {
        self.op
    }

    /// Returns the encoded parameter section.
    #[inline]
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Returns the decoded value of the first parameter with the given name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<Cow<'_, str>> {
        self.body
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(n, _)| *n == name)
            .and_then(|(_, v)| percent::decode(v).ok())
    }

    /// Returns true if the batch carries the given parameter.
    #[must_use]
    pub fn has_param(&self, name: &str) -> bool {
        self.param(name).is_some()
    }

    /// Returns the complete batch text ready to be written.
    #[must_use]
    pub fn finish(&self) -> String {
        let mut out = String::with_capacity(self.op.as_str().len() + 2 + self.body.len());
        out.push_str(self.op.as_str());
        out.push_str(LINE_END);
        out.push_str(&self.body);
        out
    }

    /// Returns the encoded length, checked against the server request limit.
    #[inline]
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.op.as_str().len() + LINE_END.len() + self.body.len()
    }
}
