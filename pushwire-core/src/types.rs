/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Core types for push session operations.
//!
//! This module provides fundamental types used throughout the PushWire engine:
//! - [`SessionId`]: Server-issued opaque session identifier
//! - [`ReqId`]: Correlation identifier of a control request
//! - [`TransportKind`]: Transport and connection mode a session runs over
//! - [`Bandwidth`]: Requested or granted bandwidth
//! - [`HighLevelStatus`]: Protocol-level status strings exposed to listeners

use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length for session identifiers in bytes.
pub const SESSION_ID_MAX_LEN: usize = 64;

/// Opaque session identifier issued by the server on creation.
///
/// The identifier persists across binds and recoveries of the same logical
/// session and is copied into the next machine instance on a transport switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct SessionId(ArrayString<SESSION_ID_MAX_LEN>);

impl SessionId {
    /// Creates a new session identifier from a string slice.
    ///
    /// # Arguments
    /// * `s` - The identifier as received in `CONOK`
    ///
    /// # Returns
    /// `Some(SessionId)` if the string is non-empty and fits within the
    /// maximum length, `None` otherwise.
    #[must_use]
    pub fn new(s: &str) -> Option<Self> {
        if s.is_empty() {
            return None;
        }
        ArrayString::from(s).ok().map(Self)
    }

    /// Returns the identifier as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = arrayvec::CapacityError<()>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s).ok_or_else(|| arrayvec::CapacityError::new(()))
    }
}

/// Control request correlation identifier (`LS_reqId`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ReqId(u64);

impl ReqId {
    /// Creates a new request identifier.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw identifier value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for ReqId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ReqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport and connection mode a session runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum TransportKind {
    /// Full-duplex channel, streaming mode.
    WsStreaming,
    /// Full-duplex channel, polling mode.
    WsPolling,
    /// Request/response transport, streaming mode.
    HttpStreaming,
    /// Request/response transport, polling mode.
    HttpPolling,
}

impl TransportKind {
    /// Returns true if the transport is the full-duplex channel.
    #[must_use]
    pub const fn is_duplex(self) -> bool {
        matches!(self, Self::WsStreaming | Self::WsPolling)
    }

    /// Returns true if the transport runs in polling mode.
    #[must_use]
    pub const fn is_polling(self) -> bool {
        matches!(self, Self::WsPolling | Self::HttpPolling)
    }

    /// Returns the status suffix used in `CONNECTED:*` strings.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WsStreaming => "WS-STREAMING",
            Self::WsPolling => "WS-POLLING",
            Self::HttpStreaming => "HTTP-STREAMING",
            Self::HttpPolling => "HTTP-POLLING",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested or granted bandwidth, in kilobits per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum Bandwidth {
    /// No client-side limit.
    #[default]
    Unlimited,
    /// Limited to the given kbps.
    Limited(f64),
    /// Bandwidth is not managed by the server (grant only).
    Unmanaged,
}

impl Bandwidth {
    /// Parses the value of a `CONS` notification.
    ///
    /// # Returns
    /// `None` if the token is neither a keyword nor a number.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "unlimited" => Some(Self::Unlimited),
            "unmanaged" => Some(Self::Unmanaged),
            other => other.parse::<f64>().ok().map(Self::Limited),
        }
    }

    /// Returns the value to send as `LS_requested_max_bandwidth`.
    #[must_use]
    pub fn to_param(self) -> String {
        match self {
            Self::Limited(kbps) => kbps.to_string(),
            Self::Unlimited | Self::Unmanaged => "unlimited".to_string(),
        }
    }
}

/// Protocol-level status exposed through `getHighLevelStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HighLevelStatus {
    /// A session is being created.
    Connecting,
    /// Connected, still sensing which transport is viable.
    StreamSensing,
    /// Connected over the given transport.
    Connected(TransportKind),
    /// Connected but no data nor keepalive received recently.
    Stalled,
    /// Disconnected, a new session will be attempted.
    WillRetry,
    /// Disconnected, the previous session is being recovered.
    TryingRecovery,
    /// Disconnected, no further attempts.
    Disconnected,
}

impl HighLevelStatus {
    /// Returns the status string defined by the protocol.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING",
            Self::StreamSensing => "CONNECTED:STREAM-SENSING",
            Self::Connected(TransportKind::WsStreaming) => "CONNECTED:WS-STREAMING",
            Self::Connected(TransportKind::WsPolling) => "CONNECTED:WS-POLLING",
            Self::Connected(TransportKind::HttpStreaming) => "CONNECTED:HTTP-STREAMING",
            Self::Connected(TransportKind::HttpPolling) => "CONNECTED:HTTP-POLLING",
            Self::Stalled => "STALLED",
            Self::WillRetry => "DISCONNECTED:WILL-RETRY",
            Self::TryingRecovery => "DISCONNECTED:TRYING-RECOVERY",
            Self::Disconnected => "DISCONNECTED",
        }
    }

    /// Returns true for any of the `CONNECTED:*` statuses.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::StreamSensing | Self::Connected(_))
    }
}

impl fmt::Display for HighLevelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
