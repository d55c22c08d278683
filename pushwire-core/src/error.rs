/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Error types for the PushWire session engine.
//!
//! This module provides a unified error hierarchy using `thiserror` for typed,
//! domain-specific errors across wire decoding, configuration and
//! session lifecycle operations.

use thiserror::Error;

/// Result type alias using [`PushError`] as the error type.
pub type Result<T> = std::result::Result<T, PushError>;

/// Top-level error type for all PushWire operations.
#[derive(Debug, Error)]
pub enum PushError {
    /// Error while decoding an inbound server line.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Error in session lifecycle operations.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error from the underlying transport.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that occur while decoding inbound protocol lines.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The line carried no tokens at all.
    #[error("empty line")]
    Empty,

    /// The first token is not a known message type.
    #[error("unknown message type: {0}")]
    UnknownMessage(String),

    /// A mandatory token is missing.
    #[error("missing field {index} in {message}")]
    MissingField {
        /// Message type being decoded.
        message: &'static str,
        /// Zero-based index of the missing token (after the message type).
        index: usize,
    },

    /// A token that must be numeric could not be parsed.
    #[error("invalid number in {message}: {value}")]
    InvalidNumber {
        /// Message type being decoded.
        message: &'static str,
        /// The offending token.
        value: String,
    },

    /// A percent-encoded token is malformed.
    #[error("invalid percent encoding: {0}")]
    InvalidEncoding(String),

    /// A frame line exceeds the configured maximum length.
    #[error("line too long: {size} bytes exceeds maximum {max_size}")]
    LineTooLong {
        /// Actual line size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max_size: usize,
    },
}

/// Errors in session lifecycle operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The machine is not in a phase accepting the operation.
    #[error("invalid session state: expected {expected}, current {current}")]
    InvalidState {
        /// Phase(s) accepting the operation.
        expected: String,
        /// Current phase.
        current: String,
    },

    /// The server reported an error that ends the session.
    #[error("server error {code}: {message}")]
    Server {
        /// Numeric cause code.
        code: i32,
        /// Server supplied text.
        message: String,
    },

    /// The server's progressive counter is ahead of the local count.
    #[error("recovery error: server progressive {server} ahead of local count {local}")]
    Recovery {
        /// Local count of processed data notifications.
        local: u64,
        /// Progressive announced by the server.
        server: u64,
    },

    /// Session creation was refused locally because attempts are too frequent.
    #[error("session creation refused: {attempts} attempts within {window_ms} ms")]
    CreationRefused {
        /// Number of recent attempts.
        attempts: usize,
        /// Observation window in milliseconds.
        window_ms: u64,
    },

    /// An internal phase or epoch invariant was violated.
    #[error("internal consistency violation: {0}")]
    Internal(String),

    /// The session has already been closed.
    #[error("session closed")]
    Closed,
}

/// Errors in session configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The server address is empty.
    #[error("missing server address")]
    MissingServerAddress,

    /// The server address scheme is not supported.
    #[error("unsupported address scheme: {0}")]
    UnsupportedScheme(String),

    /// A field carries a value outside its domain.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Name of the offending field.
        field: &'static str,
        /// Description of why the value is invalid.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::MissingField {
            message: "CONOK",
            index: 1,
        };
        assert_eq!(err.to_string(), "missing field 1 in CONOK");
    }

    #[test]
    fn test_push_error_from_decode() {
        let push_err: PushError = DecodeError::Empty.into();
        assert!(matches!(push_err, PushError::Decode(DecodeError::Empty)));
    }

    #[test]
    fn test_session_error_display() {
        let err = SessionError::Recovery {
            local: 10,
            server: 12,
        };
        assert_eq!(
            err.to_string(),
            "recovery error: server progressive 12 ahead of local count 10"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::UnsupportedScheme("ftp".to_string());
        assert_eq!(err.to_string(), "unsupported address scheme: ftp");
    }
}
