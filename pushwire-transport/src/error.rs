/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Transport error type.

use crate::codec::CodecError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors raised while connecting, writing or reading a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server address could not be parsed.
    #[error("invalid address {address}: {reason}")]
    InvalidAddress {
        /// The offending address.
        address: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The server answered with a non-success status.
    #[error("http status {0}")]
    HttpStatus(u16),

    /// The channel writer is gone.
    #[error("channel closed")]
    ChannelClosed,

    /// Line framing error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// HTTP client error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket handshake or framing error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}
