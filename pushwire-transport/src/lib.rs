/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! # PushWire Transport
//!
//! Network transports for the PushWire push client.
//!
//! This crate provides:
//! - **Codec**: Tokio codec splitting `\r\n`-terminated server lines
//! - **Duplex channel**: A WebSocket channel with reader and writer tasks,
//!   one text frame per outbound batch
//! - **HTTP streams**: Requests whose body is read line by line until the
//!   server ends it, plus one-shot control requests
//!
//! Secure addresses (`https`, `wss`) are served over rustls.

pub mod channel;
pub mod codec;
pub mod endpoint;
pub mod error;
pub mod http;

pub use channel::{CHANNEL_PROTOCOL, DuplexChannel};
pub use codec::{CodecError, FrameCodec};
pub use endpoint::{Endpoint, Scheme};
pub use error::TransportError;
pub use http::{HttpStream, http_client, post_control};
pub use reqwest::Client as HttpClient;

/// Event reported by a transport task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A complete server line, without its terminator.
    Line(String),
    /// The peer closed the connection.
    Ended,
    /// The connection broke.
    Failed(String),
}
