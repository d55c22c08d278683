/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! # PushWire
//!
//! A push-session client engine for Rust.
//!
//! PushWire keeps a logical session with a push server alive across
//! unreliable connections. It creates and binds sessions over a duplex
//! channel or plain HTTP requests, recovers broken sessions without losing
//! data, and falls back between transports when the preferred one fails.
//!
//! ## Features
//!
//! - **I/O-free state machines**: Every timing and recovery decision is testable
//!   with a manual clock
//! - **Session recovery**: Progress counters reconcile replayed data
//! - **Stream-sensing**: Automatic fallback from the duplex channel to HTTP
//!   streaming, then to polling
//! - **Async runtime**: A single Tokio task drives the active session
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pushwire::prelude::*;
//!
//! let client = ClientBuilder::new()
//!     .with_listener(MyListener)
//!     .with_config(SessionConfig::new("http://push.example.com"))
//!     .build()?;
//! client.connect().await?;
//! client.subscribe(1, [("LS_group".to_string(), "item1".to_string())]).await?;
//! ```
//!
//! ## Crate Organization
//!
//! - [`core`]: Fundamental types, cause codes and error definitions
//! - [`protocol`]: Control batch encoding and server line decoding
//! - [`transport`]: Line codec, duplex channel and HTTP request stream
//! - [`session`]: Session state machines
//! - [`engine`]: Tokio driver and client facade

pub mod core {
    //! Core types, cause codes and error definitions.
    pub use pushwire_core::*;
}

pub mod protocol {
    //! Control batch encoding and server line decoding.
    pub use pushwire_protocol::*;
}

pub mod transport {
    //! Line codec, duplex channel and HTTP request stream.
    pub use pushwire_transport::*;
}

pub mod session {
    //! Session state machines.
    pub use pushwire_session::*;
}

pub mod engine {
    //! Tokio driver and client facade.
    pub use pushwire_engine::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    // Core types
    pub use pushwire_core::{
        Bandwidth, ConfigError, DecodeError, HighLevelStatus, PushError, ReqId, Result,
        ServerCause, SessionError, SessionId, TransportKind,
    };

    // Protocol
    pub use pushwire_protocol::{ControlBatch, Operation, ServerMessage, decode_line};

    // Transport
    pub use pushwire_transport::{CodecError, FrameCodec, TransportError};

    // Session
    pub use pushwire_session::{
        ControlRequest, RequestKind, RequestOutcome, SessionConfig, SessionConfigBuilder,
    };

    // Engine
    pub use pushwire_engine::{ClientBuilder, ClientListener, NoOpListener, PushClient, SessionProperty};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _id = ReqId::new(1);
        let _kind = TransportKind::WsStreaming;
        let _config = SessionConfig::new("http://localhost:8080");
        let _builder = ClientBuilder::new();
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(
            HighLevelStatus::Connected(TransportKind::HttpPolling).as_str(),
            "CONNECTED:HTTP-POLLING"
        );
        assert_eq!(HighLevelStatus::Disconnected.as_str(), "DISCONNECTED");
    }
}
