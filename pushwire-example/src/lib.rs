/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Common utilities shared across examples.

use async_trait::async_trait;
use pushwire::prelude::*;
use std::env;
use tracing::{info, warn};

/// Default server address.
pub const DEFAULT_ADDRESS: &str = "http://127.0.0.1:8080";

/// Example configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ExampleConfig {
    /// Server address, including scheme.
    pub address: String,
    /// Adapter set to connect to.
    pub adapter_set: Option<String>,
    /// Items to subscribe to.
    pub items: String,
    /// Fields of each item.
    pub fields: String,
    /// Transport to force, if any.
    pub transport: Option<TransportKind>,
}

impl ExampleConfig {
    /// Loads the configuration from `PUSH_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            address: env::var("PUSH_ADDRESS").unwrap_or_else(|_| DEFAULT_ADDRESS.to_string()),
            adapter_set: env::var("PUSH_ADAPTER_SET").ok(),
            items: env::var("PUSH_ITEMS").unwrap_or_else(|_| "item1 item2".to_string()),
            fields: env::var("PUSH_FIELDS").unwrap_or_else(|_| "last_price time".to_string()),
            transport: env::var("PUSH_TRANSPORT")
                .ok()
                .and_then(|t| parse_transport(&t)),
        }
    }

    /// Builds the session configuration.
    #[must_use]
    pub fn session(&self) -> SessionConfig {
        let config = SessionConfig::new(self.address.clone());
        match &self.adapter_set {
            Some(adapter_set) => config.with_adapter_set(adapter_set.clone()),
            None => config,
        }
    }
}

/// Parses a transport name such as `HTTP-POLLING`.
#[must_use]
pub fn parse_transport(name: &str) -> Option<TransportKind> {
    [
        TransportKind::WsStreaming,
        TransportKind::WsPolling,
        TransportKind::HttpStreaming,
        TransportKind::HttpPolling,
    ]
    .into_iter()
    .find(|kind| kind.as_str().eq_ignore_ascii_case(name))
}

/// Initializes logging for examples.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .try_init();
}

/// Listener that logs every event.
#[derive(Debug, Default)]
pub struct LoggingListener;

#[async_trait]
impl ClientListener for LoggingListener {
    async fn on_status_change(&self, status: HighLevelStatus) {
        info!(%status, "status");
    }

    async fn on_property_change(&self, property: &SessionProperty) {
        info!(?property, "property");
    }

    async fn on_session_recovered(&self, session_id: &SessionId) {
        info!(session = %session_id, "recovered");
    }

    async fn on_data(&self, message: &ServerMessage) {
        info!(?message, "data");
    }

    async fn on_request_outcome(&self, req_id: ReqId, kind: RequestKind, outcome: &RequestOutcome) {
        info!(%req_id, ?kind, ?outcome, "request outcome");
    }

    async fn on_message_sent(&self, sequence: &str, prog: u64) {
        info!(sequence, prog, "message sent");
    }

    async fn on_server_error(&self, error: &SessionError) {
        warn!(%error, "session ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transport() {
        assert_eq!(parse_transport("http-polling"), Some(TransportKind::HttpPolling));
        assert_eq!(parse_transport("WS-STREAMING"), Some(TransportKind::WsStreaming));
        assert_eq!(parse_transport("carrier-pigeon"), None);
    }
}
