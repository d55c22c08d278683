/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Client builder for fluent configuration.
//!
//! This module provides a builder API for configuring push clients.

use crate::client::PushClient;
use crate::listener::{ClientListener, NoOpListener};
use pushwire_core::{ConfigError, PushError, Result, TransportKind};
use pushwire_session::guard::{DEFAULT_BURST, DEFAULT_WINDOW_MS};
use pushwire_session::{CreationGuard, SessionConfig};
use pushwire_transport::codec::DEFAULT_MAX_LINE_LENGTH;
use pushwire_transport::{HttpClient, http_client};
use std::sync::Arc;

/// Default capacity of the driver input queue.
pub const DEFAULT_COMMAND_CAPACITY: usize = 256;

/// Builder for configuring a push client.
#[derive(Debug)]
pub struct ClientBuilder<L: ClientListener = NoOpListener> {
    /// Listener callback handler.
    listener: Arc<L>,
    /// Session configuration.
    config: Option<SessionConfig>,
    /// Transport forced for every session.
    forced_transport: Option<TransportKind>,
    /// HTTP client for session and control requests.
    http: Option<HttpClient>,
    /// Longest inbound line accepted.
    max_line_length: usize,
    /// Capacity of the driver input queue.
    command_capacity: usize,
    /// Creation burst allowed within the guard window.
    creation_burst: usize,
    /// Creation guard window in milliseconds.
    creation_window_ms: u64,
}

impl Default for ClientBuilder<NoOpListener> {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder<NoOpListener> {
    /// Creates a new client builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listener: Arc::new(NoOpListener),
            config: None,
            forced_transport: None,
            http: None,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            creation_burst: DEFAULT_BURST,
            creation_window_ms: DEFAULT_WINDOW_MS,
        }
    }
}

impl<L: ClientListener + 'static> ClientBuilder<L> {
    /// Sets the listener callback handler.
    #[must_use]
    pub fn with_listener<B: ClientListener>(self, listener: B) -> ClientBuilder<B> {
        ClientBuilder {
            listener: Arc::new(listener),
            config: self.config,
            forced_transport: self.forced_transport,
            http: self.http,
            max_line_length: self.max_line_length,
            command_capacity: self.command_capacity,
            creation_burst: self.creation_burst,
            creation_window_ms: self.creation_window_ms,
        }
    }

    /// Sets the session configuration.
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Forces a transport instead of stream-sensing.
    #[must_use]
    pub const fn with_forced_transport(mut self, transport: TransportKind) -> Self {
        self.forced_transport = Some(transport);
        self
    }

    /// Sets the HTTP client, for instance to route requests through a proxy.
    #[must_use]
    pub fn with_http_client(mut self, client: HttpClient) -> Self {
        self.http = Some(client);
        self
    }

    /// Sets the longest inbound line accepted.
    #[must_use]
    pub const fn with_max_line_length(mut self, length: usize) -> Self {
        self.max_line_length = length;
        self
    }

    /// Sets the capacity of the driver input queue.
    #[must_use]
    pub const fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity;
        self
    }

    /// Sets how many session creations are allowed within a window.
    #[must_use]
    pub const fn with_creation_limit(mut self, burst: usize, window_ms: u64) -> Self {
        self.creation_burst = burst;
        self.creation_window_ms = window_ms;
        self
    }

    /// Returns the session configuration.
    #[must_use]
    pub const fn config(&self) -> Option<&SessionConfig> {
        self.config.as_ref()
    }

    /// Returns the forced transport.
    #[must_use]
    pub const fn forced_transport(&self) -> Option<TransportKind> {
        self.forced_transport
    }

    /// Returns the longest inbound line accepted.
    #[must_use]
    pub const fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    /// Returns the capacity of the driver input queue.
    #[must_use]
    pub const fn command_capacity(&self) -> usize {
        self.command_capacity
    }

    /// Returns the listener handler.
    #[must_use]
    pub fn listener(&self) -> Arc<L> {
        Arc::clone(&self.listener)
    }

    /// Validates the configuration and starts the client driver.
    ///
    /// The driver is spawned on the current tokio runtime. No session is
    /// created until [`PushClient::connect`] is called.
    ///
    /// # Errors
    /// Returns `PushError::Config` if no configuration was set or it is
    /// invalid, `PushError::Io` if the default HTTP client cannot be built.
    pub fn build(self) -> Result<PushClient> {
        let mut config = self.config.ok_or(ConfigError::MissingServerAddress)?;
        if self.forced_transport.is_some() {
            config.forced_transport = self.forced_transport;
        }
        config.validate()?;
        let transport = config
            .forced_transport
            .unwrap_or(TransportKind::WsStreaming);
        let http = match self.http {
            Some(client) => client,
            None => http_client().map_err(|err| PushError::Io(std::io::Error::other(err)))?,
        };
        Ok(PushClient::start(
            config,
            transport,
            self.listener,
            http,
            self.max_line_length,
            self.command_capacity,
            CreationGuard::new(self.creation_burst, self.creation_window_ms),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builder_default() {
        let builder = ClientBuilder::new();
        assert!(builder.config().is_none());
        assert!(builder.forced_transport().is_none());
        assert_eq!(builder.max_line_length(), DEFAULT_MAX_LINE_LENGTH);
        assert_eq!(builder.command_capacity(), DEFAULT_COMMAND_CAPACITY);
    }

    #[test]
    fn test_client_builder_with_config() {
        let builder = ClientBuilder::new()
            .with_config(SessionConfig::new("http://localhost:8080"))
            .with_forced_transport(TransportKind::HttpPolling)
            .with_max_line_length(4096);

        assert_eq!(
            builder.config().map(|c| c.server_address.as_str()),
            Some("http://localhost:8080")
        );
        assert_eq!(builder.forced_transport(), Some(TransportKind::HttpPolling));
        assert_eq!(builder.max_line_length(), 4096);
    }

    #[test]
    fn test_build_without_config_fails() {
        let err = ClientBuilder::new().build().unwrap_err();
        assert!(matches!(
            err,
            PushError::Config(ConfigError::MissingServerAddress)
        ));
    }

    #[test]
    fn test_build_rejects_bad_scheme() {
        let err = ClientBuilder::new()
            .with_config(SessionConfig::new("ftp://localhost"))
            .build()
            .unwrap_err();
        assert!(matches!(err, PushError::Config(ConfigError::UnsupportedScheme(_))));
    }
}
