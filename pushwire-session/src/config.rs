/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Session configuration.
//!
//! This module provides the connection and timing options shared by both
//! session machines.

use pushwire_core::{Bandwidth, ConfigError, TransportKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client identifier sent with every session creation.
pub const CLIENT_ID: &str = "pushwire-rs";

/// Configuration for a push session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Server address, including scheme.
    pub server_address: String,
    /// Adapter set to connect to.
    pub adapter_set: Option<String>,
    /// User name.
    pub user: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Transport to use instead of stream-sensing.
    pub forced_transport: Option<TransportKind>,
    /// Base delay between reconnection attempts.
    pub retry_delay: Duration,
    /// Base wait for a connection, creation or bind to be answered.
    pub connect_timeout: Duration,
    /// Upper bound of the randomised first retry after a working session.
    pub first_retry_max_delay: Duration,
    /// How long recovery of a broken session is attempted.
    pub session_recovery_timeout: Duration,
    /// Requested keepalive interval, zero to let the server decide.
    pub keepalive_interval: Duration,
    /// Longest wait for data on a polling request.
    pub idle_timeout: Duration,
    /// Pause between polling requests.
    pub polling_interval: Duration,
    /// Extra silence tolerated before the stream is stalled.
    pub stalled_timeout: Duration,
    /// Silence tolerated while stalled before reconnecting.
    pub reconnect_timeout: Duration,
    /// Longest wait for a transport switch to complete.
    pub switch_check_timeout: Duration,
    /// Reverse heartbeat interval, zero to disable.
    pub reverse_heartbeat_interval: Duration,
    /// Whether a slow client may switch to polling.
    pub slowing_enabled: bool,
    /// Requested maximum bandwidth.
    pub requested_max_bandwidth: Bandwidth,
    /// Content length of streaming responses.
    pub content_length: Option<u64>,
    /// Whether the first streaming bind is delayed.
    pub spin_fix_enabled: bool,
    /// Delay applied to the first streaming bind when enabled.
    pub spin_fix_timeout: Option<Duration>,
    /// Seed for retry jitter; `None` seeds from entropy.
    pub jitter_seed: Option<u64>,
}

impl SessionConfig {
    /// Creates a configuration with default timings.
    ///
    /// # Arguments
    /// * `server_address` - The server address, e.g. `https://push.example.com`
    #[must_use]
    pub fn new(server_address: impl Into<String>) -> Self {
        Self {
            server_address: server_address.into(),
            adapter_set: None,
            user: None,
            password: None,
            forced_transport: None,
            retry_delay: Duration::from_millis(4000),
            connect_timeout: Duration::from_millis(4000),
            first_retry_max_delay: Duration::from_millis(100),
            session_recovery_timeout: Duration::from_millis(15_000),
            keepalive_interval: Duration::ZERO,
            idle_timeout: Duration::from_millis(19_000),
            polling_interval: Duration::ZERO,
            stalled_timeout: Duration::from_millis(2000),
            reconnect_timeout: Duration::from_millis(3000),
            switch_check_timeout: Duration::from_millis(4000),
            reverse_heartbeat_interval: Duration::ZERO,
            slowing_enabled: false,
            requested_max_bandwidth: Bandwidth::Unlimited,
            content_length: None,
            spin_fix_enabled: false,
            spin_fix_timeout: None,
            jitter_seed: None,
        }
    }

    /// Sets the adapter set.
    #[must_use]
    pub fn with_adapter_set(mut self, adapter_set: impl Into<String>) -> Self {
        self.adapter_set = Some(adapter_set.into());
        self
    }

    /// Sets the credentials.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Forces a transport, disabling stream-sensing.
    #[must_use]
    pub const fn with_forced_transport(mut self, transport: TransportKind) -> Self {
        self.forced_transport = Some(transport);
        self
    }

    /// Sets the retry delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the base connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the maximum first retry delay.
    #[must_use]
    pub const fn with_first_retry_max_delay(mut self, delay: Duration) -> Self {
        self.first_retry_max_delay = delay;
        self
    }

    /// Sets the session recovery timeout; zero disables recovery.
    #[must_use]
    pub const fn with_session_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.session_recovery_timeout = timeout;
        self
    }

    /// Sets the requested keepalive interval.
    #[must_use]
    pub const fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Sets the idle timeout.
    #[must_use]
    pub const fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the polling interval.
    #[must_use]
    pub const fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    /// Sets the stalled timeout.
    #[must_use]
    pub const fn with_stalled_timeout(mut self, timeout: Duration) -> Self {
        self.stalled_timeout = timeout;
        self
    }

    /// Sets the reconnect timeout.
    #[must_use]
    pub const fn with_reconnect_timeout(mut self, timeout: Duration) -> Self {
        self.reconnect_timeout = timeout;
        self
    }

    /// Sets the switch check timeout.
    #[must_use]
    pub const fn with_switch_check_timeout(mut self, timeout: Duration) -> Self {
        self.switch_check_timeout = timeout;
        self
    }

    /// Sets the reverse heartbeat interval.
    #[must_use]
    pub const fn with_reverse_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.reverse_heartbeat_interval = interval;
        self
    }

    /// Enables or disables slowing.
    #[must_use]
    pub const fn with_slowing_enabled(mut self, enabled: bool) -> Self {
        self.slowing_enabled = enabled;
        self
    }

    /// Sets the requested maximum bandwidth.
    #[must_use]
    pub const fn with_requested_max_bandwidth(mut self, bandwidth: Bandwidth) -> Self {
        self.requested_max_bandwidth = bandwidth;
        self
    }

    /// Sets the streaming content length.
    #[must_use]
    pub const fn with_content_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }

    /// Enables or disables the delayed first streaming bind.
    #[must_use]
    pub const fn with_spin_fix_enabled(mut self, enabled: bool) -> Self {
        self.spin_fix_enabled = enabled;
        self
    }

    /// Sets the delay of the first streaming bind.
    #[must_use]
    pub const fn with_spin_fix_timeout(mut self, timeout: Duration) -> Self {
        self.spin_fix_timeout = Some(timeout);
        self
    }

    /// Seeds the retry jitter.
    #[must_use]
    pub const fn with_jitter_seed(mut self, seed: u64) -> Self {
        self.jitter_seed = Some(seed);
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    /// Returns `ConfigError` if the server address is empty or its scheme is
    /// not one of `http`, `https`, `ws` or `wss`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let address = self.server_address.trim();
        if address.is_empty() {
            return Err(ConfigError::MissingServerAddress);
        }
        let scheme = address
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .ok_or_else(|| ConfigError::UnsupportedScheme(address.to_string()))?;
        if !matches!(scheme.as_str(), "http" | "https" | "ws" | "wss") {
            return Err(ConfigError::UnsupportedScheme(scheme));
        }
        if self.spin_fix_enabled && self.spin_fix_timeout.is_none() {
            return Err(ConfigError::InvalidValue {
                field: "spin_fix_timeout",
                reason: "required when spin_fix_enabled is set".to_string(),
            });
        }
        Ok(())
    }

    /// Returns a duration field in milliseconds.
    #[inline]
    #[must_use]
    pub fn millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Builder for session configuration.
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    server_address: Option<String>,
    adapter_set: Option<String>,
    credentials: Option<(String, String)>,
    forced_transport: Option<TransportKind>,
    retry_delay: Option<Duration>,
    session_recovery_timeout: Option<Duration>,
    reverse_heartbeat_interval: Option<Duration>,
    slowing_enabled: bool,
}

impl SessionConfigBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the server address.
    #[must_use]
    pub fn server_address(mut self, address: impl Into<String>) -> Self {
        self.server_address = Some(address.into());
        self
    }

    /// Sets the adapter set.
    #[must_use]
    pub fn adapter_set(mut self, adapter_set: impl Into<String>) -> Self {
        self.adapter_set = Some(adapter_set.into());
        self
    }

    /// Sets the credentials.
    #[must_use]
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }

    /// Forces a transport.
    #[must_use]
    pub const fn forced_transport(mut self, transport: TransportKind) -> Self {
        self.forced_transport = Some(transport);
        self
    }

    /// Sets the retry delay.
    #[must_use]
    pub const fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Sets the session recovery timeout.
    #[must_use]
    pub const fn session_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.session_recovery_timeout = Some(timeout);
        self
    }

    /// Sets the reverse heartbeat interval.
    #[must_use]
    pub const fn reverse_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.reverse_heartbeat_interval = Some(interval);
        self
    }

    /// Enables or disables slowing.
    #[must_use]
    pub const fn slowing_enabled(mut self, enabled: bool) -> Self {
        self.slowing_enabled = enabled;
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    /// Returns `ConfigError` if the server address is missing or invalid.
    pub fn build(self) -> Result<SessionConfig, ConfigError> {
        let address = self.server_address.ok_or(ConfigError::MissingServerAddress)?;
        let mut config = SessionConfig::new(address);
        config.adapter_set = self.adapter_set;
        if let Some((user, password)) = self.credentials {
            config.user = Some(user);
            config.password = Some(password);
        }
        config.forced_transport = self.forced_transport;
        if let Some(delay) = self.retry_delay {
            config.retry_delay = delay;
        }
        if let Some(timeout) = self.session_recovery_timeout {
            config.session_recovery_timeout = timeout;
        }
        if let Some(interval) = self.reverse_heartbeat_interval {
            config.reverse_heartbeat_interval = interval;
        }
        config.slowing_enabled = self.slowing_enabled;
        config.validate()?;
        Ok(config)
    }
}
