/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Client listener interface.
//!
//! The driver forwards every notification of the active session machine to
//! a [`ClientListener`]. Callbacks run on the driver task, so a slow listener
//! delays the processing of the next event.

use async_trait::async_trait;
use pushwire_core::{Bandwidth, HighLevelStatus, ReqId, SessionError, SessionId};
use pushwire_protocol::ServerMessage;
use pushwire_session::{RequestKind, RequestOutcome};

/// Session property reported by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionProperty {
    /// Id of the session just created.
    SessionId(SessionId),
    /// Keepalive interval agreed by the server.
    KeepaliveMs(u64),
    /// Maximum length of a control request.
    RequestLimit(u64),
    /// Server instance name.
    ServerName(String),
    /// Client address as seen by the server.
    ClientIp(String),
    /// Bandwidth granted by the server.
    Bandwidth(Bandwidth),
}

/// Callback interface for client events.
#[async_trait]
pub trait ClientListener: Send + Sync {
    /// Called when the high-level status changes.
    ///
    /// # Arguments
    /// * `status` - The new status
    async fn on_status_change(&self, status: HighLevelStatus);

    /// Called when the server reports a session property.
    ///
    /// # Arguments
    /// * `property` - The reported property
    async fn on_property_change(&self, property: &SessionProperty);

    /// Called when a broken session was recovered.
    ///
    /// # Arguments
    /// * `session_id` - The recovered session
    async fn on_session_recovered(&self, session_id: &SessionId);

    /// Called for every data notification of the session.
    ///
    /// Updates, subscription and message outcomes arrive in server order.
    ///
    /// # Arguments
    /// * `message` - The decoded notification
    async fn on_data(&self, message: &ServerMessage);

    /// Called when a correlated control request is resolved.
    ///
    /// # Arguments
    /// * `req_id` - The request id
    /// * `kind` - The request category
    /// * `outcome` - Accepted, refused or aborted
    async fn on_request_outcome(&self, req_id: ReqId, kind: RequestKind, outcome: &RequestOutcome);

    /// Called when a client message has been written to the network.
    ///
    /// # Arguments
    /// * `sequence` - The message sequence
    /// * `prog` - Progressive within the sequence
    async fn on_message_sent(&self, sequence: &str, prog: u64);

    /// Called when the session ends for good.
    ///
    /// # Arguments
    /// * `error` - Why the session ended
    async fn on_server_error(&self, error: &SessionError);
}

/// Default no-op listener implementation.
#[derive(Debug, Default)]
pub struct NoOpListener;

#[async_trait]
impl ClientListener for NoOpListener {
    async fn on_status_change(&self, _status: HighLevelStatus) {}

    async fn on_property_change(&self, _property: &SessionProperty) {}

    async fn on_session_recovered(&self, _session_id: &SessionId) {}

    async fn on_data(&self, _message: &ServerMessage) {}

    async fn on_request_outcome(
        &self,
        _req_id: ReqId,
        _kind: RequestKind,
        _outcome: &RequestOutcome,
    ) {
    }

    async fn on_message_sent(&self, _sequence: &str, _prog: u64) {}

    async fn on_server_error(&self, _error: &SessionError) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_listener() {
        let listener = NoOpListener;
        listener.on_status_change(HighLevelStatus::Connecting).await;
        listener
            .on_property_change(&SessionProperty::ServerName("node-1".to_string()))
            .await;
        listener
            .on_request_outcome(ReqId::new(1), RequestKind::Subscribe, &RequestOutcome::Ok)
            .await;
        listener.on_message_sent("seq", 1).await;
        listener.on_server_error(&SessionError::Closed).await;
    }

    #[test]
    fn test_session_property_equality() {
        assert_eq!(
            SessionProperty::Bandwidth(Bandwidth::Limited(10.0)),
            SessionProperty::Bandwidth(Bandwidth::Limited(10.0))
        );
        assert_ne!(
            SessionProperty::KeepaliveMs(5000),
            SessionProperty::RequestLimit(5000)
        );
    }
}
