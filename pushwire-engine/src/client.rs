/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Client handle.
//!
//! [`PushClient`] is the application side of the driver: every call is
//! queued to the driver task and returns once it has been accepted, not
//! once the server answered. Outcomes arrive on the listener.

use crate::driver::{Driver, Input};
use crate::listener::ClientListener;
use pushwire_core::{Bandwidth, HighLevelStatus, PushError, Result, SessionError, TransportKind};
use pushwire_session::{
    Command, ControlRequest, CreationGuard, SessionConfig, SharedCreationGuard, SystemClock,
};
use pushwire_transport::{FrameCodec, HttpClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Handle to a running push client.
///
/// Dropping the handle stops the driver without notifying the server; call
/// [`PushClient::shutdown`] to close the session first.
#[derive(Debug)]
pub struct PushClient {
    inputs: mpsc::Sender<Input>,
    status: watch::Receiver<HighLevelStatus>,
    task: Option<JoinHandle<()>>,
}

impl PushClient {
    pub(crate) fn start<L: ClientListener + 'static>(
        config: SessionConfig,
        transport: TransportKind,
        listener: Arc<L>,
        http: HttpClient,
        max_line_length: usize,
        command_capacity: usize,
        guard: CreationGuard,
    ) -> Self {
        let (inputs, queue) = mpsc::channel(command_capacity);
        let (status_tx, status) = watch::channel(HighLevelStatus::Disconnected);
        let driver = Driver::new(
            config,
            transport,
            SystemClock::shared(),
            SharedCreationGuard::new(guard),
            http,
            FrameCodec::new().with_max_line_length(max_line_length),
            listener,
            inputs.clone(),
            status_tx,
        );
        let task = tokio::spawn(driver.run(queue));
        Self {
            inputs,
            status,
            task: Some(task),
        }
    }

    async fn submit(&self, input: Input) -> Result<()> {
        self.inputs
            .send(input)
            .await
            .map_err(|_| PushError::Session(SessionError::Closed))
    }

    async fn command(&self, command: Command) -> Result<()> {
        self.submit(Input::Command(command)).await
    }

    /// Creates a session.
    ///
    /// # Errors
    /// Returns `SessionError::Closed` if the driver has stopped.
    pub async fn connect(&self) -> Result<()> {
        self.submit(Input::Connect).await
    }

    /// Closes the session, keeping the driver alive for a later
    /// [`connect`](Self::connect).
    ///
    /// # Errors
    /// Returns `SessionError::Closed` if the driver has stopped.
    pub async fn disconnect(&self) -> Result<()> {
        self.command(Command::CloseSession).await
    }

    /// Subscribes to items.
    ///
    /// # Arguments
    /// * `sub_id` - Client-assigned subscription id
    /// * `params` - Subscription parameters such as items, fields and mode
    ///
    /// # Errors
    /// Returns `SessionError::Closed` if the driver has stopped.
    pub async fn subscribe<I>(&self, sub_id: u64, params: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.send(ControlRequest::subscribe(sub_id, params)).await
    }

    /// Removes a subscription.
    ///
    /// # Errors
    /// Returns `SessionError::Closed` if the driver has stopped.
    pub async fn unsubscribe(&self, sub_id: u64) -> Result<()> {
        self.send(ControlRequest::unsubscribe(sub_id)).await
    }

    /// Sends a client message.
    ///
    /// # Arguments
    /// * `text` - Message payload
    /// * `sequence` - Sequence name, `None` for unordered messages
    /// * `prog` - Progressive number within the sequence
    ///
    /// # Errors
    /// Returns `SessionError::Closed` if the driver has stopped.
    pub async fn send_message(&self, text: &str, sequence: Option<&str>, prog: u64) -> Result<()> {
        self.send(ControlRequest::message(text, sequence, prog, true))
            .await
    }

    /// Queues any control request.
    ///
    /// # Errors
    /// Returns `SessionError::Closed` if the driver has stopped.
    pub async fn send(&self, request: ControlRequest) -> Result<()> {
        debug!(kind = ?request.kind(), "request queued");
        self.command(Command::Send(request)).await
    }

    /// Moves the session to another transport.
    ///
    /// # Errors
    /// Returns `SessionError::Closed` if the driver has stopped.
    pub async fn switch_transport(&self, transport: TransportKind) -> Result<()> {
        self.command(Command::RequestSwitch(transport)).await
    }

    /// Requests a new maximum bandwidth.
    ///
    /// # Errors
    /// Returns `SessionError::Closed` if the driver has stopped.
    pub async fn change_bandwidth(&self, bandwidth: Bandwidth) -> Result<()> {
        self.command(Command::ChangeBandwidth(bandwidth)).await
    }

    /// Changes the reverse heartbeat interval, zero to disable.
    ///
    /// # Errors
    /// Returns `SessionError::Closed` if the driver has stopped.
    pub async fn change_reverse_heartbeat(&self, interval: Duration) -> Result<()> {
        self.command(Command::ChangeReverseHeartbeat(interval))
            .await
    }

    /// Returns the current high-level status.
    #[must_use]
    pub fn status(&self) -> HighLevelStatus {
        *self.status.borrow()
    }

    /// Returns a receiver of status changes.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<HighLevelStatus> {
        self.status.clone()
    }

    /// Closes the session and waits for the driver to stop.
    ///
    /// # Errors
    /// Returns `SessionError::Closed` if the driver had already stopped.
    pub async fn shutdown(mut self) -> Result<()> {
        self.submit(Input::Shutdown).await?;
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|err| PushError::Session(SessionError::Internal(err.to_string())))?;
        }
        Ok(())
    }
}

impl Drop for PushClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
