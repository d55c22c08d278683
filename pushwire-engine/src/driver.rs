/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Tokio driver of the session machines.
//!
//! One task owns the active machine. API calls and transport callbacks arrive
//! on a single channel and timers expire from a single delay queue, both
//! polled by the same loop, so the machine is only ever touched from that
//! task. Transport work runs in spawned tasks that report back on the
//! channel, tagged with the machine generation they were started for.

use crate::listener::{ClientListener, SessionProperty};
use futures_util::StreamExt;
use pushwire_core::{HighLevelStatus, TransportKind};
use pushwire_session::{
    Action, ChannelAction, Command, ConnId, ControlAction, Event, Handoff, HttpAction,
    Notification, SessionConfig, SessionMachine, SharedClock, SharedCreationGuard, Timer,
    TimerKind, TransportEvent, new_machine, resume_machine,
};
use pushwire_transport::{
    DuplexChannel, FrameCodec, HttpClient, HttpStream, StreamEvent, post_control,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::time::{DelayQueue, delay_queue};
use tracing::{debug, error, info, trace, warn};

/// Capacity of the per-connection stream event queue.
const STREAM_CAPACITY: usize = 64;

/// Input of the driver loop.
#[derive(Debug)]
pub(crate) enum Input {
    /// Create a session, starting over with a fresh machine if needed.
    Connect,
    /// A session command.
    Command(Command),
    /// Close the session and stop the driver.
    Shutdown,
    /// A transport callback.
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    /// A streaming request was written.
    HttpReady {
        generation: u64,
        conn: ConnId,
        stream: HttpStream,
    },
    /// A duplex channel connected.
    ChannelReady {
        generation: u64,
        conn: ConnId,
        channel: DuplexChannel,
    },
}

/// Live transport resource of a connection.
#[derive(Debug)]
enum Link {
    Connecting,
    Http(HttpStream),
    Channel(DuplexChannel),
}

/// Owner of the active session machine.
pub(crate) struct Driver<L: ClientListener> {
    config: SessionConfig,
    initial: TransportKind,
    machine: Box<dyn SessionMachine>,
    generation: u64,
    links: HashMap<ConnId, Link>,
    timers: DelayQueue<Timer>,
    /// Pending entry of each timer kind; a new schedule replaces it.
    armed: HashMap<TimerKind, delay_queue::Key>,
    clock: SharedClock,
    guard: SharedCreationGuard,
    http: HttpClient,
    codec: FrameCodec,
    listener: Arc<L>,
    inputs: mpsc::Sender<Input>,
    status: watch::Sender<HighLevelStatus>,
}

impl<L: ClientListener + 'static> Driver<L> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: SessionConfig,
        transport: TransportKind,
        clock: SharedClock,
        guard: SharedCreationGuard,
        http: HttpClient,
        codec: FrameCodec,
        listener: Arc<L>,
        inputs: mpsc::Sender<Input>,
        status: watch::Sender<HighLevelStatus>,
    ) -> Self {
        let machine = new_machine(config.clone(), transport, Arc::clone(&clock), guard.clone());
        status.send_replace(machine.status());
        Self {
            config,
            initial: transport,
            machine,
            generation: 0,
            links: HashMap::new(),
            timers: DelayQueue::new(),
            armed: HashMap::new(),
            clock,
            guard,
            http,
            codec,
            listener,
            inputs,
            status,
        }
    }

    /// Runs the dispatch loop until shutdown.
    pub(crate) async fn run(mut self, mut inputs: mpsc::Receiver<Input>) {
        info!(transport = %self.initial, "driver started");
        loop {
            tokio::select! {
                input = inputs.recv() => match input {
                    Some(Input::Shutdown) => {
                        self.dispatch(Command::CloseSession.into()).await;
                        break;
                    }
                    Some(input) => self.handle(input).await,
                    None => break,
                },
                Some(expired) = self.timers.next(), if !self.timers.is_empty() => {
                    let key = expired.key();
                    let timer = expired.into_inner();
                    if self.armed.get(&timer.kind) == Some(&key) {
                        self.armed.remove(&timer.kind);
                    }
                    self.dispatch(timer.into()).await;
                }
            }
        }
        self.links.clear();
        info!("driver stopped");
    }

    async fn handle(&mut self, input: Input) {
        match input {
            Input::Connect => self.connect().await,
            Input::Command(command) => self.dispatch(command.into()).await,
            // Stops the loop in `run`.
            Input::Shutdown => {}
            Input::Transport { generation, event } => {
                if generation == self.generation {
                    self.dispatch(event.into()).await;
                } else {
                    trace!(?event, generation, "callback of a retired machine dropped");
                }
            }
            Input::HttpReady {
                generation,
                conn,
                stream,
            } => {
                if generation == self.generation && self.is_connecting(conn) {
                    self.links.insert(conn, Link::Http(stream));
                } else {
                    debug!(%conn, "late request aborted");
                }
            }
            Input::ChannelReady {
                generation,
                conn,
                channel,
            } => {
                if generation == self.generation && self.is_connecting(conn) {
                    self.links.insert(conn, Link::Channel(channel));
                    self.dispatch(TransportEvent::Opened { conn }.into()).await;
                } else {
                    debug!(%conn, "late channel closed");
                }
            }
        }
    }

    fn is_connecting(&self, conn: ConnId) -> bool {
        matches!(self.links.get(&conn), Some(Link::Connecting))
    }

    async fn connect(&mut self) {
        if self.machine.status() == HighLevelStatus::Disconnected
            && self.machine.transport() != self.initial
        {
            debug!(
                from = %self.machine.transport(),
                to = %self.initial,
                "starting over on the initial transport"
            );
            self.retire();
            self.machine = new_machine(
                self.config.clone(),
                self.initial,
                Arc::clone(&self.clock),
                self.guard.clone(),
            );
        }
        self.dispatch(Command::CreateSession.into()).await;
    }

    async fn dispatch(&mut self, event: Event) {
        self.machine.dispatch(event);
        loop {
            let actions = self.machine.take_actions();
            if actions.is_empty() {
                break;
            }
            let mut handoff = None;
            for action in actions {
                if let Some(next) = self.execute(action).await {
                    handoff = Some(next);
                }
            }
            if let Some(handoff) = handoff {
                self.resume(handoff);
            }
        }
    }

    async fn execute(&mut self, action: Action) -> Option<Handoff> {
        match action {
            Action::Schedule(timer) => self.schedule(timer),
            Action::Http(HttpAction::Open {
                conn,
                address,
                batch,
            }) => {
                self.links.insert(conn, Link::Connecting);
                let events = self.forward(conn);
                let inputs = self.inputs.clone();
                let http = self.http.clone();
                let codec = self.codec.clone();
                let generation = self.generation;
                tokio::spawn(async move {
                    let opened = HttpStream::open(&http, &address, &batch, codec, events).await;
                    let input = match opened {
                        Ok(stream) => Input::HttpReady {
                            generation,
                            conn,
                            stream,
                        },
                        Err(err) => Input::Transport {
                            generation,
                            event: TransportEvent::Failed {
                                conn,
                                reason: err.to_string(),
                            },
                        },
                    };
                    if inputs.send(input).await.is_err() {
                        trace!(%conn, "driver gone, request result dropped");
                    }
                });
            }
            Action::Http(HttpAction::Close { conn }) => {
                self.links.remove(&conn);
            }
            Action::Channel(ChannelAction::Open { conn, address }) => {
                self.links.insert(conn, Link::Connecting);
                let events = self.forward(conn);
                let inputs = self.inputs.clone();
                let codec = self.codec.clone();
                let generation = self.generation;
                tokio::spawn(async move {
                    let input = match DuplexChannel::connect(&address, codec, events).await {
                        Ok(channel) => Input::ChannelReady {
                            generation,
                            conn,
                            channel,
                        },
                        Err(err) => Input::Transport {
                            generation,
                            event: TransportEvent::Failed {
                                conn,
                                reason: err.to_string(),
                            },
                        },
                    };
                    if inputs.send(input).await.is_err() {
                        trace!(%conn, "driver gone, channel result dropped");
                    }
                });
            }
            Action::Channel(ChannelAction::Send { conn, batch }) => {
                let result = match self.links.get(&conn) {
                    Some(Link::Channel(channel)) => channel.send(&batch).await,
                    _ => {
                        warn!(%conn, op = %batch.operation(), "write on a channel that is not open");
                        return None;
                    }
                };
                if let Err(err) = result {
                    self.machine.dispatch(
                        TransportEvent::Failed {
                            conn,
                            reason: err.to_string(),
                        }
                        .into(),
                    );
                }
            }
            Action::Channel(ChannelAction::Close { conn }) => {
                self.links.remove(&conn);
            }
            Action::Control(ControlAction::Send {
                address,
                batch,
                req_id,
            }) => {
                let inputs = self.inputs.clone();
                let http = self.http.clone();
                let codec = self.codec.clone();
                let generation = self.generation;
                tokio::spawn(async move {
                    let event = match post_control(&http, &address, &batch, codec).await {
                        Ok(frame) => TransportEvent::ControlReply { frame },
                        Err(err) => TransportEvent::ControlFailed {
                            req_id,
                            reason: err.to_string(),
                        },
                    };
                    if inputs
                        .send(Input::Transport { generation, event })
                        .await
                        .is_err()
                    {
                        trace!(?req_id, "driver gone, control reply dropped");
                    }
                });
            }
            Action::Notify(Notification::Handoff(handoff)) => return Some(*handoff),
            Action::Notify(notification) => self.notify(notification).await,
        }
        None
    }

    fn schedule(&mut self, timer: Timer) {
        if let Some(key) = self.armed.remove(&timer.kind) {
            self.timers.remove(&key);
        }
        let key = self
            .timers
            .insert(timer, Duration::from_millis(timer.delay_ms));
        self.armed.insert(timer.kind, key);
    }

    /// Returns a sink whose stream events reach the loop as callbacks of `conn`.
    fn forward(&self, conn: ConnId) -> mpsc::Sender<StreamEvent> {
        let (events, mut stream) = mpsc::channel(STREAM_CAPACITY);
        let inputs = self.inputs.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                let event = match event {
                    StreamEvent::Line(frame) => TransportEvent::Received { conn, frame },
                    StreamEvent::Ended => TransportEvent::Ended { conn },
                    StreamEvent::Failed(reason) => TransportEvent::Failed { conn, reason },
                };
                if inputs
                    .send(Input::Transport { generation, event })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
        events
    }

    fn retire(&mut self) {
        self.links.clear();
        self.timers.clear();
        self.armed.clear();
        self.generation += 1;
    }

    fn resume(&mut self, handoff: Handoff) {
        info!(
            from = %self.machine.transport(),
            to = %handoff.target,
            reason = ?handoff.reason,
            recover = handoff.recover,
            "session handed off"
        );
        let command = if handoff.snapshot.session_id.is_some() {
            Command::BindSession
        } else {
            Command::CreateSession
        };
        self.retire();
        self.machine = resume_machine(
            self.config.clone(),
            handoff,
            Arc::clone(&self.clock),
            self.guard.clone(),
        );
        self.machine.dispatch(command.into());
    }

    async fn notify(&mut self, notification: Notification) {
        let listener = &self.listener;
        match notification {
            Notification::StatusChanged(status) => {
                debug!(%status, "status changed");
                self.status.send_replace(status);
                listener.on_status_change(status).await;
            }
            Notification::SessionCreated {
                session_id,
                keepalive_ms,
                request_limit,
            } => {
                info!(session = %session_id, keepalive_ms, "session created");
                for property in [
                    SessionProperty::SessionId(session_id),
                    SessionProperty::KeepaliveMs(keepalive_ms),
                    SessionProperty::RequestLimit(request_limit),
                ] {
                    listener.on_property_change(&property).await;
                }
            }
            Notification::SessionRecovered { session_id } => {
                info!(session = %session_id, "session recovered");
                listener.on_session_recovered(&session_id).await;
            }
            Notification::ServerName(name) => {
                listener
                    .on_property_change(&SessionProperty::ServerName(name))
                    .await;
            }
            Notification::ClientIp(address) => {
                listener
                    .on_property_change(&SessionProperty::ClientIp(address))
                    .await;
            }
            Notification::BandwidthGranted(bandwidth) => {
                listener
                    .on_property_change(&SessionProperty::Bandwidth(bandwidth))
                    .await;
            }
            Notification::Data(message) => listener.on_data(&message).await,
            Notification::RequestOutcome {
                req_id,
                kind,
                outcome,
            } => listener.on_request_outcome(req_id, kind, &outcome).await,
            Notification::MessageSent { sequence, prog } => {
                listener.on_message_sent(&sequence, prog).await;
            }
            Notification::Failed(err) => {
                error!(%err, "session failed");
                listener.on_server_error(&err).await;
            }
            Notification::Handoff(handoff) => {
                warn!(transport = %handoff.target, "hand-off outside of an action batch ignored");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::NoOpListener;
    use pushwire_session::SystemClock;
    use pushwire_transport::http_client;

    fn driver() -> (Driver<NoOpListener>, mpsc::Receiver<Input>) {
        let (inputs, queue) = mpsc::channel(16);
        let (status, _) = watch::channel(HighLevelStatus::Disconnected);
        let driver = Driver::new(
            SessionConfig::new("http://127.0.0.1:1"),
            TransportKind::HttpPolling,
            SystemClock::shared(),
            SharedCreationGuard::default(),
            http_client().unwrap(),
            FrameCodec::new(),
            Arc::new(NoOpListener),
            inputs,
            status,
        );
        (driver, queue)
    }

    fn timer(kind: TimerKind, delay_ms: u64, epoch: u64) -> Timer {
        Timer {
            kind,
            delay_ms,
            epoch,
        }
    }

    #[tokio::test]
    async fn test_rescheduled_timer_replaces_pending_one() {
        let (mut driver, _queue) = driver();
        for epoch in 0..100 {
            driver.schedule(timer(TimerKind::KeepaliveCheck, 60_000, epoch));
        }
        driver.schedule(timer(TimerKind::Retry, 60_000, 7));
        assert_eq!(driver.timers.len(), 2);
        assert_eq!(driver.armed.len(), 2);
    }

    #[tokio::test]
    async fn test_latest_schedule_is_the_one_that_fires() {
        let (mut driver, _queue) = driver();
        driver.schedule(timer(TimerKind::ConnectTimeout, 60_000, 1));
        driver.schedule(timer(TimerKind::ConnectTimeout, 5, 2));

        let expired = tokio::time::timeout(Duration::from_secs(5), driver.timers.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(expired.into_inner(), timer(TimerKind::ConnectTimeout, 5, 2));
        assert!(driver.timers.is_empty());
    }

    #[tokio::test]
    async fn test_retire_drops_pending_timers() {
        let (mut driver, _queue) = driver();
        driver.schedule(timer(TimerKind::Pause, 60_000, 1));
        driver.schedule(timer(TimerKind::Heartbeat { phase: 3 }, 60_000, 1));
        driver.retire();
        assert!(driver.timers.is_empty());
        assert!(driver.armed.is_empty());
        assert_eq!(driver.generation, 1);
    }
}
