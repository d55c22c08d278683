/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Session machine for duplex channels.
//!
//! A single channel carries the session stream and the control requests.
//! The channel is opened and probed, then the session is created or bound
//! on it. While streaming, the regions in [`regions`] run side by side.
//! Channel failures lead to one of four pauses: before a session exists,
//! before a plain retry, before the first recovery attempt, or between
//! recovery attempts.

pub mod regions;

use crate::action::{
    Action, ChannelAction, Handoff, HandoffReason, Notification, SessionSnapshot, Timer, TimerKind,
};
use crate::clock::SharedClock;
use crate::config::SessionConfig;
use crate::context::{Refusal, SessionContext};
use crate::event::{Command, Event, TransportEvent};
use crate::guard::SharedCreationGuard;
use crate::heartbeat::HeartbeatTick;
use crate::machine::SessionMachine;
use crate::pending::{ControlRequest, Dispatch};
use crate::slowing::SyncVerdict;
use pushwire_core::{DecodeError, HighLevelStatus, SessionError, SessionId, TransportKind};
use pushwire_protocol::{ConOk, ControlBatch, Operation, ServerMessage, decode_line, split_frame};
use regions::{MainRegion, StreamingRegions};
use std::mem;
use tracing::{debug, error, info, trace, warn};

/// What the channel is being opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Create a new session.
    Create,
    /// Bind to an existing session.
    Bind,
    /// Bind to a broken session, replaying missed data.
    Recover,
}

/// State of a duplex session.
#[derive(Debug, Clone)]
pub enum DuplexState {
    /// Nothing started.
    Init,
    /// Channel connecting.
    Opening {
        /// Why the channel is opened.
        purpose: Purpose,
    },
    /// Channel open, readiness probe sent.
    Probing {
        /// Why the channel is opened.
        purpose: Purpose,
    },
    /// Create or bind request sent, or about to be sent.
    CreatingOrBinding {
        /// Request kind.
        purpose: Purpose,
        /// Whether the request was written.
        sent: bool,
    },
    /// Session bound and streaming.
    Streaming(Box<StreamingRegions>),
    /// Waiting after a failure before any session existed.
    Pause1,
    /// Waiting before creating a new session.
    Pause2,
    /// Waiting before the first recovery attempt.
    PauseR0,
    /// Waiting between recovery attempts.
    PauseR,
    /// Session closed.
    Disconnected,
}

impl DuplexState {
    fn name(&self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::Opening { .. } => "Opening",
            Self::Probing { .. } => "Probing",
            Self::CreatingOrBinding { .. } => "CreatingOrBinding",
            Self::Streaming(_) => "Streaming",
            Self::Pause1 => "Pause1",
            Self::Pause2 => "Pause2",
            Self::PauseR0 => "PauseR0",
            Self::PauseR => "PauseR",
            Self::Disconnected => "Disconnected",
        }
    }

    const fn is_pause(&self) -> bool {
        matches!(self, Self::Pause1 | Self::Pause2 | Self::PauseR0 | Self::PauseR)
    }
}

/// Session machine for duplex channels.
#[derive(Debug)]
pub struct DuplexSessionMachine {
    ctx: SessionContext,
    state: DuplexState,
    polling: bool,
    /// Stream-sensing is allowed: no transport was forced.
    sensing: bool,
    ever_streamed: bool,
    recover_on_bind: bool,
    switch_epoch: Option<u64>,
    handed_off: bool,
}

impl DuplexSessionMachine {
    /// Creates a machine with no session.
    ///
    /// # Arguments
    /// * `config` - Session configuration
    /// * `transport` - `WsStreaming` or `WsPolling`
    /// * `clock` - Time source
    /// * `guard` - Creation guard shared by the client's machines
    #[must_use]
    pub fn new(
        config: SessionConfig,
        transport: TransportKind,
        clock: SharedClock,
        guard: SharedCreationGuard,
    ) -> Self {
        let sensing = config.forced_transport.is_none();
        Self {
            ctx: SessionContext::new(config, clock, guard),
            state: DuplexState::Init,
            polling: transport.is_polling(),
            sensing,
            ever_streamed: false,
            recover_on_bind: false,
            switch_epoch: None,
            handed_off: false,
        }
    }

    /// Creates a machine continuing a session handed over by another one.
    #[must_use]
    pub fn resume(
        config: SessionConfig,
        transport: TransportKind,
        clock: SharedClock,
        guard: SharedCreationGuard,
        snapshot: SessionSnapshot,
        recover: bool,
    ) -> Self {
        let mut machine = Self::new(config.clone(), transport, clock.clone(), guard.clone());
        machine.ctx = SessionContext::from_snapshot(config, clock, guard, snapshot);
        machine.recover_on_bind = recover && machine.ctx.can_recover();
        machine
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> &DuplexState {
        &self.state
    }

    /// Returns the main region while streaming.
    #[must_use]
    pub fn main_region(&self) -> Option<MainRegion> {
        match &self.state {
            DuplexState::Streaming(regions) => Some(regions.main),
            _ => None,
        }
    }

    /// Returns true when recovery was disabled after a progress mismatch.
    #[inline]
    #[must_use]
    pub const fn is_recovery_disabled(&self) -> bool {
        self.ctx.recovery_disabled
    }

    fn kind(&self) -> TransportKind {
        if self.polling {
            TransportKind::WsPolling
        } else {
            TransportKind::WsStreaming
        }
    }

    fn derive_status(&self) -> HighLevelStatus {
        match &self.state {
            DuplexState::Init | DuplexState::Disconnected => HighLevelStatus::Disconnected,
            DuplexState::Opening { purpose }
            | DuplexState::Probing { purpose }
            | DuplexState::CreatingOrBinding { purpose, .. } => match purpose {
                Purpose::Create => HighLevelStatus::Connecting,
                Purpose::Bind if self.ever_streamed || !self.sensing => {
                    HighLevelStatus::Connected(self.kind())
                }
                Purpose::Bind => HighLevelStatus::StreamSensing,
                Purpose::Recover => HighLevelStatus::TryingRecovery,
            },
            DuplexState::Streaming(regions) if regions.main == MainRegion::Stalled => {
                HighLevelStatus::Stalled
            }
            DuplexState::Streaming(_) => HighLevelStatus::Connected(self.kind()),
            DuplexState::Pause1 | DuplexState::Pause2 => HighLevelStatus::WillRetry,
            DuplexState::PauseR0 | DuplexState::PauseR => HighLevelStatus::TryingRecovery,
        }
    }

    // Commands

    fn on_command(&mut self, command: Command) {
        match command {
            Command::CreateSession => match self.state {
                DuplexState::Init | DuplexState::Disconnected => {
                    self.ctx.reopen_heartbeat();
                    self.open(Purpose::Create);
                }
                _ => warn!(state = self.state.name(), "create ignored, session already active"),
            },
            Command::BindSession => {
                if !matches!(self.state, DuplexState::Init) || self.ctx.session_id.is_none() {
                    warn!(state = self.state.name(), "bind ignored, no session to bind");
                    return;
                }
                if self.recover_on_bind {
                    self.ctx.begin_recovery();
                    self.open(Purpose::Recover);
                } else {
                    self.open(Purpose::Bind);
                }
            }
            Command::CloseSession => self.close(),
            Command::RequestSwitch(target) => self.request_switch(target),
            Command::RequestSlow => self.request_slow(),
            Command::ChangeBandwidth(bandwidth) => {
                self.ctx.requested_bandwidth = bandwidth;
                self.send_request(ControlRequest::constrain(bandwidth));
            }
            Command::ChangeReverseHeartbeat(interval) => {
                let now = self.ctx.now();
                if let Some(timer) = self
                    .ctx
                    .heartbeat
                    .set_requested(SessionConfig::millis(interval), now)
                {
                    self.ctx.schedule_heartbeat(timer);
                }
            }
            Command::Send(request) => self.send_request(request),
        }
    }

    fn open(&mut self, purpose: Purpose) {
        if purpose == Purpose::Create
            && let Err(err) = self.ctx.acquire_creation()
        {
            warn!(%err, "session creation refused locally");
            let delay = self.ctx.retry_delay.current();
            self.ctx.retry_delay.increase();
            self.enter_pause(DuplexState::Pause1, delay);
            return;
        }
        let conn = self.ctx.open_conn();
        self.ctx.bump_epoch();
        let address = self.ctx.server_address.clone();
        debug!(%conn, ?purpose, "opening channel");
        self.ctx
            .push(Action::Channel(ChannelAction::Open { conn, address }));
        self.state = DuplexState::Opening { purpose };
        let timeout = self.ctx.connect_timeout.current();
        self.ctx.schedule(TimerKind::ConnectTimeout, timeout);
    }

    fn write(&mut self, batch: ControlBatch) {
        match self.ctx.current_conn() {
            Some(conn) => self
                .ctx
                .push(Action::Channel(ChannelAction::Send { conn, batch })),
            None => warn!(op = %batch.operation(), "no open channel, batch dropped"),
        }
    }

    fn send_session_request(&mut self, purpose: Purpose) {
        let batch = match purpose {
            Purpose::Create => self.ctx.create_batch(self.polling),
            Purpose::Bind => self.ctx.bind_batch(self.polling, None),
            Purpose::Recover => {
                let from = self.ctx.data_count;
                self.ctx.bind_batch(self.polling, Some(from))
            }
        };
        self.write(batch);
        self.state = DuplexState::CreatingOrBinding {
            purpose,
            sent: true,
        };
    }

    fn close(&mut self) {
        if matches!(self.state, DuplexState::Disconnected) {
            debug!("close ignored, session already closed");
            return;
        }
        let bound = matches!(
            self.state,
            DuplexState::Streaming(_) | DuplexState::CreatingOrBinding { .. }
        );
        if bound && self.ctx.session_id.is_some() {
            let batch = self.ctx.session_control_batch("destroy", Some("api"));
            self.write(batch);
        }
        self.close_channel();
        info!("session closed");
        self.state = DuplexState::Disconnected;
        self.switch_epoch = None;
        self.ctx.close_session();
    }

    fn request_switch(&mut self, target: TransportKind) {
        if target == self.kind() {
            debug!(%target, "switch to the current transport ignored");
            return;
        }
        match &mut self.state {
            DuplexState::Streaming(regions) if regions.main.is_steady() => {
                regions.main = MainRegion::Switching { target };
                self.force_rebind("switch");
                self.arm_switch();
            }
            DuplexState::Streaming(_) => debug!("transport change already in progress"),
            DuplexState::Disconnected => debug!("switch ignored, session closed"),
            DuplexState::PauseR0
            | DuplexState::PauseR
            | DuplexState::Opening {
                purpose: Purpose::Recover,
            }
            | DuplexState::Probing {
                purpose: Purpose::Recover,
            }
            | DuplexState::CreatingOrBinding {
                purpose: Purpose::Recover,
                ..
            } => {
                self.close_channel();
                self.handoff(target, HandoffReason::Switch, true);
            }
            _ => {
                self.close_channel();
                self.handoff(target, HandoffReason::Switch, false);
            }
        }
    }

    fn request_slow(&mut self) {
        if self.polling {
            debug!("slow request ignored, already polling");
            return;
        }
        match &mut self.state {
            DuplexState::Streaming(regions) if regions.main.is_steady() => {
                regions.main = MainRegion::Slowing;
                self.force_rebind("slow");
                self.arm_switch();
            }
            _ => debug!(state = self.state.name(), "slow request ignored, not streaming"),
        }
    }

    fn arm_switch(&mut self) {
        self.switch_epoch = Some(self.ctx.epoch());
        let timeout = SessionConfig::millis(self.ctx.config.switch_check_timeout);
        self.ctx.schedule(TimerKind::SwitchTimeout, timeout);
    }

    fn force_rebind(&mut self, cause: &str) {
        let batch = self.ctx.session_control_batch("force_rebind", Some(cause));
        self.write(batch);
    }

    fn send_request(&mut self, request: ControlRequest) {
        if matches!(self.state, DuplexState::Streaming(_)) {
            let dispatch = self.ctx.prepare(request);
            self.post(dispatch);
        } else {
            trace!(kind = ?request.kind(), "request queued until the session is streaming");
            self.ctx.pending.enqueue_waiting(request);
        }
    }

    fn post(&mut self, dispatch: Dispatch) {
        self.write(dispatch.batch);
    }

    // Transport

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened { conn } => {
                if !self.ctx.is_current(conn) {
                    trace!(%conn, "open of a stale channel ignored");
                    return;
                }
                match self.state {
                    DuplexState::Opening { purpose } => {
                        self.write(ControlBatch::new(Operation::Wsok));
                        self.state = DuplexState::Probing { purpose };
                    }
                    _ => self.violation(format!("channel opened in {}", self.state.name())),
                }
            }
            TransportEvent::Received { conn, frame } => {
                if !self.ctx.is_current(conn) {
                    trace!(%conn, "data from a stale channel ignored");
                    return;
                }
                for line in split_frame(&frame) {
                    match decode_line(line) {
                        Ok(message) => self.on_message(message),
                        Err(DecodeError::UnknownMessage(kind)) => {
                            debug!(%kind, "unknown message ignored");
                        }
                        Err(err) => {
                            warn!(%err, line, "undecodable line");
                            self.on_channel_failure("undecodable line");
                        }
                    }
                    if !self.ctx.is_current(conn) {
                        break;
                    }
                }
            }
            TransportEvent::Ended { conn } => {
                if self.ctx.is_current(conn) {
                    self.on_channel_failure("channel closed");
                } else {
                    trace!(%conn, "close of a stale channel ignored");
                }
            }
            TransportEvent::Failed { conn, reason } => {
                if self.ctx.is_current(conn) {
                    self.on_channel_failure(&reason);
                } else {
                    trace!(%conn, reason, "failure of a stale channel ignored");
                }
            }
            TransportEvent::ControlReply { .. } | TransportEvent::ControlFailed { .. } => {
                trace!("control link event ignored on a duplex session");
            }
        }
    }

    fn on_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::WsOk => match self.state {
                DuplexState::Probing { purpose } => self.send_session_request(purpose),
                _ => debug!(state = self.state.name(), "unexpected channel probe reply"),
            },
            ServerMessage::ConOk(conok) => self.on_conok(&conok),
            ServerMessage::ConErr { code, message }
            | ServerMessage::End { code, message }
            | ServerMessage::Error { code, message } => self.on_refusal(code, message),
            ServerMessage::Loop { delay_ms } => self.on_loop(delay_ms),
            ServerMessage::Prog { count } => {
                self.on_activity();
                let result = match &mut self.state {
                    DuplexState::Streaming(regions) => {
                        self.ctx.on_prog(&mut regions.progress, count)
                    }
                    _ => Ok(()),
                };
                if let Err(err) = result {
                    warn!(%err, "session out of sync, retrying with a new session");
                    self.close_channel();
                    self.plain_retry();
                }
            }
            ServerMessage::Sync { seconds } => {
                self.on_activity();
                self.on_sync(seconds);
            }
            message if message.is_countable() => {
                self.on_activity();
                match &mut self.state {
                    DuplexState::Streaming(regions) => {
                        self.ctx.on_countable(&mut regions.progress, message);
                    }
                    _ => warn!(
                        message = message.name(),
                        state = self.state.name(),
                        "countable outside streaming dropped"
                    ),
                }
            }
            message => {
                self.on_activity();
                if !self.ctx.on_reply(&message) && !self.ctx.on_info(&message) {
                    trace!(message = message.name(), "keepalive");
                }
            }
        }
    }

    fn on_conok(&mut self, conok: &ConOk) {
        let DuplexState::CreatingOrBinding {
            purpose,
            sent: true,
        } = self.state
        else {
            self.violation(format!("CONOK received in {}", self.state.name()));
            return;
        };
        let recovering = purpose == Purpose::Recover;
        match purpose {
            Purpose::Create => self.ctx.on_session_created(conok),
            Purpose::Bind | Purpose::Recover => self.ctx.on_session_bound(conok, recovering),
        }
        self.recover_on_bind = false;
        self.ever_streamed = true;
        self.state = DuplexState::Streaming(Box::new(StreamingRegions::new(
            recovering,
            self.ctx.data_count,
        )));
        let now = self.ctx.now();
        if let Some(timer) = self.ctx.heartbeat.on_bind(now) {
            self.ctx.schedule_heartbeat(timer);
        }
        self.restart_keepalive();
        for dispatch in self.ctx.flush_waiting() {
            self.post(dispatch);
        }
    }

    fn restart_keepalive(&mut self) {
        self.ctx.bump_epoch();
        let timeout = if self.polling {
            SessionConfig::millis(self.ctx.config.idle_timeout)
        } else {
            self.ctx.keepalive_ms()
        };
        self.ctx.schedule(TimerKind::KeepaliveCheck, timeout);
    }

    fn on_activity(&mut self) {
        if let DuplexState::Streaming(regions) = &mut self.state
            && regions.main.is_steady()
        {
            regions.main = MainRegion::Receiving;
            self.restart_keepalive();
        }
    }

    fn on_loop(&mut self, delay_ms: u64) {
        let main = match &self.state {
            DuplexState::Streaming(regions) => regions.main,
            _ => {
                self.violation(format!("LOOP received in {}", self.state.name()));
                return;
            }
        };
        match main {
            MainRegion::Switching { target } => {
                self.close_channel();
                self.handoff(target, HandoffReason::Switch, false);
            }
            MainRegion::Slowing => {
                self.close_channel();
                self.handoff(TransportKind::HttpPolling, HandoffReason::Slow, false);
            }
            MainRegion::Receiving | MainRegion::Stalling | MainRegion::Stalled => {
                self.ctx.heartbeat.on_unbind();
                self.switch_epoch = None;
                let delay = if self.polling {
                    SessionConfig::millis(self.ctx.config.polling_interval).max(delay_ms)
                } else {
                    delay_ms
                };
                self.ctx.bump_epoch();
                if delay == 0 {
                    self.send_session_request(Purpose::Bind);
                    let timeout = self.ctx.connect_timeout.current();
                    self.ctx.schedule(TimerKind::ConnectTimeout, timeout);
                } else {
                    self.state = DuplexState::CreatingOrBinding {
                        purpose: Purpose::Bind,
                        sent: false,
                    };
                    self.ctx.schedule(TimerKind::Pause, delay);
                }
            }
        }
    }

    fn on_sync(&mut self, seconds: u64) {
        let now = self.ctx.now();
        let verdict = match &mut self.state {
            DuplexState::Streaming(regions) => regions.slowing.on_sync(seconds, now),
            _ => return,
        };
        match verdict {
            SyncVerdict::Slow if self.ctx.config.slowing_enabled => {
                info!("client is slow, rebinding in polling mode");
                self.request_slow();
            }
            SyncVerdict::Slow => {
                info!("client is slow, switching transport");
                self.request_switch(TransportKind::HttpStreaming);
            }
            SyncVerdict::Outlier => debug!(seconds, "sync outlier held"),
            SyncVerdict::Calibrated | SyncVerdict::Normal => {}
        }
    }

    // Timers

    fn on_timer(&mut self, timer: Timer) {
        match timer.kind {
            TimerKind::Heartbeat { phase } => {
                self.on_heartbeat(phase);
                return;
            }
            TimerKind::SwitchTimeout => {
                if self.switch_epoch == Some(timer.epoch) {
                    self.switch_timed_out();
                }
                return;
            }
            _ => {}
        }
        if !self.ctx.is_live(&timer) {
            trace!(kind = ?timer.kind, "stale timer discarded");
            return;
        }
        match (&mut self.state, timer.kind) {
            (
                DuplexState::Opening { .. }
                | DuplexState::Probing { .. }
                | DuplexState::CreatingOrBinding { sent: true, .. },
                TimerKind::ConnectTimeout,
            ) => {
                self.ctx.connect_timeout.increase();
                self.on_channel_failure("connect timeout");
            }
            (DuplexState::CreatingOrBinding { sent: false, .. }, TimerKind::Pause) => {
                self.send_session_request(Purpose::Bind);
                let timeout = self.ctx.connect_timeout.current();
                self.ctx.schedule(TimerKind::ConnectTimeout, timeout);
            }
            (DuplexState::Streaming(regions), TimerKind::KeepaliveCheck)
                if regions.main == MainRegion::Receiving =>
            {
                regions.main = MainRegion::Stalling;
                self.ctx.bump_epoch();
                let timeout = SessionConfig::millis(self.ctx.config.stalled_timeout);
                self.ctx.schedule(TimerKind::StalledCheck, timeout);
            }
            (DuplexState::Streaming(regions), TimerKind::StalledCheck)
                if regions.main == MainRegion::Stalling =>
            {
                regions.main = MainRegion::Stalled;
                self.ctx.bump_epoch();
                let timeout = SessionConfig::millis(self.ctx.config.reconnect_timeout);
                self.ctx.schedule(TimerKind::ReconnectCheck, timeout);
            }
            (DuplexState::Streaming(regions), TimerKind::ReconnectCheck)
                if regions.main == MainRegion::Stalled =>
            {
                self.on_channel_failure("stalled");
            }
            (DuplexState::Pause1 | DuplexState::Pause2, TimerKind::Retry) => {
                self.open(Purpose::Create);
            }
            (DuplexState::PauseR0 | DuplexState::PauseR, TimerKind::Retry) => {
                if self.ctx.recovery_time_left() > 0 {
                    self.open(Purpose::Recover);
                } else {
                    info!("recovery window exhausted, creating a new session");
                    self.ctx.stop_recovery();
                    self.ctx.drop_session();
                    self.open(Purpose::Create);
                }
            }
            (state, kind) => trace!(state = state.name(), ?kind, "timer ignored"),
        }
    }

    fn on_heartbeat(&mut self, phase: u64) {
        if !matches!(self.state, DuplexState::Streaming(_)) {
            trace!(phase, "heartbeat check outside streaming");
            return;
        }
        let now = self.ctx.now();
        match self.ctx.heartbeat.on_timer(phase, now) {
            HeartbeatTick::Stale => trace!(phase, "stale heartbeat check"),
            HeartbeatTick::Send(next) => {
                let batch = self.ctx.heartbeat_batch();
                self.write(batch);
                self.ctx.schedule_heartbeat(next);
            }
            HeartbeatTick::Wait(next) => self.ctx.schedule_heartbeat(next),
        }
    }

    fn switch_timed_out(&mut self) {
        let target = match self.main_region() {
            Some(MainRegion::Switching { target }) => (target, HandoffReason::Switch),
            Some(MainRegion::Slowing) => (TransportKind::HttpPolling, HandoffReason::Slow),
            _ => return,
        };
        warn!(transport = %target.0, "transport change timed out");
        self.close_channel();
        let recover = self.ctx.can_recover();
        self.handoff(target.0, target.1, recover);
    }

    // Failures

    fn close_channel(&mut self) {
        if let Some(conn) = self.ctx.release_conn() {
            self.ctx.push(Action::Channel(ChannelAction::Close { conn }));
        }
        self.ctx.heartbeat.on_unbind();
    }

    fn enter_pause(&mut self, pause: DuplexState, delay: u64) {
        debug_assert!(pause.is_pause());
        self.state = pause;
        self.switch_epoch = None;
        self.ctx.bump_epoch();
        self.ctx.schedule(TimerKind::Retry, delay);
    }

    fn plain_retry(&mut self) {
        self.ctx.stop_recovery();
        if self.ctx.session_id.is_some() {
            self.ctx.drop_session();
        }
        let delay = self.ctx.retry_delay_ms();
        self.enter_pause(DuplexState::Pause2, delay);
    }

    fn begin_recovery(&mut self) {
        let first = self.ctx.begin_recovery();
        let delay = self.ctx.recovery_delay_ms(first);
        info!(delay, first, "recovering session");
        let pause = if first {
            DuplexState::PauseR0
        } else {
            DuplexState::PauseR
        };
        self.enter_pause(pause, delay);
    }

    /// Single handler for channel failures.
    fn on_channel_failure(&mut self, reason: &str) {
        if matches!(self.state, DuplexState::Init | DuplexState::Disconnected) || self.state.is_pause()
        {
            trace!(reason, state = self.state.name(), "failure outside a channel ignored");
            return;
        }
        warn!(reason, state = self.state.name(), "channel failed");
        self.close_channel();
        let previous = mem::replace(&mut self.state, DuplexState::Init);
        let purpose = match previous {
            DuplexState::Streaming(regions) => {
                match regions.main {
                    MainRegion::Switching { target } => {
                        let recover = self.ctx.can_recover();
                        self.handoff(target, HandoffReason::Switch, recover);
                    }
                    MainRegion::Slowing => {
                        let recover = self.ctx.can_recover();
                        self.handoff(TransportKind::HttpPolling, HandoffReason::Slow, recover);
                    }
                    _ if self.ctx.can_recover() => self.begin_recovery(),
                    _ => self.plain_retry(),
                }
                return;
            }
            DuplexState::Opening { purpose }
            | DuplexState::Probing { purpose }
            | DuplexState::CreatingOrBinding { purpose, .. } => purpose,
            other => {
                self.state = other;
                return;
            }
        };
        let never_streamed = self.sensing && !self.ever_streamed;
        match purpose {
            Purpose::Create if never_streamed => {
                self.ctx.stop_recovery();
                self.handoff(TransportKind::HttpStreaming, HandoffReason::StreamSense, false);
            }
            Purpose::Create => {
                let delay = self.ctx.retry_delay_ms();
                self.enter_pause(DuplexState::Pause1, delay);
            }
            Purpose::Bind if never_streamed => {
                let recover = self.ctx.can_recover();
                self.handoff(TransportKind::HttpStreaming, HandoffReason::StreamSense, recover);
            }
            Purpose::Bind | Purpose::Recover if self.ctx.can_recover() => self.begin_recovery(),
            Purpose::Bind | Purpose::Recover => self.plain_retry(),
        }
    }

    fn on_refusal(&mut self, code: i32, message: String) {
        if matches!(self.state, DuplexState::Init | DuplexState::Disconnected) {
            debug!(code, message, "refusal outside a session ignored");
            return;
        }
        self.close_channel();
        match self.ctx.classify_refusal(code, &message) {
            Refusal::Fatal => self.fail(SessionError::Server { code, message }),
            Refusal::Retry { delay_ms } => {
                warn!(code, message, delay_ms, "session refused, retrying");
                self.ctx.stop_recovery();
                if self.ctx.session_id.is_some() {
                    self.ctx.drop_session();
                }
                self.enter_pause(DuplexState::Pause2, delay_ms);
            }
        }
    }

    fn fail(&mut self, error: SessionError) {
        error!(%error, "session failed");
        self.close_channel();
        self.state = DuplexState::Disconnected;
        self.switch_epoch = None;
        self.ctx.fail(error);
    }

    fn violation(&mut self, detail: String) {
        error!(detail, "internal state violation");
        self.fail(SessionError::Internal(detail));
    }

    fn handoff(&mut self, target: TransportKind, reason: HandoffReason, recover: bool) {
        info!(%target, ?reason, recover, "handing session over");
        self.ctx.heartbeat.close();
        let snapshot = self.ctx.snapshot();
        self.ctx.abort_pending();
        self.ctx.bump_epoch();
        self.state = DuplexState::Disconnected;
        self.switch_epoch = None;
        self.handed_off = true;
        self.ctx.emit(Notification::Handoff(Box::new(Handoff {
            target,
            reason,
            recover,
            snapshot,
        })));
    }
}

impl SessionMachine for DuplexSessionMachine {
    fn dispatch(&mut self, event: Event) {
        if self.handed_off {
            trace!(?event, "event after hand-off ignored");
            return;
        }
        match event {
            Event::Command(command) => self.on_command(command),
            Event::Transport(event) => self.on_transport(event),
            Event::Timer(timer) => self.on_timer(timer),
        }
        if !self.handed_off {
            let status = self.derive_status();
            self.ctx.set_status(status);
        }
    }

    fn take_actions(&mut self) -> Vec<Action> {
        self.ctx.take_actions()
    }

    fn status(&self) -> HighLevelStatus {
        self.ctx.status()
    }

    fn transport(&self) -> TransportKind {
        self.kind()
    }

    fn session_id(&self) -> Option<SessionId> {
        self.ctx.session_id
    }

    fn data_count(&self) -> u64 {
        self.ctx.data_count
    }

    fn is_handed_off(&self) -> bool {
        self.handed_off
    }
}
