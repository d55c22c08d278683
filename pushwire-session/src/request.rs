/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Session machine for request/response transports.
//!
//! Each bind is a separate streaming or polling request; control requests
//! travel on separate requests to the control link. The machine creates a
//! session with a polling request, then alternates pauses and binds,
//! watching the stream for silence and recovering or recreating the session
//! when a connection breaks.

use crate::action::{
    Action, ControlAction, Handoff, HandoffReason, HttpAction, Notification, RequestOutcome,
    SessionSnapshot, Timer, TimerKind,
};
use crate::clock::SharedClock;
use crate::config::SessionConfig;
use crate::context::{Refusal, SessionContext};
use crate::event::{Command, Event, TransportEvent};
use crate::guard::SharedCreationGuard;
use crate::heartbeat::HeartbeatTick;
use crate::machine::SessionMachine;
use crate::pending::{ControlRequest, Dispatch};
use crate::progress::ProgressRegion;
use crate::slowing::{SlowClientDetector, SyncVerdict};
use pushwire_core::{DecodeError, HighLevelStatus, SessionError, SessionId, TransportKind};
use pushwire_protocol::{ConOk, ServerMessage, decode_line, split_frame};
use tracing::{debug, error, info, trace, warn};

/// Phase of a request/response session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    /// No session activity.
    Off,
    /// Creation request sent.
    Creating,
    /// Session created, creation response still open.
    Created,
    /// Pause before the first bind.
    FirstPause,
    /// First bind sent.
    FirstBinding,
    /// Pause between binds.
    Pause,
    /// Bind sent.
    Binding,
    /// Data flowing.
    Receiving,
    /// Silence beyond the keepalive.
    Stalling,
    /// Silence beyond the stalled timeout.
    Stalled,
    /// Waiting before a retry or recovery attempt.
    Sleep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindKind {
    First,
    Next,
    Recovery,
}

#[derive(Debug, Clone, Copy)]
struct PendingSwitch {
    target: TransportKind,
    reason: HandoffReason,
    epoch: u64,
}

/// Session machine for request/response transports.
#[derive(Debug)]
pub struct RequestSessionMachine {
    ctx: SessionContext,
    phase: RequestPhase,
    polling: bool,
    /// No data has confirmed that streaming responses get through.
    sensing: bool,
    bound_once: bool,
    recovering: bool,
    progress: ProgressRegion,
    slow: SlowClientDetector,
    /// Polling mode to adopt at the next rebind.
    pending_mode: Option<bool>,
    switch: Option<PendingSwitch>,
    handed_off: bool,
}

impl RequestSessionMachine {
    /// Creates a machine with no session.
    ///
    /// # Arguments
    /// * `config` - Session configuration
    /// * `transport` - `HttpStreaming` or `HttpPolling`
    /// * `clock` - Time source
    /// * `guard` - Creation guard shared by the client's machines
    #[must_use]
    pub fn new(
        config: SessionConfig,
        transport: TransportKind,
        clock: SharedClock,
        guard: SharedCreationGuard,
    ) -> Self {
        let polling = transport.is_polling();
        let sensing = config.forced_transport.is_none() && !polling;
        Self {
            ctx: SessionContext::new(config, clock, guard),
            phase: RequestPhase::Off,
            polling,
            sensing,
            bound_once: false,
            recovering: false,
            progress: ProgressRegion::on_bind(false, 0),
            slow: SlowClientDetector::new(),
            pending_mode: None,
            switch: None,
            handed_off: false,
        }
    }

    /// Creates a machine continuing a session handed over by another one.
    ///
    /// Dispatch [`Command::BindSession`] to bind, or
    /// [`Command::CreateSession`] when the snapshot carries no session.
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
        machine.recovering = recover && machine.ctx.can_recover();
        if machine.recovering {
            machine.ctx.begin_recovery();
        }
        machine
    }

    /// Returns the current phase.
    #[inline]
    #[must_use]
    pub const fn phase(&self) -> RequestPhase {
        self.phase
    }

    /// Returns true when binds use polling requests.
    #[inline]
    #[must_use]
    pub const fn is_polling(&self) -> bool {
        self.polling
    }

    /// Returns true when recovery was disabled after a progress mismatch.
    #[inline]
    #[must_use]
    pub const fn is_recovery_disabled(&self) -> bool {
        self.ctx.recovery_disabled
    }

    fn kind(&self) -> TransportKind {
        if self.polling {
            TransportKind::HttpPolling
        } else {
            TransportKind::HttpStreaming
        }
    }

    fn derive_status(&self) -> HighLevelStatus {
        let connected = HighLevelStatus::Connected(self.kind());
        match self.phase {
            RequestPhase::Off => HighLevelStatus::Disconnected,
            RequestPhase::Creating | RequestPhase::Created => HighLevelStatus::Connecting,
            RequestPhase::FirstPause | RequestPhase::FirstBinding if self.sensing => {
                HighLevelStatus::StreamSensing
            }
            RequestPhase::Binding if self.recovering => HighLevelStatus::TryingRecovery,
            RequestPhase::FirstPause
            | RequestPhase::FirstBinding
            | RequestPhase::Pause
            | RequestPhase::Binding
            | RequestPhase::Receiving
            | RequestPhase::Stalling => connected,
            RequestPhase::Stalled => HighLevelStatus::Stalled,
            RequestPhase::Sleep if self.recovering => HighLevelStatus::TryingRecovery,
            RequestPhase::Sleep => HighLevelStatus::WillRetry,
        }
    }

    // Commands

    fn on_command(&mut self, command: Command) {
        match command {
            Command::CreateSession => {
                if self.phase != RequestPhase::Off {
                    warn!(phase = ?self.phase, "create ignored, session already active");
                    return;
                }
                self.ctx.reopen_heartbeat();
                self.create();
            }
            Command::BindSession => {
                if self.phase != RequestPhase::Off || self.ctx.session_id.is_none() {
                    warn!(phase = ?self.phase, "bind ignored, no session to bind");
                    return;
                }
                if self.recovering {
                    self.bind(BindKind::Recovery);
                } else {
                    self.bind(BindKind::First);
                }
            }
            Command::CloseSession => self.close(),
            Command::RequestSwitch(target) => self.request_switch(target, HandoffReason::Switch),
            Command::RequestSlow => {
                if !self.polling {
                    self.request_mode(true, "slow");
                }
            }
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

    fn create(&mut self) {
        if let Err(err) = self.ctx.acquire_creation() {
            warn!(%err, "session creation refused locally");
            let delay = self.ctx.retry_delay.current();
            self.ctx.retry_delay.increase();
            self.enter_sleep(delay, false);
            return;
        }
        let conn = self.ctx.open_conn();
        self.ctx.bump_epoch();
        let batch = self.ctx.create_batch(true);
        let address = self.ctx.server_address.clone();
        debug!(%conn, "creating session");
        self.ctx.push(Action::Http(HttpAction::Open {
            conn,
            address,
            batch,
        }));
        self.phase = RequestPhase::Creating;
        self.recovering = false;
        self.bound_once = false;
        let timeout = self.ctx.connect_timeout.current();
        self.ctx.schedule(TimerKind::ConnectTimeout, timeout);
    }

    fn bind(&mut self, kind: BindKind) {
        if self.ctx.session_id.is_none() {
            self.violation("bind without a session".to_string());
            return;
        }
        let conn = self.ctx.open_conn();
        self.ctx.bump_epoch();
        let recovery_from = (kind == BindKind::Recovery).then_some(self.ctx.data_count);
        let batch = self.ctx.bind_batch(self.polling, recovery_from);
        let address = self.ctx.server_address.clone();
        debug!(%conn, ?kind, polling = self.polling, "binding session");
        self.ctx.push(Action::Http(HttpAction::Open {
            conn,
            address,
            batch,
        }));
        self.recovering = kind == BindKind::Recovery;
        self.progress = ProgressRegion::on_bind(self.recovering, self.ctx.data_count);
        self.slow.reset();
        self.phase = if kind == BindKind::First {
            RequestPhase::FirstBinding
        } else {
            RequestPhase::Binding
        };
        let timeout = self.ctx.connect_timeout.current();
        self.ctx.schedule(TimerKind::ConnectTimeout, timeout);
    }

    fn close(&mut self) {
        if self.phase == RequestPhase::Off {
            debug!("close ignored, session already off");
            return;
        }
        if self.ctx.session_id.is_some() {
            let batch = self.ctx.session_control_batch("destroy", Some("api"));
            let address = self.ctx.server_address.clone();
            self.ctx.push(Action::Control(ControlAction::Send {
                address,
                batch,
                req_id: None,
            }));
        }
        self.close_stream();
        info!("session closed");
        self.phase = RequestPhase::Off;
        self.switch = None;
        self.recovering = false;
        self.ctx.close_session();
    }

    fn request_switch(&mut self, target: TransportKind, reason: HandoffReason) {
        if !target.is_duplex() {
            let polling = target.is_polling();
            if polling != self.polling {
                self.request_mode(polling, "switch");
            }
            return;
        }
        match self.phase {
            RequestPhase::Off => self.handoff(target, reason, false),
            RequestPhase::FirstPause | RequestPhase::Pause => self.handoff(target, reason, false),
            RequestPhase::Sleep => {
                let recover = self.recovering;
                self.handoff(target, reason, recover);
            }
            RequestPhase::Receiving | RequestPhase::Stalling | RequestPhase::Stalled => {
                self.force_rebind("switch");
                self.arm_switch(target, reason);
            }
            RequestPhase::Creating
            | RequestPhase::Created
            | RequestPhase::FirstBinding
            | RequestPhase::Binding => self.arm_switch(target, reason),
        }
    }

    fn arm_switch(&mut self, target: TransportKind, reason: HandoffReason) {
        let epoch = self.ctx.epoch();
        self.switch = Some(PendingSwitch {
            target,
            reason,
            epoch,
        });
        let timeout = SessionConfig::millis(self.ctx.config.switch_check_timeout);
        self.ctx.schedule(TimerKind::SwitchTimeout, timeout);
    }

    /// Changes between streaming and polling binds.
    fn request_mode(&mut self, polling: bool, cause: &str) {
        match self.phase {
            RequestPhase::Receiving | RequestPhase::Stalling | RequestPhase::Stalled => {
                self.pending_mode = Some(polling);
                self.force_rebind(cause);
            }
            RequestPhase::Off | RequestPhase::FirstPause | RequestPhase::Pause | RequestPhase::Sleep => {
                self.set_polling(polling);
            }
            _ => self.pending_mode = Some(polling),
        }
    }

    fn set_polling(&mut self, polling: bool) {
        if polling != self.polling {
            info!(polling, "changing bind mode");
            self.polling = polling;
            self.sensing = false;
        }
    }

    fn force_rebind(&mut self, cause: &str) {
        if self.ctx.session_id.is_none() {
            return;
        }
        let batch = self.ctx.session_control_batch("force_rebind", Some(cause));
        let address = self.ctx.server_address.clone();
        self.ctx.push(Action::Control(ControlAction::Send {
            address,
            batch,
            req_id: None,
        }));
    }

    fn can_send_control(&self) -> bool {
        self.ctx.session_id.is_some()
            && !matches!(
                self.phase,
                RequestPhase::Off | RequestPhase::Creating | RequestPhase::Sleep
            )
    }

    fn send_request(&mut self, request: ControlRequest) {
        if self.can_send_control() {
            let dispatch = self.ctx.prepare(request);
            self.post(dispatch);
        } else {
            trace!(kind = ?request.kind(), "request queued until the session is ready");
            self.ctx.pending.enqueue_waiting(request);
        }
    }

    fn flush_waiting(&mut self) {
        for dispatch in self.ctx.flush_waiting() {
            self.post(dispatch);
        }
    }

    fn post(&mut self, dispatch: Dispatch) {
        let address = self.ctx.server_address.clone();
        self.ctx.push(Action::Control(ControlAction::Send {
            address,
            batch: dispatch.batch,
            req_id: dispatch.correlated.then_some(dispatch.req_id),
        }));
    }

    // Transport

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Received { conn, frame } => {
                if !self.ctx.is_current(conn) {
                    trace!(%conn, "data from a stale connection ignored");
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
                            self.on_failure("undecodable line");
                        }
                    }
                    if !self.ctx.is_current(conn) {
                        break;
                    }
                }
            }
            TransportEvent::Ended { conn } => {
                if self.ctx.is_current(conn) {
                    self.on_failure("stream ended");
                } else {
                    trace!(%conn, "end of a stale connection ignored");
                }
            }
            TransportEvent::Failed { conn, reason } => {
                if self.ctx.is_current(conn) {
                    self.on_failure(&reason);
                } else {
                    trace!(%conn, reason, "failure of a stale connection ignored");
                }
            }
            TransportEvent::Opened { conn } => trace!(%conn, "open event ignored"),
            TransportEvent::ControlReply { frame } => {
                for line in split_frame(&frame) {
                    match decode_line(line) {
                        Ok(message) => self.on_control_reply(message),
                        Err(err) => warn!(%err, line, "undecodable control reply"),
                    }
                }
            }
            TransportEvent::ControlFailed { req_id, reason } => {
                warn!(?req_id, reason, "control request failed");
                if let Some(req_id) = req_id
                    && let Some(request) = self.ctx.pending.resolve(req_id)
                {
                    self.ctx.emit(Notification::RequestOutcome {
                        req_id,
                        kind: request.kind(),
                        outcome: RequestOutcome::Aborted,
                    });
                }
            }
        }
    }

    fn on_control_reply(&mut self, message: ServerMessage) {
        if self.ctx.on_reply(&message) {
            return;
        }
        match message {
            ServerMessage::Error { code, message } => self.on_refusal(code, message),
            other => debug!(message = other.name(), "control reply ignored"),
        }
    }

    fn on_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::ConOk(conok) => self.on_conok(&conok),
            ServerMessage::ConErr { code, message }
            | ServerMessage::End { code, message }
            | ServerMessage::Error { code, message } => self.on_refusal(code, message),
            ServerMessage::Loop { delay_ms } => self.on_loop(delay_ms),
            ServerMessage::Prog { count } => {
                self.on_activity();
                if let Err(err) = self.ctx.on_prog(&mut self.progress, count) {
                    self.on_out_of_sync(&err);
                }
            }
            ServerMessage::Sync { seconds } => {
                self.on_activity();
                self.on_sync(seconds);
            }
            ServerMessage::WsOk => debug!("channel probe reply ignored"),
            message if message.is_countable() => {
                self.on_activity();
                self.ctx.on_countable(&mut self.progress, message);
            }
            message => {
                self.on_activity();
                if !self.ctx.on_reply(&message) && !self.ctx.on_info(&message) {
                    trace!(message = message.name(), "keepalive");
                }
            }
        }
    }

    fn on_activity(&mut self) {
        match self.phase {
            RequestPhase::Created
            | RequestPhase::FirstBinding
            | RequestPhase::Binding
            | RequestPhase::Receiving
            | RequestPhase::Stalling
            | RequestPhase::Stalled => {
                if self.phase == RequestPhase::Receiving && self.bound_once {
                    self.sensing = false;
                }
                self.phase = RequestPhase::Receiving;
                self.ctx.bump_epoch();
                let timeout = self.receive_timeout();
                self.ctx.schedule(TimerKind::KeepaliveCheck, timeout);
            }
            _ => {}
        }
    }

    fn receive_timeout(&self) -> u64 {
        if self.polling {
            SessionConfig::millis(self.ctx.config.idle_timeout)
        } else {
            self.ctx.keepalive_ms()
        }
    }

    fn on_conok(&mut self, conok: &ConOk) {
        match self.phase {
            RequestPhase::Creating => {
                self.ctx.on_session_created(conok);
                self.phase = RequestPhase::Created;
                self.ctx.bump_epoch();
                let timeout = SessionConfig::millis(self.ctx.config.idle_timeout);
                self.ctx.schedule(TimerKind::KeepaliveCheck, timeout);
                self.flush_waiting();
            }
            RequestPhase::FirstBinding | RequestPhase::Binding => {
                let recovered = self.recovering;
                self.ctx.on_session_bound(conok, recovered);
                self.recovering = false;
                self.bound_once = true;
                let now = self.ctx.now();
                if let Some(timer) = self.ctx.heartbeat.on_bind(now) {
                    self.ctx.schedule_heartbeat(timer);
                }
                self.on_activity();
                self.flush_waiting();
            }
            phase => self.violation(format!("CONOK received in {phase:?}")),
        }
    }

    fn on_loop(&mut self, delay_ms: u64) {
        if !matches!(
            self.phase,
            RequestPhase::Created
                | RequestPhase::FirstBinding
                | RequestPhase::Binding
                | RequestPhase::Receiving
                | RequestPhase::Stalling
                | RequestPhase::Stalled
        ) {
            self.violation(format!("LOOP received in {:?}", self.phase));
            return;
        }
        self.close_stream();
        if let Some(switch) = self.switch.take() {
            self.handoff(switch.target, switch.reason, false);
            return;
        }
        if let Some(polling) = self.pending_mode.take() {
            self.set_polling(polling);
        }
        let first = !self.bound_once;
        self.phase = if first {
            RequestPhase::FirstPause
        } else {
            RequestPhase::Pause
        };
        self.ctx.bump_epoch();
        let config = &self.ctx.config;
        let delay = if self.polling {
            SessionConfig::millis(config.polling_interval).max(delay_ms)
        } else if first && config.spin_fix_enabled {
            config.spin_fix_timeout.map_or(delay_ms, SessionConfig::millis)
        } else {
            delay_ms
        };
        self.ctx.schedule(TimerKind::Pause, delay);
    }

    fn on_sync(&mut self, seconds: u64) {
        let now = self.ctx.now();
        match self.slow.on_sync(seconds, now) {
            SyncVerdict::Slow if !self.polling => {
                if self.ctx.config.slowing_enabled {
                    info!(mean_ms = self.slow.mean_ms(), "client is slow, moving to polling");
                    self.slow.reset();
                    self.request_mode(true, "slow");
                } else {
                    warn!(mean_ms = self.slow.mean_ms(), "client is slow, slowing disabled");
                }
            }
            SyncVerdict::Outlier => debug!(seconds, "sync outlier held"),
            _ => {}
        }
    }

    // Timers

    fn on_timer(&mut self, timer: Timer) {
        if let TimerKind::Heartbeat { phase } = timer.kind {
            self.on_heartbeat(phase);
            return;
        }
        if timer.kind == TimerKind::SwitchTimeout {
            if let Some(switch) = self.switch.filter(|s| s.epoch == timer.epoch) {
                warn!(transport = %switch.target, "switch timed out");
                self.switch = None;
                self.close_stream();
                let recover = self.ctx.can_recover();
                self.handoff(switch.target, switch.reason, recover);
            }
            return;
        }
        if !self.ctx.is_live(&timer) {
            trace!(kind = ?timer.kind, "stale timer discarded");
            return;
        }
        match (self.phase, timer.kind) {
            (
                RequestPhase::Creating | RequestPhase::FirstBinding | RequestPhase::Binding,
                TimerKind::ConnectTimeout,
            ) => {
                self.ctx.connect_timeout.increase();
                if self.phase == RequestPhase::FirstBinding && self.sensing {
                    self.sense_fallback();
                } else {
                    self.on_failure("connect timeout");
                }
            }
            (RequestPhase::Receiving, TimerKind::KeepaliveCheck)
                if self.sensing && self.bound_once =>
            {
                self.sense_fallback();
            }
            (RequestPhase::Created | RequestPhase::Receiving, TimerKind::KeepaliveCheck) => {
                self.phase = RequestPhase::Stalling;
                self.ctx.bump_epoch();
                let timeout = SessionConfig::millis(self.ctx.config.stalled_timeout);
                self.ctx.schedule(TimerKind::StalledCheck, timeout);
            }
            (RequestPhase::Stalling, TimerKind::StalledCheck) => {
                self.phase = RequestPhase::Stalled;
                self.ctx.bump_epoch();
                let timeout = SessionConfig::millis(self.ctx.config.reconnect_timeout);
                self.ctx.schedule(TimerKind::ReconnectCheck, timeout);
            }
            (RequestPhase::Stalled, TimerKind::ReconnectCheck) => self.on_failure("stalled"),
            (RequestPhase::FirstPause, TimerKind::Pause) => self.bind(BindKind::First),
            (RequestPhase::Pause, TimerKind::Pause) => self.bind(BindKind::Next),
            (RequestPhase::Sleep, TimerKind::Retry) => self.wake(),
            (phase, kind) => trace!(?phase, ?kind, "timer ignored"),
        }
    }

    fn on_heartbeat(&mut self, phase: u64) {
        let now = self.ctx.now();
        match self.ctx.heartbeat.on_timer(phase, now) {
            HeartbeatTick::Stale => trace!(phase, "stale heartbeat check"),
            HeartbeatTick::Send(next) => {
                let batch = self.ctx.heartbeat_batch();
                let address = self.ctx.server_address.clone();
                self.ctx.push(Action::Control(ControlAction::Send {
                    address,
                    batch,
                    req_id: None,
                }));
                self.ctx.schedule_heartbeat(next);
            }
            HeartbeatTick::Wait(next) => self.ctx.schedule_heartbeat(next),
        }
    }

    /// Streaming responses do not get through; fall back to polling binds.
    fn sense_fallback(&mut self) {
        warn!("streaming not viable, falling back to polling");
        self.close_stream();
        self.set_polling(true);
        self.bind(BindKind::First);
    }

    fn wake(&mut self) {
        if self.recovering {
            if self.ctx.recovery_time_left() > 0 {
                self.bind(BindKind::Recovery);
                return;
            }
            info!("recovery window exhausted, creating a new session");
            self.ctx.stop_recovery();
            self.ctx.drop_session();
            self.recovering = false;
        }
        self.create();
    }

    // Failures

    fn close_stream(&mut self) {
        if let Some(conn) = self.ctx.release_conn() {
            self.ctx.push(Action::Http(HttpAction::Close { conn }));
        }
        self.ctx.heartbeat.on_unbind();
    }

    /// Single handler for connection failures.
    fn on_failure(&mut self, reason: &str) {
        if matches!(
            self.phase,
            RequestPhase::Off | RequestPhase::Sleep | RequestPhase::FirstPause | RequestPhase::Pause
        ) {
            trace!(reason, phase = ?self.phase, "failure outside a connection ignored");
            return;
        }
        warn!(reason, phase = ?self.phase, "connection failed");
        self.close_stream();
        if let Some(switch) = self.switch.take() {
            let recover = self.ctx.can_recover();
            self.handoff(switch.target, switch.reason, recover);
            return;
        }
        let has_session = self.phase != RequestPhase::Creating && self.ctx.session_id.is_some();
        if has_session && self.ctx.can_recover() {
            let first = self.ctx.begin_recovery();
            let delay = self.ctx.recovery_delay_ms(first);
            info!(delay, first, "recovering session");
            self.enter_sleep(delay, true);
            return;
        }
        self.ctx.stop_recovery();
        let delay = self.ctx.retry_delay_ms();
        self.retry_new_session(delay);
    }

    /// Drops a session the server counts ahead of us and starts a new one.
    fn on_out_of_sync(&mut self, err: &SessionError) {
        warn!(%err, "session out of sync, retrying with a new session");
        self.close_stream();
        self.switch = None;
        self.ctx.stop_recovery();
        let delay = self.ctx.retry_delay_ms();
        self.retry_new_session(delay);
    }

    fn on_refusal(&mut self, code: i32, message: String) {
        if self.phase == RequestPhase::Off {
            debug!(code, message, "refusal after close ignored");
            return;
        }
        self.close_stream();
        self.switch = None;
        match self.ctx.classify_refusal(code, &message) {
            Refusal::Fatal => self.fail(SessionError::Server { code, message }),
            Refusal::Retry { delay_ms } => {
                warn!(code, message, delay_ms, "session refused, retrying");
                self.ctx.stop_recovery();
                self.retry_new_session(delay_ms);
            }
        }
    }

    fn retry_new_session(&mut self, delay: u64) {
        if self.ctx.session_id.is_some() {
            self.ctx.drop_session();
        }
        self.bound_once = false;
        self.enter_sleep(delay, false);
    }

    fn enter_sleep(&mut self, delay: u64, recovering: bool) {
        self.recovering = recovering;
        self.phase = RequestPhase::Sleep;
        self.ctx.bump_epoch();
        self.ctx.schedule(TimerKind::Retry, delay);
    }

    fn fail(&mut self, error: SessionError) {
        error!(%error, "session failed");
        self.close_stream();
        self.phase = RequestPhase::Off;
        self.switch = None;
        self.recovering = false;
        self.ctx.fail(error);
    }

    fn violation(&mut self, detail: String) {
        error!(detail, "internal state violation");
        self.fail(SessionError::Internal(detail));
    }

    fn handoff(&mut self, target: TransportKind, reason: HandoffReason, recover: bool) {
        info!(%target, ?reason, recover, "handing session over");
        self.close_stream();
        self.ctx.heartbeat.close();
        let snapshot = self.ctx.snapshot();
        self.ctx.abort_pending();
        self.ctx.bump_epoch();
        self.phase = RequestPhase::Off;
        self.switch = None;
        self.handed_off = true;
        self.ctx.emit(Notification::Handoff(Box::new(Handoff {
            target,
            reason,
            recover,
            snapshot,
        })));
    }
}

impl SessionMachine for RequestSessionMachine {
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
