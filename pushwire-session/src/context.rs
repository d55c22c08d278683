/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! State shared by both session machines.
//!
//! The context owns everything that outlives a single connection: session
//! identity, counters, recovery window, pending requests, the reverse
//! heartbeat and the outbox of actions.

use crate::action::{
    Action, ConnId, Notification, RequestOutcome, SessionSnapshot, Timer, TimerKind,
};
use crate::backoff::BackoffCounter;
use crate::clock::SharedClock;
use crate::config::{CLIENT_ID, SessionConfig};
use crate::guard::{CreationPermit, SharedCreationGuard};
use crate::heartbeat::{HeartbeatTimer, ReverseHeartbeat};
use crate::pending::{ControlRequest, Dispatch, PendingRequestTable};
use crate::progress::{Countable, ProgOutcome, ProgressRegion};
use crate::recovery::RecoveryWindow;
use pushwire_core::{
    Bandwidth, CauseClass, HighLevelStatus, SessionError, SessionId, classify,
};
use pushwire_protocol::{ConOk, ControlBatch, Operation, ServerMessage, params};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace, warn};

/// Keepalive assumed when neither the server nor the user set one.
pub const DEFAULT_KEEPALIVE_MS: u64 = 5000;

/// How a machine must react to a server refusal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Refusal {
    /// Stop for good.
    Fatal,
    /// Drop the session and create a new one after the delay.
    Retry { delay_ms: u64 },
}

/// State shared by both session machines.
#[derive(Debug)]
pub(crate) struct SessionContext {
    pub(crate) config: SessionConfig,
    clock: SharedClock,
    guard: SharedCreationGuard,
    rng: StdRng,
    pub(crate) retry_delay: BackoffCounter,
    pub(crate) connect_timeout: BackoffCounter,
    pub(crate) recovery: RecoveryWindow,
    pub(crate) pending: PendingRequestTable,
    pub(crate) heartbeat: ReverseHeartbeat,
    pub(crate) session_id: Option<SessionId>,
    old_session: Option<SessionId>,
    pub(crate) server_address: String,
    granted_bandwidth: Option<Bandwidth>,
    pub(crate) requested_bandwidth: Bandwidth,
    pub(crate) data_count: u64,
    pub(crate) recovery_disabled: bool,
    ttl_unlimited: bool,
    /// A session worked since the last retry; the next retry is jittered.
    established: bool,
    keepalive_ms: u64,
    epoch: u64,
    next_conn: u64,
    current_conn: Option<ConnId>,
    attempt_started_at: u64,
    status: HighLevelStatus,
    outbox: Vec<Action>,
}

impl SessionContext {
    pub(crate) fn new(config: SessionConfig, clock: SharedClock, guard: SharedCreationGuard) -> Self {
        let rng = match config.jitter_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            retry_delay: BackoffCounter::new(SessionConfig::millis(config.retry_delay)),
            connect_timeout: BackoffCounter::new(SessionConfig::millis(config.connect_timeout)),
            heartbeat: ReverseHeartbeat::new(
                SessionConfig::millis(config.reverse_heartbeat_interval),
                0,
            ),
            server_address: config.server_address.clone(),
            requested_bandwidth: config.requested_max_bandwidth,
            config,
            clock,
            guard,
            rng,
            recovery: RecoveryWindow::new(),
            pending: PendingRequestTable::new(),
            session_id: None,
            old_session: None,
            granted_bandwidth: None,
            data_count: 0,
            recovery_disabled: false,
            ttl_unlimited: false,
            established: false,
            keepalive_ms: 0,
            epoch: 0,
            next_conn: 0,
            current_conn: None,
            attempt_started_at: 0,
            status: HighLevelStatus::Disconnected,
            outbox: Vec::new(),
        }
    }

    pub(crate) fn from_snapshot(
        config: SessionConfig,
        clock: SharedClock,
        guard: SharedCreationGuard,
        snapshot: SessionSnapshot,
    ) -> Self {
        let mut ctx = Self::new(config, clock, guard);
        ctx.session_id = snapshot.session_id;
        ctx.server_address = snapshot.server_address;
        ctx.granted_bandwidth = snapshot.bandwidth;
        ctx.requested_bandwidth = snapshot.requested_bandwidth;
        ctx.data_count = snapshot.data_count;
        ctx.recovery = snapshot.recovery;
        ctx.recovery_disabled = snapshot.recovery_disabled;
        ctx.heartbeat = ReverseHeartbeat::new(snapshot.reverse_heartbeat_ms, 0);
        for request in snapshot.waiting {
            ctx.pending.enqueue_waiting(request);
        }
        ctx
    }

    #[inline]
    pub(crate) fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    // Timers

    #[inline]
    pub(crate) const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Invalidates every timer scheduled so far.
    #[inline]
    pub(crate) fn bump_epoch(&mut self) {
        self.epoch += 1;
    }

    pub(crate) fn schedule(&mut self, kind: TimerKind, delay_ms: u64) {
        trace!(?kind, delay_ms, epoch = self.epoch, "scheduling timer");
        self.outbox.push(Action::Schedule(Timer {
            kind,
            delay_ms,
            epoch: self.epoch,
        }));
    }

    pub(crate) fn schedule_heartbeat(&mut self, timer: HeartbeatTimer) {
        self.outbox.push(Action::Schedule(Timer {
            kind: TimerKind::Heartbeat { phase: timer.phase },
            delay_ms: timer.delay_ms,
            epoch: self.epoch,
        }));
    }

    /// Returns true if the timer belongs to the current phase.
    #[inline]
    pub(crate) fn is_live(&self, timer: &Timer) -> bool {
        timer.epoch == self.epoch
    }

    // Connections

    pub(crate) fn open_conn(&mut self) -> ConnId {
        self.next_conn += 1;
        let conn = ConnId(self.next_conn);
        self.current_conn = Some(conn);
        self.attempt_started_at = self.now();
        conn
    }

    #[inline]
    pub(crate) fn is_current(&self, conn: ConnId) -> bool {
        self.current_conn == Some(conn)
    }

    #[inline]
    pub(crate) const fn current_conn(&self) -> Option<ConnId> {
        self.current_conn
    }

    pub(crate) fn release_conn(&mut self) -> Option<ConnId> {
        self.current_conn.take()
    }

    // Outbox

    #[inline]
    pub(crate) fn push(&mut self, action: Action) {
        self.outbox.push(action);
    }

    #[inline]
    pub(crate) fn emit(&mut self, notification: Notification) {
        self.outbox.push(Action::Notify(notification));
    }

    pub(crate) fn set_status(&mut self, status: HighLevelStatus) {
        if self.status != status {
            debug!(from = %self.status, to = %status, "status changed");
            self.status = status;
            self.emit(Notification::StatusChanged(status));
        }
    }

    #[inline]
    pub(crate) const fn status(&self) -> HighLevelStatus {
        self.status
    }

    pub(crate) fn take_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.outbox)
    }

    // Creation and binding

    pub(crate) fn acquire_creation(&mut self) -> Result<(), SessionError> {
        match self.guard.try_acquire(self.now()) {
            CreationPermit::Granted => Ok(()),
            CreationPermit::Refused {
                attempts,
                window_ms,
            } => Err(SessionError::CreationRefused {
                attempts,
                window_ms,
            }),
        }
    }

    pub(crate) fn create_batch(&mut self, polling: bool) -> ControlBatch {
        let mut batch = ControlBatch::new(Operation::CreateSession);
        batch.put_str(params::CID, CLIENT_ID);
        if let Some(adapter_set) = &self.config.adapter_set {
            batch.put_str(params::ADAPTER_SET, adapter_set);
        }
        if let Some(user) = &self.config.user {
            batch.put_str(params::USER, user);
        }
        if let Some(password) = &self.config.password {
            batch.put_str(params::PASSWORD, password);
        }
        if let Bandwidth::Limited(_) = self.requested_bandwidth {
            batch.put_str(params::REQUESTED_MAX_BANDWIDTH, &self.requested_bandwidth.to_param());
        }
        self.put_connection_params(&mut batch, polling);
        if self.ttl_unlimited {
            batch.put_str(params::TTL_MILLIS, "unlimited");
        }
        if let Some(old) = &self.old_session {
            batch.put_str(params::OLD_SESSION, old.as_str());
        }
        batch
    }

    pub(crate) fn bind_batch(&mut self, polling: bool, recovery_from: Option<u64>) -> ControlBatch {
        let mut batch = ControlBatch::new(Operation::BindSession);
        if let Some(session) = &self.session_id {
            batch.put_str(params::SESSION, session.as_str());
        }
        self.put_connection_params(&mut batch, polling);
        if let Some(from) = recovery_from {
            batch.put_uint(params::RECOVERY_FROM, from);
        }
        batch
    }

    fn put_connection_params(&mut self, batch: &mut ControlBatch, polling: bool) {
        let keepalive = SessionConfig::millis(self.config.keepalive_interval);
        if keepalive > 0 && !polling {
            batch.put_uint(params::KEEPALIVE_MILLIS, keepalive);
        }
        let promised = self.heartbeat.requested_ms();
        if promised > 0 {
            batch.put_uint(params::INACTIVITY_MILLIS, promised);
        }
        let now = self.now();
        if let Some(timer) = self.heartbeat.set_max(promised, now) {
            self.schedule_heartbeat(timer);
        }
        batch.put_bool(params::POLLING, polling);
        if polling {
            batch.put_uint(
                params::POLLING_MILLIS,
                SessionConfig::millis(self.config.polling_interval),
            );
            batch.put_uint(params::IDLE_MILLIS, SessionConfig::millis(self.config.idle_timeout));
        } else if let Some(length) = self.config.content_length {
            batch.put_uint(params::CONTENT_LENGTH, length);
        }
        batch.put_bool(params::SEND_SYNC, !polling);
    }

    /// Builds a session control request such as `force_rebind` or `destroy`.
    pub(crate) fn session_control_batch(&mut self, op: &str, cause: Option<&str>) -> ControlBatch {
        let mut batch = ControlBatch::new(Operation::Control);
        batch.put_uint(params::REQ_ID, self.pending.allocate_id().value());
        batch.put_str(params::OP, op);
        if let Some(session) = &self.session_id {
            batch.put_str(params::SESSION, session.as_str());
        }
        if let Some(cause) = cause {
            batch.put_str(params::CAUSE, cause);
        }
        let now = self.now();
        self.heartbeat.on_control_sent(now);
        batch
    }

    pub(crate) fn heartbeat_batch(&self) -> ControlBatch {
        let mut batch = ControlBatch::new(Operation::Heartbeat);
        if let Some(session) = &self.session_id {
            batch.put_str(params::SESSION, session.as_str());
        }
        batch
    }

    /// Keepalive agreed with the server, or a sensible default.
    pub(crate) fn keepalive_ms(&self) -> u64 {
        match self.keepalive_ms {
            0 => match SessionConfig::millis(self.config.keepalive_interval) {
                0 => DEFAULT_KEEPALIVE_MS,
                requested => requested,
            },
            agreed => agreed,
        }
    }

    fn apply_conok(&mut self, conok: &ConOk) {
        self.session_id = Some(conok.session_id);
        self.old_session = None;
        self.ttl_unlimited = false;
        self.established = true;
        self.keepalive_ms = conok.keepalive_ms;
        if let Some(link) = &conok.control_link {
            self.server_address = control_address(&self.config.server_address, link);
        }
        self.retry_delay
            .reset(SessionConfig::millis(self.config.retry_delay));
        self.connect_timeout
            .reset(SessionConfig::millis(self.config.connect_timeout));
    }

    pub(crate) fn on_session_created(&mut self, conok: &ConOk) {
        self.data_count = 0;
        self.recovery = RecoveryWindow::new();
        self.recovery_disabled = false;
        self.apply_conok(conok);
        debug!(session = %conok.session_id, keepalive_ms = conok.keepalive_ms, "session created");
        self.emit(Notification::SessionCreated {
            session_id: conok.session_id,
            keepalive_ms: conok.keepalive_ms,
            request_limit: conok.request_limit,
        });
    }

    pub(crate) fn on_session_bound(&mut self, conok: &ConOk, recovering: bool) {
        if self.session_id.is_some_and(|id| id != conok.session_id) {
            warn!(
                expected = ?self.session_id,
                received = %conok.session_id,
                "bind answered with a different session id"
            );
        }
        self.apply_conok(conok);
        if recovering {
            self.recovery.restore_time_left();
            debug!(session = %conok.session_id, data_count = self.data_count, "session recovered");
            self.emit(Notification::SessionRecovered {
                session_id: conok.session_id,
            });
        }
    }

    /// Forgets the current session; the next creation names it as old.
    pub(crate) fn drop_session(&mut self) {
        if let Some(old) = self.session_id.take() {
            self.old_session = Some(old);
        }
        self.data_count = 0;
        self.recovery = RecoveryWindow::new();
        self.recovery_disabled = false;
        self.heartbeat.on_unbind();
        self.abort_pending();
    }

    pub(crate) fn abort_pending(&mut self) {
        for (req_id, request) in self.pending.discard() {
            self.emit(Notification::RequestOutcome {
                req_id,
                kind: request.kind(),
                outcome: RequestOutcome::Aborted,
            });
        }
    }

    /// Ends the session for good and reports the error.
    pub(crate) fn fail(&mut self, error: SessionError) {
        self.session_id = None;
        self.recovery = RecoveryWindow::new();
        self.current_conn = None;
        self.heartbeat.close();
        self.bump_epoch();
        self.abort_pending();
        self.emit(Notification::Failed(error));
    }

    /// Closes the session on user request.
    pub(crate) fn close_session(&mut self) {
        self.session_id = None;
        self.recovery = RecoveryWindow::new();
        self.current_conn = None;
        self.heartbeat.close();
        self.bump_epoch();
        self.abort_pending();
    }

    /// Restores a usable heartbeat scheduler before a new session.
    pub(crate) fn reopen_heartbeat(&mut self) {
        if self.heartbeat.is_closed() {
            self.heartbeat = ReverseHeartbeat::new(self.heartbeat.requested_ms(), 0);
        }
    }

    // Recovery and retry

    pub(crate) fn can_recover(&self) -> bool {
        self.session_id.is_some()
            && !self.recovery_disabled
            && !self.config.session_recovery_timeout.is_zero()
            && self.recovery_time_left() > 0
    }

    pub(crate) fn recovery_time_left(&self) -> i64 {
        self.recovery.time_left(
            SessionConfig::millis(self.config.session_recovery_timeout),
            self.now(),
        )
    }

    /// Starts or continues a recovery run; returns true for its first attempt.
    pub(crate) fn begin_recovery(&mut self) -> bool {
        let first = !self.recovery.is_recovering();
        self.recovery = RecoveryWindow::next(true, &self.recovery, self.now());
        first
    }

    pub(crate) fn stop_recovery(&mut self) {
        self.recovery = RecoveryWindow::next(false, &self.recovery, self.now());
    }

    /// Delay before the next recovery attempt.
    pub(crate) fn recovery_delay_ms(&mut self, first: bool) -> u64 {
        if first {
            return 0;
        }
        let left = u64::try_from(self.recovery_time_left().max(0)).unwrap_or(0);
        let delay = self.retry_delay.current().min(left);
        self.retry_delay.increase();
        delay
    }

    /// Delay before the next creation attempt.
    ///
    /// The first retry after a working session is randomised; later ones
    /// follow the retry counter minus the time the failed attempt took.
    pub(crate) fn retry_delay_ms(&mut self) -> u64 {
        if self.established {
            self.established = false;
            let max = SessionConfig::millis(self.config.first_retry_max_delay);
            return self.rng.gen_range(0..=max);
        }
        let elapsed = self.now().saturating_sub(self.attempt_started_at);
        let delay = self.retry_delay.current().saturating_sub(elapsed);
        self.retry_delay.increase();
        delay
    }

    /// Decides the reaction to a `CONERR`, `END` or `ERROR`.
    pub(crate) fn classify_refusal(&mut self, code: i32, message: &str) -> Refusal {
        match classify(code) {
            CauseClass::Fatal => Refusal::Fatal,
            CauseClass::Retry => Refusal::Retry {
                delay_ms: self.retry_delay_ms(),
            },
            CauseClass::ServerBusy => {
                self.connect_timeout.increase_to_max();
                self.ttl_unlimited = true;
                Refusal::Retry { delay_ms: 0 }
            }
            CauseClass::Deferred => {
                let max = message
                    .trim()
                    .parse::<u64>()
                    .unwrap_or_else(|_| self.retry_delay.current());
                Refusal::Retry {
                    delay_ms: self.rng.gen_range(0..=max),
                }
            }
        }
    }

    // Control requests

    /// Registers a request for writing.
    pub(crate) fn prepare(&mut self, request: ControlRequest) -> Dispatch {
        let dispatch = self.pending.send(request, self.session_id.as_ref());
        self.after_dispatch(&dispatch);
        dispatch
    }

    pub(crate) fn flush_waiting(&mut self) -> Vec<Dispatch> {
        let dispatches = self.pending.flush_waiting(self.session_id.as_ref());
        for dispatch in &dispatches {
            self.after_dispatch(dispatch);
        }
        dispatches
    }

    fn after_dispatch(&mut self, dispatch: &Dispatch) {
        let now = self.now();
        self.heartbeat.on_control_sent(now);
        if let Some(tag) = &dispatch.message {
            self.emit(Notification::MessageSent {
                sequence: tag.sequence.clone(),
                prog: tag.prog,
            });
        }
        if !dispatch.correlated {
            self.emit(Notification::RequestOutcome {
                req_id: dispatch.req_id,
                kind: dispatch.kind,
                outcome: RequestOutcome::Ok,
            });
        }
    }

    /// Resolves a `REQOK`/`REQERR`; returns false for other messages.
    pub(crate) fn on_reply(&mut self, message: &ServerMessage) -> bool {
        let (req_id, outcome) = match message {
            ServerMessage::ReqOk { req_id } => (*req_id, RequestOutcome::Ok),
            ServerMessage::ReqErr {
                req_id,
                code,
                message,
            } => (
                *req_id,
                RequestOutcome::Err {
                    code: *code,
                    message: message.clone(),
                },
            ),
            _ => return false,
        };
        match self.pending.resolve(req_id) {
            Some(request) => self.emit(Notification::RequestOutcome {
                req_id,
                kind: request.kind(),
                outcome,
            }),
            None => warn!(%req_id, "reply for unknown request ignored"),
        }
        true
    }

    /// Handles session information messages; returns false for others.
    pub(crate) fn on_info(&mut self, message: &ServerMessage) -> bool {
        match message {
            ServerMessage::Cons(bandwidth) => {
                self.granted_bandwidth = Some(*bandwidth);
                self.emit(Notification::BandwidthGranted(*bandwidth));
            }
            ServerMessage::ServName(name) => self.emit(Notification::ServerName(name.clone())),
            ServerMessage::ClientIp(ip) => self.emit(Notification::ClientIp(ip.clone())),
            _ => return false,
        }
        true
    }

    // Progress

    pub(crate) fn on_countable(&mut self, region: &mut ProgressRegion, message: ServerMessage) {
        match region.on_countable(message, &mut self.data_count) {
            Countable::Deliver(message) => self.emit(Notification::Data(message)),
            Countable::Skip => trace!(data_count = self.data_count, "duplicate skipped"),
            Countable::Buffered => trace!("countable buffered until progress is known"),
        }
    }

    /// Applies a `PROG`.
    ///
    /// # Errors
    /// Returns `SessionError::Recovery` when the server is ahead of the client;
    /// the session can no longer be trusted and must be replaced.
    pub(crate) fn on_prog(
        &mut self,
        region: &mut ProgressRegion,
        count: u64,
    ) -> Result<(), SessionError> {
        let released = match region.on_prog(count, &mut self.data_count) {
            ProgOutcome::Consistent { released } => released,
            ProgOutcome::Realigned { released } => {
                warn!(
                    server = count,
                    local = self.data_count,
                    "progress mismatch, recovery disabled for this session"
                );
                self.recovery_disabled = true;
                released
            }
            ProgOutcome::Gap { local, server } => {
                return Err(SessionError::Recovery { local, server });
            }
        };
        for message in released {
            self.emit(Notification::Data(message));
        }
        Ok(())
    }

    /// Captures the state carried by a hand-off.
    pub(crate) fn snapshot(&mut self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            server_address: self.server_address.clone(),
            bandwidth: self.granted_bandwidth,
            requested_bandwidth: self.requested_bandwidth,
            data_count: self.data_count,
            recovery: self.recovery,
            recovery_disabled: self.recovery_disabled,
            reverse_heartbeat_ms: self.heartbeat.requested_ms(),
            waiting: self.pending.take_waiting(),
        }
    }
}

/// Combines the configured scheme with a control link host.
fn control_address(base: &str, link: &str) -> String {
    match base.split_once("://") {
        Some((scheme, _)) => format!("{scheme}://{link}"),
        None => link.to_string(),
    }
}
