/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Scenario tests for the request/response session machine.

mod common;

use common::{
    CONOK, config, control_posts, http, http_opens, http_with_guard, notifications, scheduled,
};
use pushwire_core::{HighLevelStatus, SessionError, TransportKind};
use pushwire_protocol::{Operation, params};
use pushwire_session::{
    Command, ControlRequest, CreationGuard, Notification, RequestPhase, RequestSessionMachine,
    SessionMachine, SharedCreationGuard, TimerKind, TransportEvent,
};
use std::time::Duration;

/// Drives a fresh machine up to a bound, receiving stream with one update.
fn receiving(harness: &mut common::Harness<RequestSessionMachine>) {
    harness.command(Command::CreateSession);
    harness.receive(CONOK);
    harness.receive("LOOP,0\r\n");
    harness.fire(TimerKind::Pause);
    harness.receive(&format!("{CONOK}U,1,1,a|b\r\n"));
}

#[test]
fn test_create_then_bind_delivers_data() {
    let mut h = http(config());

    let actions = h.command(Command::CreateSession);
    let opens = http_opens(&actions);
    assert_eq!(opens.len(), 1);
    assert_eq!(opens[0].operation(), Operation::CreateSession);
    assert_eq!(opens[0].param(params::POLLING).unwrap(), "true");
    assert_eq!(h.machine.status(), HighLevelStatus::Connecting);

    let actions = h.receive(CONOK);
    assert!(notifications(&actions).iter().any(|n| matches!(
        n,
        Notification::SessionCreated { session_id, keepalive_ms: 5000, .. }
            if session_id.as_str() == "S1"
    )));
    assert_eq!(h.machine.phase(), RequestPhase::Created);

    h.receive("LOOP,0\r\n");
    assert_eq!(h.machine.phase(), RequestPhase::FirstPause);
    assert_eq!(h.machine.status(), HighLevelStatus::StreamSensing);

    let actions = h.fire(TimerKind::Pause);
    let bind = &http_opens(&actions)[0];
    assert_eq!(bind.operation(), Operation::BindSession);
    assert_eq!(bind.param(params::SESSION).unwrap(), "S1");
    assert_eq!(bind.param(params::POLLING).unwrap(), "false");
    assert!(!bind.has_param(params::RECOVERY_FROM));

    let actions = h.receive(&format!("{CONOK}U,1,1,a|b\r\n"));
    let delivered = notifications(&actions)
        .into_iter()
        .filter(|n| matches!(n, Notification::Data(_)))
        .count();
    assert_eq!(delivered, 1);
    assert_eq!(h.machine.phase(), RequestPhase::Receiving);
    assert_eq!(h.machine.data_count(), 1);
    assert_eq!(
        h.machine.status(),
        HighLevelStatus::Connected(TransportKind::HttpStreaming)
    );
}

#[test]
fn test_stale_timer_is_discarded() {
    let mut h = http(config());
    receiving(&mut h);

    let stale = h.timers(TimerKind::KeepaliveCheck)[0];
    let actions = h.dispatch(stale);
    assert!(actions.is_empty());
    assert_eq!(h.machine.phase(), RequestPhase::Receiving);
}

#[test]
fn test_stale_connection_is_ignored() {
    let mut h = http(config());
    h.command(Command::CreateSession);
    let first = h.last_conn();
    h.receive(CONOK);
    h.receive("LOOP,0\r\n");
    h.fire(TimerKind::Pause);

    let actions = h.dispatch(TransportEvent::Failed {
        conn: first,
        reason: "late".to_string(),
    });
    assert!(actions.is_empty());
    assert_eq!(h.machine.phase(), RequestPhase::FirstBinding);
}

#[test]
fn test_stall_chain_then_recovery() {
    let mut h = http(config());
    receiving(&mut h);

    h.clock.advance(5000);
    h.fire(TimerKind::KeepaliveCheck);
    assert_eq!(h.machine.phase(), RequestPhase::Stalling);

    h.clock.advance(2000);
    h.fire(TimerKind::StalledCheck);
    assert_eq!(h.machine.status(), HighLevelStatus::Stalled);

    h.clock.advance(3000);
    let actions = h.fire(TimerKind::ReconnectCheck);
    assert_eq!(h.machine.phase(), RequestPhase::Sleep);
    assert_eq!(h.machine.status(), HighLevelStatus::TryingRecovery);
    assert_eq!(scheduled(&actions, TimerKind::Retry).unwrap().delay_ms, 0);

    let actions = h.fire(TimerKind::Retry);
    let bind = &http_opens(&actions)[0];
    assert_eq!(bind.param(params::SESSION).unwrap(), "S1");
    assert_eq!(bind.param(params::RECOVERY_FROM).unwrap(), "1");
    assert_eq!(h.machine.status(), HighLevelStatus::TryingRecovery);

    let actions = h.receive(&format!("{CONOK}PROG,1\r\nU,1,1,c\r\n"));
    let notes = notifications(&actions);
    assert!(
        notes
            .iter()
            .any(|n| matches!(n, Notification::SessionRecovered { .. }))
    );
    assert_eq!(
        notes
            .iter()
            .filter(|n| matches!(n, Notification::Data(_)))
            .count(),
        1
    );
    assert_eq!(h.machine.data_count(), 2);
    assert_eq!(
        h.machine.status(),
        HighLevelStatus::Connected(TransportKind::HttpStreaming)
    );
}

#[test]
fn test_recovery_skips_replayed_data_and_disables_recovery() {
    let mut h = http(config());
    receiving(&mut h);

    h.fail();
    h.fire(TimerKind::Retry);
    let actions = h.receive(&format!("{CONOK}U,1,1,a|b\r\nU,1,1,c|d\r\nPROG,2\r\n"));

    let delivered = notifications(&actions)
        .into_iter()
        .filter(|n| matches!(n, Notification::Data(_)))
        .count();
    assert_eq!(delivered, 1);
    assert_eq!(h.machine.data_count(), 2);
    assert!(h.machine.is_recovery_disabled());
}

#[test]
fn test_prog_ahead_of_local_count_retries_with_new_session() {
    let mut h = http(config());
    receiving(&mut h);

    let actions = h.receive("PROG,4\r\n");
    assert!(
        !notifications(&actions)
            .iter()
            .any(|n| matches!(n, Notification::Failed(_)))
    );
    assert_eq!(h.machine.phase(), RequestPhase::Sleep);
    assert_eq!(h.machine.status(), HighLevelStatus::WillRetry);
    assert!(h.machine.session_id().is_none());

    let retry = scheduled(&actions, TimerKind::Retry).unwrap();
    h.clock.advance(retry.delay_ms);
    let actions = h.fire(TimerKind::Retry);
    let create = &http_opens(&actions)[0];
    assert_eq!(create.operation(), Operation::CreateSession);
    assert_eq!(create.param(params::OLD_SESSION).unwrap(), "S1");
}

#[test]
fn test_unknown_message_is_ignored() {
    let mut h = http(config());
    receiving(&mut h);

    let actions = h.receive("FUTURE,1\r\nU,1,1,c|d\r\n");
    assert!(
        !notifications(&actions)
            .iter()
            .any(|n| matches!(n, Notification::Failed(_)))
    );
    assert_eq!(h.machine.data_count(), 2);
    assert_eq!(h.machine.phase(), RequestPhase::Receiving);
}

#[test]
fn test_unrecoverable_failure_creates_new_session() {
    let config = config().with_session_recovery_timeout(Duration::ZERO);
    let mut h = http(config);
    receiving(&mut h);

    let actions = h.fail();
    let retry = scheduled(&actions, TimerKind::Retry).unwrap();
    assert!(retry.delay_ms <= 100);
    assert_eq!(h.machine.status(), HighLevelStatus::WillRetry);
    assert!(h.machine.session_id().is_none());

    h.clock.advance(retry.delay_ms);
    let actions = h.fire(TimerKind::Retry);
    let create = &http_opens(&actions)[0];
    assert_eq!(create.operation(), Operation::CreateSession);
    assert_eq!(create.param(params::OLD_SESSION).unwrap(), "S1");
    assert!(!create.has_param(params::RECOVERY_FROM));
    assert_eq!(h.machine.phase(), RequestPhase::Creating);
}

#[test]
fn test_recovery_window_exhausted_creates_new_session() {
    let config = config().with_session_recovery_timeout(Duration::from_millis(3000));
    let mut h = http(config);
    receiving(&mut h);

    h.fail();
    h.fire(TimerKind::Retry);
    h.clock.advance(2000);
    let actions = h.fail();
    let delay = scheduled(&actions, TimerKind::Retry).unwrap().delay_ms;
    assert_eq!(delay, 1000);

    h.clock.advance(delay);
    let actions = h.fire(TimerKind::Retry);
    let create = &http_opens(&actions)[0];
    assert_eq!(create.operation(), Operation::CreateSession);
    assert_eq!(create.param(params::OLD_SESSION).unwrap(), "S1");
    assert_eq!(h.machine.data_count(), 0);
}

#[test]
fn test_fatal_refusal_disconnects() {
    let mut h = http(config());
    h.command(Command::CreateSession);

    let actions = h.receive("CONERR,1,denied\r\n");
    assert!(notifications(&actions).iter().any(|n| matches!(
        n,
        Notification::Failed(SessionError::Server { code: 1, .. })
    )));
    assert!(
        notifications(&actions)
            .iter()
            .any(|n| matches!(n, Notification::StatusChanged(HighLevelStatus::Disconnected)))
    );
    assert_eq!(h.machine.phase(), RequestPhase::Off);
}

#[test]
fn test_server_busy_retries_with_unlimited_ttl() {
    let mut h = http(config());
    h.command(Command::CreateSession);

    let actions = h.receive("CONERR,5,busy\r\n");
    assert_eq!(scheduled(&actions, TimerKind::Retry).unwrap().delay_ms, 0);

    let actions = h.fire(TimerKind::Retry);
    let create = &http_opens(&actions)[0];
    assert_eq!(create.param(params::TTL_MILLIS).unwrap(), "unlimited");
    assert_eq!(
        scheduled(&actions, TimerKind::ConnectTimeout).unwrap().delay_ms,
        60_000
    );
}

#[test]
fn test_creation_guard_refuses_bursts() {
    let guard = SharedCreationGuard::new(CreationGuard::new(1, 1000));
    let mut first = http_with_guard(config(), guard.clone());
    let mut second = http_with_guard(config(), guard);

    first.command(Command::CreateSession);
    let actions = second.command(Command::CreateSession);

    assert!(http_opens(&actions).is_empty());
    assert_eq!(second.machine.phase(), RequestPhase::Sleep);
    assert_eq!(second.machine.status(), HighLevelStatus::WillRetry);
}

#[test]
fn test_reverse_heartbeat_sent_only_when_idle() {
    let config = config().with_reverse_heartbeat_interval(Duration::from_millis(1000));
    let mut h = http(config);
    receiving(&mut h);

    let timer = h.last_heartbeat();
    assert_eq!(timer.delay_ms, 1000);
    h.clock.advance(1000);
    let actions = h.dispatch(timer);
    let sent = control_posts(&actions);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].operation(), Operation::Heartbeat);

    h.clock.advance(500);
    let actions = h.command(Command::Send(ControlRequest::log("still here")));
    assert_eq!(control_posts(&actions)[0].operation(), Operation::SendLog);

    h.clock.advance(500);
    let timer = h.last_heartbeat();
    let actions = h.dispatch(timer);
    assert!(control_posts(&actions).is_empty());
    assert_eq!(h.last_heartbeat().delay_ms, 500);
}

#[test]
fn test_requests_wait_for_session_then_resolve() {
    let mut h = http(config());
    let actions = h.command(Command::Send(ControlRequest::subscribe(
        1,
        [("LS_mode".to_string(), "MERGE".to_string())],
    )));
    assert!(control_posts(&actions).is_empty());

    h.command(Command::CreateSession);
    let actions = h.receive(CONOK);
    let posted = control_posts(&actions);
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].param(params::OP).unwrap(), "add");
    assert_eq!(posted[0].param(params::SUB_ID).unwrap(), "1");
    let req_id = posted[0].param(params::REQ_ID).unwrap().into_owned();

    let actions = h.dispatch(TransportEvent::ControlReply {
        frame: format!("REQOK,{req_id}\r\n"),
    });
    assert!(notifications(&actions).iter().any(|n| matches!(
        n,
        Notification::RequestOutcome {
            outcome: pushwire_session::RequestOutcome::Ok,
            ..
        }
    )));
}

#[test]
fn test_close_sends_destroy_and_aborts_pending() {
    let mut h = http(config());
    receiving(&mut h);
    h.command(Command::Send(ControlRequest::unsubscribe(3)));

    let actions = h.command(Command::CloseSession);
    let destroy = control_posts(&actions)
        .into_iter()
        .find(|b| b.param(params::OP).as_deref() == Some("destroy"))
        .unwrap();
    assert_eq!(destroy.param(params::SESSION).unwrap(), "S1");
    assert!(notifications(&actions).iter().any(|n| matches!(
        n,
        Notification::RequestOutcome {
            outcome: pushwire_session::RequestOutcome::Aborted,
            ..
        }
    )));
    assert_eq!(h.machine.status(), HighLevelStatus::Disconnected);
}

#[test]
fn test_slow_request_rebinds_in_polling() {
    let mut h = http(config());
    receiving(&mut h);

    let actions = h.command(Command::RequestSlow);
    let rebind = &control_posts(&actions)[0];
    assert_eq!(rebind.param(params::OP).unwrap(), "force_rebind");
    assert_eq!(rebind.param(params::CAUSE).unwrap(), "slow");

    h.receive("LOOP,0\r\n");
    assert!(h.machine.is_polling());
    let actions = h.fire(TimerKind::Pause);
    assert_eq!(http_opens(&actions)[0].param(params::POLLING).unwrap(), "true");
}

#[test]
fn test_switch_to_duplex_hands_off_on_loop() {
    let mut h = http(config());
    receiving(&mut h);

    h.command(Command::RequestSwitch(TransportKind::WsStreaming));
    let actions = h.receive("LOOP,0\r\n");
    let handoff = notifications(&actions)
        .into_iter()
        .find_map(|n| match n {
            Notification::Handoff(handoff) => Some(handoff),
            _ => None,
        })
        .unwrap();
    assert_eq!(handoff.target, TransportKind::WsStreaming);
    assert!(!handoff.recover);
    assert_eq!(handoff.snapshot.data_count, 1);
    assert!(h.machine.is_handed_off());
    assert!(h.dispatch(Command::CloseSession).is_empty());
}

#[test]
fn test_spin_fix_delays_first_bind() {
    let config = config()
        .with_spin_fix_enabled(true)
        .with_spin_fix_timeout(Duration::from_millis(250));
    let mut h = http(config);
    h.command(Command::CreateSession);
    h.receive(CONOK);

    let actions = h.receive("LOOP,0\r\n");
    assert_eq!(scheduled(&actions, TimerKind::Pause).unwrap().delay_ms, 250);
}

#[test]
fn test_stream_sense_falls_back_to_polling() {
    let mut h = http(config());
    h.command(Command::CreateSession);
    h.receive(CONOK);
    h.receive("LOOP,0\r\n");
    h.fire(TimerKind::Pause);
    assert_eq!(h.machine.phase(), RequestPhase::FirstBinding);

    h.clock.advance(4000);
    let actions = h.fire(TimerKind::ConnectTimeout);
    let bind = &http_opens(&actions)[0];
    assert_eq!(bind.operation(), Operation::BindSession);
    assert_eq!(bind.param(params::POLLING).unwrap(), "true");
    assert!(h.machine.is_polling());

    h.receive(CONOK);
    assert_eq!(
        h.machine.status(),
        HighLevelStatus::Connected(TransportKind::HttpPolling)
    );
}
