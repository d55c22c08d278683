/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

#![allow(dead_code)]

use pushwire_core::TransportKind;
use pushwire_protocol::ControlBatch;
use pushwire_session::{
    Action, ChannelAction, Command, ConnId, ControlAction, DuplexSessionMachine, Event,
    HttpAction, ManualClock, Notification, RequestSessionMachine, SessionConfig, SessionMachine,
    SharedCreationGuard, Timer, TimerKind, TransportEvent,
};
use std::sync::Arc;

pub const START_MS: u64 = 1000;

pub fn config() -> SessionConfig {
    SessionConfig::new("https://push.example.com").with_jitter_seed(7)
}

pub struct Harness<M: SessionMachine> {
    pub machine: M,
    pub clock: Arc<ManualClock>,
    pub history: Vec<Action>,
}

pub fn http(config: SessionConfig) -> Harness<RequestSessionMachine> {
    http_with_guard(config, SharedCreationGuard::default())
}

pub fn http_with_guard(
    config: SessionConfig,
    guard: SharedCreationGuard,
) -> Harness<RequestSessionMachine> {
    let clock = Arc::new(ManualClock::new(START_MS));
    let machine =
        RequestSessionMachine::new(config, TransportKind::HttpStreaming, clock.clone(), guard);
    Harness {
        machine,
        clock,
        history: Vec::new(),
    }
}

pub fn ws(config: SessionConfig) -> Harness<DuplexSessionMachine> {
    let clock = Arc::new(ManualClock::new(START_MS));
    let machine = DuplexSessionMachine::new(
        config,
        TransportKind::WsStreaming,
        clock.clone(),
        SharedCreationGuard::default(),
    );
    Harness {
        machine,
        clock,
        history: Vec::new(),
    }
}

impl<M: SessionMachine> Harness<M> {
    pub fn dispatch(&mut self, event: impl Into<Event>) -> Vec<Action> {
        self.machine.dispatch(event.into());
        let actions = self.machine.take_actions();
        self.history.extend(actions.iter().cloned());
        actions
    }

    pub fn command(&mut self, command: Command) -> Vec<Action> {
        self.dispatch(command)
    }

    pub fn last_conn(&self) -> ConnId {
        self.history
            .iter()
            .rev()
            .find_map(|action| match action {
                Action::Http(HttpAction::Open { conn, .. })
                | Action::Channel(ChannelAction::Open { conn, .. }) => Some(*conn),
                _ => None,
            })
            .expect("no connection opened")
    }

    pub fn receive(&mut self, frame: &str) -> Vec<Action> {
        let conn = self.last_conn();
        self.dispatch(TransportEvent::Received {
            conn,
            frame: frame.to_string(),
        })
    }

    pub fn opened(&mut self) -> Vec<Action> {
        let conn = self.last_conn();
        self.dispatch(TransportEvent::Opened { conn })
    }

    pub fn fail(&mut self) -> Vec<Action> {
        let conn = self.last_conn();
        self.dispatch(TransportEvent::Failed {
            conn,
            reason: "connection reset".to_string(),
        })
    }

    pub fn timers(&self, kind: TimerKind) -> Vec<Timer> {
        self.history
            .iter()
            .filter_map(|action| match action {
                Action::Schedule(timer) if timer.kind == kind => Some(*timer),
                _ => None,
            })
            .collect()
    }

    pub fn last_timer(&self, kind: TimerKind) -> Timer {
        *self.timers(kind).last().expect("timer not scheduled")
    }

    pub fn last_heartbeat(&self) -> Timer {
        self.history
            .iter()
            .rev()
            .find_map(|action| match action {
                Action::Schedule(timer) if matches!(timer.kind, TimerKind::Heartbeat { .. }) => {
                    Some(*timer)
                }
                _ => None,
            })
            .expect("no heartbeat scheduled")
    }

    /// Dispatches the latest timer of the given kind without moving the clock.
    pub fn fire(&mut self, kind: TimerKind) -> Vec<Action> {
        let timer = self.last_timer(kind);
        self.dispatch(timer)
    }
}

pub fn notifications(actions: &[Action]) -> Vec<Notification> {
    actions
        .iter()
        .filter_map(|action| match action {
            Action::Notify(notification) => Some(notification.clone()),
            _ => None,
        })
        .collect()
}

pub fn http_opens(actions: &[Action]) -> Vec<ControlBatch> {
    actions
        .iter()
        .filter_map(|action| match action {
            Action::Http(HttpAction::Open { batch, .. }) => Some(batch.clone()),
            _ => None,
        })
        .collect()
}

pub fn channel_writes(actions: &[Action]) -> Vec<ControlBatch> {
    actions
        .iter()
        .filter_map(|action| match action {
            Action::Channel(ChannelAction::Send { batch, .. }) => Some(batch.clone()),
            _ => None,
        })
        .collect()
}

pub fn control_posts(actions: &[Action]) -> Vec<ControlBatch> {
    actions
        .iter()
        .filter_map(|action| match action {
            Action::Control(ControlAction::Send { batch, .. }) => Some(batch.clone()),
            _ => None,
        })
        .collect()
}

pub fn scheduled(actions: &[Action], kind: TimerKind) -> Option<Timer> {
    actions.iter().find_map(|action| match action {
        Action::Schedule(timer) if timer.kind == kind => Some(*timer),
        _ => None,
    })
}

pub const CONOK: &str = "CONOK,S1,50000,5000,*\r\n";
