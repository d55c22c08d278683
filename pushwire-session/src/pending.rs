/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Outbound control requests and their correlation.
//!
//! Every request written on a session gets a request id. Requests the
//! server acknowledges stay in the pending table until a `REQOK`/`REQERR`
//! resolves them. Requests issued while the session cannot accept control
//! traffic wait in per-category queues and are flushed in a fixed order
//! once it can.

use pushwire_core::{Bandwidth, ReqId, SessionId};
use pushwire_protocol::{ControlBatch, Operation, params};
use std::collections::{BTreeMap, VecDeque};

/// Sequence used by messages that need no ordering.
pub const UNORDERED_SEQUENCE: &str = "UNORDERED_MESSAGES";

/// Category of a control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Subscription activation.
    Subscribe,
    /// Subscription removal.
    Unsubscribe,
    /// Subscription frequency change.
    Reconfigure,
    /// Client message.
    SendMessage,
    /// Push notification device registration.
    Register,
    /// Push notification subscription.
    MpnSubscribe,
    /// Push notification subscription removal.
    MpnUnsubscribe,
    /// Push notification removal by filter.
    MpnUnsubscribeFilter,
    /// Bandwidth constraint change.
    Constrain,
    /// Client log forwarding.
    Log,
}

impl RequestKind {
    /// Order in which waiting requests are flushed.
    pub const FLUSH_ORDER: [Self; 10] = [
        Self::Subscribe,
        Self::Reconfigure,
        Self::Unsubscribe,
        Self::SendMessage,
        Self::Register,
        Self::MpnSubscribe,
        Self::MpnUnsubscribe,
        Self::MpnUnsubscribeFilter,
        Self::Constrain,
        Self::Log,
    ];

    /// Returns the operation line used for this category.
    #[must_use]
    pub const fn operation(self) -> Operation {
        match self {
            Self::SendMessage => Operation::Msg,
            Self::Log => Operation::SendLog,
            _ => Operation::Control,
        }
    }

    /// Returns the `LS_op` value for control operations.
    #[must_use]
    pub const fn control_op(self) -> Option<&'static str> {
        match self {
            Self::Subscribe => Some("add"),
            Self::Unsubscribe => Some("delete"),
            Self::Reconfigure => Some("reconf"),
            Self::Register => Some("register"),
            Self::MpnSubscribe => Some("activate"),
            Self::MpnUnsubscribe | Self::MpnUnsubscribeFilter => Some("deactivate"),
            Self::Constrain => Some("constrain"),
            Self::SendMessage | Self::Log => None,
        }
    }

    fn slot(self) -> usize {
        match self {
            Self::Subscribe => 0,
            Self::Reconfigure => 1,
            Self::Unsubscribe => 2,
            Self::SendMessage => 3,
            Self::Register => 4,
            Self::MpnSubscribe => 5,
            Self::MpnUnsubscribe => 6,
            Self::MpnUnsubscribeFilter => 7,
            Self::Constrain => 8,
            Self::Log => 9,
        }
    }
}

/// Identity of a client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTag {
    /// Sequence the message belongs to.
    pub sequence: String,
    /// Progressive number within the sequence.
    pub prog: u64,
    /// Whether the server acknowledges the request.
    pub ack: bool,
}

/// A control request awaiting dispatch or acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    kind: RequestKind,
    params: Vec<(String, String)>,
    message: Option<MessageTag>,
    req_id: Option<ReqId>,
}

impl ControlRequest {
    fn with_params<I>(kind: RequestKind, params: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            kind,
            params: params.into_iter().collect(),
            message: None,
            req_id: None,
        }
    }

    /// Creates a subscription request.
    ///
    /// # Arguments
    /// * `sub_id` - Client-assigned subscription id
    /// * `params` - Subscription parameters such as items, fields and mode
    #[must_use]
    pub fn subscribe<I>(sub_id: u64, params: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut request = Self::with_params(RequestKind::Subscribe, params);
        request
            .params
            .insert(0, (params::SUB_ID.to_owned(), sub_id.to_string()));
        request
    }

    /// Creates an unsubscription request.
    #[must_use]
    pub fn unsubscribe(sub_id: u64) -> Self {
        Self::with_params(
            RequestKind::Unsubscribe,
            [(params::SUB_ID.to_owned(), sub_id.to_string())],
        )
    }

    /// Creates a subscription reconfiguration request.
    #[must_use]
    pub fn reconfigure<I>(sub_id: u64, params: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut request = Self::with_params(RequestKind::Reconfigure, params);
        request
            .params
            .insert(0, (params::SUB_ID.to_owned(), sub_id.to_string()));
        request
    }

    /// Creates a client message request.
    ///
    /// # Arguments
    /// * `text` - Message payload
    /// * `sequence` - Sequence name, `None` for unordered messages
    /// * `prog` - Progressive number within the sequence
    /// * `ack` - Whether the server should acknowledge the request
    #[must_use]
    pub fn message(text: &str, sequence: Option<&str>, prog: u64, ack: bool) -> Self {
        let mut request = Self::with_params(
            RequestKind::SendMessage,
            [(params::MESSAGE.to_owned(), text.to_owned())],
        );
        request.message = Some(MessageTag {
            sequence: sequence.unwrap_or(UNORDERED_SEQUENCE).to_owned(),
            prog,
            ack,
        });
        request
    }

    /// Creates a push notification device registration.
    #[must_use]
    pub fn register<I>(params: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self::with_params(RequestKind::Register, params)
    }

    /// Creates a push notification subscription.
    #[must_use]
    pub fn mpn_subscribe<I>(params: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self::with_params(RequestKind::MpnSubscribe, params)
    }

    /// Creates a push notification subscription removal.
    #[must_use]
    pub fn mpn_unsubscribe(pn_sub_id: &str) -> Self {
        Self::with_params(
            RequestKind::MpnUnsubscribe,
            [("PN_subscriptionId".to_owned(), pn_sub_id.to_owned())],
        )
    }

    /// Creates a push notification removal by filter.
    #[must_use]
    pub fn mpn_unsubscribe_filter<I>(params: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self::with_params(RequestKind::MpnUnsubscribeFilter, params)
    }

    /// Creates a bandwidth constraint request.
    #[must_use]
    pub fn constrain(bandwidth: Bandwidth) -> Self {
        Self::with_params(
            RequestKind::Constrain,
            [(
                params::REQUESTED_MAX_BANDWIDTH.to_owned(),
                bandwidth.to_param(),
            )],
        )
    }

    /// Creates a log forwarding request.
    #[must_use]
    pub fn log(text: &str) -> Self {
        Self::with_params(RequestKind::Log, [(params::LOG.to_owned(), text.to_owned())])
    }

    /// Returns the request category.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Returns the assigned request id, if dispatched.
    #[inline]
    #[must_use]
    pub const fn req_id(&self) -> Option<ReqId> {
        self.req_id
    }

    /// Returns the message identity for message requests.
    #[inline]
    #[must_use]
    pub fn message_tag(&self) -> Option<&MessageTag> {
        self.message.as_ref()
    }

    /// Returns true if the server answers this request with `REQOK`/`REQERR`.
    #[must_use]
    pub fn is_correlated(&self) -> bool {
        match self.kind {
            RequestKind::Log => false,
            RequestKind::SendMessage => self.message.as_ref().is_some_and(|m| m.ack),
            _ => true,
        }
    }

    /// Encodes the request as a control batch.
    #[must_use]
    pub fn encode(&self, req_id: ReqId, session: Option<&SessionId>) -> ControlBatch {
        let mut batch = ControlBatch::new(self.kind.operation());
        if self.kind != RequestKind::Log {
            batch.put_uint(params::REQ_ID, req_id.value());
        }
        if let Some(op) = self.kind.control_op() {
            batch.put_str(params::OP, op);
        }
        if let Some(session) = session {
            batch.put_str(params::SESSION, session.as_str());
        }
        for (name, value) in &self.params {
            batch.put_str(name, value);
        }
        if let Some(tag) = &self.message {
            if tag.sequence != UNORDERED_SEQUENCE {
                batch.put_str(params::SEQUENCE, &tag.sequence);
            }
            batch.put_uint(params::MSG_PROG, tag.prog);
            batch.put_bool(params::OUTCOME, true);
            batch.put_bool(params::ACK, tag.ack);
        }
        batch
    }
}

/// A request ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    /// Request id assigned to the request.
    pub req_id: ReqId,
    /// Request category.
    pub kind: RequestKind,
    /// Encoded batch.
    pub batch: ControlBatch,
    /// Whether the request now awaits a reply.
    pub correlated: bool,
    /// Message identity for message requests.
    pub message: Option<MessageTag>,
}

/// Table of pending and waiting control requests.
#[derive(Debug, Default)]
pub struct PendingRequestTable {
    next_id: u64,
    pending: BTreeMap<ReqId, ControlRequest>,
    waiting: [VecDeque<ControlRequest>; 10],
}

impl PendingRequestTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh request id.
    pub fn allocate_id(&mut self) -> ReqId {
        self.next_id += 1;
        ReqId::new(self.next_id)
    }

    /// Assigns an id to the request and encodes it for writing.
    ///
    /// Correlated requests are kept until resolved; the others complete as
    /// soon as they are written.
    pub fn send(&mut self, mut request: ControlRequest, session: Option<&SessionId>) -> Dispatch {
        let req_id = match request.req_id {
            Some(id) => id,
            None => self.allocate_id(),
        };
        request.req_id = Some(req_id);
        let batch = request.encode(req_id, session);
        let correlated = request.is_correlated();
        let dispatch = Dispatch {
            req_id,
            kind: request.kind,
            batch,
            correlated,
            message: request.message.clone(),
        };
        if correlated {
            self.pending.insert(req_id, request);
        }
        dispatch
    }

    /// Removes and returns the pending request with the given id.
    pub fn resolve(&mut self, req_id: ReqId) -> Option<ControlRequest> {
        self.pending.remove(&req_id)
    }

    /// Returns true if the request id is awaiting a reply.
    #[must_use]
    pub fn is_pending(&self, req_id: ReqId) -> bool {
        self.pending.contains_key(&req_id)
    }

    /// Queues a request until the session accepts control traffic.
    ///
    /// Constraint requests are coalesced: only the latest is kept.
    pub fn enqueue_waiting(&mut self, request: ControlRequest) {
        let queue = &mut self.waiting[request.kind.slot()];
        if request.kind == RequestKind::Constrain {
            queue.clear();
        }
        queue.push_back(request);
    }

    /// Dispatches every waiting request in flush order.
    pub fn flush_waiting(&mut self, session: Option<&SessionId>) -> Vec<Dispatch> {
        self.take_waiting()
            .into_iter()
            .map(|request| self.send(request, session))
            .collect()
    }

    /// Removes every waiting request in flush order without dispatching it.
    pub fn take_waiting(&mut self) -> Vec<ControlRequest> {
        let mut out = Vec::with_capacity(self.waiting_len());
        for kind in RequestKind::FLUSH_ORDER {
            out.extend(self.waiting[kind.slot()].drain(..));
        }
        out
    }

    /// Drains the pending table when the session it belongs to is discarded.
    pub fn discard(&mut self) -> Vec<(ReqId, ControlRequest)> {
        std::mem::take(&mut self.pending).into_iter().collect()
    }

    /// Returns the number of requests awaiting a reply.
    #[inline]
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Returns the number of waiting requests.
    #[must_use]
    pub fn waiting_len(&self) -> usize {
        self.waiting.iter().map(VecDeque::len).sum()
    }

    /// Returns the number of waiting requests of one category.
    #[must_use]
    pub fn waiting_of(&self, kind: RequestKind) -> usize {
        self.waiting[kind.slot()].len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionId {
        SessionId::new("S1").unwrap()
    }

    #[test]
    fn test_send_assigns_increasing_ids() {
        let mut table = PendingRequestTable::new();
        let a = table.send(ControlRequest::unsubscribe(1), None);
        let b = table.send(ControlRequest::unsubscribe(2), None);
        assert!(b.req_id > a.req_id);
        assert_eq!(table.pending_len(), 2);
    }

    #[test]
    fn test_encode_control_request() {
        let mut table = PendingRequestTable::new();
        let id = session();
        let dispatch = table.send(ControlRequest::unsubscribe(7), Some(&id));
        assert_eq!(
            dispatch.batch.finish(),
            "control\r\nLS_reqId=1&LS_op=delete&LS_session=S1&LS_subId=7"
        );
    }

    #[test]
    fn test_log_and_unacked_message_are_uncorrelated() {
        let mut table = PendingRequestTable::new();
        let log = table.send(ControlRequest::log("hello"), None);
        assert!(!log.correlated);
        assert!(!log.batch.has_param(params::REQ_ID));

        let msg = table.send(ControlRequest::message("hi", None, 1, false), None);
        assert!(!msg.correlated);
        assert_eq!(msg.message.unwrap().sequence, UNORDERED_SEQUENCE);
        assert_eq!(table.pending_len(), 0);
    }

    #[test]
    fn test_acked_message_is_pending() {
        let mut table = PendingRequestTable::new();
        let msg = table.send(ControlRequest::message("hi", Some("orders"), 4, true), None);
        assert!(msg.correlated);
        assert_eq!(msg.batch.param(params::SEQUENCE).unwrap(), "orders");
        assert_eq!(msg.batch.param(params::MSG_PROG).unwrap(), "4");
        let resolved = table.resolve(msg.req_id).unwrap();
        assert_eq!(resolved.kind(), RequestKind::SendMessage);
        assert!(table.resolve(msg.req_id).is_none());
    }

    #[test]
    fn test_unknown_resolve() {
        let mut table = PendingRequestTable::new();
        assert!(table.resolve(ReqId::new(99)).is_none());
    }

    #[test]
    fn test_flush_order() {
        let mut table = PendingRequestTable::new();
        table.enqueue_waiting(ControlRequest::log("l"));
        table.enqueue_waiting(ControlRequest::message("m", None, 1, true));
        table.enqueue_waiting(ControlRequest::unsubscribe(1));
        table.enqueue_waiting(ControlRequest::subscribe(2, []));
        table.enqueue_waiting(ControlRequest::reconfigure(2, []));
        let kinds: Vec<_> = table.flush_waiting(None).iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RequestKind::Subscribe,
                RequestKind::Reconfigure,
                RequestKind::Unsubscribe,
                RequestKind::SendMessage,
                RequestKind::Log,
            ]
        );
        assert_eq!(table.waiting_len(), 0);
    }

    #[test]
    fn test_constrain_is_coalesced() {
        let mut table = PendingRequestTable::new();
        table.enqueue_waiting(ControlRequest::constrain(Bandwidth::Limited(10.0)));
        table.enqueue_waiting(ControlRequest::constrain(Bandwidth::Unlimited));
        assert_eq!(table.waiting_of(RequestKind::Constrain), 1);
        let flushed = table.flush_waiting(None);
        assert_eq!(
            flushed[0].batch.param(params::REQUESTED_MAX_BANDWIDTH).unwrap(),
            "unlimited"
        );
    }

    #[test]
    fn test_discard_drains_pending() {
        let mut table = PendingRequestTable::new();
        table.send(ControlRequest::subscribe(1, []), None);
        table.send(ControlRequest::subscribe(2, []), None);
        let discarded = table.discard();
        assert_eq!(discarded.len(), 2);
        assert_eq!(table.pending_len(), 0);
    }
}
