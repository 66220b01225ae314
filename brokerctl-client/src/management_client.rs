//! # Management client
//!
//! One logical connection's request/reply link pair to the broker management endpoint.
//!
//! A single background task owns the link state and the queue of pending requests; the public
//! [`ManagementClient`] handle only submits commands to it. Replies carry no usable correlation
//! id, so they are matched strictly in send order: the queue holds every request that has not
//! been answered yet, the first `sent` of which are on the wire.
//!
//! ## Link lifecycle
//!
//! `Disconnected → SenderOpening → ReplyQueueProvisioning → ReceiverOpening → Ready`
//!
//! - the sender to `activemq.management` is attached when the connection opens
//! - once it is open a temporary reply queue is created, fire-and-forget; the request uses up
//!   the first credit the peer grants
//! - acceptance of that request attaches the receiver on the reply queue
//! - when the receiver is open buffered requests are flushed, up to the sender's credit
//!
//! Any connection, sender or receiver failure drops back to `Disconnected` and fails every
//! pending request with the reason.

use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::{ManagementError, Result};
use crate::session::{LinkEvent, ManagementMessage, Session, JMS_REPLY_TO, MANAGEMENT_ADDRESS};

/// Prefix of the temporary queue replies are delivered to.
pub const REPLY_QUEUE_PREFIX: &str = "activemq.management.tmpreply.";

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    SenderOpening,
    ReplyQueueProvisioning,
    ReceiverOpening,
    Ready,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Time a caller waits for its reply. The request keeps its place in the reply order after
    /// the caller gave up. `None` waits forever.
    pub call_timeout: Option<Duration>,
    /// Stamp every request with a random correlation id; only useful when reading traces.
    pub correlate_requests: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            call_timeout: Some(DEFAULT_CALL_TIMEOUT),
            correlate_requests: false,
        }
    }
}

struct PendingRequest {
    resource: String,
    operation: String,
    parameters: Vec<Value>,
    reply: oneshot::Sender<Result<Value>>,
}

enum Command {
    Call(PendingRequest),
    Close(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct Counters {
    made: AtomicU64,
    completed: AtomicU64,
}

/// Handle to the management link of one broker connection.
#[derive(Clone)]
pub struct ManagementClient {
    session: Arc<dyn Session>,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<LinkState>,
    counters: Arc<Counters>,
    options: ClientOptions,
}

impl ManagementClient {
    /// Spawns the link task for `session`, driven by its `events`.
    pub fn start(
        session: Arc<dyn Session>,
        events: mpsc::UnboundedReceiver<LinkEvent>,
        options: ClientOptions,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(LinkState::Disconnected);
        let counters = Arc::new(Counters::default());

        let link = Link {
            session: Arc::clone(&session),
            id: session.container_id(),
            state: LinkState::Disconnected,
            state_tx,
            reply_to: None,
            provisioning: None,
            credit: 0,
            requests: VecDeque::new(),
            sent: 0,
            counters: Arc::clone(&counters),
            correlate: options.correlate_requests,
        };
        tokio::spawn(link.run(command_rx, events));

        ManagementClient {
            session,
            commands,
            state,
            counters,
            options,
        }
    }

    /// Invokes `operation` on the management `resource`.
    ///
    /// Resolves with the first element of the reply's JSON array body (`true` for an empty
    /// body), or fails with the raw reply body, the abort reason, or a timeout.
    pub async fn call(&self, resource: &str, operation: &str, parameters: Vec<Value>) -> Result<Value> {
        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Call(PendingRequest {
                resource: resource.to_string(),
                operation: operation.to_string(),
                parameters,
                reply,
            }))
            .map_err(|_| ManagementError::Closed)?;

        let outcome = match self.options.call_timeout {
            Some(limit) if !limit.is_zero() => match tokio::time::timeout(limit, reply_rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        id = %self.id(),
                        resource,
                        operation,
                        "no reply to management request within {:?}",
                        limit
                    );
                    return Err(ManagementError::Timeout {
                        resource: resource.to_string(),
                        operation: operation.to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            },
            _ => reply_rx.await,
        };
        outcome.map_err(|_| ManagementError::Closed)?
    }

    pub fn id(&self) -> String {
        self.session.container_id()
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == LinkState::Ready
    }

    /// Waits until the link is ready to send requests.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == LinkState::Ready)
            .await
            .map(|_| ())
            .map_err(|_| ManagementError::Closed)
    }

    pub fn made(&self) -> u64 {
        self.counters.made.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u64 {
        self.counters.completed.load(Ordering::SeqCst)
    }

    /// Requests submitted and not yet resolved by a reply or an abort.
    pub fn pending_len(&self) -> u64 {
        self.made().saturating_sub(self.completed())
    }

    pub fn log_info(&self) {
        info!(
            id = %self.id(),
            pending = self.pending_len(),
            made = self.made(),
            completed = self.completed(),
            ready = self.is_ready(),
            "management requests"
        );
    }

    /// Closes the connection, failing whatever is still pending. Calling it again is a no-op.
    pub async fn close(&self) {
        let (done, done_rx) = oneshot::channel();
        if self.commands.send(Command::Close(done)).is_err() {
            return;
        }
        let _ = done_rx.await;
    }
}

/// State owned by the link task.
struct Link {
    session: Arc<dyn Session>,
    id: String,
    state: LinkState,
    state_tx: watch::Sender<LinkState>,
    reply_to: Option<String>,
    provisioning: Option<String>,
    /// Negative while the reply queue request went out ahead of any granted credit.
    credit: i64,
    requests: VecDeque<PendingRequest>,
    sent: usize,
    counters: Arc<Counters>,
    correlate: bool,
}

impl Link {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        let mut events_open = true;
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Call(request)) => self.enqueue(request),
                    Some(Command::Close(done)) => {
                        self.shutdown();
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        events_open = false;
                        self.handle_event(LinkEvent::Disconnected);
                    }
                },
            }
        }
        debug!(id = %self.id, "management link task stopped");
    }

    fn set_state(&mut self, state: LinkState) {
        if self.state != state {
            debug!(id = %self.id, from = ?self.state, to = ?state, "management link state");
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }

    fn enqueue(&mut self, request: PendingRequest) {
        self.counters.made.fetch_add(1, Ordering::SeqCst);
        self.requests.push_back(request);
        self.flush();
    }

    /// The single dispatch point for link events.
    fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::ConnectionOpen { container_id } => {
                if container_id != self.id {
                    info!(id = %container_id, previous = %self.id, "connection opened");
                    self.id = container_id;
                } else {
                    info!(id = %self.id, "connection opened");
                }
                if self.state == LinkState::Disconnected {
                    self.session.open_sender(MANAGEMENT_ADDRESS);
                    self.set_state(LinkState::SenderOpening);
                }
            }
            LinkEvent::SenderOpen => {
                if self.state != LinkState::SenderOpening {
                    debug!(id = %self.id, state = ?self.state, "ignoring sender open");
                    return;
                }
                let address = format!("{}{}", REPLY_QUEUE_PREFIX, Uuid::new_v4());
                debug!(id = %self.id, %address, "sender ready, creating reply queue");
                self.session.send(reply_queue_request(&address));
                self.credit -= 1;
                self.provisioning = Some(address);
                self.set_state(LinkState::ReplyQueueProvisioning);
            }
            LinkEvent::Accepted => {
                if self.state != LinkState::ReplyQueueProvisioning {
                    return;
                }
                if let Some(address) = self.provisioning.take() {
                    self.session.open_receiver(&address);
                    self.set_state(LinkState::ReceiverOpening);
                }
            }
            LinkEvent::ReceiverOpen { address } => {
                if self.state != LinkState::ReceiverOpening {
                    debug!(id = %self.id, state = ?self.state, "ignoring receiver open");
                    return;
                }
                info!(id = %self.id, reply_to = %address, "ready to send requests");
                self.reply_to = Some(address);
                self.set_state(LinkState::Ready);
                self.flush();
            }
            LinkEvent::Credit(n) => {
                self.credit += i64::from(n);
                self.flush();
            }
            LinkEvent::Message(message) => self.incoming(message),
            LinkEvent::SenderError(e) => {
                let reason = format!("{} sender error {}", self.id, e);
                info!(id = %self.id, "{}", reason);
                self.disconnect(&reason);
            }
            LinkEvent::ReceiverError(e) => {
                let reason = format!("{} receiver error {}", self.id, e);
                info!(id = %self.id, "{}", reason);
                self.disconnect(&reason);
            }
            LinkEvent::ConnectionError(e) => {
                info!(id = %self.id, error = %e, "connection error");
                let reason = format!("{} connection error {}", self.id, e);
                self.disconnect(&reason);
            }
            LinkEvent::ConnectionClose => {
                info!(id = %self.id, "connection closed");
                let reason = format!("{} connection closed", self.id);
                self.disconnect(&reason);
            }
            LinkEvent::Disconnected => {
                info!(id = %self.id, "disconnected");
                self.disconnect("disconnected");
            }
            LinkEvent::SocketError(e) => {
                error!(id = %self.id, error = %e, "socket error");
            }
        }
    }

    /// Sends buffered requests in submission order while the link is ready and has credit.
    fn flush(&mut self) {
        if self.state != LinkState::Ready {
            return;
        }
        let Some(reply_to) = self.reply_to.clone() else {
            return;
        };
        while self.credit > 0 && self.sent < self.requests.len() {
            // unsent requests whose caller gave up are dropped; they hold no reply slot yet
            if self.requests[self.sent].reply.is_closed() {
                self.requests.remove(self.sent);
                self.counters.completed.fetch_add(1, Ordering::SeqCst);
                continue;
            }
            let request = &self.requests[self.sent];
            let mut message =
                ManagementMessage::request(&request.resource, &request.operation, &request.parameters);
            message
                .application_properties
                .insert(JMS_REPLY_TO.to_string(), Value::from(reply_to.as_str()));
            message.reply_to = Some(reply_to.clone());
            if self.correlate {
                message.correlation_id = Some(Uuid::new_v4().to_string());
            }
            debug!(
                id = %self.id,
                resource = %request.resource,
                operation = %request.operation,
                "sent management request"
            );
            self.session.send(message);
            self.sent += 1;
            self.credit -= 1;
        }
    }

    fn incoming(&mut self, message: ManagementMessage) {
        debug!(id = %self.id, body = ?message.body, "received management reply");
        if self.sent == 0 {
            warn!(id = %self.id, "reply received with no outstanding request, dropping it");
            return;
        }
        let Some(request) = self.requests.pop_front() else {
            return;
        };
        self.sent -= 1;
        self.counters.completed.fetch_add(1, Ordering::SeqCst);

        let result = decode_reply(&message);
        if let Err(e) = &result {
            debug!(
                id = %self.id,
                resource = %request.resource,
                operation = %request.operation,
                error = %e,
                "management request failed"
            );
        }
        // the caller may have timed out already
        let _ = request.reply.send(result);
    }

    /// Fails every pending request, sent or buffered, with `reason`.
    fn abort_all(&mut self, reason: &str) {
        if self.requests.is_empty() {
            return;
        }
        info!(
            id = %self.id,
            count = self.requests.len(),
            reason,
            "aborting pending management requests"
        );
        self.sent = 0;
        for request in self.requests.drain(..) {
            self.counters.completed.fetch_add(1, Ordering::SeqCst);
            let _ = request.reply.send(Err(ManagementError::Aborted(reason.to_string())));
        }
    }

    fn disconnect(&mut self, reason: &str) {
        self.reply_to = None;
        self.provisioning = None;
        self.credit = 0;
        self.set_state(LinkState::Disconnected);
        self.abort_all(reason);
    }

    fn shutdown(&mut self) {
        self.session.close();
        let reason = format!("{} connection closed", self.id);
        self.disconnect(&reason);
    }
}

/// Request creating the temporary reply queue: non-durable, at most one consumer, purged once
/// the consumer goes away, its address created on demand. No reply is expected.
fn reply_queue_request(address: &str) -> ManagementMessage {
    ManagementMessage::request(
        "broker",
        "createQueue",
        &[
            Value::from(address),
            Value::from("ANYCAST"),
            Value::from(address),
            Value::Null,
            Value::Bool(false),
            Value::from(1),
            Value::Bool(true),
            Value::Bool(true),
        ],
    )
}

pub(crate) fn decode_reply(message: &ManagementMessage) -> Result<Value> {
    let body = message.body.as_deref().unwrap_or_default();
    if !message.succeeded() {
        return Err(ManagementError::OperationFailed(body.to_string()));
    }
    if body.is_empty() {
        return Ok(Value::Bool(true));
    }
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Array(values)) => Ok(values.into_iter().next().unwrap_or(Value::Null)),
        Ok(_) => Ok(Value::Null),
        Err(e) => {
            info!(error = %e, "error parsing management reply body");
            Err(ManagementError::OperationFailed(body.to_string()))
        }
    }
}

#[cfg(test)]
#[path = "management_client_test.rs"]
mod management_client_test;
