//! # Management client tests
//!
//! The link is driven by hand: a scripted session records what the client asks of the
//! connection, and the tests feed link events back in whatever order the scenario needs.
//!
//! ## Coverage
//! - **Lifecycle**: reply queue provisioning, receiver attach, reconnect after a drop
//! - **FIFO correlation**: replies resolve requests strictly in send order
//! - **Flow control**: requests buffer until ready and flush up to the granted credit; the
//!   reply queue request uses up credit like any other send
//! - **Stale attach**: a receiver attach arriving after a drop leaves the link disconnected
//! - **Abort**: every pending request fails once with the reason; repeated aborts are no-ops
//! - **Timeouts**: a timed out request keeps its slot so later replies stay correlated

use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use super::*;

#[derive(Debug, Clone, PartialEq)]
enum SessionCall {
    OpenSender(String),
    OpenReceiver(String),
    Send(ManagementMessage),
    Close,
}

#[derive(Default)]
struct ScriptedSession {
    calls: Mutex<Vec<SessionCall>>,
}

impl ScriptedSession {
    fn calls(&self) -> Vec<SessionCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Requests sent with a reply address, in wire order.
    fn requests(&self) -> Vec<ManagementMessage> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SessionCall::Send(m) if m.reply_to.is_some() => Some(m),
                _ => None,
            })
            .collect()
    }
}

impl Session for ScriptedSession {
    fn container_id(&self) -> String {
        "scripted".to_string()
    }

    fn open_sender(&self, address: &str) {
        self.calls
            .lock()
            .unwrap()
            .push(SessionCall::OpenSender(address.to_string()));
    }

    fn open_receiver(&self, address: &str) {
        self.calls
            .lock()
            .unwrap()
            .push(SessionCall::OpenReceiver(address.to_string()));
    }

    fn send(&self, message: ManagementMessage) {
        self.calls.lock().unwrap().push(SessionCall::Send(message));
    }

    fn close(&self) {
        self.calls.lock().unwrap().push(SessionCall::Close);
    }
}

struct Harness {
    client: ManagementClient,
    session: Arc<ScriptedSession>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl Harness {
    fn new(options: ClientOptions) -> Self {
        let session = Arc::new(ScriptedSession::default());
        let (events, event_rx) = mpsc::unbounded_channel();
        let client = ManagementClient::start(session.clone(), event_rx, options);
        Harness {
            client,
            session,
            events,
        }
    }

    fn emit(&self, event: LinkEvent) {
        self.events.send(event).unwrap();
    }

    /// Walks the link to `Ready` and grants `credit` for requests, on top of the one the reply
    /// queue request takes.
    async fn bring_up(&self, credit: u32) {
        self.emit(LinkEvent::ConnectionOpen {
            container_id: "scripted".to_string(),
        });
        self.emit(LinkEvent::SenderOpen);
        settle().await;
        let address = self.reply_address().expect("reply queue requested");
        self.emit(LinkEvent::Accepted);
        self.emit(LinkEvent::ReceiverOpen { address });
        self.emit(LinkEvent::Credit(credit + 1));
        settle().await;
        assert_eq!(self.client.state(), LinkState::Ready);
    }

    fn reply_address(&self) -> Option<String> {
        self.session.calls().into_iter().find_map(|c| match c {
            SessionCall::Send(m) if m.reply_to.is_none() => {
                m.parameters().first().and_then(|v| v.as_str().map(String::from))
            }
            _ => None,
        })
    }

    fn call(&self, operation: &str) -> JoinHandle<Result<Value>> {
        let client = self.client.clone();
        let operation = operation.to_string();
        tokio::spawn(async move { client.call("broker", &operation, vec![]).await })
    }

    fn reply(&self, body: &str) {
        self.emit(LinkEvent::Message(ManagementMessage::reply(
            true,
            Some(body.to_string()),
        )));
    }
}

async fn settle() {
    sleep(Duration::from_millis(5)).await;
}

fn operations(messages: &[ManagementMessage]) -> Vec<String> {
    messages
        .iter()
        .map(|m| m.operation().unwrap_or_default().to_string())
        .collect()
}

/// The reply queue is provisioned without a reply address and the receiver attaches to it only
/// after the broker accepted the request.
#[tokio::test]
async fn provisions_reply_queue_before_attaching_receiver() {
    let h = Harness::new(ClientOptions::default());
    h.emit(LinkEvent::ConnectionOpen {
        container_id: "scripted".to_string(),
    });
    settle().await;
    assert_eq!(h.client.state(), LinkState::SenderOpening);
    assert_eq!(
        h.session.calls(),
        vec![SessionCall::OpenSender(MANAGEMENT_ADDRESS.to_string())]
    );

    h.emit(LinkEvent::SenderOpen);
    settle().await;
    assert_eq!(h.client.state(), LinkState::ReplyQueueProvisioning);
    let address = h.reply_address().unwrap();
    assert!(address.starts_with(REPLY_QUEUE_PREFIX));

    let SessionCall::Send(provision) = &h.session.calls()[1] else {
        panic!("expected the reply queue request");
    };
    assert_eq!(provision.operation(), Some("createQueue"));
    assert_eq!(
        provision.parameters(),
        vec![
            json!(address),
            json!("ANYCAST"),
            json!(address),
            Value::Null,
            json!(false),
            json!(1),
            json!(true),
            json!(true)
        ]
    );

    h.emit(LinkEvent::Accepted);
    settle().await;
    assert_eq!(h.client.state(), LinkState::ReceiverOpening);
    assert_eq!(
        h.session.calls().last(),
        Some(&SessionCall::OpenReceiver(address.clone()))
    );

    h.emit(LinkEvent::ReceiverOpen { address });
    settle().await;
    assert!(h.client.is_ready());
}

/// Concurrent callers each receive the reply to their own request.
#[tokio::test]
async fn replies_resolve_requests_in_send_order() {
    let h = Harness::new(ClientOptions::default());
    h.bring_up(10).await;

    let a = h.call("first");
    settle().await;
    let b = h.call("second");
    settle().await;
    let c = h.call("third");
    settle().await;

    let requests = h.session.requests();
    assert_eq!(operations(&requests), vec!["first", "second", "third"]);
    let reply_to = requests[0].reply_to.clone().unwrap();
    assert_eq!(
        requests[0].application_properties.get(JMS_REPLY_TO),
        Some(&json!(reply_to))
    );

    h.reply(r#"["one"]"#);
    h.reply(r#"["two"]"#);
    h.reply(r#"["three"]"#);

    assert_eq!(a.await.unwrap().unwrap(), json!("one"));
    assert_eq!(b.await.unwrap().unwrap(), json!("two"));
    assert_eq!(c.await.unwrap().unwrap(), json!("three"));
    assert_eq!(h.client.made(), 3);
    assert_eq!(h.client.completed(), 3);
    assert_eq!(h.client.pending_len(), 0);
}

/// Requests made before the link is ready are buffered, then sent in submission order as
/// credit allows.
#[tokio::test]
async fn buffered_requests_flush_in_order_up_to_credit() {
    let h = Harness::new(ClientOptions::default());
    let a = h.call("a");
    settle().await;
    let b = h.call("b");
    settle().await;
    let c = h.call("c");
    settle().await;
    assert!(h.session.requests().is_empty());

    h.bring_up(2).await;
    assert_eq!(operations(&h.session.requests()), vec!["a", "b"]);

    h.emit(LinkEvent::Credit(1));
    settle().await;
    assert_eq!(operations(&h.session.requests()), vec!["a", "b", "c"]);

    h.reply(r#"[1]"#);
    h.reply(r#"[2]"#);
    h.reply(r#"[3]"#);
    assert_eq!(a.await.unwrap().unwrap(), json!(1));
    assert_eq!(b.await.unwrap().unwrap(), json!(2));
    assert_eq!(c.await.unwrap().unwrap(), json!(3));
}

/// The reply queue request goes out as soon as the sender attaches and is charged against the
/// first credit granted afterwards, so a single credit leaves none for the first call.
#[tokio::test]
async fn reply_queue_request_consumes_credit() {
    let h = Harness::new(ClientOptions::default());
    h.emit(LinkEvent::ConnectionOpen {
        container_id: "scripted".to_string(),
    });
    h.emit(LinkEvent::SenderOpen);
    h.emit(LinkEvent::Credit(1));
    settle().await;
    let address = h.reply_address().unwrap();
    h.emit(LinkEvent::Accepted);
    h.emit(LinkEvent::ReceiverOpen { address });
    settle().await;
    assert!(h.client.is_ready());

    let call = h.call("getQueueNames");
    settle().await;
    let sent = |h: &Harness| {
        h.session
            .calls()
            .iter()
            .filter(|c| matches!(c, SessionCall::Send(_)))
            .count()
    };
    assert_eq!(sent(&h), 1);
    assert!(h.session.requests().is_empty());

    h.emit(LinkEvent::Credit(1));
    settle().await;
    assert_eq!(sent(&h), 2);
    assert_eq!(operations(&h.session.requests()), vec!["getQueueNames"]);

    h.reply(r#"[["q1"]]"#);
    assert_eq!(call.await.unwrap().unwrap(), json!(["q1"]));
}

/// A receiver attach that arrives after the connection dropped does not make the link ready.
#[tokio::test]
async fn late_receiver_open_is_ignored() {
    let h = Harness::new(ClientOptions::default());
    h.emit(LinkEvent::ConnectionOpen {
        container_id: "scripted".to_string(),
    });
    h.emit(LinkEvent::SenderOpen);
    settle().await;
    let address = h.reply_address().unwrap();
    h.emit(LinkEvent::Accepted);
    settle().await;
    assert_eq!(h.client.state(), LinkState::ReceiverOpening);

    h.emit(LinkEvent::Disconnected);
    h.emit(LinkEvent::ReceiverOpen { address });
    h.emit(LinkEvent::Credit(5));
    settle().await;
    assert_eq!(h.client.state(), LinkState::Disconnected);

    let call = h.call("getQueueNames");
    settle().await;
    assert!(h.session.requests().is_empty());
    h.client.close().await;
    assert!(call.await.unwrap().is_err());
}

/// A disconnect fails sent and buffered requests alike, exactly once; a second abort and a
/// late reply change nothing.
#[tokio::test]
async fn abort_fails_every_pending_request_once() {
    let h = Harness::new(ClientOptions::default());
    h.bring_up(2).await;

    let mut calls = Vec::new();
    for op in ["a", "b", "c"] {
        calls.push(h.call(op));
        settle().await;
    }
    assert_eq!(h.session.requests().len(), 2);
    assert_eq!(h.client.pending_len(), 3);

    h.emit(LinkEvent::Disconnected);
    settle().await;
    for call in calls {
        assert_eq!(
            call.await.unwrap(),
            Err(ManagementError::Aborted("disconnected".to_string()))
        );
    }
    assert_eq!(h.client.state(), LinkState::Disconnected);
    assert_eq!(h.client.completed(), 3);

    h.emit(LinkEvent::ConnectionClose);
    h.reply(r#"["late"]"#);
    settle().await;
    assert_eq!(h.client.made(), 3);
    assert_eq!(h.client.completed(), 3);
}

/// Errors on the links carry the container id and the link in their reason.
#[tokio::test]
async fn link_errors_abort_with_descriptive_reason() {
    let h = Harness::new(ClientOptions::default());
    h.bring_up(5).await;

    let call = h.call("getQueueNames");
    settle().await;
    h.emit(LinkEvent::SenderError("amqp:link:detach-forced".to_string()));
    assert_eq!(
        call.await.unwrap(),
        Err(ManagementError::Aborted(
            "scripted sender error amqp:link:detach-forced".to_string()
        ))
    );

    // socket errors are only logged
    h.emit(LinkEvent::SocketError("ECONNRESET".to_string()));
    settle().await;
    assert_eq!(h.client.state(), LinkState::Disconnected);
}

/// After a drop the next connection open re-attaches the sender and provisions a fresh reply
/// queue; requests made in between go out once the link is ready again.
#[tokio::test]
async fn reconnect_reprovisions_and_flushes() {
    let h = Harness::new(ClientOptions::default());
    h.bring_up(5).await;
    h.emit(LinkEvent::Disconnected);
    settle().await;

    let call = h.call("getAddressNames");
    settle().await;
    assert!(h.session.requests().is_empty());

    h.emit(LinkEvent::ConnectionOpen {
        container_id: "scripted".to_string(),
    });
    h.emit(LinkEvent::SenderOpen);
    settle().await;
    let addresses: Vec<String> = h
        .session
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            SessionCall::Send(m) if m.reply_to.is_none() => {
                m.parameters().first().and_then(|v| v.as_str().map(String::from))
            }
            _ => None,
        })
        .collect();
    assert_eq!(addresses.len(), 2);
    assert_ne!(addresses[0], addresses[1]);

    h.emit(LinkEvent::Accepted);
    h.emit(LinkEvent::ReceiverOpen {
        address: addresses[1].clone(),
    });
    h.emit(LinkEvent::Credit(5));
    settle().await;
    assert_eq!(h.session.requests()[0].reply_to.as_deref(), Some(addresses[1].as_str()));

    h.reply(r#"[["a","b"]]"#);
    assert_eq!(call.await.unwrap().unwrap(), json!(["a", "b"]));
}

/// Failure replies carry the raw body; success without a body resolves to `true`.
#[tokio::test]
async fn reply_decoding() {
    let h = Harness::new(ClientOptions::default());
    h.bring_up(10).await;

    let failed = h.call("destroyQueue");
    settle().await;
    let garbled = h.call("getQueueNames");
    settle().await;
    let empty = h.call("deleteAddress");
    settle().await;

    h.emit(LinkEvent::Message(ManagementMessage::reply(
        false,
        Some("AMQ229017: Queue q1 does not exist".to_string()),
    )));
    h.reply("not json");
    h.emit(LinkEvent::Message(ManagementMessage::reply(true, None)));

    assert_eq!(
        failed.await.unwrap(),
        Err(ManagementError::OperationFailed(
            "AMQ229017: Queue q1 does not exist".to_string()
        ))
    );
    assert_eq!(
        garbled.await.unwrap(),
        Err(ManagementError::OperationFailed("not json".to_string()))
    );
    assert_eq!(empty.await.unwrap(), Ok(Value::Bool(true)));
}

/// A caller that timed out gets `Timeout`, but its reply is still consumed so the next caller
/// receives its own.
#[tokio::test(start_paused = true)]
async fn timed_out_request_keeps_its_reply_slot() {
    let h = Harness::new(ClientOptions {
        call_timeout: Some(Duration::from_millis(100)),
        correlate_requests: true,
    });
    h.bring_up(10).await;

    let slow = h.call("slow");
    sleep(Duration::from_millis(200)).await;
    assert!(matches!(
        slow.await.unwrap(),
        Err(ManagementError::Timeout { .. })
    ));

    let next = h.call("next");
    settle().await;
    assert!(h.session.requests()[0].correlation_id.is_some());

    h.reply(r#"["for slow"]"#);
    h.reply(r#"["for next"]"#);
    assert_eq!(next.await.unwrap().unwrap(), json!("for next"));
}

/// Closing twice is harmless and later calls fail fast.
#[tokio::test]
async fn close_is_idempotent() {
    let h = Harness::new(ClientOptions::default());
    let pending = h.call("never");
    settle().await;

    h.client.close().await;
    h.client.close().await;

    assert_eq!(
        pending.await.unwrap(),
        Err(ManagementError::Aborted("scripted connection closed".to_string()))
    );
    assert_eq!(
        h.client.call("broker", "getQueueNames", vec![]).await,
        Err(ManagementError::Closed)
    );
    let closes = h
        .session
        .calls()
        .into_iter()
        .filter(|c| *c == SessionCall::Close)
        .count();
    assert_eq!(closes, 1);
}
