//! # Link collaborator
//!
//! The management client does not speak AMQP itself. It drives a [`Session`], an already
//! established connection able to attach one sender and one receiver, and reacts to the
//! [`LinkEvent`]s that connection reports. Embedding deployments wrap their transport library in
//! these two pieces; tests and local runs use [`crate::MemoryBroker`].

use serde_json::Value;
use std::collections::BTreeMap;

/// Application property naming the management resource (`broker`, `queue.<name>`, ...).
pub const RESOURCE_NAME: &str = "_AMQ_ResourceName";
/// Application property naming the management operation.
pub const OPERATION_NAME: &str = "_AMQ_OperationName";
/// Application property set by the broker on replies; truthy on success.
pub const OPERATION_SUCCEEDED: &str = "_AMQ_OperationSucceeded";
/// Reply address, duplicated in the application properties for the broker's JMS layer.
pub const JMS_REPLY_TO: &str = "JMSReplyTo";

/// Address of the broker's management endpoint.
pub const MANAGEMENT_ADDRESS: &str = "activemq.management";

/// A message exchanged with the management endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManagementMessage {
    pub application_properties: BTreeMap<String, Value>,
    pub body: Option<String>,
    pub reply_to: Option<String>,
    pub correlation_id: Option<String>,
}

impl ManagementMessage {
    /// Builds a request: the parameters are carried as a JSON array body.
    pub fn request(resource: &str, operation: &str, parameters: &[Value]) -> Self {
        let mut application_properties = BTreeMap::new();
        application_properties.insert(RESOURCE_NAME.to_string(), Value::from(resource));
        application_properties.insert(OPERATION_NAME.to_string(), Value::from(operation));
        ManagementMessage {
            application_properties,
            body: Some(Value::Array(parameters.to_vec()).to_string()),
            reply_to: None,
            correlation_id: None,
        }
    }

    /// Builds a reply as the broker would send it.
    pub fn reply(succeeded: bool, body: Option<String>) -> Self {
        let mut application_properties = BTreeMap::new();
        application_properties.insert(OPERATION_SUCCEEDED.to_string(), Value::Bool(succeeded));
        ManagementMessage {
            application_properties,
            body,
            reply_to: None,
            correlation_id: None,
        }
    }

    pub fn resource(&self) -> Option<&str> {
        self.application_properties
            .get(RESOURCE_NAME)
            .and_then(Value::as_str)
    }

    pub fn operation(&self) -> Option<&str> {
        self.application_properties
            .get(OPERATION_NAME)
            .and_then(Value::as_str)
    }

    /// Decoded request parameters; an absent or malformed body yields no parameters.
    pub fn parameters(&self) -> Vec<Value> {
        self.body
            .as_deref()
            .and_then(|b| serde_json::from_str::<Vec<Value>>(b).ok())
            .unwrap_or_default()
    }

    pub fn succeeded(&self) -> bool {
        self.application_properties
            .get(OPERATION_SUCCEEDED)
            .map_or(false, truthy)
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Lifecycle and traffic notifications from the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The connection (re)opened; the container id identifies it in logs.
    ConnectionOpen { container_id: String },
    SenderOpen,
    /// The peer granted `n` more credits on the sender.
    Credit(u32),
    /// The peer accepted a message sent on the sender.
    Accepted,
    /// The receiver attached; `address` is its source address.
    ReceiverOpen { address: String },
    Message(ManagementMessage),
    SenderError(String),
    ReceiverError(String),
    ConnectionError(String),
    ConnectionClose,
    Disconnected,
    SocketError(String),
}

/// Connection to the broker able to carry the management link pair.
///
/// Calls are non-blocking; their outcome is reported through [`LinkEvent`]s.
pub trait Session: Send + Sync + 'static {
    fn container_id(&self) -> String;

    fn open_sender(&self, address: &str);

    fn open_receiver(&self, address: &str);

    fn send(&self, message: ManagementMessage);

    fn close(&self);
}
