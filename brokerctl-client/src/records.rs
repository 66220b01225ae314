//! Records the broker reports through its management listings.

use brokerctl_core::AddressKind;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub const ANYCAST: &str = "ANYCAST";
pub const MULTICAST: &str = "MULTICAST";

/// Queue attribute names of the broker listing and the names used by the controller.
const QUEUE_ATTRIBUTE_ALIASES: [(&str, &str); 9] = [
    ("isTemporary", "temporary"),
    ("isDurable", "durable"),
    ("messageCount", "messages"),
    ("consumerCount", "consumers"),
    ("messagesAdded", "enqueued"),
    ("deliveringCount", "delivering"),
    ("messagesAcked", "acknowledged"),
    ("messagesExpired", "expired"),
    ("messagesKilled", "killed"),
];

/// Converts the stringly typed values of a queue listing: numeric strings become numbers,
/// `"true"`/`"false"` become booleans and nulls are dropped.
fn correct_type(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            if s == "true" {
                Some(Value::Bool(true))
            } else if s == "false" {
                Some(Value::Bool(false))
            } else if let Ok(i) = s.trim().parse::<i64>() {
                Some(Value::from(i))
            } else if let Some(n) = s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .and_then(serde_json::Number::from_f64)
            {
                Some(Value::Number(n))
            } else {
                Some(Value::String(s))
            }
        }
        other => Some(other),
    }
}

/// Type corrects and renames the attributes of one raw queue record.
pub fn normalize_queue_record(raw: Map<String, Value>) -> Map<String, Value> {
    let mut record: Map<String, Value> = raw
        .into_iter()
        .filter_map(|(k, v)| correct_type(v).map(|v| (k, v)))
        .collect();
    for (from, to) in QUEUE_ATTRIBUTE_ALIASES {
        if let Some(value) = record.remove(from) {
            record.insert(to.to_string(), value);
        }
    }
    record
}

/// A queue as reported by `listQueues`, after normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BrokerQueue {
    pub name: String,
    pub address: String,
    pub routing_type: String,
    pub durable: bool,
    pub temporary: bool,
    pub purge_on_no_consumers: bool,
    pub max_consumers: i64,
    pub messages: i64,
    pub consumers: i64,
    pub enqueued: i64,
    pub delivering: i64,
    pub acknowledged: i64,
    pub expired: i64,
    pub killed: i64,
}

impl BrokerQueue {
    pub fn from_record(record: &Map<String, Value>) -> Self {
        let text = |key: &str| match record.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let flag = |key: &str| record.get(key).and_then(Value::as_bool).unwrap_or(false);
        let count = |key: &str| {
            record
                .get(key)
                .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
                .unwrap_or(0)
        };
        BrokerQueue {
            name: text("name"),
            address: text("address"),
            routing_type: text("routingType"),
            durable: flag("durable"),
            temporary: flag("temporary"),
            purge_on_no_consumers: flag("purgeOnNoConsumers"),
            max_consumers: count("maxConsumers"),
            messages: count("messages"),
            consumers: count("consumers"),
            enqueued: count("enqueued"),
            delivering: count("delivering"),
            acknowledged: count("acknowledged"),
            expired: count("expired"),
            killed: count("killed"),
        }
    }

    pub fn is_multicast(&self) -> bool {
        self.routing_type == MULTICAST
    }

    pub fn is_anycast(&self) -> bool {
        self.routing_type == ANYCAST
    }

    /// Durable MULTICAST queues that survive their consumers are subscriptions.
    pub fn is_durable_subscription(&self) -> bool {
        self.durable && !self.purge_on_no_consumers
    }
}

/// An address as reported by `listAddresses`.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerAddress {
    pub name: String,
    /// `Topic` when the address routes MULTICAST, `Queue` when only ANYCAST, `None` otherwise.
    pub kind: Option<AddressKind>,
}

impl BrokerAddress {
    pub fn from_record(record: &Map<String, Value>) -> Self {
        let name = record
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let routing_types = record
            .get("routingTypes")
            .and_then(Value::as_str)
            .unwrap_or_default();
        BrokerAddress {
            name,
            kind: routing_types_to_kind(routing_types),
        }
    }
}

fn routing_types_to_kind(routing_types: &str) -> Option<AddressKind> {
    if routing_types.contains(MULTICAST) {
        Some(AddressKind::Topic)
    } else if routing_types.contains(ANYCAST) {
        Some(AddressKind::Queue)
    } else {
        None
    }
}

/// Accepts ids the broker reports either as strings or as numbers.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(rename = "connectionID", deserialize_with = "string_or_number")]
    pub connection_id: String,
    #[serde(rename = "clientAddress", default)]
    pub client_address: String,
    #[serde(rename = "creationTime", default)]
    pub creation_time: Option<i64>,
    #[serde(default)]
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    #[serde(rename = "sessionID", deserialize_with = "string_or_number")]
    pub session_id: String,
    #[serde(default)]
    pub principal: Option<String>,
    #[serde(rename = "creationTime", default)]
    pub creation_time: Option<i64>,
    #[serde(rename = "consumerCount", default)]
    pub consumer_count: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProducerInfo {
    #[serde(rename = "connectionID", deserialize_with = "string_or_number")]
    pub connection_id: String,
    #[serde(rename = "sessionID", deserialize_with = "string_or_number")]
    pub session_id: String,
    #[serde(default)]
    pub destination: String,
    #[serde(rename = "msgSent", default)]
    pub msg_sent: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumerInfo {
    #[serde(rename = "consumerID", deserialize_with = "string_or_number")]
    pub consumer_id: String,
    #[serde(rename = "connectionID", deserialize_with = "string_or_number")]
    pub connection_id: String,
    #[serde(rename = "sessionID", deserialize_with = "string_or_number")]
    pub session_id: String,
    #[serde(rename = "queueName", default)]
    pub queue_name: String,
}
