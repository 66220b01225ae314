//! Normalization of raw broker counters into per-address and per-connection stats.

use brokerctl_client::{
    AddressIndex, BrokerManagement, BrokerQueue, ConnectionInfo, ConsumerInfo, ProducerInfo,
    TopicStats,
};
use brokerctl_core::{stable_uuid, AddressKind};
use metrics::counter;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{LazyLock, Mutex};
use tokio::time::{Duration, Instant};
use tracing::info;
use uuid::Uuid;

use crate::controller_metrics::STATS_RETRIEVALS_TOTAL;
use crate::errors::Result;

const PROPAGATED: u8 = 100;
const CONTAINER_NOT_AVAILABLE: &str = "not available";
const RETRIEVAL_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Identity of the address space the broker serves, stamped on connection stats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressSpaceInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, rename = "type")]
    pub space_type: String,
}

/// A producer or consumer attached to an address.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkStats {
    pub uuid: Uuid,
    pub name: Option<String>,
    pub connection_id: String,
    pub address: String,
    pub deliveries: i64,
}

impl LinkStats {
    fn producer(raw: &ProducerInfo) -> Self {
        LinkStats {
            uuid: stable_uuid(&[&raw.connection_id, &raw.session_id, &raw.destination]),
            name: None,
            connection_id: raw.connection_id.clone(),
            address: raw.destination.clone(),
            deliveries: raw.msg_sent,
        }
    }

    /// The consumer's address is its queue name until resolved to the parent address.
    fn consumer(raw: &ConsumerInfo) -> Self {
        LinkStats {
            uuid: stable_uuid(&[&raw.connection_id, &raw.session_id, &raw.consumer_id]),
            name: Some(raw.consumer_id.clone()),
            connection_id: raw.connection_id.clone(),
            address: raw.queue_name.clone(),
            deliveries: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EgressOutcomes {
    pub links: Vec<LinkStats>,
    pub accepted: i64,
    pub unsettled: i64,
    pub rejected: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngressOutcomes {
    pub links: Vec<LinkStats>,
    pub accepted: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Outcomes {
    pub egress: EgressOutcomes,
    pub ingress: IngressOutcomes,
}

/// The broker-side records an address's stats were derived from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Shard {
    Queue(BrokerQueue),
    Topic(TopicStats),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddressStats {
    pub kind: AddressKind,
    pub receivers: i64,
    pub senders: i64,
    pub depth: i64,
    pub messages_in: i64,
    pub messages_out: i64,
    pub propagated: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub durable_subscription_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inactive_durable_subscription_count: Option<usize>,
    pub shards: Vec<Shard>,
    pub outcomes: Outcomes,
}

impl AddressStats {
    fn from_queue(kind: AddressKind, queue: &BrokerQueue) -> Self {
        AddressStats {
            kind,
            receivers: queue.consumers,
            senders: 0,
            depth: queue.messages,
            messages_in: queue.enqueued,
            messages_out: queue.acknowledged + queue.expired + queue.killed,
            propagated: PROPAGATED,
            subscription_count: None,
            durable_subscription_count: None,
            inactive_durable_subscription_count: None,
            shards: vec![Shard::Queue(queue.clone())],
            outcomes: Outcomes {
                egress: EgressOutcomes {
                    links: Vec::new(),
                    accepted: queue.acknowledged,
                    unsettled: queue.delivering,
                    rejected: queue.killed,
                },
                ingress: IngressOutcomes {
                    links: Vec::new(),
                    accepted: queue.enqueued,
                },
            },
        }
    }

    fn from_topic(topic: &TopicStats) -> Self {
        let sum = |field: fn(&BrokerQueue) -> i64| topic.subscriptions.iter().map(field).sum::<i64>();
        let acknowledged = sum(|q| q.acknowledged);
        AddressStats {
            kind: AddressKind::Topic,
            receivers: topic.subscription_count as i64,
            senders: 0,
            depth: topic.enqueued,
            messages_in: sum(|q| q.enqueued),
            messages_out: acknowledged,
            propagated: PROPAGATED,
            subscription_count: Some(topic.subscription_count),
            durable_subscription_count: Some(topic.durable_subscription_count),
            inactive_durable_subscription_count: Some(topic.inactive_durable_subscription_count),
            shards: vec![Shard::Topic(topic.clone())],
            outcomes: Outcomes {
                egress: EgressOutcomes {
                    links: Vec::new(),
                    accepted: acknowledged,
                    unsettled: sum(|q| q.delivering),
                    rejected: sum(|q| q.killed),
                },
                ingress: IngressOutcomes {
                    links: Vec::new(),
                    accepted: topic.enqueued,
                },
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStats {
    pub id: String,
    pub address_space: String,
    pub address_space_namespace: String,
    pub address_space_type: String,
    pub uuid: Uuid,
    pub host: String,
    pub container: String,
    /// Seconds since the epoch.
    pub creation_timestamp: i64,
    pub user: String,
    pub senders: Vec<LinkStats>,
    pub receivers: Vec<LinkStats>,
    pub messages_in: i64,
}

impl ConnectionStats {
    fn new(raw: &ConnectionInfo, space: &AddressSpaceInfo) -> Self {
        ConnectionStats {
            id: raw.connection_id.clone(),
            address_space: space.name.clone(),
            address_space_namespace: space.namespace.clone(),
            address_space_type: space.space_type.clone(),
            uuid: stable_uuid(&[
                &space.namespace,
                &space.name,
                &raw.connection_id,
                &raw.client_address,
            ]),
            host: raw.client_address.clone(),
            container: CONTAINER_NOT_AVAILABLE.to_string(),
            creation_timestamp: raw.creation_time.map_or(0, |ms| ms.div_euclid(1000)),
            user: raw
                .sessions
                .first()
                .and_then(|s| s.principal.clone())
                .unwrap_or_default(),
            senders: Vec::new(),
            receivers: Vec::new(),
            messages_in: 0,
        }
    }

    /// Connections the controller's own management users (`agent.<id>`) open.
    pub fn is_internal(&self) -> bool {
        is_agent_user(&self.user)
    }
}

static AGENT_USER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^agent.[a-z0-9]+$").expect("valid agent user regex"));

fn is_agent_user(user: &str) -> bool {
    AGENT_USER.is_match(user)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BrokerStats {
    pub addresses: BTreeMap<String, AddressStats>,
    pub connections: BTreeMap<String, ConnectionStats>,
}

/// Builds the stats of one poll from the raw listings.
pub fn build_stats(
    index: &AddressIndex,
    connections: &[ConnectionInfo],
    producers: &[ProducerInfo],
    consumers: &[ConsumerInfo],
    space: &AddressSpaceInfo,
) -> BrokerStats {
    let mut addresses = BTreeMap::new();
    for (name, entry) in &index.entries {
        let stats = match (entry.kind, &entry.queue, &entry.topic_stats) {
            (Some(AddressKind::Topic), _, Some(topic)) => AddressStats::from_topic(topic),
            (Some(kind), Some(queue), _) => AddressStats::from_queue(kind, queue),
            _ => continue,
        };
        addresses.insert(name.clone(), stats);
    }

    let mut connections: BTreeMap<String, ConnectionStats> = connections
        .iter()
        .map(|raw| ConnectionStats::new(raw, space))
        .filter(|c| !c.is_internal())
        .map(|c| (c.id.clone(), c))
        .collect();

    let senders: Vec<LinkStats> = producers.iter().map(LinkStats::producer).collect();
    let receivers: Vec<LinkStats> = consumers
        .iter()
        .map(|raw| {
            let mut link = LinkStats::consumer(raw);
            if let Some(address) = index.address_of(&link.address) {
                link.address = address.to_string();
            }
            link
        })
        .collect();

    for link in &senders {
        if let Some(connection) = connections.get_mut(&link.connection_id) {
            connection.senders.push(link.clone());
        }
        if let Some(address) = addresses.get_mut(&link.address) {
            address.outcomes.ingress.links.push(link.clone());
            address.senders = address.outcomes.ingress.links.len() as i64;
        }
    }
    for link in &receivers {
        if let Some(connection) = connections.get_mut(&link.connection_id) {
            connection.receivers.push(link.clone());
        }
        if let Some(address) = addresses.get_mut(&link.address) {
            address.outcomes.egress.links.push(link.clone());
        }
    }
    for connection in connections.values_mut() {
        connection.messages_in = connection.senders.iter().map(|s| s.deliveries).sum();
    }

    BrokerStats {
        addresses,
        connections,
    }
}

#[derive(Debug, Default)]
struct RetrievalLog {
    count: u64,
    last: Option<Instant>,
}

/// Pulls address, connection, producer and consumer data from the broker.
///
/// Holds no state between polls other than the counters behind the retrieval log line.
pub struct StatsCollector {
    broker: BrokerManagement,
    space: AddressSpaceInfo,
    log: Mutex<RetrievalLog>,
}

impl StatsCollector {
    pub fn new(broker: BrokerManagement, space: AddressSpaceInfo) -> Self {
        StatsCollector {
            broker,
            space,
            log: Mutex::new(RetrievalLog::default()),
        }
    }

    pub async fn retrieve(&self) -> Result<BrokerStats> {
        let (index, connections, producers, consumers) = tokio::try_join!(
            self.broker.address_index(true, true),
            self.broker.list_connections_with_sessions(),
            self.broker.list_producers(),
            self.broker.list_consumers(),
        )?;
        let stats = build_stats(&index, &connections, &producers, &consumers, &self.space);
        counter!(STATS_RETRIEVALS_TOTAL.name).increment(1);
        self.log_retrieval();
        Ok(stats)
    }

    /// Logs the first retrieval, then at most once a minute with the count since the last line.
    fn log_retrieval(&self) {
        let mut log = self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        log.count += 1;
        let now = Instant::now();
        match log.last {
            None => {
                info!(id = %self.broker.id(), count = log.count, "broker stats retrieved");
                log.last = Some(now);
            }
            Some(last) if now.duration_since(last) >= RETRIEVAL_LOG_INTERVAL => {
                info!(
                    id = %self.broker.id(),
                    count = log.count,
                    secs = now.duration_since(last).as_secs(),
                    "broker stats retrieved"
                );
                log.count = 0;
                log.last = Some(now);
            }
            Some(_) => {}
        }
    }
}
